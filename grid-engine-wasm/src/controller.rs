//! Grid controller: the move/undo state behind the browser grid.
//!
//! Time is passed in by the caller (milliseconds, e.g. `performance.now()`),
//! so animation locks and colour flashes are plain deadlines rather than
//! timers owned by the controller.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::geometry::{Geometry, GridOptions, Point};
use crate::keys::KeyCommand;
use crate::model::{Direction, Node, PasswordTemplate};
use crate::path::{random_path, StartPoint};
use crate::GridError;

pub const INVALID_COLOUR: &str = "orange";
pub const SUCCESS_COLOUR: &str = "green";
pub const FAILURE_COLOUR: &str = "red";

const INVALID_FLASH_MS: f64 = 100.0;
const FEEDBACK_MS: f64 = 4000.0;
const ANIMATION_SLACK_MS: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// A random template was generated; submitting stores it.
    Create,
    /// A stored template was loaded; submitting verifies against it.
    Enter,
}

/// Result of a key press or mental command applied to the grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GridEvent {
    Moved { direction: Direction, node: Node, to: Point },
    Rejected { reason: String },
    Undone { node: Node, to: Point },
    Reset,
    GuideToggled { visible: bool },
    CommandBlockRequested,
    Submitted { template: PasswordTemplate, mode: Mode, matches_guide: bool },
    Ignored,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideView {
    pub path: String,
    pub end: Point,
}

/// Everything the renderer needs to draw the current frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridView {
    pub width: f64,
    pub height: f64,
    pub nodes: Vec<Point>,
    pub start: Point,
    pub current: Point,
    pub path: String,
    pub colour: String,
    pub guide: Option<GuideView>,
    pub locked: bool,
    pub mode: Mode,
    pub moves: Vec<Direction>,
}

#[derive(Debug, Clone)]
pub struct GridController {
    options: GridOptions,
    geometry: Geometry,
    template: PasswordTemplate,
    mode: Mode,
    current: Node,
    history: Vec<Node>,
    moves: Vec<Direction>,
    path_string: String,
    locked_until: f64,
    guide_visible: bool,
    colour_override: Option<(String, f64)>,
}

impl GridController {
    /// Build a controller around a stored template, or generate a random one
    /// from the centre of the board (create mode) when none is given.
    pub fn new<R: Rng + ?Sized>(
        options: GridOptions,
        template: Option<PasswordTemplate>,
        rng: &mut R,
    ) -> Result<Self, GridError> {
        let geometry = Geometry::new(&options)?;
        let (template, mode) = match template {
            Some(t) => {
                t.check_bounds(&geometry.bounds)?;
                (t, Mode::Enter)
            }
            None => (
                random_path(rng, &geometry.bounds, StartPoint::Center, options.path_length)?,
                Mode::Create,
            ),
        };

        let (path_string, _) = geometry.path_string(template.start, &[]);
        Ok(Self {
            current: template.start,
            options,
            geometry,
            template,
            mode,
            history: Vec::new(),
            moves: Vec::new(),
            path_string,
            locked_until: f64::NEG_INFINITY,
            guide_visible: false,
            colour_override: None,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn template(&self) -> &PasswordTemplate {
        &self.template
    }

    pub fn current(&self) -> Node {
        self.current
    }

    pub fn moves(&self) -> &[Direction] {
        &self.moves
    }

    pub fn path_string(&self) -> &str {
        &self.path_string
    }

    pub fn is_locked(&self, now: f64) -> bool {
        now < self.locked_until
    }

    pub fn colour(&self, now: f64) -> &str {
        match &self.colour_override {
            Some((colour, until)) if now < *until => colour,
            _ => &self.options.line_colour,
        }
    }

    /// Replace the guide template and start over from its first node.
    pub fn assign_template(&mut self, template: PasswordTemplate, mode: Mode) -> Result<(), GridError> {
        template.check_bounds(&self.geometry.bounds)?;
        self.template = template;
        self.mode = mode;
        self.reset();
        Ok(())
    }

    /// Generate a fresh random template (create mode).
    pub fn regenerate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), GridError> {
        let template = random_path(rng, &self.geometry.bounds, StartPoint::Center, self.options.path_length)?;
        self.assign_template(template, Mode::Create)
    }

    pub fn try_move(&mut self, dir: Direction, now: f64) -> Result<GridEvent, GridError> {
        let target = self.current.step(dir);
        if self.is_locked(now) {
            self.flash(INVALID_COLOUR, now + INVALID_FLASH_MS);
            return Err(GridError::InputLocked);
        }
        if !self.geometry.bounds.contains(target) {
            self.flash(INVALID_COLOUR, now + INVALID_FLASH_MS);
            return Err(GridError::OutOfBounds { node: target, bounds: self.geometry.bounds });
        }

        self.history.push(self.current);
        self.path_string.push_str(&self.geometry.segment(target));
        self.moves.push(dir);
        self.current = target;
        self.lock_for_animation(now);

        Ok(GridEvent::Moved { direction: dir, node: target, to: self.geometry.node_px(target) })
    }

    pub fn undo(&mut self, now: f64) -> Result<GridEvent, GridError> {
        if self.moves.is_empty() {
            return Err(GridError::NothingToUndo);
        }
        if self.is_locked(now) {
            return Err(GridError::InputLocked);
        }

        let previous = self.history.pop().ok_or(GridError::NothingToUndo)?;
        self.moves.pop();
        self.current = previous;
        if let Some(idx) = self.path_string.rfind('L') {
            self.path_string.truncate(idx);
        }
        self.lock_for_animation(now);

        Ok(GridEvent::Undone { node: previous, to: self.geometry.node_px(previous) })
    }

    pub fn reset(&mut self) {
        self.current = self.template.start;
        self.history.clear();
        self.moves.clear();
        self.path_string = self.geometry.path_string(self.template.start, &[]).0;
    }

    pub fn show_guide(&mut self) {
        self.guide_visible = true;
    }

    pub fn hide_guide(&mut self) {
        self.guide_visible = false;
    }

    pub fn toggle_guide(&mut self) -> bool {
        self.guide_visible = !self.guide_visible;
        self.guide_visible
    }

    pub fn feedback_success(&mut self, now: f64) {
        self.feedback(SUCCESS_COLOUR, now);
    }

    pub fn feedback_failure(&mut self, now: f64) {
        self.feedback(FAILURE_COLOUR, now);
    }

    /// Lock input until a headset command block reports back.
    pub fn begin_command_block(&mut self) {
        self.locked_until = f64::INFINITY;
    }

    /// Release the command block lock without moving, e.g. when the server
    /// could not start the block.
    pub fn cancel_command_block(&mut self) {
        if self.locked_until.is_infinite() {
            self.locked_until = f64::NEG_INFINITY;
        }
    }

    /// Apply the outcome of a command block. Commands without a direction
    /// (`neutral`, or no command at all) only release the input lock.
    pub fn apply_mental_command(&mut self, command: Option<&str>, now: f64) -> Result<GridEvent, GridError> {
        self.locked_until = f64::NEG_INFINITY;
        match command.and_then(Direction::from_mental_command) {
            Some(dir) => self.try_move(dir, now),
            None => Ok(GridEvent::Ignored),
        }
    }

    /// Where to draw the small indicator hinting at a live mental command.
    pub fn nudge(&self, command: &str) -> Option<Point> {
        let dir = Direction::from_mental_command(command)?;
        let origin = self.geometry.node_px(self.current);
        let (dx, dy) = dir.delta();
        let offset = self.geometry.cell_width / 2.0;
        Some(Point {
            x: origin.x + f64::from(dx) * offset,
            y: origin.y + f64::from(dy) * offset,
        })
    }

    /// The sequence the user has entered so far.
    pub fn entered(&self) -> PasswordTemplate {
        PasswordTemplate::new(self.template.start, self.moves.clone())
    }

    pub fn matches_template(&self) -> bool {
        self.template.matches(&self.moves)
    }

    pub fn handle_key(&mut self, key: &str, now: f64) -> GridEvent {
        let Some(command) = KeyCommand::from_key(key) else {
            return GridEvent::Ignored;
        };

        let result = match command {
            KeyCommand::Move(dir) => self.try_move(dir, now),
            KeyCommand::Undo => self.undo(now),
            KeyCommand::Reset => {
                self.reset();
                Ok(GridEvent::Reset)
            }
            KeyCommand::ToggleGuide => Ok(GridEvent::GuideToggled { visible: self.toggle_guide() }),
            KeyCommand::RequestCommandBlock => {
                if self.is_locked(now) {
                    Err(GridError::InputLocked)
                } else {
                    self.begin_command_block();
                    Ok(GridEvent::CommandBlockRequested)
                }
            }
            KeyCommand::Submit => Ok(GridEvent::Submitted {
                template: self.entered(),
                mode: self.mode,
                matches_guide: self.matches_template(),
            }),
        };

        result.unwrap_or_else(|e| GridEvent::Rejected { reason: e.to_string() })
    }

    pub fn view(&self, now: f64) -> GridView {
        let guide = self.guide_visible.then(|| {
            let (path, end) = self.geometry.path_string(self.template.start, &self.template.moves);
            GuideView { path, end: self.geometry.node_px(end) }
        });

        GridView {
            width: self.options.width,
            height: self.options.height,
            nodes: self.geometry.all_nodes_px(),
            start: self.geometry.node_px(self.template.start),
            current: self.geometry.node_px(self.current),
            path: self.path_string.clone(),
            colour: self.colour(now).to_string(),
            guide,
            locked: self.is_locked(now),
            mode: self.mode,
            moves: self.moves.clone(),
        }
    }

    fn lock_for_animation(&mut self, now: f64) {
        self.locked_until = now + self.options.delay_ms + ANIMATION_SLACK_MS;
    }

    fn feedback(&mut self, colour: &str, now: f64) {
        self.flash(colour, now + FEEDBACK_MS);
        self.locked_until = now + FEEDBACK_MS;
    }

    fn flash(&mut self, colour: &str, until: f64) {
        self.colour_override = Some((colour.to_string(), until));
    }
}
