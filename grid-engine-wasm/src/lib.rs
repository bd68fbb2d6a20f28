use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

pub mod controller;
pub mod geometry;
pub mod keys;
pub mod model;
pub mod path;

pub use controller::{GridController, GridEvent, GridView, Mode};
pub use geometry::{Geometry, GridOptions, Point};
pub use keys::KeyCommand;
pub use model::{sequences_equal, Direction, GridBounds, Node, PasswordTemplate};
pub use path::{random_path, StartPoint};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("not a valid direction: {value}")]
    UnknownDirection { value: String },

    #[error("grid must be at least 2x2, got {xpoints}x{ypoints}")]
    InvalidDimensions { xpoints: i32, ypoints: i32 },

    #[error("invalid position {node} on a {}x{} grid", .bounds.xpoints, .bounds.ypoints)]
    OutOfBounds { node: Node, bounds: GridBounds },

    #[error("path of {length} moves does not fit on the board (max {capacity})")]
    PathTooLong { length: usize, capacity: usize },

    #[error("no path of {length} moves found after {attempts} attempts")]
    PathSearchExhausted { length: usize, attempts: usize },

    #[error("input is locked")]
    InputLocked,

    #[error("no moves to undo")]
    NothingToUndo,
}

// ---
// WASM-EXPORTED API
// The browser page drives the grid through these. Inputs and outputs are
// JSON-shaped `JsValue`s; rendering stays in JavaScript.
// ---

fn parse_from_js<T: for<'a> Deserialize<'a>>(js_val: JsValue) -> Result<T, JsValue> {
    serde_wasm_bindgen::from_value(js_val).map_err(|e| JsValue::from_str(&format!("Deserialization error: {}", e)))
}

fn serialize_to_js<T: Serialize>(rust_val: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(rust_val).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

fn log_rejection(event: &GridEvent) {
    if let GridEvent::Rejected { reason } = event {
        web_sys::console::log_1(&JsValue::from_str(reason));
    }
}

#[wasm_bindgen]
pub struct WasmGrid {
    inner: GridController,
}

#[wasm_bindgen]
impl WasmGrid {
    /// `options` may be `undefined`; `template` is a stored document (or
    /// `null` to generate a new random path in create mode).
    #[wasm_bindgen(constructor)]
    pub fn new(options: JsValue, template: JsValue) -> Result<WasmGrid, JsValue> {
        let options: GridOptions = if options.is_undefined() || options.is_null() {
            GridOptions::default()
        } else {
            parse_from_js(options)?
        };
        let template: Option<PasswordTemplate> = if template.is_undefined() || template.is_null() {
            None
        } else {
            Some(parse_from_js(template)?)
        };

        let inner = GridController::new(options, template, &mut rand::thread_rng())
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(WasmGrid { inner })
    }

    #[wasm_bindgen(js_name = "handleKey")]
    pub fn handle_key(&mut self, key: &str, now: f64) -> Result<JsValue, JsValue> {
        let event = self.inner.handle_key(key, now);
        log_rejection(&event);
        serialize_to_js(&event)
    }

    #[wasm_bindgen(js_name = "applyCommand")]
    pub fn apply_command(&mut self, command: Option<String>, now: f64) -> Result<JsValue, JsValue> {
        let event = self
            .inner
            .apply_mental_command(command.as_deref(), now)
            .unwrap_or_else(|e| GridEvent::Rejected { reason: e.to_string() });
        log_rejection(&event);
        serialize_to_js(&event)
    }

    #[wasm_bindgen(js_name = "cancelCommandBlock")]
    pub fn cancel_command_block(&mut self) {
        self.inner.cancel_command_block();
    }

    #[wasm_bindgen(js_name = "loadTemplate")]
    pub fn load_template(&mut self, template: JsValue) -> Result<(), JsValue> {
        let template: PasswordTemplate = parse_from_js(template)?;
        self.inner
            .assign_template(template, Mode::Enter)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn regenerate(&mut self) -> Result<(), JsValue> {
        self.inner
            .regenerate(&mut rand::thread_rng())
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn nudge(&self, command: &str) -> Result<JsValue, JsValue> {
        serialize_to_js(&self.inner.nudge(command))
    }

    #[wasm_bindgen(js_name = "feedbackSuccess")]
    pub fn feedback_success(&mut self, now: f64) {
        self.inner.feedback_success(now);
    }

    #[wasm_bindgen(js_name = "feedbackFailure")]
    pub fn feedback_failure(&mut self, now: f64) {
        self.inner.feedback_failure(now);
    }

    pub fn view(&self, now: f64) -> Result<JsValue, JsValue> {
        serialize_to_js(&self.inner.view(now))
    }

    /// The template currently used as the guide.
    pub fn template(&self) -> Result<JsValue, JsValue> {
        serialize_to_js(self.inner.template())
    }
}

/// Element-wise comparison of two move sequences.
#[wasm_bindgen(js_name = "sequencesEqual")]
pub fn sequences_equal_js(a: JsValue, b: JsValue) -> Result<bool, JsValue> {
    let a: Vec<Direction> = parse_from_js(a)?;
    let b: Vec<Direction> = parse_from_js(b)?;
    Ok(sequences_equal(&a, &b))
}
