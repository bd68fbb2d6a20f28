//! Grid data model shared by the browser controller and the server.
//!
//! Nodes serialize as `[x, y]` and directions as lowercase strings so stored
//! documents look like `{ "start": [2, 2], "moves": ["left", "up"] }`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::GridError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::Up, Direction::Down, Direction::Left, Direction::Right];

    /// Unit step for this direction. `y` grows downwards.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }

    /// Map a headset mental command onto a grid direction.
    ///
    /// `push`/`lift` move up and `drop` moves down; `neutral` and unknown
    /// commands have no direction.
    pub fn from_mental_command(command: &str) -> Option<Direction> {
        match command {
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            "push" | "lift" => Some(Direction::Up),
            "drop" => Some(Direction::Down),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(GridError::UnknownDirection { value: other.to_string() }),
        }
    }
}

/// A grid coordinate, serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Node {
    pub x: i32,
    pub y: i32,
}

impl Node {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The neighbouring node in `dir`. Bounds are not checked here; the
    /// coordinates saturate at the `i32` limits.
    pub fn step(self, dir: Direction) -> Node {
        let (dx, dy) = dir.delta();
        Node::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }
}

impl From<[i32; 2]> for Node {
    fn from(v: [i32; 2]) -> Self {
        Node::new(v[0], v[1])
    }
}

impl From<Node> for [i32; 2] {
    fn from(n: Node) -> Self {
        [n.x, n.y]
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridBounds {
    pub xpoints: i32,
    pub ypoints: i32,
}

impl GridBounds {
    pub fn new(xpoints: i32, ypoints: i32) -> Result<Self, GridError> {
        if xpoints < 2 || ypoints < 2 {
            return Err(GridError::InvalidDimensions { xpoints, ypoints });
        }
        Ok(Self { xpoints, ypoints })
    }

    pub fn contains(&self, node: Node) -> bool {
        (0..self.xpoints).contains(&node.x) && (0..self.ypoints).contains(&node.y)
    }

    pub fn center(&self) -> Node {
        Node::new(self.xpoints / 2, self.ypoints / 2)
    }

    pub fn node_count(&self) -> usize {
        (self.xpoints as usize) * (self.ypoints as usize)
    }
}

/// A stored password path: a start node plus the moves taken from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordTemplate {
    pub start: Node,
    pub moves: Vec<Direction>,
}

impl PasswordTemplate {
    pub fn new(start: Node, moves: Vec<Direction>) -> Self {
        Self { start, moves }
    }

    /// Every node visited by the path, start included.
    pub fn nodes(&self) -> Vec<Node> {
        let mut out = Vec::with_capacity(self.moves.len() + 1);
        let mut node = self.start;
        out.push(node);
        for dir in &self.moves {
            node = node.step(*dir);
            out.push(node);
        }
        out
    }

    pub fn end(&self) -> Node {
        self.moves.iter().fold(self.start, |node, dir| node.step(*dir))
    }

    /// Replay the path inside `bounds`, failing at the first node that leaves it.
    pub fn check_bounds(&self, bounds: &GridBounds) -> Result<Node, GridError> {
        if !bounds.contains(self.start) {
            return Err(GridError::OutOfBounds { node: self.start, bounds: *bounds });
        }
        let mut node = self.start;
        for dir in &self.moves {
            node = node.step(*dir);
            if !bounds.contains(node) {
                return Err(GridError::OutOfBounds { node, bounds: *bounds });
            }
        }
        Ok(node)
    }

    pub fn matches(&self, moves: &[Direction]) -> bool {
        sequences_equal(&self.moves, moves)
    }
}

/// Password comparison: same length and element-wise equal.
pub fn sequences_equal<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn direction() -> impl Strategy<Value = Direction> {
        prop::sample::select(Direction::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn equality_matches_definition(
            a in prop::collection::vec(direction(), 0..12),
            b in prop::collection::vec(direction(), 0..12),
        ) {
            let expected = a.len() == b.len() && (0..a.len()).all(|i| a[i] == b[i]);
            prop_assert_eq!(sequences_equal(&a, &b), expected);
        }

        #[test]
        fn sequence_equals_itself(a in prop::collection::vec(direction(), 0..12)) {
            prop_assert!(sequences_equal(&a, &a.clone()));
        }

        #[test]
        fn appending_breaks_equality(a in prop::collection::vec(direction(), 0..12), d in direction()) {
            let mut longer = a.clone();
            longer.push(d);
            prop_assert!(!sequences_equal(&a, &longer));
        }
    }

    #[test]
    fn document_shape_round_trips() {
        let t = PasswordTemplate::new(
            Node::new(2, 2),
            vec![Direction::Left, Direction::Up, Direction::Right, Direction::Right],
        );
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json, serde_json::json!({"start": [2, 2], "moves": ["left", "up", "right", "right"]}));
        assert_eq!(t.end(), Node::new(3, 1));
    }

    #[test]
    fn mental_commands_map_to_directions() {
        assert_eq!(Direction::from_mental_command("push"), Some(Direction::Up));
        assert_eq!(Direction::from_mental_command("lift"), Some(Direction::Up));
        assert_eq!(Direction::from_mental_command("drop"), Some(Direction::Down));
        assert_eq!(Direction::from_mental_command("neutral"), None);
    }

    #[test]
    fn check_bounds_reports_first_escape() {
        let bounds = GridBounds::new(5, 5).unwrap();
        let t = PasswordTemplate::new(Node::new(0, 0), vec![Direction::Right, Direction::Up]);
        match t.check_bounds(&bounds) {
            Err(GridError::OutOfBounds { node, .. }) => assert_eq!(node, Node::new(1, -1)),
            other => panic!("expected out of bounds, got {:?}", other),
        }
    }

    #[test]
    fn step_saturates_at_integer_limits() {
        assert_eq!(Node::new(i32::MAX, 0).step(Direction::Right), Node::new(i32::MAX, 0));
        assert_eq!(Node::new(0, i32::MIN).step(Direction::Up), Node::new(0, i32::MIN));

        let t = PasswordTemplate::new(Node::new(i32::MAX, 0), vec![Direction::Right, Direction::Right]);
        assert_eq!(t.end(), Node::new(i32::MAX, 0));
        assert!(t.check_bounds(&GridBounds::new(5, 5).unwrap()).is_err());
    }
}
