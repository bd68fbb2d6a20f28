//! Random password path generation.
//!
//! A randomized depth-first walk: each step picks an untried neighbour at
//! random, and a node with no untried neighbours left is a dead end, so the
//! walk retreats one move and tries another branch. The walk never revisits
//! a node on the current path.

use std::collections::HashSet;

use fnv::FnvBuildHasher;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::{Direction, GridBounds, Node, PasswordTemplate};
use crate::GridError;

/// Steps one walk may take before it is abandoned and restarted.
const STEP_BUDGET: usize = 20_000;
const MAX_ATTEMPTS: usize = 8;

/// Where a generated path begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPoint {
    Random,
    Center,
    At(Node),
}

impl StartPoint {
    pub fn resolve<R: Rng + ?Sized>(self, rng: &mut R, bounds: &GridBounds) -> Result<Node, GridError> {
        match self {
            StartPoint::Random => Ok(Node::new(
                rng.gen_range(0..bounds.xpoints),
                rng.gen_range(0..bounds.ypoints),
            )),
            StartPoint::Center => Ok(bounds.center()),
            StartPoint::At(node) if bounds.contains(node) => Ok(node),
            StartPoint::At(node) => Err(GridError::OutOfBounds { node, bounds: *bounds }),
        }
    }
}

struct Frame {
    node: Node,
    untried: Vec<Direction>,
}

impl Frame {
    fn new<R: Rng + ?Sized>(node: Node, rng: &mut R) -> Self {
        let mut untried = Direction::ALL.to_vec();
        untried.shuffle(rng);
        Self { node, untried }
    }
}

/// Generate a path of exactly `length` moves that stays inside `bounds` and
/// never visits a node twice.
pub fn random_path<R: Rng + ?Sized>(
    rng: &mut R,
    bounds: &GridBounds,
    start: StartPoint,
    length: usize,
) -> Result<PasswordTemplate, GridError> {
    let capacity = bounds.node_count() - 1;
    if length > capacity {
        return Err(GridError::PathTooLong { length, capacity });
    }

    let origin = start.resolve(rng, bounds)?;
    for _ in 0..MAX_ATTEMPTS {
        if let Some(moves) = walk(rng, bounds, origin, length) {
            return Ok(PasswordTemplate::new(origin, moves));
        }
    }

    Err(GridError::PathSearchExhausted { length, attempts: MAX_ATTEMPTS })
}

fn walk<R: Rng + ?Sized>(rng: &mut R, bounds: &GridBounds, origin: Node, length: usize) -> Option<Vec<Direction>> {
    let mut visited: HashSet<Node, FnvBuildHasher> = HashSet::default();
    visited.insert(origin);

    let mut stack = vec![Frame::new(origin, rng)];
    let mut moves = Vec::with_capacity(length);
    let mut steps = 0;

    while moves.len() < length {
        steps += 1;
        if steps > STEP_BUDGET {
            return None;
        }

        let frame = stack.last_mut()?;
        let node = frame.node;
        match frame.untried.pop() {
            Some(dir) => {
                let next = node.step(dir);
                if bounds.contains(next) && visited.insert(next) {
                    moves.push(dir);
                    stack.push(Frame::new(next, rng));
                }
            }
            None => {
                // dead end
                stack.pop();
                visited.remove(&node);
                moves.pop();
            }
        }
    }

    Some(moves)
}
