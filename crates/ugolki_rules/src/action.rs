//! First-class action type for ugolki.
//!
//! An action is only meaningful relative to a specific board and turn; the
//! rules module decides whether it is legal.

use crate::types::Coord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relocation of one piece from `from` to `to`, by a step or a (chain) jump.
///
/// Serialized as `{"from": [row, col], "to": [row, col]}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Action {
    /// Square the piece leaves.
    pub from: Coord,
    /// Square the piece lands on.
    pub to: Coord,
}

impl Action {
    /// Creates a new action.
    pub fn new(from: Coord, to: Coord) -> Self {
        Self { from, to }
    }

    /// Returns the origin square.
    pub fn from(&self) -> Coord {
        self.from
    }

    /// Returns the destination square.
    pub fn to(&self) -> Coord {
        self.to
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
