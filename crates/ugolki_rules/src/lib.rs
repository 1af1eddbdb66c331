//! Ugolki rules engine.
//!
//! Pure state-transition logic for the corner-occupation game on an 8×8 grid:
//! legal-move generation (steps and chain jumps), move application and win
//! detection. No I/O, no clocks, no shared state.
//!
//! # Example
//!
//! ```
//! use ugolki_rules::{Color, GameState};
//!
//! let state = GameState::new();
//! assert_eq!(state.turn(), Color::White);
//! assert_eq!(state.legal_actions().len(), 16);
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod action;
mod game;
mod rules;
mod types;

pub use action::Action;
#[cfg(feature = "random")]
pub use game::random_position;
pub use game::{GameState, StepResult, WIN_REWARD, step};
pub use rules::{
    apply_action, check_winner, fills_target, jump_destinations, legal_actions, step_destinations,
};
pub use types::{
    BOARD_SIZE, Board, BoardError, BoardRows, Cell, Color, Coord, Direction, HOME_SIZE,
    PIECES_PER_SIDE,
};
