//! Ugolki rules: move generation and win detection.

mod moves;
mod win;

pub use moves::{apply_action, jump_destinations, legal_actions, step_destinations};
pub use win::{check_winner, fills_target};
