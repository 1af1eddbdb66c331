//! Game state value and the step transition.

use crate::action::Action;
use crate::rules::{apply_action, check_winner, legal_actions};
use crate::types::{Board, Color};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Reward handed to the side whose move wins the game.
pub const WIN_REWARD: f64 = 10.0;

/// A board together with the side to move.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameState {
    board: Board,
    turn: Color,
}

/// Outcome of a single [`GameState::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// State after the move, with the turn already flipped.
    pub state: GameState,
    /// `WIN_REWARD` if the mover's move won the game for the mover, else `0.0`.
    pub reward: f64,
    /// `true` iff the game has a winner after the move.
    pub done: bool,
    /// The winning side, if any.
    pub winner: Option<Color>,
}

impl GameState {
    /// Starting position with white to move.
    pub fn new() -> Self {
        Self::from_parts(Board::initial(), Color::White)
    }

    /// Builds a state from an arbitrary board and turn.
    pub fn from_parts(board: Board, turn: Color) -> Self {
        Self { board, turn }
    }

    /// Returns a reference to the board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Returns the side to move.
    pub fn turn(&self) -> Color {
        self.turn
    }

    /// All legal actions for the side to move.
    pub fn legal_actions(&self) -> Vec<Action> {
        legal_actions(&self.board, self.turn)
    }

    /// Checks whether `action` is legal for the side to move.
    pub fn is_legal(&self, action: Action) -> bool {
        self.legal_actions().contains(&action)
    }

    /// Returns the winner of the current position, if any.
    pub fn winner(&self) -> Option<Color> {
        check_winner(&self.board)
    }

    /// Applies an action and flips the turn. No legality check.
    pub fn apply(&self, action: Action) -> Self {
        Self {
            board: apply_action(&self.board, action),
            turn: self.turn.opponent(),
        }
    }

    /// Applies an action, then checks for a winner.
    ///
    /// The caller is responsible for validating `action` first.
    #[instrument(skip(self, action), fields(turn = %self.turn, action = %action))]
    pub fn step(&self, action: Action) -> StepResult {
        let mover = self.turn;
        let state = self.apply(action);
        let winner = state.winner();
        let reward = if winner == Some(mover) { WIN_REWARD } else { 0.0 };

        if let Some(color) = winner {
            debug!(winner = %color, "Move ended the game");
        }

        StepResult {
            state,
            reward,
            done: winner.is_some(),
            winner,
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

/// Composes [`apply_action`] and [`check_winner`] for a board and turn.
pub fn step(board: &Board, turn: Color, action: Action) -> StepResult {
    GameState::from_parts(board.clone(), turn).step(action)
}

/// Plays up to `num_moves` uniformly random legal moves from the initial position.
///
/// Stops early if the side to move has no legal action or the game is won.
#[cfg(feature = "random")]
#[instrument(skip(rng))]
pub fn random_position<R: rand::Rng + ?Sized>(num_moves: usize, rng: &mut R) -> GameState {
    use rand::seq::SliceRandom;

    let mut state = GameState::new();
    for _ in 0..num_moves {
        let actions = state.legal_actions();
        let Some(action) = actions.choose(rng) else {
            break;
        };
        let result = state.step(*action);
        state = result.state;
        if result.done {
            break;
        }
    }
    state
}
