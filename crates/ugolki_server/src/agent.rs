//! Automated opponents.
//!
//! An [`Agent`] picks one move from the legal set for the side to move. The
//! coordinator only ever talks to the trait, so other strategies slot in
//! without touching session handling.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, instrument, warn};
use ugolki_rules::{Action, GameState};

/// Why an agent could not produce a move.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum AgentError {
    /// The side to move has no legal action.
    #[display("No legal actions available")]
    NoLegalActions,
}

impl std::error::Error for AgentError {}

/// A strategy that chooses a move for the side to move.
pub trait Agent: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Chooses one of `state.legal_actions()`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NoLegalActions`] if the legal set is empty.
    fn select_action(&self, state: &GameState) -> Result<Action, AgentError>;
}

/// Picks uniformly at random from the legal set.
#[derive(Debug)]
pub struct RandomAgent {
    rng: Mutex<StdRng>,
}

impl RandomAgent {
    /// Creates an agent seeded from the operating system.
    #[instrument]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Creates an agent with reproducible choices.
    #[instrument]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for RandomAgent {
    fn name(&self) -> &str {
        "random"
    }

    #[instrument(skip(self, state), fields(turn = %state.turn()))]
    fn select_action(&self, state: &GameState) -> Result<Action, AgentError> {
        let actions = state.legal_actions();
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(action) = actions.choose(&mut *rng).copied() else {
            warn!("Agent has no legal actions");
            return Err(AgentError::NoLegalActions);
        };

        debug!(%action, options = actions.len(), "Agent selected action");
        Ok(action)
    }
}
