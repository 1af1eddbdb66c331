//! Match sessions and the live session registry.

use crate::error::CoordinatorError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};
use ugolki_rules::{Action, Color, GameState, StepResult};

/// Unique identifier for a match.
pub type GameId = i32;

/// Unique identifier for a participant.
pub type UserId = i32;

/// Who plays black.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum GameMode {
    /// Black is the automated opponent.
    #[serde(rename = "ai")]
    #[strum(serialize = "ai")]
    AgainstAgent,
    /// Black is a second remote participant.
    #[serde(rename = "pvp")]
    #[strum(serialize = "pvp")]
    PlayerVsPlayer,
}

/// Lifecycle of a match. Only ever moves forward.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
    /// Player-vs-player match waiting for its black participant.
    Waiting,
    /// Moves are being played.
    Active,
    /// A side has won.
    Completed,
}

/// Request to open a new match, before storage has assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    /// Creator, who always plays white.
    pub white_player_id: UserId,
    /// Match mode.
    pub mode: GameMode,
    /// Starting board and turn.
    pub state: GameState,
    /// `Active` against the agent, `Waiting` otherwise.
    pub status: SessionStatus,
}

impl NewSession {
    /// Creates a match at the starting position with white to move.
    pub fn new(white_player_id: UserId, mode: GameMode) -> Self {
        let status = match mode {
            GameMode::AgainstAgent => SessionStatus::Active,
            GameMode::PlayerVsPlayer => SessionStatus::Waiting,
        };
        Self {
            white_player_id,
            mode,
            state: GameState::new(),
            status,
        }
    }
}

/// A match with its board, turn and participants.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Session ID.
    pub id: GameId,
    /// Board and side to move.
    pub state: GameState,
    /// Match mode.
    pub mode: GameMode,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// White participant (the creator).
    pub white_player_id: UserId,
    /// Black participant; absent while waiting and always absent against the agent.
    pub black_player_id: Option<UserId>,
    /// Winning participant; absent until completed, and when the agent wins.
    pub winner_id: Option<UserId>,
    /// Creation time.
    pub created_at: NaiveDateTime,
    /// Completion time.
    pub completed_at: Option<NaiveDateTime>,
    /// Ticket of the one agent continuation allowed to play the pending
    /// reply. Live only: never persisted, so a rehydrated session starts
    /// without one.
    pub agent_ticket: Option<u64>,
}

impl Session {
    /// Builds a stored session from a creation request.
    pub fn from_new(id: GameId, new: NewSession, created_at: NaiveDateTime) -> Self {
        Self {
            id,
            state: new.state,
            mode: new.mode,
            status: new.status,
            white_player_id: new.white_player_id,
            black_player_id: None,
            winner_id: None,
            created_at,
            completed_at: None,
            agent_ticket: None,
        }
    }

    /// Participant playing `color`, if one is recorded.
    pub fn participant_for(&self, color: Color) -> Option<UserId> {
        match color {
            Color::White => Some(self.white_player_id),
            Color::Black => self.black_player_id,
        }
    }

    /// Colour played by `user_id`, if they take part in this match.
    pub fn color_of(&self, user_id: UserId) -> Option<Color> {
        if self.white_player_id == user_id {
            Some(Color::White)
        } else if self.black_player_id == Some(user_id) {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// Checks if `user_id` is a recorded participant.
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.color_of(user_id).is_some()
    }

    /// True when the automated opponent owes the next move.
    pub fn agent_to_move(&self) -> bool {
        self.mode == GameMode::AgainstAgent
            && self.status == SessionStatus::Active
            && self.state.turn() == Color::Black
    }

    /// Seats `user_id` as black and activates the match.
    #[instrument(skip(self), fields(game_id = self.id))]
    pub fn join(&mut self, user_id: UserId) -> Result<(), CoordinatorError> {
        if self.status != SessionStatus::Waiting || self.mode != GameMode::PlayerVsPlayer {
            warn!(status = %self.status, mode = %self.mode, "Join rejected");
            return Err(CoordinatorError::SessionState(
                "Game is not available to join".to_string(),
            ));
        }

        if self.white_player_id == user_id {
            warn!("Creator attempted to join own game");
            return Err(CoordinatorError::Authorization(
                "Cannot join your own game".to_string(),
            ));
        }

        self.black_player_id = Some(user_id);
        self.status = SessionStatus::Active;
        info!(black_player_id = user_id, "Player joined as black");
        Ok(())
    }

    /// Validates that `user_id` may play `action` right now.
    #[instrument(skip(self), fields(game_id = self.id, turn = %self.state.turn()))]
    pub fn authorize_move(&self, user_id: UserId, action: Action) -> Result<(), CoordinatorError> {
        if self.status != SessionStatus::Active {
            return Err(CoordinatorError::SessionState("Game is not active".to_string()));
        }

        if self.participant_for(self.state.turn()) != Some(user_id) {
            warn!(player_color = ?self.color_of(user_id), "Player tried to move out of turn");
            return Err(CoordinatorError::Authorization("Not your turn".to_string()));
        }

        if !self.state.is_legal(action) {
            warn!(%action, "Illegal move submitted");
            return Err(CoordinatorError::IllegalAction(action));
        }

        Ok(())
    }

    /// Adopts the state produced by a step and completes the match on a win.
    #[instrument(skip(self, result), fields(game_id = self.id))]
    pub fn record_step(&mut self, result: &StepResult, now: NaiveDateTime) {
        self.state = result.state.clone();

        if let Some(winner) = result.winner {
            self.status = SessionStatus::Completed;
            self.winner_id = self.participant_for(winner);
            self.completed_at = Some(now);
            info!(winner = %winner, winner_id = ?self.winner_id, "Game completed");
        }
    }
}

/// Shared handle to one live session. Holding its lock serializes every
/// mutation of that session.
pub type SessionSlot = Arc<tokio::sync::Mutex<Session>>;

/// Table of live sessions.
///
/// The table lock is only held to look up or insert slots, never across an
/// `.await`; per-session work happens under the slot's own async lock.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<GameId, SessionSlot>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[instrument]
    pub fn new() -> Self {
        info!("Creating session registry");
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<GameId, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gets the live slot for a session.
    pub fn get(&self, id: GameId) -> Option<SessionSlot> {
        let slot = self.table().get(&id).cloned();
        if slot.is_none() {
            debug!(game_id = id, "Session not live");
        }
        slot
    }

    /// Inserts a session unless one with the same id is already live.
    ///
    /// Returns whichever slot ends up in the table, so concurrent
    /// rehydrations of the same match converge on a single slot.
    #[instrument(skip(self, session), fields(game_id = session.id))]
    pub fn insert(&self, session: Session) -> SessionSlot {
        let id = session.id;
        self.table()
            .entry(id)
            .or_insert_with(|| {
                debug!("Session registered live");
                Arc::new(tokio::sync::Mutex::new(session))
            })
            .clone()
    }

    /// Drops the live copy of a session.
    #[instrument(skip(self))]
    pub fn remove(&self, id: GameId) -> Option<SessionSlot> {
        let removed = self.table().remove(&id);
        if removed.is_some() {
            info!(game_id = id, "Session evicted from memory");
        }
        removed
    }

    /// Checks whether a session is live.
    pub fn contains(&self, id: GameId) -> bool {
        self.table().contains_key(&id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Returns `true` if no session is live.
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}
