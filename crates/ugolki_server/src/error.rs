//! Request failure taxonomy.

use crate::agent::AgentError;
use crate::auth::AuthError;
use crate::db::DbError;
use crate::session::GameId;
use ugolki_rules::Action;

/// Why a request was rejected.
///
/// Every variant is reported only to the originating connection and leaves
/// other participants untouched. Only [`CoordinatorError::Authentication`]
/// closes the connection.
#[derive(Debug, Clone, derive_more::Display, derive_more::From)]
pub enum CoordinatorError {
    /// A required field is missing or malformed.
    #[display("{}", _0)]
    Validation(String),

    /// The referenced match does not exist.
    #[display("Game {} not found", _0)]
    NotFound(GameId),

    /// Not a participant, not their turn, or joining their own match.
    #[display("{}", _0)]
    Authorization(String),

    /// The action is not in the current legal set.
    #[display("Illegal move {}", _0)]
    IllegalAction(Action),

    /// The operation does not fit the match's current status.
    #[display("{}", _0)]
    SessionState(String),

    /// Credential invalid or expired.
    #[display("Authentication failed: {}", _0)]
    #[from]
    Authentication(AuthError),

    /// A persistence or rating call failed. Live state is kept.
    #[display("{}", _0)]
    #[from]
    Store(DbError),

    /// The automated opponent could not choose a move.
    #[display("Agent failed: {}", _0)]
    #[from]
    Agent(AgentError),
}

impl std::error::Error for CoordinatorError {}

impl CoordinatorError {
    /// Message sent to the client in an `error` envelope.
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(message)
            | Self::Authorization(message)
            | Self::SessionState(message) => message.clone(),
            Self::NotFound(_) => "Game not found".to_string(),
            Self::IllegalAction(_) => "Illegal move".to_string(),
            Self::Authentication(AuthError::Expired) => "Session expired".to_string(),
            Self::Authentication(_) => "Invalid token".to_string(),
            Self::Store(_) => "Failed to save game state".to_string(),
            Self::Agent(_) => "Opponent could not move".to_string(),
        }
    }

    /// Whether the connection must be closed after reporting this error.
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}
