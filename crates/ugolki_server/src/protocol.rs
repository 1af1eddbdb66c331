//! Wire protocol: `{"type": ..., "data": {...}}` envelopes in both directions.

use crate::error::CoordinatorError;
use crate::session::{GameId, GameMode, Session, SessionStatus, UserId};
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use ugolki_rules::{Action, Board, Color, Coord};

/// Every request a participant can send.
///
/// Dispatch matches on this exhaustively; adding a variant breaks the build
/// until it is handled.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Open a new match.
    CreateGame {
        /// Against the agent or another participant.
        mode: GameMode,
    },
    /// Take the black seat of a waiting match.
    JoinGame {
        /// Target match.
        game_id: GameId,
    },
    /// Play a move.
    Move {
        /// Target match.
        game_id: GameId,
        /// Piece relocation.
        action: Action,
    },
    /// List waiting player-vs-player matches.
    GetOpenGames,
    /// Resume a match after a dropped connection.
    Reconnect {
        /// Target match.
        game_id: GameId,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct CreateGameData {
    game_type: Option<GameMode>,
}

#[derive(Debug, Deserialize)]
struct GameRef {
    game_id: Option<GameId>,
}

#[derive(Debug, Deserialize)]
struct MoveData {
    game_id: Option<GameId>,
    from: Option<Coord>,
    to: Option<Coord>,
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, CoordinatorError> {
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|e| {
        CoordinatorError::Validation(format!("Malformed {} payload: {}", kind, e))
    })
}

impl ClientMessage {
    /// Parses one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Validation`] for malformed JSON, unknown
    /// message types, and missing or malformed fields.
    #[instrument(skip(text), fields(len = text.len()))]
    pub fn parse(text: &str) -> Result<Self, CoordinatorError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| CoordinatorError::Validation(format!("Malformed message: {}", e)))?;

        let kind = envelope
            .kind
            .ok_or_else(|| CoordinatorError::Validation("Message type required".to_string()))?;
        debug!(kind = %kind, "Parsing client message");

        match kind.as_str() {
            "create_game" => {
                let data: CreateGameData = payload(&kind, envelope.data)?;
                Ok(Self::CreateGame {
                    mode: data.game_type.unwrap_or(GameMode::AgainstAgent),
                })
            }
            "join_game" => Ok(Self::JoinGame {
                game_id: required_game_id(payload(&kind, envelope.data)?)?,
            }),
            "reconnect" => Ok(Self::Reconnect {
                game_id: required_game_id(payload(&kind, envelope.data)?)?,
            }),
            "move" => {
                let data: MoveData = payload(&kind, envelope.data)?;
                match (data.game_id, data.from, data.to) {
                    (Some(game_id), Some(from), Some(to)) => Ok(Self::Move {
                        game_id,
                        action: Action::new(from, to),
                    }),
                    _ => Err(CoordinatorError::Validation(
                        "game_id, from, and to required".to_string(),
                    )),
                }
            }
            "get_open_games" => Ok(Self::GetOpenGames),
            other => Err(CoordinatorError::Validation(format!(
                "Unknown message type: {}",
                other
            ))),
        }
    }
}

fn required_game_id(data: GameRef) -> Result<GameId, CoordinatorError> {
    data.game_id
        .ok_or_else(|| CoordinatorError::Validation("game_id required".to_string()))
}

/// Full snapshot of a match as sent to participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStatePayload {
    /// Match id.
    pub game_id: GameId,
    /// 8×8 matrix, `1` white, `-1` black, `0` empty.
    pub board: Board,
    /// Side to move.
    pub turn: Color,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// `"ai"` or `"pvp"`.
    pub game_type: GameMode,
    /// White participant.
    pub white_player_id: UserId,
    /// Black participant, if seated.
    pub black_player_id: Option<UserId>,
    /// Legal actions for the side to move; empty once the match is completed.
    pub legal_moves: Vec<Action>,
}

impl GameStatePayload {
    /// Snapshots a session, computing its legal moves afresh.
    pub fn from_session(session: &Session) -> Self {
        let legal_moves = match session.status {
            SessionStatus::Completed => Vec::new(),
            SessionStatus::Waiting | SessionStatus::Active => session.state.legal_actions(),
        };
        Self {
            game_id: session.id,
            board: session.state.board().clone(),
            turn: session.state.turn(),
            status: session.status,
            game_type: session.mode,
            white_player_id: session.white_player_id,
            black_player_id: session.black_player_id,
            legal_moves,
        }
    }
}

/// A waiting match as listed to prospective opponents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenGame {
    /// Match id.
    pub game_id: GameId,
    /// Creator's display name.
    pub creator: String,
    /// Creator's rating.
    pub creator_elo: f64,
    /// When the match was opened.
    pub created_at: NaiveDateTime,
}

/// Every message the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Credential accepted.
    Connected {
        /// Authenticated participant.
        user_id: UserId,
        /// Display name.
        username: String,
    },
    /// Reply to `create_game`.
    GameCreated(GameStatePayload),
    /// A second participant joined.
    GameStarted(GameStatePayload),
    /// State after a move, or a reconnect snapshot.
    GameState(GameStatePayload),
    /// The match ended.
    GameOver {
        /// Winning side.
        winner: Color,
        /// Winning participant; absent when the agent won.
        winner_id: Option<UserId>,
    },
    /// Reply to `get_open_games`.
    OpenGames {
        /// Waiting matches.
        games: Vec<OpenGame>,
    },
    /// Request failed; only ever sent to the requester.
    Error {
        /// Human-readable reason.
        message: String,
    },
    /// Another participant's socket closed.
    OpponentDisconnected {
        /// Participant who left.
        user_id: UserId,
    },
}

impl ServerMessage {
    /// Error reply for a failed request.
    pub fn error(err: &CoordinatorError) -> Self {
        Self::Error {
            message: err.client_message(),
        }
    }
}
