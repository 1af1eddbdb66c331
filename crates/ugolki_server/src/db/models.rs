//! Database rows and their conversion to domain types.

use chrono::NaiveDateTime;
use derive_getters::Getters;
use derive_new::new;
use diesel::prelude::*;
use std::str::FromStr;
use tracing::instrument;
use ugolki_rules::{Board, Color, GameState};

use crate::db::{DbError, schema};
use crate::session::{GameMode, NewSession, Session, SessionStatus};

/// Participant profile row.
#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable, Getters)]
#[diesel(table_name = schema::users)]
pub struct User {
    id: i32,
    username: String,
    elo: f64,
    created_at: NaiveDateTime,
}

/// Insertable participant. Rating starts at the column default.
#[derive(Debug, Clone, Insertable, new)]
#[diesel(table_name = schema::users)]
pub struct NewUser {
    username: String,
}

/// Match row. Board is stored as its JSON matrix; enums as their wire names.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters)]
#[diesel(table_name = schema::games)]
pub struct GameRow {
    id: i32,
    white_player_id: i32,
    black_player_id: Option<i32>,
    game_type: String,
    status: String,
    winner_id: Option<i32>,
    board_state: String,
    current_turn: String,
    created_at: NaiveDateTime,
    completed_at: Option<NaiveDateTime>,
}

impl GameRow {
    /// Decodes the row into a live session.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the board, turn, mode or status column holds a
    /// value the rules do not accept.
    #[instrument(skip(self), fields(game_id = self.id))]
    pub fn into_session(self) -> Result<Session, DbError> {
        let board: Board = serde_json::from_str(&self.board_state)?;
        let turn = Color::from_str(&self.current_turn)?;

        Ok(Session {
            id: self.id,
            state: GameState::from_parts(board, turn),
            mode: GameMode::from_str(&self.game_type)?,
            status: SessionStatus::from_str(&self.status)?,
            white_player_id: self.white_player_id,
            black_player_id: self.black_player_id,
            winner_id: self.winner_id,
            created_at: self.created_at,
            completed_at: self.completed_at,
            agent_ticket: None,
        })
    }
}

/// Insertable match.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::games)]
pub struct NewGameRow {
    white_player_id: i32,
    game_type: String,
    status: String,
    board_state: String,
    current_turn: String,
}

impl NewGameRow {
    /// Encodes a creation request.
    #[instrument(skip(new), fields(white_player_id = new.white_player_id, mode = %new.mode))]
    pub fn encode(new: &NewSession) -> Result<Self, DbError> {
        Ok(Self {
            white_player_id: new.white_player_id,
            game_type: new.mode.to_string(),
            status: new.status.to_string(),
            board_state: serde_json::to_string(new.state.board())?,
            current_turn: new.state.turn().to_string(),
        })
    }
}

/// Mutable columns of a match, written back after every transition.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = schema::games)]
#[diesel(treat_none_as_null = true)]
pub(crate) struct GameChangeset {
    black_player_id: Option<i32>,
    status: String,
    winner_id: Option<i32>,
    board_state: String,
    current_turn: String,
    completed_at: Option<NaiveDateTime>,
}

impl GameChangeset {
    /// Encodes the mutable part of a session.
    pub(crate) fn encode(session: &Session) -> Result<Self, DbError> {
        Ok(Self {
            black_player_id: session.black_player_id,
            status: session.status.to_string(),
            winner_id: session.winner_id,
            board_state: serde_json::to_string(session.state.board())?,
            current_turn: session.state.turn().to_string(),
            completed_at: session.completed_at,
        })
    }
}
