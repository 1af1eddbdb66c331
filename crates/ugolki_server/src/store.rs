//! Durable storage seam for participants and matches.
//!
//! The coordinator only sees [`GameStore`]. [`crate::GameRepository`] backs it
//! with SQLite; [`MemoryStore`] keeps everything in process for tests and the
//! demo command.

use crate::db::DbError;
use crate::rating::DEFAULT_RATING;
use crate::session::{GameId, GameMode, NewSession, Session, SessionStatus, UserId};
use async_trait::async_trait;
use chrono::Utc;
use derive_getters::Getters;
use derive_new::new;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

/// Public view of a participant.
#[derive(Debug, Clone, PartialEq, Getters, new, Serialize, Deserialize)]
pub struct UserProfile {
    id: UserId,
    username: String,
    elo: f64,
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Getters, new, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    rank: i64,
    username: String,
    elo: f64,
    games_played: i64,
}

/// A page of the leaderboard plus the total number of participants.
#[derive(Debug, Clone, PartialEq, Getters, new, Serialize, Deserialize)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
    total: i64,
}

/// Durable copy of participants and matches.
#[async_trait]
pub trait GameStore: Send + Sync + fmt::Debug {
    /// Registers a participant at the default rating.
    async fn create_user(&self, username: &str) -> Result<UserProfile, DbError>;

    /// Loads a participant profile.
    async fn get_user(&self, id: UserId) -> Result<Option<UserProfile>, DbError>;

    /// Overwrites a participant's rating.
    async fn set_rating(&self, id: UserId, elo: f64) -> Result<(), DbError>;

    /// Stores a new match and returns it with its assigned id.
    async fn create_game(&self, new: NewSession) -> Result<Session, DbError>;

    /// Loads a match.
    async fn get_game(&self, id: GameId) -> Result<Option<Session>, DbError>;

    /// Writes back every mutable field of a match.
    async fn save_game(&self, session: &Session) -> Result<(), DbError>;

    /// Waiting player-vs-player matches not created by `exclude`, oldest first.
    async fn list_open_games(&self, exclude: UserId) -> Result<Vec<Session>, DbError>;

    /// Participants by rating, highest first.
    async fn leaderboard(&self, limit: i64, offset: i64) -> Result<Leaderboard, DbError>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    users: BTreeMap<UserId, UserProfile>,
    games: BTreeMap<GameId, Session>,
}

/// In-process [`GameStore`].
///
/// Writes can be made to fail on demand to exercise the coordinator's
/// behaviour when persistence is down.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[instrument]
    pub fn new() -> Self {
        info!("Creating in-memory store");
        Self::default()
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        warn!(fail, "Toggling simulated write failures");
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn tables(&self) -> MutexGuard<'_, MemoryTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[track_caller]
    fn check_writable(&self) -> Result<(), DbError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(DbError::new("Simulated write failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    #[instrument(skip(self))]
    async fn create_user(&self, username: &str) -> Result<UserProfile, DbError> {
        self.check_writable()?;
        let mut tables = self.tables();
        if tables.users.values().any(|u| u.username == username) {
            return Err(DbError::new(format!("Username '{}' already taken", username)));
        }
        let id = tables.users.keys().next_back().map_or(1, |last| last + 1);
        let profile = UserProfile::new(id, username.to_string(), DEFAULT_RATING);
        tables.users.insert(id, profile.clone());
        info!(user_id = id, "User created");
        Ok(profile)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserProfile>, DbError> {
        Ok(self.tables().users.get(&id).cloned())
    }

    #[instrument(skip(self))]
    async fn set_rating(&self, id: UserId, elo: f64) -> Result<(), DbError> {
        self.check_writable()?;
        match self.tables().users.get_mut(&id) {
            Some(user) => {
                user.elo = elo;
                Ok(())
            }
            None => Err(DbError::new(format!("User {} not found", id))),
        }
    }

    #[instrument(skip(self, new), fields(white_player_id = new.white_player_id, mode = %new.mode))]
    async fn create_game(&self, new: NewSession) -> Result<Session, DbError> {
        self.check_writable()?;
        let mut tables = self.tables();
        let id = tables.games.keys().next_back().map_or(1, |last| last + 1);
        let session = Session::from_new(id, new, Utc::now().naive_utc());
        tables.games.insert(id, session.clone());
        debug!(game_id = id, "Game stored");
        Ok(session)
    }

    async fn get_game(&self, id: GameId) -> Result<Option<Session>, DbError> {
        Ok(self.tables().games.get(&id).cloned())
    }

    #[instrument(skip(self, session), fields(game_id = session.id))]
    async fn save_game(&self, session: &Session) -> Result<(), DbError> {
        self.check_writable()?;
        let mut tables = self.tables();
        match tables.games.get_mut(&session.id) {
            Some(stored) => {
                *stored = Session {
                    agent_ticket: None,
                    ..session.clone()
                };
                Ok(())
            }
            None => Err(DbError::new(format!("Game {} not found", session.id))),
        }
    }

    async fn list_open_games(&self, exclude: UserId) -> Result<Vec<Session>, DbError> {
        let mut open: Vec<Session> = self
            .tables()
            .games
            .values()
            .filter(|g| {
                g.status == SessionStatus::Waiting
                    && g.mode == GameMode::PlayerVsPlayer
                    && g.white_player_id != exclude
            })
            .cloned()
            .collect();
        open.sort_by_key(|g| (g.created_at, g.id));
        Ok(open)
    }

    async fn leaderboard(&self, limit: i64, offset: i64) -> Result<Leaderboard, DbError> {
        let tables = self.tables();
        let mut users: Vec<&UserProfile> = tables.users.values().collect();
        users.sort_by(|a, b| b.elo.total_cmp(&a.elo).then(a.id.cmp(&b.id)));

        let entries = users
            .into_iter()
            .skip(usize::try_from(offset.max(0)).unwrap_or(usize::MAX))
            .take(usize::try_from(limit.max(0)).unwrap_or(usize::MAX))
            .zip(offset.max(0) + 1..)
            .map(|(user, rank)| {
                let games_played = tables
                    .games
                    .values()
                    .filter(|g| g.is_participant(user.id))
                    .count();
                LeaderboardEntry::new(
                    rank,
                    user.username.clone(),
                    user.elo,
                    i64::try_from(games_played).unwrap_or(i64::MAX),
                )
            })
            .collect();

        Ok(Leaderboard::new(
            entries,
            i64::try_from(tables.users.len()).unwrap_or(i64::MAX),
        ))
    }
}
