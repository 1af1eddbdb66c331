//! SQLite repository for participants and matches.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::{debug, info, instrument};

use crate::db::models::GameChangeset;
use crate::db::{DbError, GameRow, NewGameRow, NewUser, User, schema};
use crate::session::{GameId, GameMode, NewSession, Session, SessionStatus, UserId};
use crate::store::{GameStore, Leaderboard, LeaderboardEntry, UserProfile};

/// Schema migrations compiled into the binary.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Database repository for user and game operations.
///
/// Opens one connection per call. The async [`GameStore`] impl moves each
/// call onto the blocking pool.
#[derive(Debug, Clone)]
pub struct GameRepository {
    db_path: String,
}

impl GameRepository {
    /// Creates a new repository for the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the path is empty.
    #[instrument(skip(db_path), fields(db_path = %db_path))]
    pub fn new(db_path: String) -> Result<Self, DbError> {
        if db_path.trim().is_empty() {
            return Err(DbError::new("Database path is empty"));
        }
        info!(path = %db_path, "Creating GameRepository");
        Ok(Self { db_path })
    }

    /// Establishes a database connection.
    #[instrument(skip(self))]
    fn connection(&self) -> Result<SqliteConnection, DbError> {
        debug!(path = %self.db_path, "Establishing connection");
        SqliteConnection::establish(&self.db_path)
            .map_err(|e| DbError::new(format!("Failed to connect to '{}': {}", self.db_path, e)))
    }

    /// Applies any pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a migration fails.
    #[instrument(skip(self))]
    pub fn run_migrations(&self) -> Result<(), DbError> {
        let mut conn = self.connection()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| DbError::new(format!("Migration failed: {}", e)))?;
        info!(count = applied.len(), "Migrations applied");
        Ok(())
    }

    /// Creates a new participant at the default rating.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the username is already taken or a database error occurs.
    #[instrument(skip(self))]
    pub fn create_user(&self, username: String) -> Result<User, DbError> {
        debug!(username = %username, "Creating user");
        let mut conn = self.connection()?;

        let user = diesel::insert_into(schema::users::table)
            .values(&NewUser::new(username))
            .returning(User::as_returning())
            .get_result(&mut conn)?;

        info!(user_id = user.id(), username = %user.username(), "User created");
        Ok(user)
    }

    /// Gets a participant by id. Returns `None` if not found.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn get_user(&self, user_id: UserId) -> Result<Option<User>, DbError> {
        let mut conn = self.connection()?;
        let user = schema::users::table
            .find(user_id)
            .select(User::as_select())
            .first(&mut conn)
            .optional()?;
        debug!(found = user.is_some(), "User lookup");
        Ok(user)
    }

    /// Overwrites a participant's rating.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the participant does not exist or a database error occurs.
    #[instrument(skip(self))]
    pub fn set_rating(&self, user_id: UserId, elo: f64) -> Result<(), DbError> {
        let mut conn = self.connection()?;
        let updated = diesel::update(schema::users::table.find(user_id))
            .set(schema::users::elo.eq(elo))
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(DbError::new(format!("User {} not found", user_id)));
        }
        debug!("Rating updated");
        Ok(())
    }

    /// Inserts a new match.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if encoding or the insert fails.
    #[instrument(skip(self, new), fields(white_player_id = new.white_player_id, mode = %new.mode))]
    pub fn create_game(&self, new: &NewSession) -> Result<Session, DbError> {
        let mut conn = self.connection()?;
        let row = diesel::insert_into(schema::games::table)
            .values(&NewGameRow::encode(new)?)
            .returning(GameRow::as_returning())
            .get_result(&mut conn)?;

        let session = row.into_session()?;
        info!(game_id = session.id, "Game created");
        Ok(session)
    }

    /// Loads a match by id. Returns `None` if not found.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the row cannot be read or decoded.
    #[instrument(skip(self))]
    pub fn get_game(&self, game_id: GameId) -> Result<Option<Session>, DbError> {
        let mut conn = self.connection()?;
        let row = schema::games::table
            .find(game_id)
            .select(GameRow::as_select())
            .first(&mut conn)
            .optional()?;
        row.map(GameRow::into_session).transpose()
    }

    /// Writes back board, turn, participants, status and completion of a match.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the match does not exist or the update fails.
    #[instrument(skip(self, session), fields(game_id = session.id, status = %session.status))]
    pub fn save_game(&self, session: &Session) -> Result<(), DbError> {
        let mut conn = self.connection()?;
        let updated = diesel::update(schema::games::table.find(session.id))
            .set(&GameChangeset::encode(session)?)
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(DbError::new(format!("Game {} not found", session.id)));
        }
        debug!("Game saved");
        Ok(())
    }

    /// Lists waiting player-vs-player matches not created by `exclude`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn list_open_games(&self, exclude: UserId) -> Result<Vec<Session>, DbError> {
        let mut conn = self.connection()?;
        let rows = schema::games::table
            .filter(schema::games::status.eq(SessionStatus::Waiting.to_string()))
            .filter(schema::games::game_type.eq(GameMode::PlayerVsPlayer.to_string()))
            .filter(schema::games::white_player_id.ne(exclude))
            .order((schema::games::created_at.asc(), schema::games::id.asc()))
            .select(GameRow::as_select())
            .load(&mut conn)?;

        debug!(count = rows.len(), "Open games loaded");
        rows.into_iter().map(GameRow::into_session).collect()
    }

    /// Participants ordered by rating, highest first, with their match counts.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn leaderboard(&self, limit: i64, offset: i64) -> Result<Leaderboard, DbError> {
        let mut conn = self.connection()?;
        let offset = offset.max(0);

        let total: i64 = schema::users::table.count().get_result(&mut conn)?;
        let users = schema::users::table
            .order((schema::users::elo.desc(), schema::users::id.asc()))
            .limit(limit.max(0))
            .offset(offset)
            .select(User::as_select())
            .load(&mut conn)?;

        let mut entries = Vec::with_capacity(users.len());
        for (rank, user) in (offset + 1..).zip(users) {
            let user_id = *user.id();
            // A participant never holds both seats, so the two counts are disjoint.
            let as_white: i64 = schema::games::table
                .filter(schema::games::white_player_id.eq(user_id))
                .count()
                .get_result(&mut conn)?;
            let as_black: i64 = schema::games::table
                .filter(schema::games::black_player_id.eq(user_id))
                .count()
                .get_result(&mut conn)?;
            entries.push(LeaderboardEntry::new(
                rank,
                user.username().clone(),
                *user.elo(),
                as_white + as_black,
            ));
        }

        info!(total, returned = entries.len(), "Leaderboard loaded");
        Ok(Leaderboard::new(entries, total))
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(GameRepository) -> Result<T, DbError> + Send + 'static,
    {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || op(repo)).await?
    }
}

fn profile(user: User) -> UserProfile {
    UserProfile::new(*user.id(), user.username().clone(), *user.elo())
}

#[async_trait]
impl GameStore for GameRepository {
    async fn create_user(&self, username: &str) -> Result<UserProfile, DbError> {
        let username = username.to_string();
        self.blocking(move |repo| repo.create_user(username).map(profile))
            .await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserProfile>, DbError> {
        self.blocking(move |repo| Ok(repo.get_user(id)?.map(profile)))
            .await
    }

    async fn set_rating(&self, id: UserId, elo: f64) -> Result<(), DbError> {
        self.blocking(move |repo| repo.set_rating(id, elo)).await
    }

    async fn create_game(&self, new: NewSession) -> Result<Session, DbError> {
        self.blocking(move |repo| repo.create_game(&new)).await
    }

    async fn get_game(&self, id: GameId) -> Result<Option<Session>, DbError> {
        self.blocking(move |repo| repo.get_game(id)).await
    }

    async fn save_game(&self, session: &Session) -> Result<(), DbError> {
        let session = session.clone();
        self.blocking(move |repo| repo.save_game(&session)).await
    }

    async fn list_open_games(&self, exclude: UserId) -> Result<Vec<Session>, DbError> {
        self.blocking(move |repo| repo.list_open_games(exclude))
            .await
    }

    async fn leaderboard(&self, limit: i64, offset: i64) -> Result<Leaderboard, DbError> {
        self.blocking(move |repo| repo.leaderboard(limit, offset))
            .await
    }
}
