//! Match session coordinator.
//!
//! Single entry point for every inbound request. Owns the live session table
//! and the connection registry, validates identity and turn order, drives the
//! rules engine, persists each transition and fans state out to the
//! participants of the affected session.
//!
//! Mutations of one session are serialized by that session's async lock;
//! requests for different sessions never wait on each other.

use crate::agent::Agent;
use crate::auth::{AuthError, Authenticator};
use crate::connections::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::error::CoordinatorError;
use crate::protocol::{ClientMessage, GameStatePayload, OpenGame, ServerMessage};
use crate::rating::{DEFAULT_RATING, RatingService};
use crate::session::{
    GameId, GameMode, NewSession, Session, SessionRegistry, SessionSlot, SessionStatus, UserId,
};
use crate::store::GameStore;
use chrono::Utc;
use derive_getters::Getters;
use derive_new::new;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use ugolki_rules::{Action, Color};

/// An authenticated participant bound to one socket.
#[derive(Debug, Clone, PartialEq, Eq, Getters, new)]
pub struct Identity {
    user_id: UserId,
    username: String,
}

/// Whether the transport should keep reading from a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep the connection open.
    Continue,
    /// Close the connection.
    Close,
}

/// Tunables for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Pause before the automated opponent replies.
    pub agent_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            agent_delay: Duration::from_millis(500),
        }
    }
}

/// Routes requests, owns live sessions and broadcasts their state.
#[derive(Debug, Clone)]
pub struct Coordinator {
    sessions: SessionRegistry,
    connections: ConnectionRegistry,
    store: Arc<dyn GameStore>,
    rating: Arc<dyn RatingService>,
    auth: Arc<dyn Authenticator>,
    agent: Arc<dyn Agent>,
    config: CoordinatorConfig,
    next_ticket: Arc<AtomicU64>,
}

impl Coordinator {
    /// Creates a coordinator with empty registries.
    #[instrument(skip_all, fields(agent = agent.name(), delay_ms = config.agent_delay.as_millis()))]
    pub fn new(
        store: Arc<dyn GameStore>,
        rating: Arc<dyn RatingService>,
        auth: Arc<dyn Authenticator>,
        agent: Arc<dyn Agent>,
        config: CoordinatorConfig,
    ) -> Self {
        info!("Creating coordinator");
        Self {
            sessions: SessionRegistry::new(),
            connections: ConnectionRegistry::new(),
            store,
            rating,
            auth,
            agent,
            config,
            next_ticket: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Live session table.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Live connection table.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Durable store.
    pub fn store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }

    /// Authenticates a new socket and greets it with `connected`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Authentication`] if the credential is
    /// invalid or names an unknown participant.
    #[instrument(skip(self, credential, conn), fields(connection = %conn.id()))]
    pub async fn connect(
        &self,
        credential: &str,
        conn: &ConnectionHandle,
    ) -> Result<Identity, CoordinatorError> {
        let user_id = self.auth.authenticate(credential).await?;
        let profile = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(AuthError::UnknownUser(user_id))?;

        let identity = Identity {
            user_id,
            username: profile.username().clone(),
        };
        conn.send(ServerMessage::Connected {
            user_id,
            username: identity.username.clone(),
        });
        info!(user_id, username = %identity.username, "Participant connected");
        Ok(identity)
    }

    /// Handles one inbound text frame.
    ///
    /// Errors go to `conn` only. Returns [`Flow::Close`] when the credential
    /// no longer validates.
    #[instrument(skip(self, credential, conn, text), fields(user_id = identity.user_id, connection = %conn.id()))]
    pub async fn handle_text(
        &self,
        identity: &Identity,
        credential: &str,
        conn: &ConnectionHandle,
        text: &str,
    ) -> Flow {
        if let Err(err) = self.auth.authenticate(credential).await {
            warn!(error = %err, "Credential no longer valid");
            conn.send(ServerMessage::error(&CoordinatorError::from(err)));
            return Flow::Close;
        }

        let result = match ClientMessage::parse(text) {
            Ok(message) => self.dispatch(identity, conn, message).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => Flow::Continue,
            Err(err) => {
                debug!(error = %err, "Request rejected");
                conn.send(ServerMessage::error(&err));
                if err.closes_connection() {
                    Flow::Close
                } else {
                    Flow::Continue
                }
            }
        }
    }

    /// Routes a parsed request to its operation.
    ///
    /// # Errors
    ///
    /// Returns whatever the operation rejects the request with.
    pub async fn dispatch(
        &self,
        identity: &Identity,
        conn: &ConnectionHandle,
        message: ClientMessage,
    ) -> Result<(), CoordinatorError> {
        let user_id = identity.user_id;
        match message {
            ClientMessage::CreateGame { mode } => self.create(user_id, mode, conn).await.map(drop),
            ClientMessage::JoinGame { game_id } => self.join(user_id, game_id, conn).await,
            ClientMessage::Move { game_id, action } => {
                self.make_move(user_id, game_id, action).await
            }
            ClientMessage::GetOpenGames => {
                let games = self.list_open_games(user_id).await?;
                conn.send(ServerMessage::OpenGames { games });
                Ok(())
            }
            ClientMessage::Reconnect { game_id } => self.reconnect(user_id, game_id, conn).await,
        }
    }

    /// Opens a match with the requester as white.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] if the match cannot be stored.
    #[instrument(skip(self, conn))]
    pub async fn create(
        &self,
        user_id: UserId,
        mode: GameMode,
        conn: &ConnectionHandle,
    ) -> Result<GameId, CoordinatorError> {
        let session = self
            .store
            .create_game(NewSession::new(user_id, mode))
            .await?;
        let game_id = session.id;
        let payload = GameStatePayload::from_session(&session);

        self.sessions.insert(session);
        self.connections.register(game_id, user_id, conn.clone());
        conn.send(ServerMessage::GameCreated(payload));

        info!(game_id, "Game created");
        Ok(game_id)
    }

    /// Seats the requester as black in a waiting match.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotFound`] for an unknown match,
    /// [`CoordinatorError::SessionState`] unless it is a waiting
    /// player-vs-player match, and [`CoordinatorError::Authorization`] when
    /// the creator tries to join.
    #[instrument(skip(self, conn))]
    pub async fn join(
        &self,
        user_id: UserId,
        game_id: GameId,
        conn: &ConnectionHandle,
    ) -> Result<(), CoordinatorError> {
        let mut session = self.lock_live(game_id).await?;

        session.join(user_id)?;
        let saved = self.store.save_game(&session).await;

        self.connections.register(game_id, user_id, conn.clone());
        self.connections.broadcast(
            game_id,
            &ServerMessage::GameStarted(GameStatePayload::from_session(&session)),
        );

        saved.map_err(|err| {
            error!(error = %err, "Failed to persist join");
            err.into()
        })
    }

    /// Plays the requester's move.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotFound`] for an unknown match,
    /// [`CoordinatorError::SessionState`] if it is not active or not loaded,
    /// [`CoordinatorError::Authorization`] if it is not the requester's turn
    /// and [`CoordinatorError::IllegalAction`] if the move is not legal.
    #[instrument(skip(self, action), fields(action = %action))]
    pub async fn make_move(
        &self,
        user_id: UserId,
        game_id: GameId,
        action: Action,
    ) -> Result<(), CoordinatorError> {
        let Some(slot) = self.sessions.get(game_id) else {
            return Err(match self.store.get_game(game_id).await? {
                None => CoordinatorError::NotFound(game_id),
                Some(stored) if stored.status != SessionStatus::Active => {
                    CoordinatorError::SessionState("Game is not active".to_string())
                }
                Some(_) => CoordinatorError::SessionState("Game not loaded".to_string()),
            });
        };

        let mut session = slot.lock().await;
        session.authorize_move(user_id, action)?;

        let outcome = self.apply_and_publish(&mut session, action).await;
        self.arm_agent(&mut session);
        outcome
    }

    /// Registers the requester again and sends them the current state.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotFound`] for an unknown match and
    /// [`CoordinatorError::Authorization`] if the requester does not play in it.
    #[instrument(skip(self, conn))]
    pub async fn reconnect(
        &self,
        user_id: UserId,
        game_id: GameId,
        conn: &ConnectionHandle,
    ) -> Result<(), CoordinatorError> {
        let mut session = self.lock_live(game_id).await?;

        if !session.is_participant(user_id) {
            warn!("Reconnect from non-participant");
            return Err(CoordinatorError::Authorization(
                "Not part of this game".to_string(),
            ));
        }

        self.connections.register(game_id, user_id, conn.clone());
        conn.send(ServerMessage::GameState(GameStatePayload::from_session(&session)));
        info!(status = %session.status, "Participant reconnected");

        self.arm_agent(&mut session);
        Ok(())
    }

    /// Drops one socket from every session it was registered in and tells the
    /// remaining participants. Session state is untouched.
    ///
    /// A session left without connections is evicted when its stored copy is
    /// authoritative: waiting sessions never diverge from the store and
    /// completed ones never change again. Active sessions stay live so an
    /// unsaved transition is not lost.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, user_id: UserId, connection: ConnectionId) {
        for game_id in self.connections.remove_connection(user_id, connection) {
            let notified = self
                .connections
                .broadcast(game_id, &ServerMessage::OpponentDisconnected { user_id });
            debug!(game_id, notified, "Disconnect announced");

            if self.connections.has_connections(game_id) {
                continue;
            }
            let Some(slot) = self.sessions.get(game_id) else {
                continue;
            };
            let session = slot.lock().await;
            // Joins and reconnects register under this lock.
            if self.connections.has_connections(game_id) {
                continue;
            }
            if matches!(
                session.status,
                SessionStatus::Waiting | SessionStatus::Completed
            ) {
                self.sessions.remove(game_id);
            }
        }
    }

    /// Waiting player-vs-player matches the requester could join.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] if the store cannot be read.
    #[instrument(skip(self))]
    pub async fn list_open_games(&self, user_id: UserId) -> Result<Vec<OpenGame>, CoordinatorError> {
        let waiting = self.store.list_open_games(user_id).await?;
        let mut games = Vec::with_capacity(waiting.len());

        for session in waiting {
            let creator = self.store.get_user(session.white_player_id).await?;
            games.push(OpenGame {
                game_id: session.id,
                creator: creator
                    .as_ref()
                    .map_or_else(|| "Unknown".to_string(), |c| c.username().clone()),
                creator_elo: creator.as_ref().map_or(DEFAULT_RATING, |c| *c.elo()),
                created_at: session.created_at,
            });
        }

        debug!(count = games.len(), "Open games listed");
        Ok(games)
    }

    /// Drops the live copy of a match. The durable copy is kept.
    pub fn evict(&self, game_id: GameId) -> bool {
        self.sessions.remove(game_id).is_some()
    }

    /// Copy of a live session, if loaded.
    pub async fn session_snapshot(&self, game_id: GameId) -> Option<Session> {
        let slot = self.sessions.get(game_id)?;
        let session = slot.lock().await;
        Some(session.clone())
    }

    /// Returns the live slot, rebuilding it from the store if needed.
    async fn load_session(&self, game_id: GameId) -> Result<SessionSlot, CoordinatorError> {
        if let Some(slot) = self.sessions.get(game_id) {
            return Ok(slot);
        }

        let stored = self
            .store
            .get_game(game_id)
            .await?
            .ok_or(CoordinatorError::NotFound(game_id))?;
        debug!(game_id, status = %stored.status, "Rehydrating session from store");
        Ok(self.sessions.insert(stored))
    }

    /// Locks the live session, retrying if it was evicted while waiting
    /// for the lock.
    async fn lock_live(
        &self,
        game_id: GameId,
    ) -> Result<OwnedMutexGuard<Session>, CoordinatorError> {
        loop {
            let slot = self.load_session(game_id).await?;
            let session = Arc::clone(&slot).lock_owned().await;
            match self.sessions.get(game_id) {
                Some(current) if Arc::ptr_eq(&current, &slot) => return Ok(session),
                _ => debug!(game_id, "Session evicted while locking; reloading"),
            }
        }
    }

    /// Steps the session, persists it, updates ratings and broadcasts.
    ///
    /// Persistence and rating failures are returned only after the new state
    /// has been broadcast; the live state stays authoritative.
    #[instrument(skip(self, session, action), fields(game_id = session.id, action = %action))]
    async fn apply_and_publish(
        &self,
        session: &mut Session,
        action: Action,
    ) -> Result<(), CoordinatorError> {
        let result = session.state.step(action);
        session.record_step(&result, Utc::now().naive_utc());

        let saved = self.store.save_game(session).await;
        if let Err(err) = &saved {
            error!(error = %err, "Failed to persist move");
        }

        let rated = match (result.winner, session.mode, session.black_player_id) {
            (Some(winner), GameMode::PlayerVsPlayer, Some(black)) => self
                .rating
                .record_result(session.white_player_id, black, winner == Color::White)
                .await
                .map(drop),
            _ => Ok(()),
        };
        if let Err(err) = &rated {
            error!(error = %err, "Failed to update ratings");
        }

        let game_id = session.id;
        self.connections.broadcast(
            game_id,
            &ServerMessage::GameState(GameStatePayload::from_session(session)),
        );
        if let Some(winner) = result.winner {
            self.connections.broadcast(
                game_id,
                &ServerMessage::GameOver {
                    winner,
                    winner_id: session.winner_id,
                },
            );
        }

        saved?;
        rated?;
        Ok(())
    }

    /// Schedules the automated opponent's reply if one is owed.
    ///
    /// Returns `None` when the agent is not to move or a reply is already
    /// pending.
    pub async fn schedule_agent_move(&self, game_id: GameId) -> Option<JoinHandle<()>> {
        let slot = self.sessions.get(game_id)?;
        let mut session = slot.lock().await;
        self.arm_agent(&mut session)
    }

    /// Issues a ticket and spawns the continuation that may redeem it.
    ///
    /// At most one ticket is outstanding per session; the continuation
    /// plays only if its ticket is still the session's current one.
    fn arm_agent(&self, session: &mut Session) -> Option<JoinHandle<()>> {
        if !session.agent_to_move() {
            return None;
        }
        if let Some(ticket) = session.agent_ticket {
            debug!(game_id = session.id, ticket, "Agent move already pending");
            return None;
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        session.agent_ticket = Some(ticket);

        let game_id = session.id;
        let this = self.clone();
        let delay = self.config.agent_delay;
        debug!(game_id, ticket, delay_ms = delay.as_millis(), "Agent move scheduled");

        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = this.play_agent_turn(game_id, ticket).await {
                warn!(game_id, error = %err, "Agent move failed");
            }
        }))
    }

    /// Plays the agent's move if `ticket` is current and the session still
    /// expects one.
    #[instrument(skip(self))]
    async fn play_agent_turn(
        &self,
        game_id: GameId,
        ticket: u64,
    ) -> Result<(), CoordinatorError> {
        let Some(slot) = self.sessions.get(game_id) else {
            debug!("Session no longer live; skipping agent move");
            return Ok(());
        };
        let mut session = slot.lock().await;

        if session.agent_ticket != Some(ticket) {
            debug!(current = ?session.agent_ticket, "Stale agent continuation");
            return Ok(());
        }
        session.agent_ticket = None;

        if !session.agent_to_move() {
            debug!(status = %session.status, turn = %session.state.turn(), "Agent move no longer due");
            return Ok(());
        }
        if !self.connections.has_connections(game_id) {
            debug!("No participant connected; skipping agent move");
            return Ok(());
        }

        let action = self.agent.select_action(&session.state)?;
        info!(agent = self.agent.name(), %action, "Agent moving");
        self.apply_and_publish(&mut session, action).await
    }
}
