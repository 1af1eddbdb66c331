//! Ugolki match server.
//!
//! Hosts real-time ugolki matches between two participants or between a
//! participant and an automated opponent.
//!
//! # Architecture
//!
//! - **Coordinator**: owns live sessions, validates turns, broadcasts state
//! - **Agent**: picks the automated opponent's moves
//! - **Store**: durable copy of participants and matches (SQLite or in-memory)
//! - **Auth / Rating**: signed access tokens and Elo updates
//! - **Server**: axum WebSocket and HTTP transport
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ugolki_server::{
//!     Coordinator, CoordinatorConfig, EloRating, GameStore, MemoryStore, RandomAgent, TokenAuth,
//! };
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn GameStore> = Arc::new(MemoryStore::new());
//! let auth = TokenAuth::new(b"secret", chrono::Duration::hours(1))?;
//! let coordinator = Coordinator::new(
//!     store.clone(),
//!     Arc::new(EloRating::new(store)),
//!     Arc::new(auth),
//!     Arc::new(RandomAgent::new()),
//!     CoordinatorConfig::default(),
//! );
//! # let _ = coordinator;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod agent;
mod auth;
mod config;
mod connections;
mod coordinator;
mod db;
mod error;
mod protocol;
mod rating;
mod server;
mod session;
mod store;

// Crate-level exports - Agent
pub use agent::{Agent, AgentError, RandomAgent};

// Crate-level exports - Auth
pub use auth::{AuthError, Authenticator, TokenAuth};

// Crate-level exports - Configuration
pub use config::{
    ConfigError, ENV_AGENT_DELAY_MS, ENV_DATABASE_URL, ENV_HOST, ENV_PORT, ENV_SECRET,
    ENV_TOKEN_TTL_SECS, ServerConfig,
};

// Crate-level exports - Connections
pub use connections::{ConnectionHandle, ConnectionId, ConnectionRegistry};

// Crate-level exports - Coordinator
pub use coordinator::{Coordinator, CoordinatorConfig, Flow, Identity};

// Crate-level exports - Persistence
pub use db::{DbError, GameRepository, GameRow, MIGRATIONS, NewGameRow, NewUser, User};
pub use store::{GameStore, Leaderboard, LeaderboardEntry, MemoryStore, UserProfile};

// Crate-level exports - Errors
pub use error::CoordinatorError;

// Crate-level exports - Protocol
pub use protocol::{ClientMessage, GameStatePayload, OpenGame, ServerMessage};

// Crate-level exports - Rating
pub use rating::{DEFAULT_RATING, EloRating, K_FACTOR, RatingService, elo_change, expected_score};

// Crate-level exports - Transport
pub use server::{AppState, router, serve};

// Crate-level exports - Sessions
pub use session::{
    GameId, GameMode, NewSession, Session, SessionRegistry, SessionSlot, SessionStatus, UserId,
};
