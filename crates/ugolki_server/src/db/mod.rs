//! SQLite persistence for participants and matches.

mod error;
mod models;
mod repository;
mod schema;

pub use error::DbError;
pub use models::{GameRow, NewGameRow, NewUser, User};
pub use repository::{GameRepository, MIGRATIONS};
