//! Command-line interface for the ugolki server.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ugolki - corner-occupation match server
#[derive(Parser, Debug)]
#[command(name = "ugolki")]
#[command(about = "Real-time ugolki match server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Optional TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database (overrides config and DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the WebSocket game server
    Serve {
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Register a participant
    AddUser {
        /// Unique display name
        #[arg(short, long)]
        username: String,
    },

    /// Issue an access token for a participant
    Token {
        /// Participant id
        #[arg(short, long)]
        user_id: i32,
    },

    /// Play random moves from the initial position and print the board
    Demo {
        /// Number of moves to play
        #[arg(short, long, default_value = "20")]
        moves: usize,
    },
}
