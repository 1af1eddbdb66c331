//! Ugolki server binary.

#![warn(missing_docs)]

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::{info, instrument};
use tracing_subscriber::EnvFilter;
use ugolki_server::{
    Coordinator, CoordinatorConfig, EloRating, GameRepository, GameStore, RandomAgent,
    ServerConfig, TokenAuth,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Serve { port, host } => run_server(config.with_bind(host, port)).await,
        Command::AddUser { username } => add_user(&config, username),
        Command::Token { user_id } => issue_token(&config, user_id),
        Command::Demo { moves } => {
            run_demo(moves);
            Ok(())
        }
    }
}

/// Layers file, environment and CLI settings.
fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let base = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    Ok(base
        .with_env()?
        .with_database_url(cli.database_url.clone()))
}

/// Opens the database and applies pending migrations.
fn open_repository(config: &ServerConfig) -> Result<GameRepository> {
    let repo = GameRepository::new(config.database_url().clone())?;
    repo.run_migrations()
        .with_context(|| format!("Failed to migrate '{}'", config.database_url()))?;
    Ok(repo)
}

fn token_auth(config: &ServerConfig) -> Result<TokenAuth> {
    Ok(TokenAuth::new(
        config.secret_key().as_bytes(),
        config.token_ttl()?,
    )?)
}

/// Runs the WebSocket game server.
#[instrument(skip(config), fields(address = %config.bind_address()))]
async fn run_server(config: ServerConfig) -> Result<()> {
    let store: Arc<dyn GameStore> = Arc::new(open_repository(&config)?);
    let coordinator = Coordinator::new(
        store.clone(),
        Arc::new(EloRating::new(store)),
        Arc::new(token_auth(&config)?),
        Arc::new(RandomAgent::new()),
        CoordinatorConfig {
            agent_delay: config.agent_delay(),
        },
    );

    info!("Starting ugolki server");
    ugolki_server::serve(&config.bind_address(), coordinator).await?;
    Ok(())
}

/// Registers a participant and prints their id.
fn add_user(config: &ServerConfig, username: String) -> Result<()> {
    let repo = open_repository(config)?;
    let user = repo.create_user(username)?;
    println!("{}\t{}\t{}", user.id(), user.username(), user.elo());
    Ok(())
}

/// Prints a signed token for an existing participant.
fn issue_token(config: &ServerConfig, user_id: i32) -> Result<()> {
    let repo = open_repository(config)?;
    repo.get_user(user_id)?
        .with_context(|| format!("No user with id {}", user_id))?;
    println!("{}", token_auth(config)?.issue(user_id));
    Ok(())
}

/// Plays random moves from the start and prints the resulting position.
fn run_demo(moves: usize) {
    let mut rng = StdRng::from_entropy();
    let state = ugolki_rules::random_position(moves, &mut rng);
    println!("{}", state.board());
    println!("Turn: {}", state.turn());
    println!("Legal moves: {}", state.legal_actions().len());
    if let Some(winner) = state.winner() {
        println!("Winner: {}", winner);
    }
}
