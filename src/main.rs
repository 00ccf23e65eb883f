//! Task Desk backend
//!
//! A task-assignment service for a small team: a Telegram bot front door
//! plus a mini-app HTTP API with role-gated task lifecycle management.

use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use task_desk::api::{self, AppState};
use task_desk::bot::{self, BotClient};
use task_desk::cli::Cli;
use task_desk::config::Config;
use task_desk::db::Database;
use task_desk::notify::Notifier;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let mut config = Config::load(cli.config.as_deref().map(std::path::Path::new))?;

    // Override settings from CLI arguments
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.into();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    run_server(config).await
}

/// Open storage, start the notifier and bot front door, serve the API.
async fn run_server(config: Config) -> Result<()> {
    info!("Starting task-desk v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {:?}", config.server.db_path);
    info!("Bind: {}:{}", config.server.bind, config.server.port);

    if config.bot.owner_id == 0 {
        warn!("No owner identity configured; every sign-in gets the worker role");
    }

    let db = Database::open(&config.server.db_path)?;
    info!("Database initialized successfully");

    let bot_client = BotClient::new(&config.bot.token);
    let notifier = Notifier::spawn(Arc::new(bot_client.clone()));

    if config.bot.token.is_empty() {
        warn!("No bot token configured; front door and notifications are inert");
    } else {
        tokio::spawn(bot::run_start_listener(
            bot_client,
            db.clone(),
            config.bot.clone(),
        ));
    }

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = AppState {
        db,
        notifier,
        config: Arc::new(config),
    };

    api::serve(state, addr).await
}
