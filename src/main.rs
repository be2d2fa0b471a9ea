// src/main.rs

use clap::{Parser, Subcommand};
use rmcp::{transport::stdio, ServiceExt};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use relay::config::CONFIG;
use relay::mcp::RelayServer;

#[derive(Parser)]
#[command(name = "relay", about = "Multi-agent session coordination layer for Claude Code")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve coordination tools over MCP stdio (default)
    Serve {
        /// Caller-type token reported to the capability gate
        #[arg(long, env = "RELAY_CLIENT_IDENTITY", default_value = "claude-code")]
        client: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr: stdout is the MCP transport.
    let level = CONFIG
        .log_level
        .parse::<Level>()
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client = match Cli::parse().command {
        Some(Commands::Serve { client }) => client,
        None => "claude-code".to_string(),
    };

    info!("Starting Relay coordination server");
    info!("Database: {}", CONFIG.database_url);
    info!("Lock TTL: {}s, log capacity: {}", CONFIG.lock_ttl_seconds, CONFIG.change_log_capacity);

    let pool = SqlitePoolOptions::new()
        .max_connections(CONFIG.sqlite_max_connections)
        .connect(&CONFIG.database_url)
        .await?;

    let state = Arc::new(relay::state::create_coord_state(pool).await?);

    info!("Serving coordination tools over stdio (client identity: {})", client);
    let service = RelayServer::new(state, client).serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
