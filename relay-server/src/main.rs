#![cfg_attr(not(test), forbid(unsafe_code))]

//! Main entry point for the Social Inbox Relay server.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::Config;
use std::error::Error;
use std::path::PathBuf;

mod app_state;
mod handlers;
mod http;
mod ingest;
mod middleware;
mod routes;
mod server;
mod services;
mod store;
mod tracer;

#[cfg(test)]
mod flow_tests;

/// Main CLI structure for the relay server
#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Social Inbox Relay: webhook ingestion and real-time delivery", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the relay CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay server
    Serve {
        /// The port number to bind the server to (e.g., 8080)
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to the configuration file (config.yaml or config.json)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Initializes environment variables and returns the parsed CLI.
#[must_use]
pub fn initialize_cli() -> Cli {
    dotenv().ok();
    Cli::parse()
}

/// Handles the serve command by loading configuration and starting the server.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(
    port: Option<u16>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let resolved_config =
        Config::load_config(config, port).map_err(|err| -> Box<dyn Error> { Box::new(err) })?;
    server::run(resolved_config).await
}

/// Main application entry point.
///
/// # Errors
/// Returns an error if the application fails to initialize or run.
pub async fn run_app() -> Result<(), Box<dyn Error>> {
    let cli = initialize_cli();

    match cli.command {
        Commands::Serve { port, config } => {
            handle_serve_command(port, config).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    run_app().await
}
