//! Tollgate CLI entry point.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tollgate::cli::{commands, Cli, Commands};
use tollgate::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.as_ref().map(PathBuf::from);
    let settings = Settings::load_from(config_path.as_ref())?;

    // Initialize logging; -v flags win over the configured level
    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("tollgate={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Ensure data directory exists
    std::fs::create_dir_all(settings.data_dir())?;

    // Execute command
    match &cli.command {
        Commands::Ship {
            query,
            session,
            approve,
            reject,
            model,
        } => {
            commands::run_ship(query, session.clone(), *approve, *reject, model.clone(), settings)
                .await?;
        }

        Commands::Chat {
            session,
            model,
            no_transcript,
        } => {
            commands::run_chat(session, model.clone(), *no_transcript, settings).await?;
        }

        Commands::Sessions { user } => {
            commands::run_sessions(user.clone(), settings).await?;
        }

        Commands::Events {
            session_id,
            user,
            json,
        } => {
            commands::run_events(session_id, user.clone(), *json, settings).await?;
        }

        Commands::Serve { host, port } => {
            commands::run_serve(host, *port, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, config_path, settings)?;
        }
    }

    Ok(())
}
