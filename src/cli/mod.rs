//! CLI module for Tollgate.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Tollgate - Tool-calling agent with human approval gates
///
/// Runs a shipping coordinator agent whose large orders pause until a human
/// approves or rejects them.
#[derive(Parser, Debug)]
#[command(name = "tollgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one shipping request and handle any approval it needs
    Ship {
        /// The request, e.g. "Ship 10 containers to Rotterdam"
        query: String,

        /// Session to run in (a fresh one by default)
        #[arg(short, long)]
        session: Option<String>,

        /// Approve every pending order without asking
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Reject every pending order without asking
        #[arg(long)]
        reject: bool,

        /// LLM model to use
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Start an interactive chat session
    Chat {
        /// Session to continue or create
        #[arg(short, long, default_value = "user_session_1")]
        session: String,

        /// LLM model to use
        #[arg(short, long)]
        model: Option<String>,

        /// Do not write a markdown transcript
        #[arg(long)]
        no_transcript: bool,
    },

    /// List stored sessions
    Sessions {
        /// User whose sessions to list (defaults to the configured user)
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Show the event trace of a session
    Events {
        /// Session ID
        session_id: String,

        /// User who owns the session (defaults to the configured user)
        #[arg(short, long)]
        user: Option<String>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Start HTTP API server for run and resume
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ship_flags() {
        let cli = Cli::parse_from(["tollgate", "-vv", "ship", "Ship 10 containers", "--approve"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Ship {
                query,
                approve,
                reject,
                ..
            } => {
                assert_eq!(query, "Ship 10 containers");
                assert!(approve);
                assert!(!reject);
            }
            other => panic!("Unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_approve_and_reject_conflict() {
        let result = Cli::try_parse_from(["tollgate", "ship", "x", "--approve", "--reject"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_chat_defaults() {
        let cli = Cli::parse_from(["tollgate", "chat"]);
        match cli.command {
            Commands::Chat {
                session,
                no_transcript,
                ..
            } => {
                assert_eq!(session, "user_session_1");
                assert!(!no_transcript);
            }
            other => panic!("Unexpected command: {:?}", other),
        }
    }
}
