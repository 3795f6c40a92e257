//! Sessions command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::session::create_store;
use anyhow::Result;

/// Run the sessions command.
pub async fn run_sessions(user: Option<String>, settings: Settings) -> Result<()> {
    preflight::check(Operation::Inspect, &settings)?;

    let store = create_store(&settings)?;
    let user_id = user.unwrap_or_else(|| settings.session.user_id.clone());

    match store.list_sessions(&settings.session.app_name, &user_id).await {
        Ok(sessions) => {
            if sessions.is_empty() {
                Output::info(&format!(
                    "No sessions for user '{}' yet. Use 'tollgate ship <request>' to start one.",
                    user_id
                ));
            } else {
                Output::header(&format!("Sessions of {} ({})", user_id, sessions.len()));
                println!();

                for session in &sessions {
                    Output::session_info(session);
                }

                let total_events: usize = sessions.iter().map(|s| s.event_count).sum();
                println!();
                Output::kv("Total sessions", &sessions.len().to_string());
                Output::kv("Total events", &total_events.to_string());
            }
        }
        Err(e) => {
            Output::error(&format!("Failed to list sessions: {}", e));
            return Err(e.into());
        }
    }

    Ok(())
}
