//! Events command: print the event trace of a session.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::events::check_for_approval;
use crate::session::{create_store, SessionKey};
use anyhow::Result;

/// Run the events command.
pub async fn run_events(
    session_id: &str,
    user: Option<String>,
    json: bool,
    settings: Settings,
) -> Result<()> {
    preflight::check(Operation::Inspect, &settings)?;

    let store = create_store(&settings)?;
    let user_id = user.unwrap_or_else(|| settings.session.user_id.clone());
    let key = SessionKey::new(&settings.session.app_name, &user_id, session_id);

    if store.get_session(&key).await?.is_none() {
        Output::error(&format!("Session not found: {}", key));
        anyhow::bail!("Session not found: {}", key);
    }

    let events = store.events(&key).await?;

    if json {
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }

    Output::header(&format!("Events of {} ({})", session_id, events.len()));
    println!();
    for event in &events {
        Output::event(event);
    }

    let state = store.state(&key).await?;
    if !state.is_empty() {
        Output::header("State");
        for (k, v) in state.values() {
            Output::kv(k, &v.to_string());
        }
    }

    if let Some(ticket) = check_for_approval(&events) {
        println!();
        Output::kv("First approval request", &ticket.approval_id);
        Output::kv("In invocation", &ticket.invocation_id);
    }

    Ok(())
}
