//! CLI command implementations.

mod chat;
mod config;
mod events;
mod serve;
mod sessions;
mod ship;

pub use chat::run_chat;
pub use config::run_config;
pub use events::run_events;
pub use serve::run_serve;
pub use sessions::run_sessions;
pub use ship::run_ship;

use crate::agent::{OpenAIChatModel, Runner, ToolContext};
use crate::config::Settings;
use crate::error::Result;
use crate::session::create_store;
use std::sync::Arc;

/// Build a runner backed by OpenAI and the configured session store.
pub(crate) fn build_runner(settings: &Settings, model: Option<&str>) -> Result<Runner> {
    let model_name = model.unwrap_or(&settings.model.name);
    let model = Arc::new(OpenAIChatModel::with_retry(
        model_name,
        settings.model.retry.clone(),
    ));
    let sessions = create_store(settings)?;

    Ok(
        Runner::new(model, ToolContext::new(settings.approval.large_order_threshold), sessions)
            .with_max_iterations(settings.model.max_iterations)
            .with_pending_ttl(settings.approval.pending_ttl())
            .with_resolved_retention(settings.approval.resolved_retention()),
    )
}
