//! Pre-flight checks before expensive operations.
//!
//! Validates that required configuration is available before starting
//! operations that would otherwise fail midway.

use crate::config::{SessionProvider, Settings};
use crate::error::{Result, TollgateError};

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Running the agent requires an API key and a usable session store.
    Agent,
    /// Inspecting sessions requires only the session store.
    Inspect,
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    match operation {
        Operation::Agent => {
            check_api_key()?;
            check_session_store(settings)?;
        }
        Operation::Inspect => {
            check_session_store(settings)?;
        }
    }
    Ok(())
}

/// Check if OpenAI API key is configured.
fn check_api_key() -> Result<()> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(TollgateError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        Err(_) => Err(TollgateError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

/// Check that the SQLite database directory can be created.
fn check_session_store(settings: &Settings) -> Result<()> {
    if settings.session.provider != SessionProvider::Sqlite {
        return Ok(());
    }
    let path = settings.sqlite_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            TollgateError::Config(format!(
                "Cannot create session directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}
