//! Configuration settings for Tollgate.

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub model: ModelSettings,
    pub approval: ApprovalSettings,
    pub session: SessionSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data (transcripts, databases).
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.tollgate".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Chat model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Model used by the agent runner.
    pub name: String,
    /// Maximum model calls per invocation segment before giving up.
    pub max_iterations: usize,
    /// Retry policy for transient API failures.
    pub retry: RetrySettings,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "gpt-4o-mini".to_string(),
            max_iterations: 15,
            retry: RetrySettings::default(),
        }
    }
}

/// Retry policy for model requests.
///
/// Delay before retry `n` (1-based) is `initial_delay_secs * exp_base^(n-1)`,
/// capped at ten minutes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum attempts, including the first one.
    pub attempts: u32,
    /// Delay multiplier between attempts.
    pub exp_base: u32,
    /// Delay before the first retry, in seconds.
    pub initial_delay_secs: u64,
    /// HTTP status codes that are worth retrying.
    pub http_status_codes: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            exp_base: 7,
            initial_delay_secs: 1,
            http_status_codes: vec![429, 500, 503, 504],
        }
    }
}

impl RetrySettings {
    /// Backoff schedule between attempts. Attempts are counted by the caller.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(self.initial_delay_secs))
            .with_multiplier(f64::from(self.exp_base.max(1)))
            .with_randomization_factor(0.0)
            .with_max_interval(MAX_RETRY_DELAY)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Whether a response with this status should be retried.
    pub fn retries_status(&self, status: u16) -> bool {
        self.http_status_codes.contains(&status)
    }

    /// Whether any server-side (5xx) status is configured for retry.
    pub fn retries_server_errors(&self) -> bool {
        self.http_status_codes.iter().any(|s| (500..600).contains(s))
    }
}

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10 * 60);

/// Approval workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    /// Orders at or below this many containers are auto-approved.
    pub large_order_threshold: i64,
    /// Seconds a confirmation may stay pending before it is abandoned (0 = never).
    pub pending_ttl_seconds: u64,
    /// Seconds a finished invocation's gate state stays queryable.
    pub resolved_retention_seconds: u64,
    /// Seconds between sweeps of expired entries while serving.
    pub purge_interval_seconds: u64,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            large_order_threshold: 5,
            pending_ttl_seconds: 0,
            resolved_retention_seconds: 24 * 60 * 60,
            purge_interval_seconds: 60,
        }
    }
}

impl ApprovalSettings {
    /// Pending time-to-live, if one is configured.
    pub fn pending_ttl(&self) -> Option<Duration> {
        (self.pending_ttl_seconds > 0).then(|| Duration::from_secs(self.pending_ttl_seconds))
    }

    pub fn resolved_retention(&self) -> Duration {
        Duration::from_secs(self.resolved_retention_seconds)
    }

    /// Sweep period, never shorter than one second.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_seconds.max(1))
    }
}

/// Session store backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SessionProvider {
    /// SQLite database, survives restarts (default).
    #[default]
    Sqlite,
    /// Process memory only.
    Memory,
}

impl std::str::FromStr for SessionProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "database" => Ok(SessionProvider::Sqlite),
            "memory" => Ok(SessionProvider::Memory),
            _ => Err(format!("Unknown session provider: {}", s)),
        }
    }
}

impl std::fmt::Display for SessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionProvider::Sqlite => write!(f, "sqlite"),
            SessionProvider::Memory => write!(f, "memory"),
        }
    }
}

/// Session service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub provider: SessionProvider,
    /// Path to SQLite database (for sqlite provider).
    pub sqlite_path: String,
    /// Application name sessions are filed under.
    pub app_name: String,
    /// User the CLI acts as.
    pub user_id: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            provider: SessionProvider::Sqlite,
            sqlite_path: "~/.tollgate/sessions.db".to_string(),
            app_name: "shipping_coordinator".to_string(),
            user_id: "default".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TollgateError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tollgate")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.session.sqlite_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Backoff;

    #[test]
    fn test_retry_backoff_grows_exponentially() {
        let retry = RetrySettings::default();
        let mut backoff = retry.backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(7)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(49)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(343)));
        assert_eq!(backoff.next_backoff(), Some(MAX_RETRY_DELAY));

        assert!(retry.retries_status(429));
        assert!(!retry.retries_status(400));
        assert!(retry.retries_server_errors());

        let only_rate_limits = RetrySettings {
            http_status_codes: vec![429],
            ..RetrySettings::default()
        };
        assert!(!only_rate_limits.retries_server_errors());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [approval]
            large_order_threshold = 8
            "#,
        )
        .unwrap();

        assert_eq!(settings.approval.large_order_threshold, 8);
        assert_eq!(settings.approval.pending_ttl(), None);
        assert_eq!(settings.model.retry.attempts, 5);
        assert_eq!(settings.session.provider, SessionProvider::Sqlite);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.approval.pending_ttl_seconds = 600;
        settings.session.provider = SessionProvider::Memory;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.approval.pending_ttl(), Some(Duration::from_secs(600)));
        assert_eq!(loaded.session.provider, SessionProvider::Memory);
    }
}
