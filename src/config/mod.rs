//! Configuration module for Tollgate.
//!
//! Handles loading and managing application settings.

mod settings;

pub use settings::{
    ApprovalSettings, GeneralSettings, ModelSettings, RetrySettings, SessionProvider,
    SessionSettings, Settings,
};
