//! Tollgate - Tool-calling agents with human approval gates
//!
//! A local-first CLI and library for running an LLM agent whose tools can
//! stop and wait for a human decision before they take effect.
//!
//! # Overview
//!
//! Tollgate allows you to:
//! - Run a shipping coordinator agent that places container orders
//! - Auto-approve small orders and pause large ones for confirmation
//! - Resume a paused invocation exactly once with an approve or reject decision
//! - Keep conversations, event traces and user state in SQLite or in memory
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `approval` - Gated actions, the confirmation ledger and the resume arena
//! - `events` - Invocation events and the pending-approval scanner
//! - `agent` - Chat model abstraction, tools and the pausable runner
//! - `session` - Session stores with scoped key/value state
//! - `workflow` - Run, ask an approver, resume
//! - `config` - Configuration management
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tollgate::agent::{OpenAIChatModel, Runner, ToolContext};
//! use tollgate::session::{MemorySessionStore, SessionKey};
//! use tollgate::workflow::{run_workflow, FixedApprover};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = Runner::new(
//!         Arc::new(OpenAIChatModel::new("gpt-4o-mini")),
//!         ToolContext::new(5),
//!         Arc::new(MemorySessionStore::new()),
//!     );
//!     let session = SessionKey::new("shipping_coordinator", "sam", "order_1");
//!
//!     let report = run_workflow(
//!         &runner,
//!         &session,
//!         "Ship 10 containers to Rotterdam",
//!         &FixedApprover(true),
//!     )
//!     .await?;
//!     println!("{:?}", report.final_text());
//!
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod approval;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod openai;
pub mod session;
pub mod workflow;

pub use error::{Result, TollgateError};
