//! Human-in-the-loop approval for tool calls.
//!
//! A gated action either completes on its own or asks for confirmation and
//! suspends. The request is recorded in a [`ConfirmationLedger`], the paused
//! execution is parked in [`SuspendedInvocations`] under its invocation id, and
//! a later decision resumes it exactly once.
//!
//! ```text
//! INITIAL ──> AUTO_APPROVED
//!    │
//!    └──> PENDING ──> RESOLVED_APPROVED
//!                └──> RESOLVED_REJECTED
//! ```

mod dispatcher;
mod ledger;
mod shipping;

pub use dispatcher::{Resumed, SuspendedInvocations};
pub use ledger::{ActionContext, ConfirmationLedger};
pub use shipping::{place_shipping_order, OrderOutcome, OrderStatus, ShippingOrder};

use crate::error::{Result, TollgateError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pending or resolved state of one approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub approval_id: String,
    pub invocation_id: String,
    /// Human-readable question shown to the approver.
    pub hint: String,
    /// Exactly what is being approved.
    pub payload: serde_json::Value,
    /// Unset while pending.
    pub confirmed: Option<bool>,
}

impl ConfirmationRecord {
    /// Create a pending record with a fresh approval id.
    pub fn pending(invocation_id: &str, hint: &str, payload: serde_json::Value) -> Self {
        Self {
            approval_id: Uuid::new_v4().to_string(),
            invocation_id: invocation_id.to_string(),
            hint: hint.to_string(),
            payload,
            confirmed: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.confirmed.is_none()
    }
}

/// Lifecycle of a gated action within one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    Initial,
    AutoApproved,
    Pending,
    ResolvedApproved,
    ResolvedRejected,
}

impl GateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GateState::AutoApproved | GateState::ResolvedApproved | GateState::ResolvedRejected
        )
    }

    pub fn can_transition_to(&self, next: GateState) -> bool {
        matches!(
            (self, next),
            (GateState::Initial, GateState::AutoApproved)
                | (GateState::Initial, GateState::Pending)
                | (GateState::Pending, GateState::ResolvedApproved)
                | (GateState::Pending, GateState::ResolvedRejected)
        )
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(self, next: GateState) -> Result<GateState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TollgateError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Terminal state reached by resuming with this decision.
    pub fn resolved(confirmed: bool) -> GateState {
        if confirmed {
            GateState::ResolvedApproved
        } else {
            GateState::ResolvedRejected
        }
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GateState::Initial => "INITIAL",
            GateState::AutoApproved => "AUTO_APPROVED",
            GateState::Pending => "PENDING",
            GateState::ResolvedApproved => "RESOLVED_APPROVED",
            GateState::ResolvedRejected => "RESOLVED_REJECTED",
        };
        write!(f, "{}", name)
    }
}
