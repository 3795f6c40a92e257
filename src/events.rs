//! Execution events and the helpers that inspect them.
//!
//! Every invocation produces an ordered, append-only list of events: text from
//! the user or the agent, function calls the agent makes, and the results of
//! those calls. A paused invocation is recognised by a function call named
//! [`REQUEST_CONFIRMATION`] whose id is the approval id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the function call that marks a pending confirmation.
pub const REQUEST_CONFIRMATION: &str = "request_confirmation";

/// Author name used for events the user produced.
pub const USER_AUTHOR: &str = "user";

/// One entry in the ordered trace of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

/// What an event carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Text {
        text: String,
    },
    FunctionCall {
        id: String,
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    FunctionResult {
        id: String,
        name: String,
        payload: serde_json::Value,
    },
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(invocation_id: &str, author: &str, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invocation_id: invocation_id.to_string(),
            author: author.to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn text(invocation_id: &str, author: &str, text: impl Into<String>) -> Self {
        Self::new(invocation_id, author, EventKind::Text { text: text.into() })
    }

    pub fn function_call(
        invocation_id: &str,
        author: &str,
        id: &str,
        name: &str,
        args: serde_json::Value,
    ) -> Self {
        Self::new(
            invocation_id,
            author,
            EventKind::FunctionCall {
                id: id.to_string(),
                name: name.to_string(),
                args,
            },
        )
    }

    pub fn function_result(
        invocation_id: &str,
        author: &str,
        id: &str,
        name: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(
            invocation_id,
            author,
            EventKind::FunctionResult {
                id: id.to_string(),
                name: name.to_string(),
                payload,
            },
        )
    }
}

/// Identifiers needed to resume a paused invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTicket {
    pub approval_id: String,
    pub invocation_id: String,
}

/// A human decision routed back to a paused invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionMessage {
    pub approval_id: String,
    pub confirmed: bool,
}

impl DecisionMessage {
    /// The decision as it appears in an invocation's event trace.
    pub fn to_event(&self, invocation_id: &str) -> Event {
        Event::function_result(
            invocation_id,
            USER_AUTHOR,
            &self.approval_id,
            REQUEST_CONFIRMATION,
            serde_json::json!({ "confirmed": self.confirmed }),
        )
    }
}

/// Find the first pending-confirmation marker, in event order.
pub fn check_for_approval(events: &[Event]) -> Option<ApprovalTicket> {
    events.iter().find_map(|event| match &event.kind {
        EventKind::FunctionCall { id, name, .. } if name == REQUEST_CONFIRMATION => {
            Some(ApprovalTicket {
                approval_id: id.clone(),
                invocation_id: event.invocation_id.clone(),
            })
        }
        _ => None,
    })
}

/// Build the decision message for a ticket.
pub fn create_approval_response(ticket: &ApprovalTicket, approved: bool) -> DecisionMessage {
    DecisionMessage {
        approval_id: ticket.approval_id.clone(),
        confirmed: approved,
    }
}

/// Text the agent produced, in order.
pub fn agent_text(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter(|e| e.author != USER_AUTHOR)
        .filter_map(|e| match &e.kind {
            EventKind::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        })
        .collect()
}
