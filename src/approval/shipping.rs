//! Shipping order placement gated on human approval for large orders.

use super::{ActionContext, GateState};
use crate::error::{Result, TollgateError};
use serde::{Deserialize, Serialize};

/// Order id suffix of auto-approved orders.
const AUTO_SUFFIX: &str = "AUTO";
/// Order id suffix of orders a human approved.
const HUMAN_SUFFIX: &str = "HUMAN";

/// Request to ship containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingOrder {
    pub num_containers: i64,
    pub destination: String,
}

impl ShippingOrder {
    pub fn new(num_containers: i64, destination: &str) -> Self {
        Self {
            num_containers,
            destination: destination.to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.num_containers <= 0 {
            return Err(TollgateError::InvalidInput(format!(
                "num_containers must be positive, got {}",
                self.num_containers
            )));
        }
        if self.destination.trim().is_empty() {
            return Err(TollgateError::InvalidInput(
                "destination must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Approved,
    Rejected,
    Pending,
}

/// Result of a shipping order call, as reported back to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_containers: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub message: String,
}

impl OrderOutcome {
    fn approved(order: &ShippingOrder, suffix: &str, message: String) -> Self {
        Self {
            status: OrderStatus::Approved,
            order_id: Some(format!("ORD-{}-{}", order.num_containers, suffix)),
            num_containers: Some(order.num_containers),
            destination: Some(order.destination.clone()),
            message,
        }
    }

    /// Gate state this outcome leaves the action in. Approvals are told
    /// apart by their order id suffix.
    pub fn gate_state(&self) -> GateState {
        match self.status {
            OrderStatus::Approved => {
                let auto = self
                    .order_id
                    .as_deref()
                    .is_some_and(|id| id.ends_with(&format!("-{}", AUTO_SUFFIX)));
                if auto {
                    GateState::AutoApproved
                } else {
                    GateState::ResolvedApproved
                }
            }
            OrderStatus::Rejected => GateState::ResolvedRejected,
            OrderStatus::Pending => GateState::Pending,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "status": "error" }))
    }
}

/// Place a shipping order, asking for confirmation above `threshold` containers.
///
/// Returns `pending` after recording a confirmation request on `ctx`; the
/// caller is expected to suspend and call again with a decided context.
pub fn place_shipping_order(
    order: &ShippingOrder,
    ctx: &mut ActionContext,
    threshold: i64,
) -> Result<OrderOutcome> {
    order.validate()?;

    let n = order.num_containers;
    let destination = &order.destination;

    if n <= threshold {
        return Ok(OrderOutcome::approved(
            order,
            AUTO_SUFFIX,
            format!("Order auto-approved: {} containers to {}", n, destination),
        ));
    }

    let decision = match ctx.tool_confirmation() {
        None => {
            ctx.request_confirmation(
                &format!(
                    "Large order: {} containers to {}. Do you want to approve?",
                    n, destination
                ),
                serde_json::json!({ "num_containers": n, "destination": destination }),
            );
            return Ok(OrderOutcome {
                status: OrderStatus::Pending,
                order_id: None,
                num_containers: None,
                destination: None,
                message: format!("Order for {} containers requires approval", n),
            });
        }
        Some(record) => record.confirmed,
    };

    match decision {
        Some(true) => Ok(OrderOutcome::approved(
            order,
            HUMAN_SUFFIX,
            format!("Order approved: {} containers to {}", n, destination),
        )),
        Some(false) => Ok(OrderOutcome {
            status: OrderStatus::Rejected,
            order_id: None,
            num_containers: None,
            destination: None,
            message: format!("Order rejected: {} containers to {}", n, destination),
        }),
        None => Err(TollgateError::Agent(format!(
            "Confirmation for invocation {} has no decision yet",
            ctx.invocation_id()
        ))),
    }
}
