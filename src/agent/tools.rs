//! Tool definitions and implementations for the agent system.

use super::model::ToolSpec;
use crate::approval::{place_shipping_order, ActionContext, GateState, ShippingOrder};
use crate::error::{Result, TollgateError};
use crate::session::SessionState;
use serde::{Deserialize, Serialize};

/// Session state key holding the user's name.
pub const USER_NAME_KEY: &str = "user:name";
/// Session state key holding the user's country.
pub const USER_COUNTRY_KEY: &str = "user:country";

/// Available tools for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ToolCall {
    /// Place a shipping order; large orders wait for human approval.
    PlaceShippingOrder {
        num_containers: i64,
        destination: String,
    },

    /// Remember the user's name and country.
    SaveUserinfo { user_name: String, country: String },

    /// Recall the user's name and country.
    RetrieveUserinfo,
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::PlaceShippingOrder { .. } => "place_shipping_order",
            ToolCall::SaveUserinfo { .. } => "save_userinfo",
            ToolCall::RetrieveUserinfo => "retrieve_userinfo",
        }
    }
}

/// Result of one tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// JSON handed back to the model.
    pub value: serde_json::Value,
    /// Gate state reached, for tools behind an approval gate.
    pub gate: Option<GateState>,
}

impl ToolOutput {
    fn plain(value: serde_json::Value) -> Self {
        Self { value, gate: None }
    }
}

/// Tool execution context.
pub struct ToolContext {
    large_order_threshold: i64,
}

impl ToolContext {
    pub fn new(large_order_threshold: i64) -> Self {
        Self {
            large_order_threshold,
        }
    }

    pub fn large_order_threshold(&self) -> i64 {
        self.large_order_threshold
    }

    /// Execute a tool call.
    ///
    /// A gated tool may record a confirmation request on `action` instead of
    /// finishing; the caller checks for it afterwards.
    pub fn execute(
        &self,
        tool: &ToolCall,
        action: &mut ActionContext,
        state: &mut SessionState,
    ) -> Result<ToolOutput> {
        match tool {
            ToolCall::PlaceShippingOrder {
                num_containers,
                destination,
            } => {
                let order = ShippingOrder::new(*num_containers, destination);
                let outcome = place_shipping_order(&order, action, self.large_order_threshold)?;
                Ok(ToolOutput {
                    value: outcome.to_json(),
                    gate: Some(outcome.gate_state()),
                })
            }
            ToolCall::SaveUserinfo { user_name, country } => {
                state.set(USER_NAME_KEY, serde_json::json!(user_name));
                state.set(USER_COUNTRY_KEY, serde_json::json!(country));
                Ok(ToolOutput::plain(serde_json::json!({ "status": "success" })))
            }
            ToolCall::RetrieveUserinfo => {
                let user_name = state.get_str(USER_NAME_KEY).unwrap_or("Username not found");
                let country = state.get_str(USER_COUNTRY_KEY).unwrap_or("Country not found");
                Ok(ToolOutput::plain(serde_json::json!({
                    "status": "success",
                    "user_name": user_name,
                    "country": country,
                })))
            }
        }
    }
}

/// Tool definitions advertised to the model.
pub fn tool_definitions() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "place_shipping_order".to_string(),
            description: "Places a shipping order. Orders above the large-order threshold \
                require human approval; the result status is 'approved', 'rejected' or 'pending'."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "num_containers": {
                        "type": "integer",
                        "description": "Number of containers to ship"
                    },
                    "destination": {
                        "type": "string",
                        "description": "Shipping destination"
                    }
                },
                "required": ["num_containers", "destination"]
            }),
        },
        ToolSpec {
            name: "save_userinfo".to_string(),
            description: "Record the user's name and country in session state. \
                Use this when the user tells you who they are."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "user_name": {
                        "type": "string",
                        "description": "The user's name"
                    },
                    "country": {
                        "type": "string",
                        "description": "The user's country"
                    }
                },
                "required": ["user_name", "country"]
            }),
        },
        ToolSpec {
            name: "retrieve_userinfo".to_string(),
            description: "Fetch the user's name and country from session state.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}

/// Parse a tool call from the model's name and JSON arguments.
pub fn parse_tool_call(name: &str, arguments: &str) -> Result<ToolCall> {
    let args: serde_json::Value = if arguments.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(arguments)
            .map_err(|e| TollgateError::Agent(format!("Invalid tool arguments: {}", e)))?
    };

    let string_arg = |key: &str| -> Result<String> {
        args[key]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TollgateError::Agent(format!("Missing '{}' argument", key)))
    };

    match name {
        "place_shipping_order" => {
            // Models sometimes send whole numbers as floats or strings.
            let num_containers = match &args["num_containers"] {
                serde_json::Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .ok_or_else(|| TollgateError::Agent("Missing 'num_containers' argument".to_string()))?;

            Ok(ToolCall::PlaceShippingOrder {
                num_containers,
                destination: string_arg("destination")?,
            })
        }
        "save_userinfo" => Ok(ToolCall::SaveUserinfo {
            user_name: string_arg("user_name")?,
            country: string_arg("country")?,
        }),
        "retrieve_userinfo" => Ok(ToolCall::RetrieveUserinfo),
        _ => Err(TollgateError::Agent(format!("Unknown tool: {}", name))),
    }
}
