//! Shipping agent with tool calling and pausable approvals.
//!
//! The agent talks to a [`ChatModel`], runs the shipping and user-info tools,
//! and records every step as events in a session. Large orders pause the run
//! until a human decision is delivered through [`Runner::resume`].

mod model;
mod runner;
mod tools;

pub use model::{
    ChatModel, Message, ModelToolCall, ModelTurn, OpenAIChatModel, ScriptedModel, ToolSpec,
};
pub use runner::{
    Continuation, RunOutcome, RunStatus, Runner, ToolCallRecord, DEFAULT_AGENT_NAME,
};
pub use tools::{
    parse_tool_call, tool_definitions, ToolCall, ToolContext, ToolOutput, USER_COUNTRY_KEY,
    USER_NAME_KEY,
};
