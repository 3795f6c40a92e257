//! Agent runner with a pausable tool calling loop.
//!
//! A run drives the model until it answers without tool calls. When a tool
//! asks for confirmation the run stops, the paused execution is parked under
//! its invocation id, and [`Runner::resume`] later re-runs the paused call with
//! the decision attached.

use super::model::{ChatModel, Message, ModelToolCall};
use super::tools::{parse_tool_call, tool_definitions, ToolContext};
use crate::approval::{
    ActionContext, ConfirmationRecord, GateState, Resumed, SuspendedInvocations,
};
use crate::error::{Result, TollgateError};
use crate::events::{
    agent_text, check_for_approval, ApprovalTicket, DecisionMessage, Event, EventKind,
    REQUEST_CONFIRMATION, USER_AUTHOR,
};
use crate::session::{SessionKey, SessionState, SessionStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Default instruction for the shipping coordinator.
const DEFAULT_INSTRUCTION: &str = r#"You are a shipping coordinator assistant.

When users request to ship containers:
1. Use the place_shipping_order tool with the number of containers and destination
2. If the order status is 'pending', inform the user that approval is required
3. After receiving the final result, provide a clear summary including:
   - Order status (approved/rejected)
   - Order ID (if available)
   - Number of containers and destination
4. Keep responses concise but informative

When users tell you their name or country, store it with save_userinfo.
Use retrieve_userinfo when you need to know who you are talking to."#;

/// Default agent name, used as the author of agent events.
pub const DEFAULT_AGENT_NAME: &str = "shipping_agent";

/// Working state of one invocation.
#[derive(Debug)]
struct Invocation {
    id: String,
    session: SessionKey,
    messages: Vec<Message>,
    state: SessionState,
    gate: GateState,
    iterations: usize,
    /// Events produced since the last run or resume call.
    events: Vec<Event>,
    tool_calls: Vec<ToolCallRecord>,
}

/// Everything needed to pick a paused invocation back up.
#[derive(Debug)]
pub struct Continuation {
    invocation: Invocation,
    paused_call: ModelToolCall,
    remaining: Vec<ModelToolCall>,
}

struct Pause {
    record: ConfirmationRecord,
    call: ModelToolCall,
    remaining: Vec<ModelToolCall>,
}

/// How a run or resume call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The model produced its final answer.
    Completed,
    /// A tool is waiting on a human decision.
    Suspended,
}

/// Result of [`Runner::run`] or [`Runner::resume`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub invocation_id: String,
    pub session: SessionKey,
    pub status: RunStatus,
    /// Gate state of the invocation when the call returned.
    pub gate_state: GateState,
    /// Events produced by this call, in order.
    pub events: Vec<Event>,
    /// Record of all tool calls made during this call.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Number of model calls used so far by the invocation.
    pub iterations: usize,
}

impl RunOutcome {
    pub fn is_suspended(&self) -> bool {
        self.status == RunStatus::Suspended
    }

    /// The last text the agent produced.
    pub fn final_text(&self) -> Option<&str> {
        agent_text(&self.events).last().copied()
    }

    /// The pending-confirmation marker, if this call paused.
    pub fn pending_approval(&self) -> Option<ApprovalTicket> {
        check_for_approval(&self.events)
    }

    /// Payload of the most recent result of the named tool.
    pub fn last_result(&self, tool: &str) -> Option<&serde_json::Value> {
        self.events.iter().rev().find_map(|e| match &e.kind {
            EventKind::FunctionResult { name, payload, .. } if name == tool => Some(payload),
            _ => None,
        })
    }
}

/// Record of a tool call made by the agent.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    /// Name of the tool called.
    pub name: String,
    /// JSON arguments passed to the tool.
    pub arguments: String,
    /// Result returned by the tool.
    pub result: String,
}

impl std::fmt::Display for ToolCallRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.arguments)
    }
}

/// Runs the shipping agent against a session store.
pub struct Runner {
    name: String,
    model: Arc<dyn ChatModel>,
    tools: ToolContext,
    sessions: Arc<dyn SessionStore>,
    suspended: SuspendedInvocations<Continuation>,
    instruction: String,
    max_iterations: usize,
}

impl Runner {
    /// Create a runner with the default agent name and instruction.
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: ToolContext,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            name: DEFAULT_AGENT_NAME.to_string(),
            model,
            tools,
            sessions,
            suspended: SuspendedInvocations::new(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            max_iterations: 15,
        }
    }

    /// Set a custom instruction.
    pub fn with_instruction(mut self, instruction: &str) -> Self {
        self.instruction = instruction.to_string();
        self
    }

    /// Set maximum iterations for the agent loop.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Abandon suspended invocations older than `ttl`.
    pub fn with_pending_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.suspended = self.suspended.with_ttl(ttl);
        self
    }

    /// How long finished invocations stay queryable.
    pub fn with_resolved_retention(mut self, retention: Duration) -> Self {
        self.suspended = self.suspended.with_retention(retention);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Gate state of an invocation this runner knows about.
    pub fn gate_state(&self, invocation_id: &str) -> Result<GateState> {
        self.suspended.state(invocation_id)
    }

    /// Confirmation record of an invocation, pending or decided.
    pub fn confirmation(&self, invocation_id: &str) -> Result<Option<ConfirmationRecord>> {
        self.suspended.record(invocation_id)
    }

    /// Invocations waiting on a decision.
    pub fn pending_invocations(&self) -> Result<Vec<String>> {
        self.suspended.pending_ids()
    }

    /// Drop suspended invocations past the pending TTL and finished ones past
    /// the retention window.
    pub fn purge_expired(&self) -> Result<usize> {
        self.suspended.purge_expired(Utc::now())
    }

    /// Start a new invocation with a user message.
    #[instrument(skip(self, session, text), fields(session = %session))]
    pub async fn run(&self, session: &SessionKey, text: &str) -> Result<RunOutcome> {
        if text.trim().is_empty() {
            return Err(TollgateError::InvalidInput("Message must not be empty".to_string()));
        }

        self.sessions.get_or_create(session).await?;
        let history = self.sessions.events(session).await?;
        let state = self.sessions.state(session).await?;

        let mut messages = vec![Message::system(&self.instruction)];
        messages.extend(history.iter().filter_map(|e| match &e.kind {
            EventKind::Text { text } if e.author == USER_AUTHOR => Some(Message::user(text)),
            EventKind::Text { text } => Some(Message::assistant(text)),
            _ => None,
        }));
        messages.push(Message::user(text));

        let mut invocation = Invocation {
            id: Uuid::new_v4().to_string(),
            session: session.clone(),
            messages,
            state,
            gate: GateState::Initial,
            iterations: 0,
            events: Vec::new(),
            tool_calls: Vec::new(),
        };
        info!(invocation_id = %invocation.id, "Starting invocation");

        let event = Event::text(&invocation.id, USER_AUTHOR, text);
        self.emit(&mut invocation, event).await?;

        self.drive(invocation, Vec::new()).await
    }

    /// Deliver a decision to a suspended invocation and continue it.
    ///
    /// Fails with [`TollgateError::NoPendingInvocation`] if nothing is waiting
    /// under `invocation_id` with that approval id.
    #[instrument(skip(self, decision), fields(approval_id = %decision.approval_id))]
    pub async fn resume(
        &self,
        invocation_id: &str,
        decision: &DecisionMessage,
    ) -> Result<RunOutcome> {
        let Resumed {
            record,
            continuation,
            state,
        } = self.suspended.resume(invocation_id, decision)?;

        let Continuation {
            mut invocation,
            paused_call,
            remaining,
        } = continuation;
        invocation.events.clear();
        invocation.tool_calls.clear();
        invocation.gate = state;

        // Shared scopes may have moved on while the invocation was parked.
        let current = self.sessions.state(&invocation.session).await?;
        invocation.state.refresh(current);

        self.emit(&mut invocation, decision.to_event(invocation_id)).await?;

        let action = ActionContext::resuming(record, &paused_call.id);
        let request = self.run_call(&mut invocation, &paused_call, action).await?;
        if let Some(record) = request {
            let pause = Pause {
                record,
                call: paused_call,
                remaining,
            };
            return self.suspend(invocation, pause);
        }

        self.drive(invocation, remaining).await
    }

    async fn drive(
        &self,
        mut invocation: Invocation,
        pending: Vec<ModelToolCall>,
    ) -> Result<RunOutcome> {
        let paused = self.run_calls(&mut invocation, pending).await?;
        if let Some(pause) = paused {
            return self.suspend(invocation, pause);
        }

        let specs = tool_definitions();

        loop {
            invocation.iterations += 1;
            if invocation.iterations > self.max_iterations {
                return Err(TollgateError::Agent(format!(
                    "Agent exceeded maximum iterations ({})",
                    self.max_iterations
                )));
            }

            debug!("Agent iteration {} with {}", invocation.iterations, self.model.name());

            let turn = self.model.complete(&invocation.messages, &specs).await?;
            let content = turn.content.filter(|t| !t.trim().is_empty());

            if let Some(text) = &content {
                let event = Event::text(&invocation.id, &self.name, text.as_str());
                self.emit(&mut invocation, event).await?;
            }

            if turn.tool_calls.is_empty() {
                if let Some(text) = content {
                    invocation.messages.push(Message::assistant(&text));
                }
                if invocation.gate == GateState::AutoApproved {
                    self.suspended.settle(&invocation.id, invocation.gate)?;
                }
                return Ok(Self::outcome(&invocation, RunStatus::Completed));
            }

            invocation.messages.push(Message::Assistant {
                content,
                tool_calls: turn.tool_calls.clone(),
            });

            let paused = self.run_calls(&mut invocation, turn.tool_calls).await?;
            if let Some(pause) = paused {
                return self.suspend(invocation, pause);
            }
        }
    }

    /// Run tool calls in order, stopping at the first one that asks for confirmation.
    async fn run_calls(
        &self,
        invocation: &mut Invocation,
        calls: Vec<ModelToolCall>,
    ) -> Result<Option<Pause>> {
        let mut queue = calls.into_iter();

        while let Some(call) = queue.next() {
            let args = serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()));
            let event =
                Event::function_call(&invocation.id, &self.name, &call.id, &call.name, args);
            self.emit(invocation, event).await?;

            let action = ActionContext::new(&invocation.id, &call.id);
            let request = self.run_call(invocation, &call, action).await?;
            if let Some(record) = request {
                return Ok(Some(Pause {
                    record,
                    call,
                    remaining: queue.collect(),
                }));
            }
        }

        Ok(None)
    }

    /// Execute one tool call. Returns the confirmation request if it made one.
    async fn run_call(
        &self,
        invocation: &mut Invocation,
        call: &ModelToolCall,
        mut action: ActionContext,
    ) -> Result<Option<ConfirmationRecord>> {
        info!("Agent calling tool: {} with args: {}", call.name, call.arguments);

        let result = match parse_tool_call(&call.name, &call.arguments) {
            Ok(tool) => match self.tools.execute(&tool, &mut action, &mut invocation.state) {
                Ok(output) => {
                    if let Some(gate) = output.gate {
                        invocation.gate = next_gate(invocation.gate, gate);
                    }
                    output.value
                }
                Err(e) => tool_error(&e),
            },
            Err(e) => tool_error(&e),
        };

        self.sessions
            .save_state(&invocation.session, &invocation.state)
            .await?;
        invocation.state.mark_saved();

        let event = Event::function_result(
            &invocation.id,
            &self.name,
            &call.id,
            &call.name,
            result.clone(),
        );
        self.emit(invocation, event).await?;

        invocation.tool_calls.push(ToolCallRecord {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: result.to_string(),
        });

        if let Some(record) = action.take_request() {
            let original_args =
                serde_json::from_str::<serde_json::Value>(&call.arguments).unwrap_or_default();
            let args = serde_json::json!({
                "originalFunctionCall": {
                    "id": call.id,
                    "name": call.name,
                    "args": original_args,
                },
                "toolConfirmation": {
                    "hint": record.hint,
                    "payload": record.payload,
                },
            });
            let marker = Event::function_call(
                &invocation.id,
                &self.name,
                &record.approval_id,
                REQUEST_CONFIRMATION,
                args,
            );
            self.emit(invocation, marker).await?;
            return Ok(Some(record));
        }

        invocation.messages.push(Message::tool(&call.id, result.to_string()));
        Ok(None)
    }

    fn suspend(&self, invocation: Invocation, pause: Pause) -> Result<RunOutcome> {
        let outcome = Self::outcome(&invocation, RunStatus::Suspended);
        self.suspended.suspend(
            pause.record,
            Continuation {
                invocation,
                paused_call: pause.call,
                remaining: pause.remaining,
            },
        )?;
        Ok(outcome)
    }

    async fn emit(&self, invocation: &mut Invocation, event: Event) -> Result<()> {
        self.sessions.append_event(&invocation.session, &event).await?;
        invocation.events.push(event);
        Ok(())
    }

    fn outcome(invocation: &Invocation, status: RunStatus) -> RunOutcome {
        RunOutcome {
            invocation_id: invocation.id.clone(),
            session: invocation.session.clone(),
            status,
            gate_state: invocation.gate,
            events: invocation.events.clone(),
            tool_calls: invocation.tool_calls.clone(),
            iterations: invocation.iterations,
        }
    }
}

/// Gate state after a tool reports `reported`. An auto-approval never hides an
/// earlier human decision.
fn next_gate(current: GateState, reported: GateState) -> GateState {
    match reported {
        GateState::AutoApproved if current.is_terminal() => current,
        other => other,
    }
}

fn tool_error(err: &TollgateError) -> serde_json::Value {
    serde_json::json!({ "status": "error", "error_message": err.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::model::{ModelTurn, ScriptedModel};
    use crate::events::create_approval_response;
    use crate::session::MemorySessionStore;
    use serde_json::json;

    fn ship(id: &str, n: i64) -> ModelTurn {
        ModelTurn::tool_call(
            id,
            "place_shipping_order",
            json!({"num_containers": n, "destination": "Rotterdam"}),
        )
    }

    fn runner(turns: Vec<ModelTurn>) -> (Runner, Arc<ScriptedModel>, Arc<MemorySessionStore>) {
        let model = Arc::new(ScriptedModel::new(turns));
        let store = Arc::new(MemorySessionStore::new());
        let runner = Runner::new(model.clone(), ToolContext::new(5), store.clone());
        (runner, model, store)
    }

    fn key() -> SessionKey {
        SessionKey::new("shipping_coordinator", "sam", "s1")
    }

    #[test]
    fn test_tool_call_record_display() {
        let record = ToolCallRecord {
            name: "place_shipping_order".to_string(),
            arguments: r#"{"num_containers": 3}"#.to_string(),
            result: "approved".to_string(),
        };
        assert_eq!(format!("{}", record), r#"place_shipping_order({"num_containers": 3})"#);
    }

    #[tokio::test]
    async fn test_small_order_completes_without_pause() {
        let (runner, _, _) =
            runner(vec![ship("call-1", 3), ModelTurn::text("Order ORD-3-AUTO placed.")]);

        let outcome = runner.run(&key(), "Ship 3 containers to Rotterdam").await.unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.gate_state, GateState::AutoApproved);
        assert!(outcome.pending_approval().is_none());
        assert_eq!(outcome.last_result("place_shipping_order").unwrap()["order_id"], "ORD-3-AUTO");
        assert_eq!(outcome.final_text(), Some("Order ORD-3-AUTO placed."));
        assert_eq!(
            runner.gate_state(&outcome.invocation_id).unwrap(),
            GateState::AutoApproved
        );
        assert_eq!(runner.gate_state("never-seen").unwrap(), GateState::Initial);
    }

    #[tokio::test]
    async fn test_large_order_pauses_then_approves() {
        let (runner, model, store) = runner(vec![
            ship("call-1", 10),
            ModelTurn::text("Order ORD-10-HUMAN approved."),
        ]);

        let paused = runner.run(&key(), "Ship 10 containers to Rotterdam").await.unwrap();
        assert!(paused.is_suspended());
        assert_eq!(paused.gate_state, GateState::Pending);
        assert_eq!(paused.last_result("place_shipping_order").unwrap()["status"], "pending");
        assert_eq!(model.remaining(), 1);

        let ticket = paused.pending_approval().unwrap();
        assert_eq!(ticket.invocation_id, paused.invocation_id);
        assert_eq!(runner.gate_state(&ticket.invocation_id).unwrap(), GateState::Pending);

        let decision = create_approval_response(&ticket, true);
        let done = runner.resume(&ticket.invocation_id, &decision).await.unwrap();

        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.invocation_id, paused.invocation_id);
        assert_eq!(done.gate_state, GateState::ResolvedApproved);
        let result = done.last_result("place_shipping_order").unwrap();
        assert_eq!(result["status"], "approved");
        assert_eq!(result["order_id"], "ORD-10-HUMAN");
        assert_eq!(done.final_text(), Some("Order ORD-10-HUMAN approved."));

        // The paused call gets exactly one tool response: the final one.
        let last_prompt = model.seen().pop().unwrap();
        let tool_messages: Vec<_> = last_prompt
            .iter()
            .filter(|m| matches!(m, Message::Tool { call_id, .. } if call_id == "call-1"))
            .collect();
        assert_eq!(tool_messages.len(), 1);

        let events = store.events(&key()).await.unwrap();
        assert!(events.iter().all(|e| e.invocation_id == paused.invocation_id));
        assert_eq!(check_for_approval(&events).unwrap().approval_id, ticket.approval_id);
    }

    #[tokio::test]
    async fn test_large_order_rejected() {
        let (runner, _, _) = runner(vec![ship("call-1", 10), ModelTurn::text("Order rejected.")]);

        let paused = runner.run(&key(), "Ship 10 containers").await.unwrap();
        let ticket = paused.pending_approval().unwrap();
        let done = runner
            .resume(&ticket.invocation_id, &create_approval_response(&ticket, false))
            .await
            .unwrap();

        assert_eq!(done.gate_state, GateState::ResolvedRejected);
        let result = done.last_result("place_shipping_order").unwrap();
        assert_eq!(result["status"], "rejected");
        assert!(result.get("order_id").is_none());
        assert_eq!(
            runner.confirmation(&ticket.invocation_id).unwrap().unwrap().confirmed,
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_second_resume_is_refused() {
        let (runner, _, _) = runner(vec![ship("call-1", 10), ModelTurn::text("Approved.")]);

        let paused = runner.run(&key(), "Ship 10 containers").await.unwrap();
        let ticket = paused.pending_approval().unwrap();
        let decision = create_approval_response(&ticket, true);

        runner.resume(&ticket.invocation_id, &decision).await.unwrap();
        let again = runner.resume(&ticket.invocation_id, &decision).await;

        assert!(matches!(again, Err(TollgateError::NoPendingInvocation(_))));
        assert_eq!(
            runner.gate_state(&ticket.invocation_id).unwrap(),
            GateState::ResolvedApproved
        );
    }

    #[tokio::test]
    async fn test_resume_with_wrong_approval_id_keeps_pending() {
        let (runner, _, _) = runner(vec![ship("call-1", 10), ModelTurn::text("Approved.")]);

        let paused = runner.run(&key(), "Ship 10 containers").await.unwrap();
        let ticket = paused.pending_approval().unwrap();
        let wrong = DecisionMessage {
            approval_id: "someone-else".to_string(),
            confirmed: true,
        };

        assert!(runner.resume(&ticket.invocation_id, &wrong).await.is_err());
        assert_eq!(runner.pending_invocations().unwrap(), vec![ticket.invocation_id.clone()]);
        assert!(runner
            .resume(&ticket.invocation_id, &create_approval_response(&ticket, true))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_remaining_calls_run_after_resume() {
        let turn = ship("call-1", 10).and_call(
            "call-2",
            "save_userinfo",
            json!({"user_name": "Sam", "country": "Norway"}),
        );
        let (runner, _, store) = runner(vec![turn, ModelTurn::text("Done.")]);

        let paused = runner.run(&key(), "Ship 10 containers, I'm Sam from Norway").await.unwrap();
        assert!(store.state(&key()).await.unwrap().get("user:name").is_none());

        let ticket = paused.pending_approval().unwrap();
        let done = runner
            .resume(&ticket.invocation_id, &create_approval_response(&ticket, true))
            .await
            .unwrap();

        assert_eq!(done.tool_calls.len(), 2);
        assert_eq!(done.tool_calls[1].name, "save_userinfo");
        assert_eq!(store.state(&key()).await.unwrap().get_str("user:name"), Some("Sam"));
    }

    #[tokio::test]
    async fn test_small_order_after_approval_keeps_human_decision() {
        let (runner, _, _) = runner(vec![
            ship("call-1", 10),
            ship("call-2", 3),
            ModelTurn::text("Both orders placed."),
        ]);

        let paused = runner.run(&key(), "Ship 10 and then 3 containers").await.unwrap();
        let ticket = paused.pending_approval().unwrap();
        let done = runner
            .resume(&ticket.invocation_id, &create_approval_response(&ticket, true))
            .await
            .unwrap();

        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.last_result("place_shipping_order").unwrap()["order_id"], "ORD-3-AUTO");
        assert_eq!(done.gate_state, GateState::ResolvedApproved);
        assert_eq!(
            runner.gate_state(&ticket.invocation_id).unwrap(),
            GateState::ResolvedApproved
        );
    }

    #[tokio::test]
    async fn test_resume_does_not_revert_shared_state() {
        let save = |id: &str, name: &str| {
            let args = json!({"user_name": name, "country": "Norway"});
            ModelTurn::tool_call(id, "save_userinfo", args)
        };
        let (runner, _, store) = runner(vec![
            save("call-1", "Sam").and_call(
                "call-2",
                "place_shipping_order",
                json!({"num_containers": 10, "destination": "Oslo"}),
            ),
            save("call-3", "Alex"),
            ModelTurn::text("Saved."),
            ModelTurn::text("Order approved."),
        ]);
        let other = SessionKey::new("shipping_coordinator", "sam", "s2");

        let paused = runner.run(&key(), "I'm Sam, ship 10 containers").await.unwrap();
        runner.run(&other, "Actually call me Alex").await.unwrap();
        assert_eq!(store.state(&key()).await.unwrap().get_str("user:name"), Some("Alex"));

        let ticket = paused.pending_approval().unwrap();
        runner
            .resume(&ticket.invocation_id, &create_approval_response(&ticket, true))
            .await
            .unwrap();

        assert_eq!(store.state(&key()).await.unwrap().get_str("user:name"), Some("Alex"));
    }

    #[tokio::test]
    async fn test_purge_forgets_finished_invocations() {
        let (runner, _, _) = runner(vec![ship("call-1", 3), ModelTurn::text("Placed.")]);
        let runner = runner.with_resolved_retention(Duration::ZERO);

        let outcome = runner.run(&key(), "Ship 3 containers").await.unwrap();
        assert_eq!(runner.gate_state(&outcome.invocation_id).unwrap(), GateState::AutoApproved);
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(runner.purge_expired().unwrap(), 1);
        assert_eq!(runner.gate_state(&outcome.invocation_id).unwrap(), GateState::Initial);
    }

    #[tokio::test]
    async fn test_tool_errors_are_reported_to_model() {
        let (runner, model, _) = runner(vec![
            ModelTurn::tool_call(
                "call-1",
                "place_shipping_order",
                json!({"num_containers": -2, "destination": "Oslo"}),
            ),
            ModelTurn::text("That order is invalid."),
        ]);

        let outcome = runner.run(&key(), "Ship -2 containers").await.unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.gate_state, GateState::Initial);
        assert_eq!(outcome.last_result("place_shipping_order").unwrap()["status"], "error");
        assert_eq!(model.remaining(), 0);
    }

    #[tokio::test]
    async fn test_history_carries_across_invocations() {
        let (runner, model, _) = runner(vec![
            ModelTurn::text("Hello Sam."),
            ModelTurn::text("You said hello."),
        ]);

        runner.run(&key(), "Hi, I'm Sam").await.unwrap();
        runner.run(&key(), "What did I say?").await.unwrap();

        let second = &model.seen()[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[1], Message::user("Hi, I'm Sam"));
        assert_eq!(second[2], Message::assistant("Hello Sam."));
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let turns = (0..3)
            .map(|i| ModelTurn::tool_call(&format!("call-{}", i), "retrieve_userinfo", json!({})))
            .collect();
        let (runner, _, _) = runner(turns);
        let runner = runner.with_max_iterations(2);

        let result = runner.run(&key(), "Who am I?").await;
        assert!(matches!(result, Err(TollgateError::Agent(_))));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let (runner, _, _) = runner(vec![]);
        assert!(matches!(
            runner.run(&key(), "   ").await,
            Err(TollgateError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_pending_cannot_resume() {
        let (runner, _, _) = runner(vec![ship("call-1", 10)]);
        let runner = runner.with_pending_ttl(Some(Duration::ZERO));

        let paused = runner.run(&key(), "Ship 10 containers").await.unwrap();
        let ticket = paused.pending_approval().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(runner.purge_expired().unwrap(), 1);
        let result = runner
            .resume(&ticket.invocation_id, &create_approval_response(&ticket, true))
            .await;
        assert!(matches!(result, Err(TollgateError::NoPendingInvocation(_))));
    }
}
