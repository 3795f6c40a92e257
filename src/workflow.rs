//! Run a request end to end, asking an approver whenever the agent pauses.

use crate::agent::{RunOutcome, Runner};
use crate::approval::GateState;
use crate::error::{Result, TollgateError};
use crate::events::{agent_text, create_approval_response};
use crate::session::SessionKey;
use console::style;
use std::io::{self, BufRead, Write};
use tracing::info;

/// What an approver is asked to decide.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalPrompt {
    pub invocation_id: String,
    pub approval_id: String,
    pub hint: String,
    pub payload: serde_json::Value,
}

/// Something that can approve or reject a paused action.
pub trait Approver: Send + Sync {
    fn decide(&self, prompt: &ApprovalPrompt) -> Result<bool>;
}

impl<F> Approver for F
where
    F: Fn(&ApprovalPrompt) -> Result<bool> + Send + Sync,
{
    fn decide(&self, prompt: &ApprovalPrompt) -> Result<bool> {
        self(prompt)
    }
}

/// Always gives the same answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedApprover(pub bool);

impl Approver for FixedApprover {
    fn decide(&self, _prompt: &ApprovalPrompt) -> Result<bool> {
        Ok(self.0)
    }
}

/// Asks on the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptApprover;

impl Approver for PromptApprover {
    fn decide(&self, prompt: &ApprovalPrompt) -> Result<bool> {
        println!("\n{} {}", style("??").yellow().bold(), style(&prompt.hint).bold());
        println!("   {}", style(prompt.payload.to_string()).dim());

        let stdin = io::stdin();
        loop {
            print!("{} ", style("Approve? [y/n]:").cyan());
            io::stdout().flush()?;

            let mut input = String::new();
            if stdin.lock().read_line(&mut input)? == 0 {
                // EOF: nobody is there to approve.
                return Ok(false);
            }
            if let Some(answer) = parse_answer(&input) {
                return Ok(answer);
            }
        }
    }
}

/// Interpret a yes/no answer.
pub fn parse_answer(input: &str) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" | "approve" | "approved" => Some(true),
        "n" | "no" | "reject" | "rejected" => Some(false),
        _ => None,
    }
}

/// One decision taken during a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTaken {
    pub approval_id: String,
    pub hint: String,
    pub approved: bool,
}

/// Summary of a workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub session: SessionKey,
    pub invocation_id: String,
    pub decisions: Vec<DecisionTaken>,
    /// Agent text across the initial run and every resume, in order.
    pub agent_text: Vec<String>,
    pub gate_state: GateState,
    /// Outcome of the last run or resume call.
    pub last: RunOutcome,
}

impl WorkflowReport {
    pub fn final_text(&self) -> Option<&str> {
        self.agent_text.last().map(String::as_str)
    }
}

/// Run `query`, and for every pause ask `approver` and resume.
pub async fn run_workflow(
    runner: &Runner,
    session: &SessionKey,
    query: &str,
    approver: &dyn Approver,
) -> Result<WorkflowReport> {
    let mut outcome = runner.run(session, query).await?;
    let invocation_id = outcome.invocation_id.clone();
    let mut texts = collect_text(&outcome);
    let mut decisions = Vec::new();

    while let Some(ticket) = outcome.pending_approval() {
        let record = runner.confirmation(&ticket.invocation_id)?.ok_or_else(|| {
            TollgateError::NoPendingInvocation(ticket.invocation_id.clone())
        })?;

        let prompt = ApprovalPrompt {
            invocation_id: ticket.invocation_id.clone(),
            approval_id: ticket.approval_id.clone(),
            hint: record.hint,
            payload: record.payload,
        };
        let approved = approver.decide(&prompt)?;
        info!(
            invocation_id = %ticket.invocation_id,
            approved, "Approval decision received"
        );

        decisions.push(DecisionTaken {
            approval_id: ticket.approval_id.clone(),
            hint: prompt.hint,
            approved,
        });

        let decision = create_approval_response(&ticket, approved);
        outcome = runner.resume(&ticket.invocation_id, &decision).await?;
        texts.extend(collect_text(&outcome));
    }

    Ok(WorkflowReport {
        session: session.clone(),
        invocation_id,
        decisions,
        agent_text: texts,
        gate_state: outcome.gate_state,
        last: outcome,
    })
}

fn collect_text(outcome: &RunOutcome) -> Vec<String> {
    agent_text(&outcome.events)
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ModelTurn, RunStatus, ScriptedModel, ToolContext};
    use crate::session::MemorySessionStore;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn runner(turns: Vec<ModelTurn>) -> Runner {
        Runner::new(
            Arc::new(ScriptedModel::new(turns)),
            ToolContext::new(5),
            Arc::new(MemorySessionStore::new()),
        )
    }

    fn ship(n: i64) -> ModelTurn {
        ModelTurn::tool_call(
            "call-1",
            "place_shipping_order",
            json!({"num_containers": n, "destination": "Rotterdam"}),
        )
    }

    fn key() -> SessionKey {
        SessionKey::new("shipping_coordinator", "sam", "order_session")
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("y\n"), Some(true));
        assert_eq!(parse_answer(" YES "), Some(true));
        assert_eq!(parse_answer("n"), Some(false));
        assert_eq!(parse_answer("maybe"), None);
        assert_eq!(parse_answer(""), None);
    }

    #[tokio::test]
    async fn test_small_order_never_asks() {
        let runner = runner(vec![ship(3), ModelTurn::text("Auto-approved ORD-3-AUTO.")]);
        let approver = |_: &ApprovalPrompt| -> Result<bool> { panic!("should not be asked") };

        let report = run_workflow(&runner, &key(), "Ship 3 containers to Rotterdam", &approver)
            .await
            .unwrap();

        assert!(report.decisions.is_empty());
        assert_eq!(report.gate_state, GateState::AutoApproved);
        assert_eq!(report.final_text(), Some("Auto-approved ORD-3-AUTO."));
    }

    #[tokio::test]
    async fn test_large_order_approved() {
        let runner = runner(vec![ship(10), ModelTurn::text("Order ORD-10-HUMAN approved.")]);

        let query = "Ship 10 containers to Rotterdam";
        let report = run_workflow(&runner, &key(), query, &FixedApprover(true))
            .await
            .unwrap();

        assert_eq!(report.decisions.len(), 1);
        assert!(report.decisions[0].approved);
        assert!(report.decisions[0].hint.contains("10 containers"));
        assert_eq!(report.gate_state, GateState::ResolvedApproved);
        assert_eq!(report.last.status, RunStatus::Completed);
        assert_eq!(report.final_text(), Some("Order ORD-10-HUMAN approved."));
        assert_eq!(
            report.last.last_result("place_shipping_order").unwrap()["order_id"],
            "ORD-10-HUMAN"
        );
    }

    #[tokio::test]
    async fn test_large_order_rejected_by_approver() {
        let runner = runner(vec![ship(10), ModelTurn::text("Order rejected.")]);
        let asked = Mutex::new(Vec::new());
        let approver = |prompt: &ApprovalPrompt| -> Result<bool> {
            asked.lock().unwrap().push(prompt.payload.clone());
            Ok(false)
        };

        let report = run_workflow(&runner, &key(), "Ship 10 containers", &approver)
            .await
            .unwrap();

        assert_eq!(report.gate_state, GateState::ResolvedRejected);
        assert_eq!(report.final_text(), Some("Order rejected."));
        assert_eq!(
            asked.lock().unwrap()[0],
            json!({"num_containers": 10, "destination": "Rotterdam"})
        );
        assert_eq!(
            report.last.last_result("place_shipping_order").unwrap()["status"],
            "rejected"
        );
    }
}
