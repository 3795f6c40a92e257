//! Ship command: one request through the approval workflow.

use super::build_runner;
use crate::approval::GateState;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::session::SessionKey;
use crate::workflow::{run_workflow, Approver, FixedApprover, PromptApprover};
use anyhow::Result;
use uuid::Uuid;

/// Run the ship command.
pub async fn run_ship(
    query: &str,
    session: Option<String>,
    approve: bool,
    reject: bool,
    model: Option<String>,
    settings: Settings,
) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Agent, &settings) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let runner = build_runner(&settings, model.as_deref())?;
    let session_id = session.unwrap_or_else(new_session_id);
    let key = SessionKey::new(
        &settings.session.app_name,
        &settings.session.user_id,
        &session_id,
    );

    let approver: Box<dyn Approver> = if approve {
        Box::new(FixedApprover(true))
    } else if reject {
        Box::new(FixedApprover(false))
    } else {
        Box::new(PromptApprover)
    };

    Output::header("Shipping request");
    Output::kv("Session", &session_id);
    Output::kv("Request", query);

    // The terminal prompt cannot share the screen with a spinner.
    let spinner = (approve || reject).then(|| Output::spinner("Asking the shipping agent..."));
    let report = run_workflow(&runner, &key, query, approver.as_ref()).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let report = report?;

    for decision in &report.decisions {
        let verdict = if decision.approved { "approved" } else { "rejected" };
        Output::info(&format!("{} -> {}", decision.hint, verdict));
    }

    for text in &report.agent_text {
        Output::agent(runner.name(), text);
    }

    match report.gate_state {
        GateState::AutoApproved => Output::success("Order auto-approved."),
        GateState::ResolvedApproved => Output::success("Order approved after review."),
        GateState::ResolvedRejected => Output::warning("Order rejected."),
        GateState::Pending => Output::warning("Order is still waiting for approval."),
        GateState::Initial => Output::info("No order was placed."),
    }
    Output::kv("Invocation", &report.invocation_id);

    Ok(())
}

/// Fresh session id for a one-off order, e.g. `order_1a2b3c4d`.
fn new_session_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("order_{}", &id[..8])
}
