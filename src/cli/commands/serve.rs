//! HTTP API server for integration with other systems.
//!
//! Provides REST endpoints to start invocations, deliver approval decisions
//! and inspect session traces.

use super::build_runner;
use crate::agent::{RunOutcome, RunStatus, Runner};
use crate::approval::{ConfirmationRecord, GateState};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::TollgateError;
use crate::events::{agent_text, DecisionMessage, Event};
use crate::session::SessionKey;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

/// Shared application state.
struct AppState {
    runner: Runner,
    settings: Settings,
}

/// Run the HTTP API server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    let runner = build_runner(&settings, None)?;
    let state = Arc::new(AppState { runner, settings });

    let sweeper = spawn_purge_task(state.clone());
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Tollgate API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Run", "POST /invocations");
    Output::kv("Decide", "POST /invocations/{invocation_id}/decision");
    Output::kv("Status", "GET  /invocations/{invocation_id}");
    Output::kv("Events", "GET  /sessions/{session_id}/events");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;
    sweeper.abort();

    Ok(())
}

/// Periodically drop abandoned confirmations and forget old finished invocations.
fn spawn_purge_task(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let period = state.settings.approval.purge_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match state.runner.purge_expired() {
                Ok(0) => {}
                Ok(n) => debug!("Purged {} invocation entries", n),
                Err(e) => warn!("Purge failed: {}", e),
            }
        }
    })
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/invocations", post(create_invocation))
        .route("/invocations/{invocation_id}", get(get_invocation))
        .route("/invocations/{invocation_id}/decision", post(decide))
        .route("/sessions/{session_id}/events", get(session_events))
        .layer(cors)
        .with_state(state)
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct RunRequest {
    session_id: String,
    message: String,
    /// Defaults to the configured user.
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct DecisionRequest {
    approval_id: String,
    confirmed: bool,
}

#[derive(Deserialize)]
struct UserQuery {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Serialize)]
struct ApprovalInfo {
    approval_id: String,
    hint: String,
    payload: serde_json::Value,
}

#[derive(Serialize)]
struct RunResponse {
    invocation_id: String,
    session_id: String,
    status: &'static str,
    gate_state: GateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    approval: Option<ApprovalInfo>,
    agent_text: Vec<String>,
    events: Vec<Event>,
}

#[derive(Serialize)]
struct InvocationResponse {
    invocation_id: String,
    gate_state: GateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    confirmation: Option<ConfirmationRecord>,
}

#[derive(Serialize)]
struct EventsResponse {
    session_id: String,
    events: Vec<Event>,
    total: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(err: TollgateError) -> Response {
    let status = match &err {
        TollgateError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        TollgateError::NoPendingInvocation(_) | TollgateError::SessionNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        TollgateError::DuplicateConfirmation(_) | TollgateError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("Request failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

impl AppState {
    fn session_key(&self, session_id: &str, user_id: Option<String>) -> SessionKey {
        let user_id = user_id.unwrap_or_else(|| self.settings.session.user_id.clone());
        SessionKey::new(&self.settings.session.app_name, &user_id, session_id)
    }

    fn run_response(&self, outcome: RunOutcome) -> RunResponse {
        let approval = outcome.pending_approval().and_then(|ticket| {
            let record = self.runner.confirmation(&ticket.invocation_id).ok().flatten()?;
            Some(ApprovalInfo {
                approval_id: ticket.approval_id,
                hint: record.hint,
                payload: record.payload,
            })
        });

        RunResponse {
            agent_text: agent_text(&outcome.events)
                .into_iter()
                .map(str::to_string)
                .collect(),
            invocation_id: outcome.invocation_id,
            session_id: outcome.session.session_id,
            status: match outcome.status {
                RunStatus::Completed => "completed",
                RunStatus::Suspended => "suspended",
            },
            gate_state: outcome.gate_state,
            approval,
            events: outcome.events,
        }
    }
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_invocation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunRequest>,
) -> Response {
    let key = state.session_key(&req.session_id, req.user_id);

    match state.runner.run(&key, &req.message).await {
        Ok(outcome) => Json(state.run_response(outcome)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn decide(
    State(state): State<Arc<AppState>>,
    Path(invocation_id): Path<String>,
    Json(req): Json<DecisionRequest>,
) -> Response {
    let decision = DecisionMessage {
        approval_id: req.approval_id,
        confirmed: req.confirmed,
    };

    match state.runner.resume(&invocation_id, &decision).await {
        Ok(outcome) => Json(state.run_response(outcome)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_invocation(
    State(state): State<Arc<AppState>>,
    Path(invocation_id): Path<String>,
) -> Response {
    let gate_state = match state.runner.gate_state(&invocation_id) {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    let confirmation = match state.runner.confirmation(&invocation_id) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };

    if gate_state == GateState::Initial && confirmation.is_none() {
        return error_response(TollgateError::NoPendingInvocation(invocation_id));
    }

    Json(InvocationResponse {
        invocation_id,
        gate_state,
        confirmation,
    })
    .into_response()
}

async fn session_events(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Response {
    let key = state.session_key(&session_id, query.user_id);

    match state.runner.sessions().events(&key).await {
        Ok(events) => Json(EventsResponse {
            session_id,
            total: events.len(),
            events,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ModelTurn, ScriptedModel, ToolContext};
    use crate::session::MemorySessionStore;
    use serde_json::{json, Value};

    fn state(turns: Vec<ModelTurn>) -> Arc<AppState> {
        let runner = Runner::new(
            Arc::new(ScriptedModel::new(turns)),
            ToolContext::new(5),
            Arc::new(MemorySessionStore::new()),
        );
        Arc::new(AppState {
            runner,
            settings: Settings::default(),
        })
    }

    fn ship(n: i64) -> ModelTurn {
        ModelTurn::tool_call(
            "call-1",
            "place_shipping_order",
            json!({"num_containers": n, "destination": "Rotterdam"}),
        )
    }

    async fn body(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn run_request(message: &str) -> Json<RunRequest> {
        Json(RunRequest {
            session_id: "s1".to_string(),
            message: message.to_string(),
            user_id: None,
        })
    }

    #[tokio::test]
    async fn test_run_pause_and_decide() {
        let state = state(vec![ship(10), ModelTurn::text("Order ORD-10-HUMAN approved.")]);

        let response =
            create_invocation(State(state.clone()), run_request("Ship 10 containers")).await;
        let (status, run) = body(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(run["status"], "suspended");
        assert_eq!(run["gate_state"], "PENDING");
        assert_eq!(run["approval"]["payload"]["num_containers"], 10);

        let invocation_id = run["invocation_id"].as_str().unwrap().to_string();
        let approval_id = run["approval"]["approval_id"].as_str().unwrap().to_string();

        let response = get_invocation(State(state.clone()), Path(invocation_id.clone())).await;
        let (_, status_body) = body(response).await;
        assert_eq!(status_body["gate_state"], "PENDING");

        let decision = Json(DecisionRequest {
            approval_id: approval_id.clone(),
            confirmed: true,
        });
        let response = decide(State(state.clone()), Path(invocation_id.clone()), decision).await;
        let (status, done) = body(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["status"], "completed");
        assert_eq!(done["gate_state"], "RESOLVED_APPROVED");
        assert_eq!(done["agent_text"][0], "Order ORD-10-HUMAN approved.");

        let again = Json(DecisionRequest {
            approval_id,
            confirmed: false,
        });
        let response = decide(State(state.clone()), Path(invocation_id), again).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_invocation_is_not_found() {
        let state = state(vec![]);
        let response = get_invocation(State(state.clone()), Path("nope".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let decision = Json(DecisionRequest {
            approval_id: "a".to_string(),
            confirmed: true,
        });
        let response = decide(State(state), Path("nope".to_string()), decision).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_purge_task_forgets_finished_invocations() {
        let runner = Runner::new(
            Arc::new(ScriptedModel::new(vec![ship(3), ModelTurn::text("Placed.")])),
            ToolContext::new(5),
            Arc::new(MemorySessionStore::new()),
        )
        .with_resolved_retention(std::time::Duration::ZERO);
        let mut settings = Settings::default();
        settings.approval.purge_interval_seconds = 1;
        let state = Arc::new(AppState { runner, settings });

        let response =
            create_invocation(State(state.clone()), run_request("Ship 3 containers")).await;
        let (_, run) = body(response).await;
        let invocation_id = run["invocation_id"].as_str().unwrap().to_string();
        assert_eq!(state.runner.gate_state(&invocation_id).unwrap(), GateState::AutoApproved);

        let sweeper = spawn_purge_task(state.clone());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        sweeper.abort();

        assert_eq!(state.runner.gate_state(&invocation_id).unwrap(), GateState::Initial);
        let response = get_invocation(State(state), Path(invocation_id)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_message_is_bad_request() {
        let state = state(vec![]);
        let response = create_invocation(State(state), run_request("  ")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_session_events() {
        let state = state(vec![ship(2), ModelTurn::text("Done.")]);
        create_invocation(State(state.clone()), run_request("Ship 2 containers")).await;

        let response = session_events(
            State(state.clone()),
            Path("s1".to_string()),
            Query(UserQuery { user_id: None }),
        )
        .await;
        let (status, events) = body(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(events["total"], 4);
        assert_eq!(events["events"][0]["kind"]["type"], "text");

        let response = session_events(
            State(state),
            Path("missing".to_string()),
            Query(UserQuery { user_id: None }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
