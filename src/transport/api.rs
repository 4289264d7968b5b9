//! Handlers for the four external interfaces (spec.md §6).
//!
//! Grounded on the teacher's `proxy::api::stats` shape: one async fn per
//! route taking `State<SharedState>`, returning `Json<T>` or a typed
//! error that already implements `IntoResponse` (`error::EngineError`).

use super::AppState;
use crate::error::EngineError;
use crate::health::{ConditionStatus, Severity};
use crate::metrics::MetricsSnapshot;
use crate::provider::Health;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub prompt: String,
    #[serde(default)]
    pub hints: ChatHints,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChatHints {
    /// Force full council voting even when Agent-0 clears the confidence
    /// gate.
    #[serde(default)]
    pub force_council: bool,
    /// Cancel any background refinement as soon as the draft is delivered.
    #[serde(default)]
    pub disable_refine: bool,
}

fn sse_json(event: &str, body: serde_json::Value) -> Event {
    Event::default()
        .event(event)
        .json_data(body)
        .expect("json!() values always serialize")
}

/// `POST /v1/chat`: SSE stream of `draft_complete`, optional
/// `refinement_status`/`refinement_complete`, then `stream_complete` — or
/// a terminal `error` in place of the rest (spec.md §6).
pub async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Event>(16);

    tokio::spawn(async move {
        let disable_refine = req.hints.disable_refine;

        let (draft, handle) = match state.orchestrator.chat(&req.session_id, &req.prompt, req.hints.force_council).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = tx.send(sse_json("error", json!({ "kind": e.kind(), "message": e.to_string() }))).await;
                return;
            }
        };

        let _ = tx
            .send(sse_json(
                "draft_complete",
                json!({
                    "text": draft.text,
                    "confidence": draft.confidence,
                    "first_token_ms": draft.first_token_ms,
                    "total_ms": draft.total_ms,
                    "refinement_pending": draft.refinement_pending,
                }),
            ))
            .await;

        if draft.refinement_pending {
            if disable_refine {
                handle.cancel();
            } else {
                let _ = tx.send(sse_json("refinement_status", json!({ "message": "background refinement in progress" }))).await;
                if let Some(msg) = handle.recv().await {
                    let _ = tx
                        .send(sse_json(
                            "refinement_complete",
                            json!({
                                "text": msg.final_text,
                                "provenance": msg.provenance,
                                "improved": msg.improved,
                                "confidence": msg.confidence,
                                "specialists": msg.specialists,
                            }),
                        ))
                        .await;
                }
            }
        }

        let _ = tx.send(sse_json("stream_complete", json!({}))).await;
    });

    Sse::new(ReceiverStream::new(rx).map(Ok)).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct RecallParams {
    pub session_id: String,
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecallHit {
    pub content: String,
    pub score: f64,
}

/// `GET /v1/recall`: diagnostic vector-recall probe, not used by `chat`
/// itself (spec.md §6).
pub async fn recall(State(state): State<AppState>, Query(params): Query<RecallParams>) -> Result<Json<Vec<RecallHit>>, EngineError> {
    let k = params.k.unwrap_or_else(|| state.memory.query_k_default());
    let hits = state.memory.query_scored(&params.session_id, &params.query, k).await?;
    Ok(Json(
        hits.into_iter().map(|(score, entry)| RecallHit { content: entry.text, score }).collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct BudgetView {
    pub daily_spent_usd: f64,
    pub daily_cap_fraction: f64,
    pub paid_disabled: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub conditions: Vec<ConditionStatus>,
    pub budgets: BudgetView,
    pub providers: HashMap<String, String>,
}

/// `GET /healthz`: must respond within 100ms (spec.md §6) — every
/// ingredient here is either an in-memory rolling aggregate or a
/// TTL-cached provider health probe, never a live upstream call.
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let drops = state.memory.backlog_drops();
    let conditions = state.health.evaluate(&state.budget, drops);
    let status = if conditions.iter().any(|c| c.severity == Severity::Critical) {
        "unhealthy"
    } else if conditions.iter().any(|c| c.severity == Severity::Warn) {
        "degraded"
    } else {
        "healthy"
    };

    let mut providers = HashMap::new();
    for name in state.registry.names_by_priority() {
        let health = state.registry.health(&name).await.unwrap_or(Health::Down);
        providers.insert(name, health.to_string());
    }

    Json(HealthResponse {
        status,
        conditions,
        budgets: BudgetView {
            daily_spent_usd: state.budget.snapshot().daily_spent_usd,
            daily_cap_fraction: state.budget.daily_cap_fraction(),
            paid_disabled: state.budget.paid_disabled(),
        },
        providers,
    })
}

/// `GET /metrics`: point-in-time JSON rendering of every tracked counter
/// (spec.md §6).
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    let budget_spent_usd_day = state.budget.snapshot().daily_spent_usd;
    Json(state.metrics.snapshot(budget_spent_usd_day))
}
