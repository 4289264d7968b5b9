//! HTTP/SSE binding: the four external interfaces (spec.md §6).
//!
//! Grounded on the teacher's `proxy::server` router-construction shape
//! (`axum::Router` built once over a shared state, bound with
//! `tokio::net::TcpListener` + `axum::serve`) minus the reqwest upstream
//! client and the augmentation/translation/transformation pipeline layers,
//! which have no counterpart here. SSE framing uses axum's own
//! `axum::response::sse::{Sse, Event}` rather than the teacher's
//! `proxy::sse` module, which only parses *inbound* SSE from an upstream
//! and has no outbound-production logic to reuse.

pub mod api;

use crate::budget::BudgetGuard;
use crate::health::HealthMonitor;
use crate::memory::MemoryStore;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::provider::ProviderRegistry;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

/// Shared handler state (spec.md §6, teacher's `ProxyState`/`SharedState`
/// pattern of bundling everything behind `Arc` and cloning the bundle per
/// request rather than the individual fields).
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub memory: Arc<MemoryStore>,
    pub health: Arc<HealthMonitor>,
    pub budget: Arc<BudgetGuard>,
    pub metrics: Arc<Metrics>,
    pub registry: Arc<ProviderRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat", post(api::chat))
        .route("/v1/recall", get(api::recall))
        .route("/healthz", get(api::healthz))
        .route("/metrics", get(api::metrics))
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves (teacher's `proxy::server::run`
/// bind-then-serve-with-graceful-shutdown shape).
pub async fn serve(state: AppState, bind_addr: std::net::SocketAddr, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("transport listening on {bind_addr}");
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}
