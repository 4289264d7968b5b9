// council-core - latency-sensitive LLM routing and voting orchestration engine
//
// Architecture:
// - Transport (axum): Chat (SSE), Recall, Health, Metrics
// - Orchestrator: front-speaker-with-background-refinement protocol
// - Specialist/Voting: parallel council panel and fusion
// - MemoryStore: shared conversational recall, write-behind durable log
// - BudgetGuard/HealthMonitor: cost and health guardrails

mod budget;
mod cli;
mod config;
mod error;
mod health;
mod intent;
mod memory;
mod metrics;
mod orchestrator;
mod pricing;
mod provider;
mod session;
mod specialist;
mod startup;
mod summarizer;
mod tokens;
mod transport;
mod util;
mod voting;

use anyhow::Result;
use budget::BudgetGuard;
use config::Config;
use health::HealthMonitor;
use intent::IntentClassifier;
use memory::embedder::HashingEmbedder;
use memory::MemoryStore;
use metrics::Metrics;
use orchestrator::Orchestrator;
use provider::mock::MockProvider;
use provider::ProviderRegistry;
use session::SessionStore;
use specialist::SpecialistDescriptor;
use summarizer::Summariser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    if cli::handle_cli() {
        return Ok(());
    }

    Config::ensure_config_exists();
    let config = Arc::new(Config::from_env());

    let default_filter = format!("council_core={},tower_http=warn,axum=warn", config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    startup::print_startup(&config);

    std::fs::create_dir_all(&config.data_dir)?;

    let registry = Arc::new(
        ProviderRegistry::builder()
            .register(Arc::new(MockProvider::new("local")))
            .build()
            .await,
    );
    let budget = Arc::new(BudgetGuard::new(config.budget.clone()));
    let sessions = Arc::new(SessionStore::new(Duration::from_secs(3600)));
    let memory = MemoryStore::new(
        config.memory.clone(),
        config.request.embedder_timeout,
        Arc::new(HashingEmbedder::default()),
        config.data_dir.join("memory.jsonl"),
    );
    let intent = Arc::new(IntentClassifier::new(&intent::IntentConfig::default()));
    let summariser = Arc::new(Summariser::new());
    let metrics = Arc::new(Metrics::new());
    let health = Arc::new(HealthMonitor::new(config.health.clone()));

    let descriptors: Vec<SpecialistDescriptor> = config
        .specialists
        .iter()
        .map(|d| SpecialistDescriptor::from_config(d, &config.specialist))
        .collect();

    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        budget.clone(),
        sessions.clone(),
        memory.clone(),
        intent,
        summariser,
        metrics.clone(),
        health.clone(),
        descriptors,
        config.clone(),
    ));

    let state = transport::AppState {
        orchestrator,
        memory: memory.clone(),
        health: health.clone(),
        budget: budget.clone(),
        metrics: metrics.clone(),
        registry: registry.clone(),
    };

    // Periodic upkeep: idle session GC, memory archive/purge GC, pending
    // write-behind queue depth and upstream provider health sampled into
    // HealthMonitor/Metrics (spec.md §4.1 GC, §4.8 WriteBehindBacklog).
    {
        let sessions = sessions.clone();
        let memory = memory.clone();
        let health = health.clone();
        let metrics = metrics.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(30));
            let mut gc_tick = tokio::time::interval(Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let depth = memory.pending_queue_depth();
                        health.set_pending_queue_depth(depth);
                        metrics.set_memory_pending_queue(depth as u64);
                        health.record_upstream_util(registry.average_health_pct().await);
                        let removed = sessions.gc_idle();
                        if removed > 0 {
                            tracing::debug!("gc'd {removed} idle sessions");
                        }
                    }
                    _ = gc_tick.tick() => {
                        memory.run_gc();
                        tracing::debug!("memory gc complete");
                    }
                }
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let bind_addr = config.bind_addr;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = transport::serve(state, bind_addr, async {
            let _ = shutdown_rx.await;
        })
        .await
        {
            tracing::error!("transport server error: {e}");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    let _ = shutdown_tx.send(());
    let _ = server_handle.await;
    tracing::info!("shutdown complete");

    Ok(())
}
