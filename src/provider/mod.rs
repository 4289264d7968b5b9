//! ProviderRegistry: a uniform generation facade over heterogeneous
//! backends, hiding whether a given name resolves to a local model or a
//! cloud API behind one `Provider` trait.
//!
//! Grounded on the teacher's `ClientsConfig`/`ProviderConfig` name-keyed
//! registry (`config.rs`) generalized from "client routes to a base_url"
//! to "name resolves to a `Provider` impl", plus the eager-preload idea in
//! `main.rs`.

pub mod mock;

use crate::budget::BudgetGuard;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Recognised generation options (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct GenOpts {
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout: Duration,
    pub stop_sequences: Vec<String>,
    /// Channel for incremental tokens; `None` disables streaming.
    pub stream_sink: Option<mpsc::Sender<String>>,
}

impl Default for GenOpts {
    fn default() -> Self {
        Self {
            max_tokens: 160,
            temperature: 0.0,
            timeout: Duration::from_secs(4),
            stop_sequences: Vec::new(),
            stream_sink: None,
        }
    }
}

/// Result of one generation call (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost_usd: f64,
    pub first_token_latency_ms: u64,
    pub total_latency_ms: u64,
    pub truncated: bool,
    pub provider_meta: serde_json::Value,
}

/// Provider-reported or last-observed health (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Degraded,
    Down,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Healthy => write!(f, "healthy"),
            Health::Degraded => write!(f, "degraded"),
            Health::Down => write!(f, "down"),
        }
    }
}

/// Failure taxonomy for a single Generate call (spec.md §4.2).
#[derive(Debug)]
pub enum ProviderError {
    Timeout,
    ProviderDown(String),
    InvalidOpts(String),
    UpstreamError(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Timeout => write!(f, "provider timed out"),
            ProviderError::ProviderDown(name) => write!(f, "provider {name} is down"),
            ProviderError::InvalidOpts(msg) => write!(f, "invalid generation options: {msg}"),
            ProviderError::UpstreamError(msg) => write!(f, "upstream error: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Timeout => EngineError::Timeout("provider generate".to_string()),
            ProviderError::ProviderDown(name) => EngineError::ProviderDown(name),
            ProviderError::InvalidOpts(msg) => EngineError::InvalidInput(msg),
            ProviderError::UpstreamError(msg) => EngineError::Internal(msg),
        }
    }
}

/// A generation backend. Real inference engines are out of scope (spec.md
/// §1); this crate ships exactly one implementation (`mock::MockProvider`),
/// but the registry is written entirely against this trait so a caller can
/// drop in a real local or cloud backend without touching orchestration
/// code.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        opts: &GenOpts,
    ) -> Result<GenerationResult, ProviderError>;

    /// Conservative cost estimate for a call with the given options, used
    /// by BudgetGuard.Authorise before dispatch (spec.md §4.4).
    fn cost_estimate(&self, opts: &GenOpts) -> f64;

    /// Cheap, cacheable health probe. Called at most once per 10s per
    /// provider by the registry (spec.md §4.2).
    async fn health(&self) -> Health {
        Health::Healthy
    }

    /// Warm the provider with a cheap dummy call, to avoid cold-start tax
    /// on the first real request (spec.md §4.2 "eager preload").
    async fn preload(&self) {}
}

struct HealthCache {
    value: Health,
    checked_at: Instant,
}

struct RegisteredProvider {
    provider: Arc<dyn Provider>,
    /// Registration order; lower = higher priority (local-first, cloud
    /// fallback, per spec.md §4.2).
    priority: usize,
    health: RwLock<HealthCache>,
}

/// Name-keyed registry of generation backends.
pub struct ProviderRegistry {
    providers: HashMap<String, RegisteredProvider>,
    health_ttl: Duration,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Look up a provider's cost estimate without dispatching.
    pub fn cost_estimate(&self, provider_name: &str, opts: &GenOpts) -> EngineResult<f64> {
        let entry = self.get(provider_name)?;
        Ok(entry.provider.cost_estimate(opts))
    }

    fn get(&self, provider_name: &str) -> EngineResult<&RegisteredProvider> {
        self.providers.get(provider_name).ok_or_else(|| {
            EngineError::Internal(format!("unknown provider {provider_name}"))
        })
    }

    /// Cached health check, refreshed at most once per `health_ttl`.
    pub async fn health(&self, provider_name: &str) -> EngineResult<Health> {
        let entry = self.get(provider_name)?;
        {
            let cache = entry.health.read().unwrap_or_else(|e| e.into_inner());
            if cache.checked_at.elapsed() < self.health_ttl {
                return Ok(cache.value);
            }
        }
        let fresh = entry.provider.health().await;
        let mut cache = entry.health.write().unwrap_or_else(|e| e.into_inner());
        cache.value = fresh;
        cache.checked_at = Instant::now();
        Ok(fresh)
    }

    /// Dispatch a generation call, consulting BudgetGuard first and
    /// recording actual cost after success (spec.md §4.2, §4.4).
    pub async fn generate(
        &self,
        budget: &BudgetGuard,
        session_id: &str,
        provider_name: &str,
        prompt: &str,
        opts: &GenOpts,
    ) -> EngineResult<GenerationResult> {
        let entry = self.get(provider_name)?;

        if self.health(provider_name).await? == Health::Down {
            return Err(EngineError::ProviderDown(provider_name.to_string()));
        }

        let estimate = entry.provider.cost_estimate(opts);
        budget.authorise(session_id, estimate)?;

        let result = entry
            .provider
            .generate(prompt, opts)
            .await
            .map_err(EngineError::from)?;

        budget.record(session_id, result.cost_usd);
        Ok(result)
    }

    /// Providers in registration-priority order (local first).
    pub fn names_by_priority(&self) -> Vec<String> {
        let mut entries: Vec<&RegisteredProvider> = self.providers.values().collect();
        entries.sort_by_key(|e| e.priority);
        entries.iter().map(|e| e.provider.name().to_string()).collect()
    }

    /// Mean of every registered provider's cached health, expressed as a
    /// utilization-style percentage (Healthy=100, Degraded=50, Down=0), fed
    /// into `HealthMonitor::record_upstream_util` on a timer. Empty
    /// registry reads as fully healthy rather than as an alarm.
    pub async fn average_health_pct(&self) -> f64 {
        if self.providers.is_empty() {
            return 100.0;
        }
        let mut total = 0.0;
        for name in self.providers.keys() {
            let pct = match self.health(name).await.unwrap_or(Health::Down) {
                Health::Healthy => 100.0,
                Health::Degraded => 50.0,
                Health::Down => 0.0,
            };
            total += pct;
        }
        total / self.providers.len() as f64
    }
}

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: Vec<Arc<dyn Provider>>,
    health_ttl: Option<Duration>,
}

impl ProviderRegistryBuilder {
    pub fn register(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn health_ttl(mut self, ttl: Duration) -> Self {
        self.health_ttl = Some(ttl);
        self
    }

    /// Build the registry and eagerly preload the first-registered
    /// (highest priority / "primary local") provider.
    pub async fn build(self) -> ProviderRegistry {
        let mut providers = HashMap::new();
        for (priority, provider) in self.providers.into_iter().enumerate() {
            if priority == 0 {
                provider.preload().await;
            }
            let name = provider.name().to_string();
            providers.insert(
                name,
                RegisteredProvider {
                    provider,
                    priority,
                    health: RwLock::new(HealthCache {
                        value: Health::Healthy,
                        checked_at: Instant::now() - Duration::from_secs(3600),
                    }),
                },
            );
        }
        ProviderRegistry {
            providers,
            health_ttl: self.health_ttl.unwrap_or(Duration::from_secs(10)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetGuard;
    use crate::config::BudgetConfig;
    use mock::MockProvider;

    #[tokio::test]
    async fn priority_order_follows_registration() {
        let registry = ProviderRegistry::builder()
            .register(Arc::new(MockProvider::new("local")))
            .register(Arc::new(MockProvider::new("cloud")))
            .build()
            .await;
        assert_eq!(registry.names_by_priority(), vec!["local", "cloud"]);
    }

    #[tokio::test]
    async fn generate_records_cost_under_budget() {
        let registry = ProviderRegistry::builder()
            .register(Arc::new(MockProvider::new("local")))
            .build()
            .await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let opts = GenOpts {
            max_tokens: 24,
            ..GenOpts::default()
        };
        let result = registry
            .generate(&budget, "s1", "local", "hello", &opts)
            .await
            .unwrap();
        assert!(result.tokens_out <= opts.max_tokens);
        assert!(budget.snapshot().daily_spent_usd >= result.cost_usd);
    }

    #[tokio::test]
    async fn unknown_provider_is_internal_error() {
        let registry = ProviderRegistry::builder().build().await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let result = registry
            .generate(&budget, "s1", "ghost", "hi", &GenOpts::default())
            .await;
        assert!(result.is_err());
    }
}
