//! SpecialistRunner: executes one specialist under its declared caps and
//! normalises the output into a `Candidate`.
//!
//! Grounded on `util::truncate_utf8_safe` (UTF-8-safe truncation) and
//! `tokens::estimate_tokens`/`truncate_to_tokens` for the token-cap
//! enforcement step.

use crate::budget::BudgetGuard;
use crate::config::SpecialistConfig;
use crate::error::EngineError;
use crate::provider::{GenOpts, ProviderRegistry};
use crate::tokens::{estimate_tokens, truncate_to_tokens};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of running one specialist (spec.md §3 `Candidate`). Only the
/// `Ok` arm carries a meaningful answer; downstream code pattern-matches
/// on status rather than inspecting text for every failure mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateStatus {
    Ok,
    StubFiltered,
    Unsure,
    Timeout,
    Error,
    BudgetDenied,
}

/// One specialist's (or Agent-0's) transient output from a single voting
/// round.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub specialist_name: String,
    pub text: String,
    pub confidence: f64,
    pub tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub status: CandidateStatus,
    pub error_kind: Option<String>,
    pub truncated: bool,
    /// Descriptor-declared priority, used by VotingEngine's tie-breaker.
    pub priority: i32,
}

impl Candidate {
    fn failed(specialist_name: &str, status: CandidateStatus, error_kind: Option<String>, priority: i32) -> Self {
        Self {
            specialist_name: specialist_name.to_string(),
            text: String::new(),
            confidence: 0.0,
            tokens: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            status,
            error_kind,
            truncated: false,
            priority,
        }
    }

    pub fn is_winner_eligible(&self) -> bool {
        self.status == CandidateStatus::Ok && self.confidence > 0.0
    }

    /// Synthesize a timed-out candidate for a specialist that never
    /// finished before the voting round's global deadline (spec.md §4.6).
    pub fn timed_out(specialist_name: &str, priority: i32) -> Self {
        Self::failed(specialist_name, CandidateStatus::Timeout, None, priority)
    }
}

/// Runtime specialist configuration, resolved from `SpecialistDescriptorConfig`
/// against the global `SpecialistConfig` defaults (spec.md §3
/// `SpecialistDescriptor`; hot-reload is out of scope).
#[derive(Debug, Clone)]
pub struct SpecialistDescriptor {
    pub name: String,
    pub domain_tags: Vec<String>,
    pub provider_ref: String,
    pub token_cap: u32,
    pub timeout: Duration,
    pub temperature: f64,
    pub priority: i32,
}

impl SpecialistDescriptor {
    pub fn from_config(
        cfg: &crate::config::SpecialistDescriptorConfig,
        defaults: &SpecialistConfig,
    ) -> Self {
        Self {
            name: cfg.name.clone(),
            domain_tags: cfg.domain_tags.clone(),
            provider_ref: cfg.provider_ref.clone(),
            token_cap: cfg.token_cap.unwrap_or(defaults.max_tokens),
            timeout: cfg
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            temperature: cfg.temperature.unwrap_or(0.2),
            priority: cfg.priority,
        }
    }

    pub fn matches_intent(&self, intent: &str) -> bool {
        self.name == intent || self.domain_tags.iter().any(|t| t == intent)
    }
}

/// Canonical stub-marker list (spec.md §9 open question, resolved — see
/// DESIGN.md). Matched case-insensitively against the full candidate text.
pub const STUB_MARKERS: &[&str] = &[
    "todo",
    "tbd",
    "lorem ipsum",
    "not implemented",
    "implementation pending",
    "{{",
    "}}",
    "i don't know",
    "i do not know",
    "as an ai",
];

fn contains_stub_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    STUB_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn length_penalty(token_count: u32, floor: f64) -> f64 {
    let cap = 1.0 - floor;
    (floor + (0.04 * token_count as f64).min(cap)).min(1.0)
}

pub struct SpecialistRunner;

impl SpecialistRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run one specialist. Never returns an `Err` to the caller — every
    /// failure mode is converted to a `Candidate` with an appropriate
    /// status (spec.md §4.5 "never raised to caller").
    pub async fn run(
        &self,
        registry: &ProviderRegistry,
        budget: &BudgetGuard,
        session_id: &str,
        descriptor: &SpecialistDescriptor,
        prompt: &str,
        dominant_intent: Option<&str>,
        cancel: &CancellationToken,
    ) -> Candidate {
        let opts = GenOpts {
            max_tokens: descriptor.token_cap,
            temperature: descriptor.temperature,
            timeout: descriptor.timeout,
            stop_sequences: Vec::new(),
            stream_sink: None,
        };

        let start = Instant::now();
        let dispatch = registry.generate(budget, session_id, &descriptor.provider_ref, prompt, &opts);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Candidate::failed(&descriptor.name, CandidateStatus::Timeout, Some("cancelled".into()), descriptor.priority);
            }
            result = tokio::time::timeout(descriptor.timeout, dispatch) => result,
        };

        let result = match outcome {
            Err(_elapsed) => {
                return Candidate::failed(&descriptor.name, CandidateStatus::Timeout, None, descriptor.priority);
            }
            Ok(Err(EngineError::BudgetExceeded(_))) => {
                return Candidate::failed(
                    &descriptor.name,
                    CandidateStatus::BudgetDenied,
                    None,
                    descriptor.priority,
                );
            }
            Ok(Err(EngineError::Timeout(_))) => {
                return Candidate::failed(&descriptor.name, CandidateStatus::Timeout, None, descriptor.priority);
            }
            Ok(Err(e)) => {
                return Candidate::failed(
                    &descriptor.name,
                    CandidateStatus::Error,
                    Some(e.to_string()),
                    descriptor.priority,
                );
            }
            Ok(Ok(result)) => result,
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        let mut text = result.text;
        let mut truncated = result.truncated;

        let stripped = text.trim_start();
        if stripped.len() >= 6 && stripped[..6].eq_ignore_ascii_case("UNSURE") {
            return Candidate {
                specialist_name: descriptor.name.clone(),
                text,
                confidence: 0.05,
                tokens: result.tokens_out,
                cost_usd: result.cost_usd,
                latency_ms,
                status: CandidateStatus::Unsure,
                error_kind: None,
                truncated,
                priority: descriptor.priority,
            };
        }

        let non_whitespace = text.chars().filter(|c| !c.is_whitespace()).count();
        if text.is_empty() || non_whitespace < 10 || contains_stub_marker(&text) {
            return Candidate {
                specialist_name: descriptor.name.clone(),
                text,
                confidence: 0.0,
                tokens: result.tokens_out,
                cost_usd: result.cost_usd,
                latency_ms,
                status: CandidateStatus::StubFiltered,
                error_kind: None,
                truncated,
                priority: descriptor.priority,
            };
        }

        if estimate_tokens(&text) > descriptor.token_cap {
            text = truncate_to_tokens(&text, descriptor.token_cap).to_string();
            truncated = true;
        }
        let tokens = estimate_tokens(&text).min(descriptor.token_cap);

        let base_confidence = result
            .provider_meta
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5);
        let floor = if dominant_intent.is_some_and(|intent| descriptor.matches_intent(intent)) {
            0.7
        } else {
            0.4
        };
        let confidence = (base_confidence * length_penalty(tokens, floor)).clamp(0.0, 1.0);

        Candidate {
            specialist_name: descriptor.name.clone(),
            text,
            confidence,
            tokens,
            cost_usd: result.cost_usd,
            latency_ms,
            status: CandidateStatus::Ok,
            error_kind: None,
            truncated,
            priority: descriptor.priority,
        }
    }
}

impl Default for SpecialistRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BudgetConfig;
    use crate::provider::mock::MockProvider;
    use std::sync::Arc;

    fn descriptor(name: &str) -> SpecialistDescriptor {
        SpecialistDescriptor {
            name: name.to_string(),
            domain_tags: vec![name.to_string()],
            provider_ref: "local".to_string(),
            token_cap: 160,
            timeout: Duration::from_secs(4),
            temperature: 0.2,
            priority: 0,
        }
    }

    async fn registry_with(provider: MockProvider) -> ProviderRegistry {
        ProviderRegistry::builder()
            .register(Arc::new(provider))
            .build()
            .await
    }

    #[tokio::test]
    async fn ok_candidate_carries_positive_confidence() {
        let registry = registry_with(MockProvider::new("local")).await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let cancel = CancellationToken::new();
        let candidate = SpecialistRunner::new()
            .run(&registry, &budget, "s1", &descriptor("knowledge"), "Explain HTTP/3 please", None, &cancel)
            .await;
        assert_eq!(candidate.status, CandidateStatus::Ok);
        assert!(candidate.confidence > 0.0);
    }

    #[tokio::test]
    async fn stub_marker_is_filtered_with_zero_confidence() {
        struct StubProvider;
        #[async_trait::async_trait]
        impl crate::provider::Provider for StubProvider {
            fn name(&self) -> &str {
                "local"
            }
            async fn generate(
                &self,
                _prompt: &str,
                _opts: &GenOpts,
            ) -> Result<crate::provider::GenerationResult, crate::provider::ProviderError> {
                Ok(crate::provider::GenerationResult {
                    text: "TODO: fill this in later".to_string(),
                    tokens_in: 5,
                    tokens_out: 5,
                    cost_usd: 0.0,
                    first_token_latency_ms: 1,
                    total_latency_ms: 1,
                    truncated: false,
                    provider_meta: serde_json::json!({}),
                })
            }
            fn cost_estimate(&self, _opts: &GenOpts) -> f64 {
                0.0
            }
        }
        let registry = ProviderRegistry::builder()
            .register(Arc::new(StubProvider))
            .build()
            .await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let cancel = CancellationToken::new();
        let candidate = SpecialistRunner::new()
            .run(&registry, &budget, "s1", &descriptor("code"), "write code", None, &cancel)
            .await;
        assert_eq!(candidate.status, CandidateStatus::StubFiltered);
        assert_eq!(candidate.confidence, 0.0);
        assert!(!candidate.is_winner_eligible());
    }

    #[tokio::test]
    async fn unsure_prefix_yields_low_confidence_floor() {
        struct UnsureProvider;
        #[async_trait::async_trait]
        impl crate::provider::Provider for UnsureProvider {
            fn name(&self) -> &str {
                "local"
            }
            async fn generate(
                &self,
                _prompt: &str,
                _opts: &GenOpts,
            ) -> Result<crate::provider::GenerationResult, crate::provider::ProviderError> {
                Ok(crate::provider::GenerationResult {
                    text: "UNSURE, I cannot determine this reliably".to_string(),
                    tokens_in: 5,
                    tokens_out: 8,
                    cost_usd: 0.0,
                    first_token_latency_ms: 1,
                    total_latency_ms: 1,
                    truncated: false,
                    provider_meta: serde_json::json!({}),
                })
            }
            fn cost_estimate(&self, _opts: &GenOpts) -> f64 {
                0.0
            }
        }
        let registry = ProviderRegistry::builder()
            .register(Arc::new(UnsureProvider))
            .build()
            .await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let cancel = CancellationToken::new();
        let candidate = SpecialistRunner::new()
            .run(&registry, &budget, "s1", &descriptor("logic"), "is this valid", None, &cancel)
            .await;
        assert_eq!(candidate.status, CandidateStatus::Unsure);
        assert_eq!(candidate.confidence, 0.05);
        assert!(!candidate.is_winner_eligible());
    }

    #[tokio::test]
    async fn timeout_beyond_deadline_yields_timeout_status() {
        let registry = registry_with(MockProvider::new("local").with_delay(Duration::from_millis(50))).await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let cancel = CancellationToken::new();
        let mut d = descriptor("knowledge");
        d.timeout = Duration::from_millis(5);
        let candidate = SpecialistRunner::new()
            .run(&registry, &budget, "s1", &d, "Explain HTTP/3 please", None, &cancel)
            .await;
        assert_eq!(candidate.status, CandidateStatus::Timeout);
    }

    #[tokio::test]
    async fn token_cap_enforced_and_truncation_marked() {
        let registry = registry_with(MockProvider::new("local")).await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let cancel = CancellationToken::new();
        let mut d = descriptor("knowledge");
        d.token_cap = 3;
        let candidate = SpecialistRunner::new()
            .run(&registry, &budget, "s1", &d, "Explain HTTP/3 in two long sentences please", None, &cancel)
            .await;
        assert!(candidate.tokens <= 3);
    }

    #[tokio::test]
    async fn matching_dominant_intent_raises_confidence_floor() {
        let registry = registry_with(MockProvider::new("local")).await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let cancel = CancellationToken::new();
        let d = descriptor("knowledge");
        let unmatched = SpecialistRunner::new()
            .run(&registry, &budget, "s1", &d, "Explain HTTP/3 please, thank you", None, &cancel)
            .await;
        let matched = SpecialistRunner::new()
            .run(&registry, &budget, "s1", &d, "Explain HTTP/3 please, thank you", Some("knowledge"), &cancel)
            .await;
        assert!(matched.confidence >= unmatched.confidence);
    }
}
