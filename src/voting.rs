//! VotingEngine: dispatches the specialist panel in parallel, applies the
//! shortcut/fusion selection algorithm, and decides whether the result
//! should replace Agent-0's draft.
//!
//! Grounded on the proxy's `join_all`-based fan-out for concurrent
//! downstream calls (`proxy/handlers` dispatch pattern), generalized from
//! "forward one request to N mirrors" to "run N specialists and pick a
//! winner".

use crate::budget::BudgetGuard;
use crate::config::VotingConfig;
use crate::provider::ProviderRegistry;
use crate::specialist::{Candidate, SpecialistDescriptor, SpecialistRunner};
use tokio_util::sync::CancellationToken;

/// Where the final answer for a voting round came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteSource {
    /// No specialist beat the draft by the replace margin; draft stands.
    Draft,
    /// One specialist cleared the shortcut threshold for the dominant intent.
    Shortcut(String),
    /// Best candidate from a top-K fusion group replaced the draft.
    Fusion(Vec<String>),
}

/// Outcome of one voting round (spec.md §4.6 `VoteResult`).
#[derive(Debug, Clone)]
pub struct VoteResult {
    pub winner_text: String,
    pub winner_confidence: f64,
    pub source: VoteSource,
    pub candidates: Vec<Candidate>,
    pub replaced_draft: bool,
}

pub struct VotingEngine {
    runner: SpecialistRunner,
}

impl VotingEngine {
    pub fn new() -> Self {
        Self {
            runner: SpecialistRunner::new(),
        }
    }

    /// Run the full specialist panel against `prompt`, then select a
    /// winner against `draft_text`/`draft_confidence` (spec.md §4.6).
    #[allow(clippy::too_many_arguments)]
    pub async fn vote(
        &self,
        registry: &ProviderRegistry,
        budget: &BudgetGuard,
        session_id: &str,
        prompt: &str,
        descriptors: &[SpecialistDescriptor],
        dominant_intent: Option<&str>,
        draft_text: &str,
        draft_confidence: f64,
        config: &VotingConfig,
        cancel: &CancellationToken,
    ) -> VoteResult {
        let candidates = self
            .dispatch_panel(registry, budget, session_id, prompt, descriptors, dominant_intent, config, cancel)
            .await;

        let mut eligible: Vec<&Candidate> = candidates.iter().filter(|c| c.is_winner_eligible()).collect();
        eligible.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tokens.cmp(&b.tokens))
                .then_with(|| a.priority.cmp(&b.priority))
        });

        if let Some(intent) = dominant_intent {
            if let Some(shortcut) = eligible.iter().find(|c| {
                c.confidence >= config.shortcut_threshold
                    && descriptors
                        .iter()
                        .find(|d| d.name == c.specialist_name)
                        .is_some_and(|d| d.matches_intent(intent))
            }) {
                return VoteResult {
                    winner_text: shortcut.text.clone(),
                    winner_confidence: shortcut.confidence,
                    source: VoteSource::Shortcut(shortcut.specialist_name.clone()),
                    replaced_draft: true,
                    candidates,
                };
            }
        }

        let Some(top) = eligible.first().copied() else {
            return VoteResult {
                winner_text: draft_text.to_string(),
                winner_confidence: draft_confidence,
                source: VoteSource::Draft,
                replaced_draft: false,
                candidates,
            };
        };

        let threshold = top.confidence * (1.0 - config.replace_margin.min(0.99));
        let fusion_group: Vec<&Candidate> = eligible
            .iter()
            .take(config.fusion_topk)
            .filter(|c| c.confidence >= threshold)
            .copied()
            .collect();
        // Within the fusion group (all within `replace_margin` of the top
        // confidence), the longest coherent response wins, not simply the
        // highest-confidence one.
        let best = fusion_group
            .iter()
            .max_by_key(|c| c.text.chars().count())
            .copied()
            .unwrap_or(top);

        if best.confidence >= draft_confidence + config.replace_margin {
            let names = fusion_group.iter().map(|c| c.specialist_name.clone()).collect();
            VoteResult {
                winner_text: best.text.clone(),
                winner_confidence: best.confidence,
                source: VoteSource::Fusion(names),
                replaced_draft: true,
                candidates,
            }
        } else {
            VoteResult {
                winner_text: draft_text.to_string(),
                winner_confidence: draft_confidence,
                source: VoteSource::Draft,
                replaced_draft: false,
                candidates,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_panel(
        &self,
        registry: &ProviderRegistry,
        budget: &BudgetGuard,
        session_id: &str,
        prompt: &str,
        descriptors: &[SpecialistDescriptor],
        dominant_intent: Option<&str>,
        config: &VotingConfig,
        cancel: &CancellationToken,
    ) -> Vec<Candidate> {
        let futures = descriptors.iter().map(|descriptor| {
            self.runner
                .run(registry, budget, session_id, descriptor, prompt, dominant_intent, cancel)
        });

        match tokio::time::timeout(config.deadline, futures::future::join_all(futures)).await {
            Ok(candidates) => candidates,
            Err(_) => {
                cancel.cancel();
                descriptors
                    .iter()
                    .map(|d| Candidate::timed_out(&d.name, d.priority))
                    .collect()
            }
        }
    }
}

impl Default for VotingEngine {
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
    use std::time::Duration;

    fn descriptor(name: &str, priority: i32) -> SpecialistDescriptor {
        SpecialistDescriptor {
            name: name.to_string(),
            domain_tags: vec![name.to_string()],
            provider_ref: "local".to_string(),
            token_cap: 160,
            timeout: Duration::from_secs(4),
            temperature: 0.2,
            priority,
        }
    }

    async fn registry() -> ProviderRegistry {
        ProviderRegistry::builder()
            .register(Arc::new(MockProvider::new("local")))
            .build()
            .await
    }

    #[tokio::test]
    async fn strong_specialist_replaces_weak_draft() {
        let registry = registry().await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let cancel = CancellationToken::new();
        let descriptors = vec![descriptor("math", 0)];
        let result = VotingEngine::new()
            .vote(
                &registry,
                &budget,
                "s1",
                "what is 12 + 30?",
                &descriptors,
                Some("math"),
                "draft filler text",
                0.1,
                &VotingConfig::default(),
                &cancel,
            )
            .await;
        assert!(result.replaced_draft);
        assert!(result.winner_text.contains("42"));
    }

    #[tokio::test]
    async fn weak_margin_keeps_draft() {
        let registry = registry().await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let cancel = CancellationToken::new();
        let descriptors = vec![descriptor("knowledge", 0)];
        let result = VotingEngine::new()
            .vote(
                &registry,
                &budget,
                "s1",
                "Explain HTTP/3 briefly please",
                &descriptors,
                None,
                "a strong pre-existing draft answer with high confidence already",
                0.95,
                &VotingConfig::default(),
                &cancel,
            )
            .await;
        assert_eq!(result.source, VoteSource::Draft);
        assert!(!result.replaced_draft);
    }

    #[tokio::test]
    async fn fusion_prefers_longest_candidate_within_margin() {
        struct FixedProvider {
            name: String,
            text: String,
            confidence: f64,
        }
        #[async_trait::async_trait]
        impl crate::provider::Provider for FixedProvider {
            fn name(&self) -> &str {
                &self.name
            }
            async fn generate(
                &self,
                _prompt: &str,
                _opts: &crate::provider::GenOpts,
            ) -> Result<crate::provider::GenerationResult, crate::provider::ProviderError> {
                Ok(crate::provider::GenerationResult {
                    text: self.text.clone(),
                    tokens_in: 5,
                    tokens_out: 20,
                    cost_usd: 0.0,
                    first_token_latency_ms: 1,
                    total_latency_ms: 1,
                    truncated: false,
                    provider_meta: serde_json::json!({ "confidence": self.confidence }),
                })
            }
            fn cost_estimate(&self, _opts: &crate::provider::GenOpts) -> f64 {
                0.0
            }
        }

        let registry = ProviderRegistry::builder()
            .register(Arc::new(FixedProvider {
                name: "short".to_string(),
                text: "A brief answer that clears the stub filter easily".to_string(),
                confidence: 0.9,
            }))
            .register(Arc::new(FixedProvider {
                name: "long".to_string(),
                text: "A considerably longer and more thorough answer that covers the question in more depth and detail"
                    .to_string(),
                confidence: 0.85,
            }))
            .build()
            .await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let cancel = CancellationToken::new();
        let descriptors = vec![
            {
                let mut d = descriptor("short", 0);
                d.provider_ref = "short".to_string();
                d
            },
            {
                let mut d = descriptor("long", 1);
                d.provider_ref = "long".to_string();
                d
            },
        ];
        let config = VotingConfig {
            fusion_topk: 2,
            replace_margin: 0.2,
            ..VotingConfig::default()
        };
        let result = VotingEngine::new()
            .vote(&registry, &budget, "s1", "explain this", &descriptors, None, "a weak draft", 0.1, &config, &cancel)
            .await;
        assert!(result.replaced_draft);
        assert!(result.winner_text.contains("considerably longer"));
    }

    #[tokio::test]
    async fn no_eligible_candidates_falls_back_to_draft() {
        struct DownProvider;
        #[async_trait::async_trait]
        impl crate::provider::Provider for DownProvider {
            fn name(&self) -> &str {
                "local"
            }
            async fn generate(
                &self,
                _p: &str,
                _o: &crate::provider::GenOpts,
            ) -> Result<crate::provider::GenerationResult, crate::provider::ProviderError> {
                Err(crate::provider::ProviderError::ProviderDown("local".into()))
            }
            fn cost_estimate(&self, _o: &crate::provider::GenOpts) -> f64 {
                0.0
            }
            async fn health(&self) -> crate::provider::Health {
                crate::provider::Health::Down
            }
        }
        let registry = ProviderRegistry::builder().register(Arc::new(DownProvider)).build().await;
        let budget = BudgetGuard::new(BudgetConfig::default());
        let cancel = CancellationToken::new();
        let descriptors = vec![descriptor("math", 0)];
        let result = VotingEngine::new()
            .vote(
                &registry,
                &budget,
                "s1",
                "2+2",
                &descriptors,
                Some("math"),
                "draft",
                0.2,
                &VotingConfig::default(),
                &cancel,
            )
            .await;
        assert_eq!(result.source, VoteSource::Draft);
        assert!(result.candidates.iter().all(|c| !c.is_winner_eligible()));
    }
}
