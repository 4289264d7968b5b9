//! Orchestrator: the front-speaker-with-background-refinement protocol
//! that is the system's user-facing contract.
//!
//! Grounded on the teacher's `main.rs` component wiring (construct once,
//! share via `Arc`, spawn background tasks against a bounded semaphore)
//! and `proxy/mod.rs`'s request-handling skeleton (request in, do work,
//! respond), generalized from "forward HTTP to Anthropic" to "draft, gate,
//! refine".

use crate::budget::BudgetGuard;
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::health::HealthMonitor;
use crate::intent::{IntentClassifier, IntentResult};
use crate::memory::MemoryStore;
use crate::metrics::Metrics;
use crate::provider::{GenOpts, ProviderRegistry};
use crate::session::SessionStore;
use crate::specialist::SpecialistDescriptor;
use crate::summarizer::Summariser;
use crate::tokens::{estimate_tokens, truncate_to_tokens};
use crate::voting::{VoteSource, VotingEngine};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;

/// Deterministic text returned in place of a real draft when Agent-0
/// Generate fails outright (spec.md §7).
const PROVIDER_DOWN_FALLBACK: &str =
    "Sorry, I can't reach the underlying models right now. Here is a placeholder reply while that's resolved.";

/// Deterministic text returned when BudgetGuard denies the draft call
/// (spec.md §7, scenario 5).
const BUDGET_EXHAUSTED_FALLBACK: &str = "Daily budget exhausted; replies will be local-only for the rest of the window.";

/// The fixed greeting rotation (spec.md §4.7 step 1, §9 open question
/// resolved as a static, session-independent rotation).
const GREETINGS: [&str; 5] = [
    "Hello! What can I help you with today?",
    "Hi there. What would you like to know?",
    "Hey! How can I assist?",
    "Good to hear from you — what's on your mind?",
    "Hi. Ask away.",
];

/// The `Draft` half of `Chat`'s return value (spec.md §4.7, §6
/// `draft_complete` event).
#[derive(Debug, Clone)]
pub struct DraftOutcome {
    pub turn_id: u64,
    pub text: String,
    pub confidence: f64,
    pub first_token_ms: u64,
    pub total_ms: u64,
    pub refinement_pending: bool,
}

/// What a background refinement delivers, if anything (spec.md §6
/// `refinement_complete` event).
#[derive(Debug, Clone)]
pub struct RefinementMessage {
    pub final_text: String,
    pub provenance: String,
    pub improved: bool,
    pub confidence: f64,
    pub specialists: Vec<String>,
}

/// Single-shot delivery handle: exactly zero or one `RefinementMessage`,
/// then the channel closes (spec.md §4.7 step 6).
pub struct RefinementHandle {
    rx: Option<oneshot::Receiver<RefinementMessage>>,
    cancel: CancellationToken,
}

impl RefinementHandle {
    fn nil() -> Self {
        Self {
            rx: None,
            cancel: CancellationToken::new(),
        }
    }

    fn spawned(rx: oneshot::Receiver<RefinementMessage>, cancel: CancellationToken) -> Self {
        Self { rx: Some(rx), cancel }
    }

    pub async fn recv(mut self) -> Option<RefinementMessage> {
        match self.rx.take() {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    }

    /// Cancel an in-flight refinement; propagates into VotingEngine's
    /// candidate dispatch (spec.md §4.7 step 6, §5 cancellation).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

fn greeting_for(session_id: &str, turn_count: usize) -> &'static str {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    session_id.hash(&mut hasher);
    turn_count.hash(&mut hasher);
    let index = (hasher.finish() as usize) % GREETINGS.len();
    GREETINGS[index]
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    budget: Arc<BudgetGuard>,
    sessions: Arc<SessionStore>,
    memory: Arc<MemoryStore>,
    intent: Arc<IntentClassifier>,
    voting: Arc<VotingEngine>,
    summariser: Arc<Summariser>,
    metrics: Arc<Metrics>,
    health: Arc<HealthMonitor>,
    descriptors: Arc<Vec<SpecialistDescriptor>>,
    refinement_semaphore: Arc<Semaphore>,
    config: Arc<Config>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        budget: Arc<BudgetGuard>,
        sessions: Arc<SessionStore>,
        memory: Arc<MemoryStore>,
        intent: Arc<IntentClassifier>,
        summariser: Arc<Summariser>,
        metrics: Arc<Metrics>,
        health: Arc<HealthMonitor>,
        descriptors: Vec<SpecialistDescriptor>,
        config: Arc<Config>,
    ) -> Self {
        let concurrency = config.specialist.concurrency;
        Self {
            registry,
            budget,
            sessions,
            memory,
            intent,
            voting: Arc::new(VotingEngine::new()),
            summariser,
            metrics,
            health,
            descriptors: Arc::new(descriptors),
            refinement_semaphore: Arc::new(Semaphore::new(concurrency)),
            config,
        }
    }

    /// `Chat(ctx, prompt, session) -> (Draft, RefinementHandle)` (spec.md §4.7).
    ///
    /// `force_council` is the `hints.force_council` wire option (spec.md
    /// §6): it skips the greeting/short-prompt fast paths and the
    /// confidence gate so the full specialist panel always runs.
    pub async fn chat(&self, session_id: &str, prompt: &str, force_council: bool) -> EngineResult<(DraftOutcome, RefinementHandle)> {
        if prompt.trim().is_empty() {
            return Err(EngineError::InvalidInput("prompt must not be empty".to_string()));
        }

        let _ = self.memory.add(session_id, prompt).await;

        let intent_result = self.intent.classify(prompt);

        if intent_result.is_greeting() && !force_council {
            let turn_count = self.sessions.turn_count(session_id);
            let text = greeting_for(session_id, turn_count).to_string();
            let turn_id = self.sessions.record_turn(session_id, prompt.to_string(), text.clone(), 1.0, estimate_tokens(&text), 0.0);
            let _ = self.memory.add(session_id, &text).await;
            return Ok((
                DraftOutcome {
                    turn_id,
                    text,
                    confidence: 1.0,
                    first_token_ms: 0,
                    total_ms: 0,
                    refinement_pending: false,
                },
                RefinementHandle::nil(),
            ));
        }

        if prompt.chars().count() < 120 && !intent_result.cloud_required && !force_council {
            return self.local_only_turn(session_id, prompt).await;
        }

        self.drafted_with_refinement(session_id, prompt, intent_result, force_council).await
    }

    async fn local_only_turn(&self, session_id: &str, prompt: &str) -> EngineResult<(DraftOutcome, RefinementHandle)> {
        let opts = GenOpts {
            max_tokens: self.config.draft.max_tokens,
            temperature: self.config.draft.temperature,
            timeout: self.config.draft.timeout,
            stop_sequences: Vec::new(),
            stream_sink: None,
        };
        match self.registry.generate(&self.budget, session_id, "local", prompt, &opts).await {
            Ok(result) => {
                self.metrics.record_agent0_latency(result.total_latency_ms);
                self.health.record_draft_latency(result.total_latency_ms);
                let confidence = result.provider_meta.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5);
                let turn_id = self.sessions.record_turn(session_id, prompt.to_string(), result.text.clone(), confidence, result.tokens_out, result.cost_usd);
                let _ = self.memory.add(session_id, &result.text).await;
                Ok((
                    DraftOutcome {
                        turn_id,
                        text: result.text,
                        confidence,
                        first_token_ms: result.first_token_latency_ms,
                        total_ms: result.total_latency_ms,
                        refinement_pending: false,
                    },
                    RefinementHandle::nil(),
                ))
            }
            Err(EngineError::BudgetExceeded(_)) => {
                self.budget.disable_paid_providers();
                let text = BUDGET_EXHAUSTED_FALLBACK.to_string();
                let turn_id = self.sessions.record_turn(session_id, prompt.to_string(), text.clone(), 0.2, estimate_tokens(&text), 0.0);
                let _ = self.memory.add(session_id, &text).await;
                Ok((
                    DraftOutcome {
                        turn_id,
                        text,
                        confidence: 0.2,
                        first_token_ms: 0,
                        total_ms: 0,
                        refinement_pending: false,
                    },
                    RefinementHandle::nil(),
                ))
            }
            Err(_) => {
                let text = PROVIDER_DOWN_FALLBACK.to_string();
                let turn_id = self.sessions.record_turn(session_id, prompt.to_string(), text.clone(), 0.1, estimate_tokens(&text), 0.0);
                let _ = self.memory.add(session_id, &text).await;
                if self.config.refinement.enabled {
                    let intent_result = self.intent.classify(prompt);
                    let handle = self.start_refinement(session_id, prompt, intent_result, turn_id, text.clone(), 0.1);
                    Ok((
                        DraftOutcome {
                            turn_id,
                            text,
                            confidence: 0.1,
                            first_token_ms: 0,
                            total_ms: 0,
                            refinement_pending: true,
                        },
                        handle,
                    ))
                } else {
                    Ok((
                        DraftOutcome {
                            turn_id,
                            text,
                            confidence: 0.1,
                            first_token_ms: 0,
                            total_ms: 0,
                            refinement_pending: false,
                        },
                        RefinementHandle::nil(),
                    ))
                }
            }
        }
    }

    async fn build_context(&self, session_id: &str, prompt: &str) -> String {
        let summary = self.sessions.summary(session_id);
        let query_hits = self.memory.query(session_id, prompt, 3).await.unwrap_or_default();
        let recent = self.memory.recent(session_id, 3);

        let mut parts = Vec::new();
        if !summary.is_empty() {
            parts.push(format!("Summary: {summary}"));
        }
        if !query_hits.is_empty() {
            let joined = query_hits.iter().map(|e| e.text.as_str()).collect::<Vec<_>>().join(" | ");
            parts.push(format!("Relevant: {joined}"));
        }
        if !recent.is_empty() {
            let joined = recent.iter().map(|e| e.text.as_str()).collect::<Vec<_>>().join(" | ");
            parts.push(format!("Recent: {joined}"));
        }
        let context = parts.join("\n");
        if estimate_tokens(&context) > 400 {
            truncate_to_tokens(&context, 400).to_string()
        } else {
            context
        }
    }

    async fn drafted_with_refinement(
        &self,
        session_id: &str,
        prompt: &str,
        intent_result: IntentResult,
        force_council: bool,
    ) -> EngineResult<(DraftOutcome, RefinementHandle)> {
        let context = self.build_context(session_id, prompt).await;
        let enhanced_prompt = if context.is_empty() {
            prompt.to_string()
        } else {
            format!("{context}\n\n{prompt}")
        };

        let opts = GenOpts {
            max_tokens: self.config.draft.max_tokens,
            temperature: self.config.draft.temperature,
            timeout: self.config.draft.timeout,
            stop_sequences: Vec::new(),
            stream_sink: None,
        };

        // (text, confidence, turn_id, first_token_ms, total_ms, budget_exceeded)
        let (text, confidence, turn_id, first_token_ms, total_ms, budget_exceeded) =
            match self.registry.generate(&self.budget, session_id, "local", &enhanced_prompt, &opts).await {
                Ok(result) => {
                    self.metrics.record_agent0_latency(result.total_latency_ms);
                    self.health.record_draft_latency(result.total_latency_ms);
                    let confidence = result.provider_meta.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5);
                    let turn_id =
                        self.sessions.record_turn(session_id, prompt.to_string(), result.text.clone(), confidence, result.tokens_out, result.cost_usd);
                    (result.text, confidence, turn_id, result.first_token_latency_ms, result.total_latency_ms, false)
                }
                Err(EngineError::BudgetExceeded(_)) => {
                    self.budget.disable_paid_providers();
                    let text = BUDGET_EXHAUSTED_FALLBACK.to_string();
                    let turn_id = self.sessions.record_turn(session_id, prompt.to_string(), text.clone(), 0.2, estimate_tokens(&text), 0.0);
                    (text, 0.2, turn_id, 0, 0, true)
                }
                Err(_) => {
                    let text = PROVIDER_DOWN_FALLBACK.to_string();
                    let turn_id = self.sessions.record_turn(session_id, prompt.to_string(), text.clone(), 0.1, estimate_tokens(&text), 0.0);
                    (text, 0.1, turn_id, 0, 0, false)
                }
            };

        // BudgetExceeded always disables refinement for this prompt; a
        // forced-council hint never overrides it. Otherwise a provider
        // failure's low confidence naturally clears the gate below, and
        // force_council bypasses the gate outright (spec.md §6, §7).
        let skip_refinement = if budget_exceeded {
            true
        } else if force_council {
            false
        } else {
            confidence >= self.config.draft.confidence_gate && !intent_result.cloud_required
        };

        if skip_refinement || !self.config.refinement.enabled {
            self.metrics.incr_refinement_skipped();
            let _ = self.memory.add(session_id, &text).await;
            return Ok((
                DraftOutcome {
                    turn_id,
                    text,
                    confidence,
                    first_token_ms,
                    total_ms,
                    refinement_pending: false,
                },
                RefinementHandle::nil(),
            ));
        }

        let handle = self.start_refinement(session_id, prompt, intent_result, turn_id, text.clone(), confidence);

        Ok((
            DraftOutcome {
                turn_id,
                text,
                confidence,
                first_token_ms,
                total_ms,
                refinement_pending: true,
            },
            handle,
        ))
    }

    /// Spawn a background refinement round and wrap it in a `RefinementHandle`.
    fn start_refinement(
        &self,
        session_id: &str,
        prompt: &str,
        intent_result: IntentResult,
        turn_id: u64,
        draft_text: String,
        draft_confidence: f64,
    ) -> RefinementHandle {
        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        self.spawn_refinement(session_id.to_string(), prompt.to_string(), intent_result, turn_id, draft_text, draft_confidence, tx, cancel.clone());
        RefinementHandle::spawned(rx, cancel)
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_refinement(
        &self,
        session_id: String,
        prompt: String,
        intent_result: crate::intent::IntentResult,
        turn_id: u64,
        draft_text: String,
        draft_confidence: f64,
        tx: oneshot::Sender<RefinementMessage>,
        cancel: CancellationToken,
    ) {
        let registry = self.registry.clone();
        let budget = self.budget.clone();
        let sessions = self.sessions.clone();
        let memory = self.memory.clone();
        let voting = self.voting.clone();
        let summariser = self.summariser.clone();
        let metrics = self.metrics.clone();
        let descriptors = self.descriptors.clone();
        let semaphore = self.refinement_semaphore.clone();
        let refinement_cfg = self.config.refinement.clone();
        let mut voting_cfg = self.config.voting.clone();
        voting_cfg.deadline = refinement_cfg.deadline;

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                let _ = memory.add(&session_id, &draft_text).await;
                return;
            };
            if cancel.is_cancelled() {
                metrics.incr_refinement_skipped();
                let _ = memory.add(&session_id, &draft_text).await;
                return;
            }

            let mut selected: Vec<SpecialistDescriptor> = intent_result
                .scores
                .iter()
                .filter(|s| s.confidence >= refinement_cfg.intent_confidence_floor)
                .filter_map(|s| descriptors.iter().find(|d| d.name == s.specialist_name).cloned())
                .collect();
            selected.truncate(refinement_cfg.max_specialists);

            let dominant_intent = intent_result.top().map(|s| s.specialist_name.as_str());

            let vote_result = voting
                .vote(&registry, &budget, &session_id, &prompt, &selected, dominant_intent, &draft_text, draft_confidence, &voting_cfg, &cancel)
                .await;

            for candidate in &vote_result.candidates {
                metrics.record_specialist_latency(&candidate.specialist_name, candidate.latency_ms);
                if candidate.status == crate::specialist::CandidateStatus::StubFiltered {
                    metrics.incr_candidates_stub_filtered();
                }
            }

            if cancel.is_cancelled() {
                metrics.incr_refinement_skipped();
                let _ = memory.add(&session_id, &draft_text).await;
                return;
            }

            let materially_different = normalize_whitespace(&vote_result.winner_text) != normalize_whitespace(&draft_text);
            let replaced = vote_result.replaced_draft && materially_different;
            if !replaced {
                metrics.incr_refinement_skipped();
                let _ = memory.add(&session_id, &draft_text).await;
                return;
            }

            let provenance = match &vote_result.source {
                VoteSource::Draft => "agent0".to_string(),
                VoteSource::Shortcut(name) => name.clone(),
                VoteSource::Fusion(names) => format!("fused:{}", names.join(",")),
            };
            let specialists = match &vote_result.source {
                VoteSource::Draft => Vec::new(),
                VoteSource::Shortcut(name) => vec![name.clone()],
                VoteSource::Fusion(names) => names.clone(),
            };

            if sessions
                .apply_refinement(&session_id, turn_id, vote_result.winner_text.clone(), provenance.clone(), vote_result.winner_confidence)
                .is_err()
            {
                let _ = memory.add(&session_id, &draft_text).await;
                return;
            }
            let _ = memory.add(&session_id, &vote_result.winner_text).await;
            summariser.refresh(&sessions, &session_id, 10);
            metrics.incr_refinement_improved();

            let _ = tx.send(RefinementMessage {
                final_text: vote_result.winner_text,
                provenance,
                improved: true,
                confidence: vote_result.winner_confidence,
                specialists,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BudgetConfig, HealthConfig, MemoryConfig};
    use crate::intent::IntentConfig;
    use crate::memory::embedder::HashingEmbedder;
    use crate::provider::mock::MockProvider;

    async fn orchestrator(dir: &std::path::Path) -> Orchestrator {
        let registry = Arc::new(
            ProviderRegistry::builder()
                .register(Arc::new(MockProvider::new("local")))
                .build()
                .await,
        );
        let budget = Arc::new(BudgetGuard::new(BudgetConfig::default()));
        let sessions = Arc::new(SessionStore::new(std::time::Duration::from_secs(3600)));
        let memory = MemoryStore::new(
            MemoryConfig::default(),
            std::time::Duration::from_millis(50),
            Arc::new(HashingEmbedder::default()),
            dir.join("memory.jsonl"),
        );
        let intent = Arc::new(IntentClassifier::new(&IntentConfig::default()));
        let summariser = Arc::new(Summariser::new());
        let metrics = Arc::new(Metrics::new());
        let health = Arc::new(HealthMonitor::new(HealthConfig::default()));
        let config = Arc::new(Config::default());
        let descriptors = config
            .specialists
            .iter()
            .map(|d| SpecialistDescriptor::from_config(d, &config.specialist))
            .collect();
        Orchestrator::new(registry, budget, sessions, memory, intent, summariser, metrics, health, descriptors, config)
    }

    #[tokio::test]
    async fn greeting_returns_nil_handle_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path()).await;
        let (draft, handle) = orch.chat("s1", "hi", false).await.unwrap();
        assert!(!draft.refinement_pending);
        assert!(handle.recv().await.is_none());
    }

    #[tokio::test]
    async fn short_prompt_skips_refinement() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path()).await;
        let (draft, handle) = orch.chat("s1", "What is 2+2?", false).await.unwrap();
        assert!(!draft.refinement_pending);
        assert!(handle.recv().await.is_none());
    }

    #[tokio::test]
    async fn long_low_confidence_prompt_triggers_refinement() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path()).await;
        let long_prompt = "Please provide a thorough and carefully considered explanation covering many aspects of this long and detailed question about distributed systems consistency models";
        let (draft, handle) = orch.chat("s1", long_prompt, false).await.unwrap();
        if draft.refinement_pending {
            let _ = handle.recv().await;
        }
    }

    #[tokio::test]
    async fn empty_prompt_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path()).await;
        let err = orch.chat("s1", "   ", false).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert_eq!(orch.memory.entry_count("s1"), 0);
    }

    #[tokio::test]
    async fn user_prompt_and_reply_are_both_written_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path()).await;
        let (draft, handle) = orch.chat("s1", "What is 2+2?", false).await.unwrap();
        let _ = handle.recv().await;
        assert_eq!(orch.memory.entry_count("s1"), 2);
        assert!(orch.memory.recent("s1", 2).iter().any(|e| e.text == draft.text));
    }

    #[tokio::test]
    async fn force_council_triggers_refinement_on_short_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path()).await;
        let (draft, handle) = orch.chat("s1", "What is 2+2?", true).await.unwrap();
        assert!(draft.refinement_pending);
        let _ = handle.recv().await;
    }

    #[tokio::test]
    async fn provider_down_yields_fallback_draft_and_triggers_refinement() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            ProviderRegistry::builder()
                .register(Arc::new({
                    let p = MockProvider::new("local");
                    p.set_force_down(true);
                    p
                }))
                .build()
                .await,
        );
        let budget = Arc::new(BudgetGuard::new(BudgetConfig::default()));
        let sessions = Arc::new(SessionStore::new(std::time::Duration::from_secs(3600)));
        let memory = MemoryStore::new(
            MemoryConfig::default(),
            std::time::Duration::from_millis(50),
            Arc::new(HashingEmbedder::default()),
            dir.path().join("memory.jsonl"),
        );
        let intent = Arc::new(IntentClassifier::new(&IntentConfig::default()));
        let summariser = Arc::new(Summariser::new());
        let metrics = Arc::new(Metrics::new());
        let health = Arc::new(HealthMonitor::new(HealthConfig::default()));
        let config = Arc::new(Config::default());
        let descriptors = config
            .specialists
            .iter()
            .map(|d| SpecialistDescriptor::from_config(d, &config.specialist))
            .collect();
        let orch = Orchestrator::new(registry, budget, sessions, memory, intent, summariser, metrics, health, descriptors, config);

        let (draft, handle) = orch.chat("s1", "What is 2+2?", false).await.unwrap();
        assert_eq!(draft.confidence, 0.1);
        assert!(draft.refinement_pending);
        let _ = handle.recv().await;
    }

    #[tokio::test]
    async fn budget_exceeded_disables_refinement_and_paid_providers() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            ProviderRegistry::builder()
                .register(Arc::new(MockProvider::new("local")))
                .build()
                .await,
        );
        let budget = Arc::new(BudgetGuard::new(BudgetConfig {
            per_request_usd: 0.0,
            session_usd: 0.0,
            daily_usd: 0.0,
            reset_utc: "00:00".to_string(),
        }));
        let sessions = Arc::new(SessionStore::new(std::time::Duration::from_secs(3600)));
        let memory = MemoryStore::new(
            MemoryConfig::default(),
            std::time::Duration::from_millis(50),
            Arc::new(HashingEmbedder::default()),
            dir.path().join("memory.jsonl"),
        );
        let intent = Arc::new(IntentClassifier::new(&IntentConfig::default()));
        let summariser = Arc::new(Summariser::new());
        let metrics = Arc::new(Metrics::new());
        let health = Arc::new(HealthMonitor::new(HealthConfig::default()));
        let config = Arc::new(Config::default());
        let descriptors = config
            .specialists
            .iter()
            .map(|d| SpecialistDescriptor::from_config(d, &config.specialist))
            .collect();
        let orch = Orchestrator::new(registry, budget, sessions, memory, intent, summariser, metrics, health, descriptors, config);

        let (draft, handle) = orch.chat("s1", "What is 2+2?", false).await.unwrap();
        assert!(!draft.refinement_pending);
        assert!(handle.recv().await.is_none());
        assert!(orch.budget.paid_disabled());
    }
}
