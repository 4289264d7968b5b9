//! Deterministic in-process `Provider` implementation.
//!
//! Real inference engines are an out-of-scope external collaborator
//! (spec.md §1): this is the one concrete backend the crate ships, good
//! enough to drive every testable property in spec.md §8 (bounded tokens,
//! truncation, latency, cost). A real cloud/local backend is a drop-in
//! `Provider` impl a caller supplies.

use super::{GenOpts, GenerationResult, Health, Provider, ProviderError};
use crate::tokens::{estimate_tokens, truncate_to_tokens};
use async_trait::async_trait;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

fn arithmetic_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(-?\d+)\s*([+\-*/])\s*(-?\d+)").unwrap())
}

/// A deterministic generator: answers simple arithmetic exactly, otherwise
/// produces a stock acknowledgement whose length scales with the prompt so
/// confidence/length-penalty heuristics have something to bite on.
pub struct MockProvider {
    name: String,
    model_id: String,
    /// Artificial per-call latency, for exercising timeout/health paths in
    /// tests. Deterministic, not random.
    artificial_delay: Duration,
    /// Forces every call to fail with `ProviderError::UpstreamError`, for
    /// exercising SpecialistRunner/VotingEngine error handling.
    force_error: AtomicBool,
    /// Forces `health()` to report `Down`.
    force_down: AtomicBool,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            model_id: "mock-model".to_string(),
            artificial_delay: Duration::ZERO,
            force_error: AtomicBool::new(false),
            force_down: AtomicBool::new(false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.artificial_delay = delay;
        self
    }

    pub fn set_force_error(&self, value: bool) {
        self.force_error.store(value, Ordering::SeqCst);
    }

    pub fn set_force_down(&self, value: bool) {
        self.force_down.store(value, Ordering::SeqCst);
    }

    fn answer_for(&self, prompt: &str) -> (String, f64) {
        if let Some(caps) = arithmetic_pattern().captures(prompt) {
            let a: i64 = caps[1].parse().unwrap_or(0);
            let op = &caps[2];
            let b: i64 = caps[3].parse().unwrap_or(0);
            let result = match op {
                "+" => a.checked_add(b),
                "-" => a.checked_sub(b),
                "*" => a.checked_mul(b),
                "/" if b != 0 => Some(a / b),
                _ => None,
            };
            if let Some(result) = result {
                return (format!("The answer is {result}."), 0.95);
            }
        }

        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return (String::new(), 0.0);
        }

        let words: Vec<&str> = trimmed.split_whitespace().collect();
        let topic = words.iter().take(6).cloned().collect::<Vec<_>>().join(" ");
        let text = format!(
            "Here is a response about \"{topic}\": based on the request, the relevant points are summarized in context."
        );
        let confidence = (0.5 + (words.len() as f64 * 0.01)).min(0.85);
        (text, confidence)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        opts: &GenOpts,
    ) -> Result<GenerationResult, ProviderError> {
        if opts.max_tokens == 0 {
            return Err(ProviderError::InvalidOpts("max_tokens must be > 0".into()));
        }
        if self.force_down.load(Ordering::SeqCst) {
            return Err(ProviderError::ProviderDown(self.name.clone()));
        }
        if self.force_error.load(Ordering::SeqCst) {
            return Err(ProviderError::UpstreamError("simulated upstream failure".into()));
        }

        let start = Instant::now();
        if self.artificial_delay > Duration::ZERO {
            if self.artificial_delay > opts.timeout {
                tokio::time::sleep(opts.timeout + Duration::from_millis(5)).await;
                return Err(ProviderError::Timeout);
            }
            tokio::time::sleep(self.artificial_delay).await;
        }

        let (mut text, confidence) = self.answer_for(prompt);
        let tokens_in = estimate_tokens(prompt);
        let mut truncated = false;
        if estimate_tokens(&text) > opts.max_tokens {
            text = truncate_to_tokens(&text, opts.max_tokens).to_string();
            truncated = true;
        }
        if let Some(sink) = &opts.stream_sink {
            let _ = sink.send(text.clone()).await;
        }
        let tokens_out = estimate_tokens(&text);
        let cost_usd = crate::pricing::calculate_cost(&self.model_id, tokens_in, tokens_out, 0, 0);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        Ok(GenerationResult {
            text,
            tokens_in,
            tokens_out,
            cost_usd,
            first_token_latency_ms: elapsed_ms,
            total_latency_ms: elapsed_ms,
            truncated,
            provider_meta: serde_json::json!({ "confidence": confidence, "model": self.model_id }),
        })
    }

    fn cost_estimate(&self, opts: &GenOpts) -> f64 {
        crate::pricing::calculate_cost(&self.model_id, 32, opts.max_tokens, 0, 0)
    }

    async fn health(&self) -> Health {
        if self.force_down.load(Ordering::SeqCst) {
            Health::Down
        } else {
            Health::Healthy
        }
    }

    async fn preload(&self) {
        let _ = self.answer_for("warmup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_simple_arithmetic() {
        let provider = MockProvider::new("local");
        let result = provider
            .generate("what is 2+2?", &GenOpts::default())
            .await
            .unwrap();
        assert!(result.text.contains('4'));
    }

    #[tokio::test]
    async fn truncates_to_max_tokens() {
        let provider = MockProvider::new("local");
        let opts = GenOpts {
            max_tokens: 2,
            ..GenOpts::default()
        };
        let result = provider
            .generate("Explain HTTP/3 in two sentences please and thank you", &opts)
            .await
            .unwrap();
        assert!(result.tokens_out <= 2);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn forced_error_surfaces_as_upstream_error() {
        let provider = MockProvider::new("local");
        provider.set_force_error(true);
        let result = provider.generate("hello", &GenOpts::default()).await;
        assert!(matches!(result, Err(ProviderError::UpstreamError(_))));
    }

    #[tokio::test]
    async fn delay_beyond_timeout_yields_timeout_error() {
        let provider = MockProvider::new("local").with_delay(Duration::from_millis(50));
        let opts = GenOpts {
            timeout: Duration::from_millis(10),
            ..GenOpts::default()
        };
        let result = provider.generate("hello", &opts).await;
        assert!(matches!(result, Err(ProviderError::Timeout)));
    }

    #[tokio::test]
    async fn forced_down_reports_down_health() {
        let provider = MockProvider::new("local");
        provider.set_force_down(true);
        assert_eq!(provider.health().await, Health::Down);
    }
}
