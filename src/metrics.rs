//! Process-wide counters/gauges exposed at `GET /metrics` (spec.md §6).
//!
//! Grounded on the teacher's `events::Stats` shape: a plain struct of
//! counters behind a lock, accumulated in place and read out as a
//! snapshot, rather than pulling in a metrics-registry crate (no
//! Prometheus exporter is wired here; spec.md's Non-goals exclude a
//! full metrics backend, but the counters themselves are ambient).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const LATENCY_WINDOW: usize = 256;

struct LatencySeries {
    samples: VecDeque<u64>,
}

impl LatencySeries {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    fn push(&mut self, value_ms: u64) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(value_ms);
    }

    fn avg(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
        }
    }
}

/// A point-in-time rendering of every tracked metric, serializable for the
/// `/metrics` JSON response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub agent0_latency_ms_avg: f64,
    pub specialist_latency_ms_avg: HashMap<String, f64>,
    pub budget_spent_usd_day: f64,
    pub memory_pending_queue: u64,
    pub refinement_improved_total: u64,
    pub refinement_skipped_total: u64,
    pub candidates_stub_filtered_total: u64,
    pub provider_health: HashMap<String, String>,
}

pub struct Metrics {
    agent0_latency: Mutex<LatencySeries>,
    specialist_latency: Mutex<HashMap<String, LatencySeries>>,
    memory_pending_queue: AtomicU64,
    refinement_improved_total: AtomicU64,
    refinement_skipped_total: AtomicU64,
    candidates_stub_filtered_total: AtomicU64,
    provider_health: Mutex<HashMap<String, String>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            agent0_latency: Mutex::new(LatencySeries::new()),
            specialist_latency: Mutex::new(HashMap::new()),
            memory_pending_queue: AtomicU64::new(0),
            refinement_improved_total: AtomicU64::new(0),
            refinement_skipped_total: AtomicU64::new(0),
            candidates_stub_filtered_total: AtomicU64::new(0),
            provider_health: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_agent0_latency(&self, latency_ms: u64) {
        self.agent0_latency
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(latency_ms);
    }

    pub fn record_specialist_latency(&self, name: &str, latency_ms: u64) {
        let mut map = self.specialist_latency.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(name.to_string()).or_insert_with(LatencySeries::new).push(latency_ms);
    }

    pub fn set_memory_pending_queue(&self, depth: u64) {
        self.memory_pending_queue.store(depth, Ordering::SeqCst);
    }

    pub fn incr_refinement_improved(&self) {
        self.refinement_improved_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_refinement_skipped(&self) {
        self.refinement_skipped_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_candidates_stub_filtered(&self) {
        self.candidates_stub_filtered_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_provider_health(&self, name: &str, health: impl ToString) {
        let mut map = self.provider_health.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(name.to_string(), health.to_string());
    }

    pub fn snapshot(&self, budget_spent_usd_day: f64) -> MetricsSnapshot {
        let specialist_latency_ms_avg = self
            .specialist_latency
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, series)| (name.clone(), series.avg()))
            .collect();

        MetricsSnapshot {
            agent0_latency_ms_avg: self.agent0_latency.lock().unwrap_or_else(|e| e.into_inner()).avg(),
            specialist_latency_ms_avg,
            budget_spent_usd_day,
            memory_pending_queue: self.memory_pending_queue.load(Ordering::SeqCst),
            refinement_improved_total: self.refinement_improved_total.load(Ordering::SeqCst),
            refinement_skipped_total: self.refinement_skipped_total.load(Ordering::SeqCst),
            candidates_stub_filtered_total: self.candidates_stub_filtered_total.load(Ordering::SeqCst),
            provider_health: self.provider_health.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_average_reflects_recorded_samples() {
        let metrics = Metrics::new();
        metrics.record_agent0_latency(100);
        metrics.record_agent0_latency(200);
        let snap = metrics.snapshot(0.0);
        assert!((snap.agent0_latency_ms_avg - 150.0).abs() < 1e-9);
    }

    #[test]
    fn specialist_latency_is_tracked_per_name() {
        let metrics = Metrics::new();
        metrics.record_specialist_latency("math", 50);
        metrics.record_specialist_latency("code", 150);
        let snap = metrics.snapshot(0.0);
        assert_eq!(snap.specialist_latency_ms_avg.get("math"), Some(&50.0));
        assert_eq!(snap.specialist_latency_ms_avg.get("code"), Some(&150.0));
    }

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.incr_refinement_improved();
        metrics.incr_refinement_improved();
        metrics.incr_refinement_skipped();
        metrics.incr_candidates_stub_filtered();
        let snap = metrics.snapshot(0.0);
        assert_eq!(snap.refinement_improved_total, 2);
        assert_eq!(snap.refinement_skipped_total, 1);
        assert_eq!(snap.candidates_stub_filtered_total, 1);
    }

    #[test]
    fn provider_health_round_trips() {
        let metrics = Metrics::new();
        metrics.record_provider_health("local", "healthy");
        let snap = metrics.snapshot(0.0);
        assert_eq!(snap.provider_health.get("local").map(String::as_str), Some("healthy"));
    }
}
