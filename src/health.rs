//! HealthMonitor: rolling aggregates over recent activity, exposed as a
//! small set of named conditions for the health/metrics endpoints.
//!
//! Grounded on the teacher's `events::Stats` shape (plain counters behind
//! a lock, accumulate-then-derive) generalized from "proxy traffic
//! counters" to "named health conditions", and `proxy/sessions.rs`'s
//! idle/cleanup periodic-tick pattern for the sampling cadence.

use crate::budget::BudgetGuard;
use crate::config::HealthConfig;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One of HealthMonitor's four tracked conditions (spec.md §4.8).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warn,
    Critical,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConditionStatus {
    pub name: &'static str,
    pub severity: Severity,
    pub detail: String,
}

struct Inner {
    /// Most recent draft-call latencies, for p95 estimation.
    draft_latencies_ms: VecDeque<u64>,
    /// Most recent reported upstream GPU/CPU utilization samples.
    upstream_util_pct: VecDeque<f64>,
    pending_queue_depth: usize,
}

const WINDOW: usize = 256;

/// Aggregates samples fed by the orchestrator/provider layer and derives
/// four named conditions on demand (spec.md §4.8): `UpstreamCPU`,
/// `DraftLatency`, `BudgetBreach`, `WriteBehindBacklog`.
pub struct HealthMonitor {
    config: HealthConfig,
    inner: Mutex<Inner>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                draft_latencies_ms: VecDeque::with_capacity(WINDOW),
                upstream_util_pct: VecDeque::with_capacity(WINDOW),
                pending_queue_depth: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_draft_latency(&self, latency_ms: u64) {
        let mut inner = self.lock();
        push_bounded(&mut inner.draft_latencies_ms, latency_ms);
    }

    pub fn record_upstream_util(&self, pct: f64) {
        let mut inner = self.lock();
        push_bounded(&mut inner.upstream_util_pct, pct);
    }

    pub fn set_pending_queue_depth(&self, depth: usize) {
        self.lock().pending_queue_depth = depth;
    }

    fn draft_latency_p95(&self) -> Option<u64> {
        let inner = self.lock();
        percentile(&inner.draft_latencies_ms, 0.95)
    }

    fn upstream_util_avg(&self) -> Option<f64> {
        let inner = self.lock();
        if inner.upstream_util_pct.is_empty() {
            None
        } else {
            Some(inner.upstream_util_pct.iter().sum::<f64>() / inner.upstream_util_pct.len() as f64)
        }
    }

    /// Evaluate all four conditions. `budget` is consulted for the
    /// `BudgetBreach` condition and is told to disable paid providers when
    /// the breach turns critical (spec.md §4.8).
    pub fn evaluate(&self, budget: &BudgetGuard, write_behind_drops: u64) -> Vec<ConditionStatus> {
        let pending = self.lock().pending_queue_depth;

        let upstream = match self.upstream_util_avg() {
            Some(avg) if avg < self.config.gpu_low_util_pct => ConditionStatus {
                name: "UpstreamCPU",
                severity: Severity::Warn,
                detail: format!("average upstream utilization {avg:.1}% below floor {:.1}%", self.config.gpu_low_util_pct),
            },
            Some(avg) => ConditionStatus {
                name: "UpstreamCPU",
                severity: Severity::Ok,
                detail: format!("average upstream utilization {avg:.1}%"),
            },
            None => ConditionStatus {
                name: "UpstreamCPU",
                severity: Severity::Ok,
                detail: "no samples yet".to_string(),
            },
        };

        let draft_latency = match self.draft_latency_p95() {
            Some(p95) if p95 > self.config.draft_latency_p95_ms => ConditionStatus {
                name: "DraftLatency",
                severity: Severity::Warn,
                detail: format!("p95 draft latency {p95}ms exceeds {}ms", self.config.draft_latency_p95_ms),
            },
            Some(p95) => ConditionStatus {
                name: "DraftLatency",
                severity: Severity::Ok,
                detail: format!("p95 draft latency {p95}ms"),
            },
            None => ConditionStatus {
                name: "DraftLatency",
                severity: Severity::Ok,
                detail: "no samples yet".to_string(),
            },
        };

        let fraction = budget.daily_cap_fraction();
        let budget_breach = if fraction >= 1.0 {
            budget.disable_paid_providers();
            ConditionStatus {
                name: "BudgetBreach",
                severity: Severity::Critical,
                detail: format!("daily spend at {:.0}% of cap", fraction * 100.0),
            }
        } else if fraction >= 0.5 {
            ConditionStatus {
                name: "BudgetBreach",
                severity: Severity::Warn,
                detail: format!("daily spend at {:.0}% of cap", fraction * 100.0),
            }
        } else {
            ConditionStatus {
                name: "BudgetBreach",
                severity: Severity::Ok,
                detail: format!("daily spend at {:.0}% of cap", fraction * 100.0),
            }
        };

        let write_behind = if write_behind_drops > 0 {
            ConditionStatus {
                name: "WriteBehindBacklog",
                severity: Severity::Warn,
                detail: format!("{write_behind_drops} memory entries dropped from write-behind queue"),
            }
        } else if pending > self.config.pending_queue_warn {
            ConditionStatus {
                name: "WriteBehindBacklog",
                severity: Severity::Warn,
                detail: format!("pending queue depth {pending} exceeds {}", self.config.pending_queue_warn),
            }
        } else {
            ConditionStatus {
                name: "WriteBehindBacklog",
                severity: Severity::Ok,
                detail: format!("pending queue depth {pending}"),
            }
        };

        vec![upstream, draft_latency, budget_breach, write_behind]
    }

    /// `true` if every condition is `Ok`, for a compact `/healthz` response.
    pub fn is_fully_healthy(&self, budget: &BudgetGuard, write_behind_drops: u64) -> bool {
        self.evaluate(budget, write_behind_drops)
            .iter()
            .all(|c| c.severity == Severity::Ok)
    }
}

fn push_bounded(deque: &mut VecDeque<u64>, value: u64) {
    if deque.len() == WINDOW {
        deque.pop_front();
    }
    deque.push_back(value);
}

fn percentile(samples: &VecDeque<u64>, p: f64) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<u64> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let index = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BudgetConfig;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(HealthConfig {
            gpu_low_util_pct: 20.0,
            draft_latency_p95_ms: 400,
            pending_queue_warn: 10,
        })
    }

    #[test]
    fn no_samples_reports_ok() {
        let m = monitor();
        let budget = BudgetGuard::new(BudgetConfig::default());
        assert!(m.is_fully_healthy(&budget, 0));
    }

    #[test]
    fn high_draft_latency_warns() {
        let m = monitor();
        for _ in 0..20 {
            m.record_draft_latency(900);
        }
        let budget = BudgetGuard::new(BudgetConfig::default());
        let conditions = m.evaluate(&budget, 0);
        let draft = conditions.iter().find(|c| c.name == "DraftLatency").unwrap();
        assert_eq!(draft.severity, Severity::Warn);
    }

    #[test]
    fn low_upstream_utilization_warns() {
        let m = monitor();
        for _ in 0..10 {
            m.record_upstream_util(5.0);
        }
        let budget = BudgetGuard::new(BudgetConfig::default());
        let conditions = m.evaluate(&budget, 0);
        let upstream = conditions.iter().find(|c| c.name == "UpstreamCPU").unwrap();
        assert_eq!(upstream.severity, Severity::Warn);
    }

    #[test]
    fn budget_breach_critical_disables_paid_providers() {
        let m = monitor();
        let budget = BudgetGuard::new(BudgetConfig {
            per_request_usd: 1.0,
            session_usd: 1.0,
            daily_usd: 1.0,
            reset_utc: "00:00".to_string(),
        });
        budget.record("s1", 1.0);
        let conditions = m.evaluate(&budget, 0);
        let breach = conditions.iter().find(|c| c.name == "BudgetBreach").unwrap();
        assert_eq!(breach.severity, Severity::Critical);
        assert!(budget.paid_disabled());
    }

    #[test]
    fn write_behind_drops_warn() {
        let m = monitor();
        let budget = BudgetGuard::new(BudgetConfig::default());
        let conditions = m.evaluate(&budget, 3);
        let backlog = conditions.iter().find(|c| c.name == "WriteBehindBacklog").unwrap();
        assert_eq!(backlog.severity, Severity::Warn);
    }
}
