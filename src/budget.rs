//! BudgetGuard: enforces per-request, per-session, and process-wide daily
//! cost caps.
//!
//! Caller-supplied: every cost this module sees comes in as a plain `f64`
//! from `Provider::cost_estimate`/`GenerationResult::cost_usd` by way of
//! `ProviderRegistry::generate` — `pricing::calculate_cost` is a provider's
//! concern, not this guard's. Locking follows the teacher's
//! `SharedContextState` (`Arc<Mutex<T>>`, single lock, read-modify-write)
//! discipline exactly.

use crate::config::BudgetConfig;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Read-only view of the current budget window (spec.md §3).
#[derive(Debug, Clone)]
pub struct BudgetSnapshot {
    /// Process-wide spend in the current window.
    pub daily_spent_usd: f64,
    /// Sum of spend across all sessions tracked in the current window.
    pub session_spent_usd: f64,
    pub request_tokens: u64,
    pub started_at: DateTime<Utc>,
}

struct Inner {
    daily_spent_usd: f64,
    session_spent: HashMap<String, f64>,
    request_tokens: u64,
    window_start: DateTime<Utc>,
}

/// Three-tier cost guard: per-request cap, per-session cap, process-wide
/// daily cap. Resets at a configured UTC wall-clock boundary (spec.md
/// §4.4).
pub struct BudgetGuard {
    config: BudgetConfig,
    inner: Mutex<Inner>,
    /// Set by HealthMonitor when `BudgetBreach` turns critical (spec.md
    /// §4.8); consulted by the Orchestrator before routing to a paid
    /// provider.
    paid_disabled: AtomicBool,
}

fn parse_reset_time(reset_utc: &str) -> NaiveTime {
    NaiveTime::parse_from_str(reset_utc, "%H:%M").unwrap_or_else(|_| {
        NaiveTime::from_hms_opt(0, 0, 0).expect("midnight is always valid")
    })
}

fn window_start_at(now: DateTime<Utc>, reset_utc: &str) -> DateTime<Utc> {
    let reset_time = parse_reset_time(reset_utc);
    let today_reset = now.date_naive().and_time(reset_time).and_utc();
    if now >= today_reset {
        today_reset
    } else {
        (now.date_naive() - chrono::Duration::days(1))
            .and_time(reset_time)
            .and_utc()
    }
}

impl BudgetGuard {
    pub fn new(config: BudgetConfig) -> Self {
        let now = Utc::now();
        let window_start = window_start_at(now, &config.reset_utc);
        Self {
            config,
            inner: Mutex::new(Inner {
                daily_spent_usd: 0.0,
                session_spent: HashMap::new(),
                request_tokens: 0,
                window_start,
            }),
            paid_disabled: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn roll_window_if_needed(&self, inner: &mut Inner) {
        let current = window_start_at(Utc::now(), &self.config.reset_utc);
        if current != inner.window_start {
            inner.window_start = current;
            inner.daily_spent_usd = 0.0;
            inner.session_spent.clear();
            self.paid_disabled.store(false, Ordering::SeqCst);
        }
    }

    /// Check whether `estimated_cost` for `session_id` would exceed any of
    /// the three budget tiers. Returns `BudgetExceeded` on denial.
    pub fn authorise(&self, session_id: &str, estimated_cost: f64) -> EngineResult<()> {
        let mut inner = self.lock();
        self.roll_window_if_needed(&mut inner);

        if estimated_cost > self.config.per_request_usd {
            return Err(EngineError::BudgetExceeded(format!(
                "estimated cost {estimated_cost:.4} exceeds per-request cap {:.4}",
                self.config.per_request_usd
            )));
        }

        let session_spent = inner.session_spent.get(session_id).copied().unwrap_or(0.0);
        if session_spent + estimated_cost > self.config.session_usd {
            return Err(EngineError::BudgetExceeded(format!(
                "session spend {session_spent:.4} + {estimated_cost:.4} exceeds session cap {:.4}",
                self.config.session_usd
            )));
        }

        if inner.daily_spent_usd + estimated_cost > self.config.daily_usd {
            return Err(EngineError::BudgetExceeded(format!(
                "daily spend {:.4} + {estimated_cost:.4} exceeds daily cap {:.4}",
                inner.daily_spent_usd, self.config.daily_usd
            )));
        }

        Ok(())
    }

    /// Record actual cost of a successful generation (spec.md §4.4,
    /// §4.2 "every successful GenerationResult increments BudgetSnapshot
    /// under lock").
    pub fn record(&self, session_id: &str, actual_cost: f64) {
        let mut inner = self.lock();
        self.roll_window_if_needed(&mut inner);
        inner.daily_spent_usd += actual_cost;
        *inner.session_spent.entry(session_id.to_string()).or_insert(0.0) += actual_cost;
    }

    pub fn record_tokens(&self, tokens: u64) {
        let mut inner = self.lock();
        inner.request_tokens += tokens;
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let mut inner = self.lock();
        self.roll_window_if_needed(&mut inner);
        BudgetSnapshot {
            daily_spent_usd: inner.daily_spent_usd,
            session_spent_usd: inner.session_spent.values().sum(),
            request_tokens: inner.request_tokens,
            started_at: inner.window_start,
        }
    }

    pub fn session_spent(&self, session_id: &str) -> f64 {
        let inner = self.lock();
        inner.session_spent.get(session_id).copied().unwrap_or(0.0)
    }

    /// Fraction of the daily cap spent in the current window, for
    /// HealthMonitor's `BudgetBreach` condition.
    pub fn daily_cap_fraction(&self) -> f64 {
        let snapshot = self.snapshot();
        if self.config.daily_usd <= 0.0 {
            0.0
        } else {
            snapshot.daily_spent_usd / self.config.daily_usd
        }
    }

    pub fn disable_paid_providers(&self) {
        self.paid_disabled.store(true, Ordering::SeqCst);
    }

    pub fn paid_disabled(&self) -> bool {
        self.paid_disabled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> BudgetGuard {
        BudgetGuard::new(BudgetConfig {
            per_request_usd: 0.05,
            session_usd: 0.10,
            daily_usd: 0.20,
            reset_utc: "00:00".to_string(),
        })
    }

    #[test]
    fn authorise_denies_over_per_request_cap() {
        let g = guard();
        assert!(g.authorise("s1", 0.06).is_err());
    }

    #[test]
    fn authorise_allows_under_all_caps() {
        let g = guard();
        assert!(g.authorise("s1", 0.03).is_ok());
    }

    #[test]
    fn record_accumulates_daily_and_session_spend() {
        let g = guard();
        g.record("s1", 0.03);
        g.record("s1", 0.03);
        let snap = g.snapshot();
        assert!((snap.daily_spent_usd - 0.06).abs() < 1e-9);
        assert!((g.session_spent("s1") - 0.06).abs() < 1e-9);
    }

    #[test]
    fn authorise_denies_over_session_cap_even_under_daily_cap() {
        let g = guard();
        g.record("s1", 0.08);
        assert!(g.authorise("s1", 0.04).is_err());
    }

    #[test]
    fn authorise_denies_over_daily_cap_across_sessions() {
        let g = guard();
        g.record("s1", 0.10);
        g.record("s2", 0.08);
        assert!(g.authorise("s3", 0.04).is_err());
    }

    #[test]
    fn daily_spent_is_monotonic_within_a_window() {
        let g = guard();
        let mut last = 0.0;
        for _ in 0..3 {
            g.record("s1", 0.01);
            let current = g.snapshot().daily_spent_usd;
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn paid_disabled_flag_round_trips() {
        let g = guard();
        assert!(!g.paid_disabled());
        g.disable_paid_providers();
        assert!(g.paid_disabled());
    }
}
