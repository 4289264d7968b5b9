//! Session/Turn data model and in-memory session store.
//!
//! A `Session` is identified by an opaque string and owns an append-only
//! log of `Turn`s plus a short rolling summary. Grounded on the proxy's
//! `Session`/`SessionManager` (idle timeout, bounded in-memory map,
//! archive-on-supersede) minus the hook/warmup/todo-interception machinery
//! that has no counterpart here — callers always supply a session_id.

use crate::error::{EngineError, EngineResult};
use crate::tokens::estimate_tokens;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Max tokens a rolling session summary may hold (spec.md §3).
pub const SUMMARY_TOKEN_CAP: u32 = 80;

/// One prompt/response pair within a session.
#[derive(Debug, Clone)]
pub struct Turn {
    pub turn_id: u64,
    pub prompt_text: String,
    pub draft_text: String,
    pub final_text: String,
    /// Who produced `final_text`: "agent0", a specialist name, or "fused".
    pub provenance: String,
    pub confidence: f64,
    pub tokens: u32,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
    refined: bool,
}

impl Turn {
    fn new(
        turn_id: u64,
        prompt_text: String,
        draft_text: String,
        confidence: f64,
        tokens: u32,
        cost_usd: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            turn_id,
            prompt_text,
            final_text: draft_text.clone(),
            draft_text,
            provenance: "agent0".to_string(),
            confidence,
            tokens,
            cost_usd,
            created_at,
            refined: false,
        }
    }

    /// Replace `final_text` exactly once, as a successful refinement
    /// (spec.md §3 invariant: "final_text equals draft_text unless exactly
    /// one refinement has replaced it").
    pub fn apply_refinement(
        &mut self,
        final_text: String,
        provenance: String,
        confidence: f64,
    ) -> EngineResult<()> {
        if self.refined {
            return Err(EngineError::Internal(format!(
                "turn {} already refined",
                self.turn_id
            )));
        }
        self.final_text = final_text;
        self.provenance = provenance;
        self.confidence = confidence;
        self.refined = true;
        Ok(())
    }

    pub fn is_refined(&self) -> bool {
        self.refined
    }
}

/// One session's append-only turn log plus rolling summary.
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    pub turns: Vec<Turn>,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    next_turn_id: u64,
}

impl Session {
    fn new(session_id: String, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            turns: Vec::new(),
            summary: String::new(),
            created_at: now,
            last_active: now,
            next_turn_id: 0,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active = now;
    }

    fn is_idle(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.last_active > ttl,
            Err(_) => false,
        }
    }

    fn recent(&self, n: usize) -> Vec<Turn> {
        let len = self.turns.len();
        let start = len.saturating_sub(n);
        self.turns[start..].to_vec()
    }
}

/// In-memory, idle-GC'd map of session_id -> Session.
///
/// A session-keyed mutex would reduce contention, but the teacher's own
/// `SessionManager` locks the whole map for every mutation; this core keeps
/// that same coarse discipline since sessions are low-cardinality relative
/// to request rate.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a new Turn for `session_id`, creating the session on first
    /// use. Returns the assigned `turn_id`.
    pub fn record_turn(
        &self,
        session_id: &str,
        prompt_text: String,
        draft_text: String,
        confidence: f64,
        tokens: u32,
        cost_usd: f64,
    ) -> u64 {
        let now = Utc::now();
        let mut sessions = self.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id.to_string(), now));
        let turn_id = session.next_turn_id;
        session.next_turn_id += 1;
        session.turns.push(Turn::new(
            turn_id, prompt_text, draft_text, confidence, tokens, cost_usd, now,
        ));
        session.touch(now);
        turn_id
    }

    /// Apply a refinement to a previously recorded Turn.
    pub fn apply_refinement(
        &self,
        session_id: &str,
        turn_id: u64,
        final_text: String,
        provenance: String,
        confidence: f64,
    ) -> EngineResult<()> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(session_id).ok_or_else(|| {
            EngineError::Internal(format!("unknown session {session_id}"))
        })?;
        let turn = session
            .turns
            .iter_mut()
            .find(|t| t.turn_id == turn_id)
            .ok_or_else(|| EngineError::Internal(format!("unknown turn {turn_id}")))?;
        turn.apply_refinement(final_text, provenance, confidence)
    }

    /// Most recent `n` Turns in append order (oldest first).
    pub fn recent_turns(&self, session_id: &str, n: usize) -> Vec<Turn> {
        let sessions = self.lock();
        sessions
            .get(session_id)
            .map(|s| s.recent(n))
            .unwrap_or_default()
    }

    pub fn turn_count(&self, session_id: &str) -> usize {
        let sessions = self.lock();
        sessions.get(session_id).map(|s| s.turns.len()).unwrap_or(0)
    }

    /// The session's current rolling summary, or empty string.
    pub fn summary(&self, session_id: &str) -> String {
        let sessions = self.lock();
        sessions
            .get(session_id)
            .map(|s| s.summary.clone())
            .unwrap_or_default()
    }

    /// Replace the session's summary; rejected if over `SUMMARY_TOKEN_CAP`.
    pub fn update_summary(&self, session_id: &str, text: String) -> EngineResult<()> {
        if estimate_tokens(&text) > SUMMARY_TOKEN_CAP {
            return Err(EngineError::InvalidInput(format!(
                "summary exceeds {SUMMARY_TOKEN_CAP} token cap"
            )));
        }
        let now = Utc::now();
        let mut sessions = self.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id.to_string(), now));
        session.summary = text;
        session.touch(now);
        Ok(())
    }

    /// Remove sessions idle for longer than the configured TTL. Returns the
    /// number of sessions removed.
    pub fn gc_idle(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_idle(now, self.ttl));
        before - sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }
}
