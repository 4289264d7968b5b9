//! Summariser: keeps a session's rolling summary within the token cap.
//!
//! Grounded on `tokens.rs`'s truncation helpers for the length bound and
//! the teacher's `pipeline::embedding_indexer`'s poll-and-dedup-by-id idiom
//! (skip work already done for an unchanged key) for the cache.

use crate::session::{SessionStore, Turn, SUMMARY_TOKEN_CAP};
use crate::tokens::{estimate_tokens, truncate_to_tokens};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

fn cache_key(turns: &[Turn]) -> String {
    let mut hasher = Sha256::new();
    for turn in turns {
        hasher.update(turn.turn_id.to_le_bytes());
        hasher.update(if turn.is_refined() { b"1" } else { b"0" });
    }
    format!("{:x}", hasher.finalize())
}

/// Produces a short extractive summary from a session's recent turns and
/// writes it back via `SessionStore`, skipping recomputation when the
/// underlying turn set is unchanged (spec.md §4.9).
pub struct Summariser {
    /// session_id -> last cache key summarized, to skip redundant work.
    last_key: Mutex<HashMap<String, String>>,
}

impl Summariser {
    pub fn new() -> Self {
        Self {
            last_key: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic extractive summary: concatenate final answers from
    /// most recent turns, truncated to `SUMMARY_TOKEN_CAP` tokens.
    pub fn summarize(&self, turns: &[Turn]) -> String {
        let joined = turns
            .iter()
            .rev()
            .map(|t| t.final_text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if estimate_tokens(&joined) > SUMMARY_TOKEN_CAP {
            truncate_to_tokens(&joined, SUMMARY_TOKEN_CAP).to_string()
        } else {
            joined
        }
    }

    /// Refresh `session_id`'s summary in `store` if its recent turn set has
    /// changed since the last refresh. No-op otherwise.
    pub fn refresh(&self, store: &SessionStore, session_id: &str, window: usize) {
        let turns = store.recent_turns(session_id, window);
        if turns.is_empty() {
            return;
        }
        let key = cache_key(&turns);
        {
            let cache = self.last_key.lock().unwrap_or_else(|e| e.into_inner());
            if cache.get(session_id) == Some(&key) {
                return;
            }
        }
        let summary = self.summarize(&turns);
        if store.update_summary(session_id, summary).is_ok() {
            let mut cache = self.last_key.lock().unwrap_or_else(|e| e.into_inner());
            cache.insert(session_id.to_string(), key);
        }
    }
}

impl Default for Summariser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn summary_respects_token_cap() {
        let store = SessionStore::new(Duration::from_secs(3600));
        for i in 0..20 {
            store.record_turn(
                "s1",
                format!("prompt {i}"),
                "a reasonably long draft answer repeated for length purposes".to_string(),
                0.8,
                12,
                0.0,
            );
        }
        let summariser = Summariser::new();
        summariser.refresh(&store, "s1", 10);
        assert!(estimate_tokens(&store.summary("s1")) <= SUMMARY_TOKEN_CAP);
    }

    #[test]
    fn refresh_skips_recompute_for_unchanged_turns() {
        let store = SessionStore::new(Duration::from_secs(3600));
        store.record_turn("s1", "hi".into(), "hello".into(), 0.9, 2, 0.0);
        let summariser = Summariser::new();
        summariser.refresh(&store, "s1", 5);
        store.update_summary("s1", "manually overridden".into()).unwrap();
        summariser.refresh(&store, "s1", 5);
        assert_eq!(store.summary("s1"), "manually overridden");
    }

    #[test]
    fn refresh_on_empty_session_is_noop() {
        let store = SessionStore::new(Duration::from_secs(3600));
        let summariser = Summariser::new();
        summariser.refresh(&store, "ghost", 5);
        assert_eq!(store.summary("ghost"), "");
    }
}
