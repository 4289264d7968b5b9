//! MemoryStore: shared conversational recall backed by a flat in-memory
//! vector index, with write-behind durable persistence.
//!
//! The durable log is the teacher's `storage::Storage` JSONL append-only
//! pattern (`storage/mod.rs`), generalized from "one file per session
//! holding `ProxyEvent`s" to "one file per process holding `MemoryEntry`
//! records", with the immediate per-write flush relaxed to a periodic
//! flush (spec.md §4.1 "write-behind, not write-through").

pub mod embedder;

use crate::config::MemoryConfig;
use crate::error::{EngineError, EngineResult};
use embedder::{cosine_similarity, Embedder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// One durable unit of conversational memory (spec.md §3 `MemoryEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: u64,
    pub session_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub archived: bool,
}

/// Shared conversational memory: synchronous in-memory index for Query/Recent,
/// asynchronous write-behind log for durability (spec.md §4.1).
pub struct MemoryStore {
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
    embedder_timeout: std::time::Duration,
    index: RwLock<HashMap<String, Vec<MemoryEntry>>>,
    next_id: AtomicU64,
    pending_tx: mpsc::Sender<MemoryEntry>,
    /// Entries dropped because the write-behind channel was saturated;
    /// consulted by HealthMonitor's `WriteBehindBacklog` condition.
    backlog_drops: AtomicU64,
}

impl MemoryStore {
    /// Construct the store and spawn its write-behind log writer.
    pub fn new(
        config: MemoryConfig,
        embedder_timeout: std::time::Duration,
        embedder: Arc<dyn Embedder>,
        log_path: PathBuf,
    ) -> Arc<Self> {
        let (pending_tx, pending_rx) = mpsc::channel(4096);
        let store = Arc::new(Self {
            embedder,
            embedder_timeout,
            index: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            pending_tx,
            backlog_drops: AtomicU64::new(0),
            config,
        });
        store.load_from_log(&log_path);
        let writer = WriteBehindLog::new(log_path, pending_rx, store.config.flush_interval);
        tokio::spawn(writer.run());
        store
    }

    fn load_from_log(&self, log_path: &PathBuf) {
        let Ok(file) = std::fs::File::open(log_path) else {
            return;
        };
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        let mut max_id = 0;
        for line in BufReader::new(file).lines().map_while(Result::ok) {
            if let Ok(entry) = serde_json::from_str::<MemoryEntry>(&line) {
                max_id = max_id.max(entry.id);
                index.entry(entry.session_id.clone()).or_default().push(entry);
            }
        }
        drop(index);
        if max_id > 0 {
            self.next_id.store(max_id + 1, Ordering::SeqCst);
        }
    }

    /// Embed and index `text`, returning its entry id. Visible to `query`/
    /// `recent` immediately; durable persistence happens write-behind.
    pub async fn add(&self, session_id: &str, text: &str) -> EngineResult<u64> {
        let embedding = tokio::time::timeout(self.embedder_timeout, self.embedder.embed(text))
            .await
            .unwrap_or_default();

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = MemoryEntry {
            id,
            session_id: session_id.to_string(),
            text: text.to_string(),
            embedding,
            created_at: chrono::Utc::now(),
            archived: false,
        };

        {
            let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
            index.entry(session_id.to_string()).or_default().push(entry.clone());
        }

        if self.pending_tx.try_send(entry).is_err() {
            self.backlog_drops.fetch_add(1, Ordering::SeqCst);
        }

        Ok(id)
    }

    /// Vector recall: the `k` non-archived entries for `session_id` most
    /// similar to `query_text`, ranked by cosine similarity (spec.md §4.1,
    /// soft/hard latency budgets enforced by the caller).
    pub async fn query(&self, session_id: &str, query_text: &str, k: usize) -> EngineResult<Vec<MemoryEntry>> {
        Ok(self
            .query_scored(session_id, query_text, k)
            .await?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }

    /// Like `query`, but keeps the cosine-similarity score alongside each
    /// entry (spec.md §6 diagnostic `Recall` probe).
    pub async fn query_scored(&self, session_id: &str, query_text: &str, k: usize) -> EngineResult<Vec<(f64, MemoryEntry)>> {
        let query_embedding = tokio::time::timeout(self.embedder_timeout, self.embedder.embed(query_text))
            .await
            .map_err(|_| EngineError::Timeout("memory query embedding".to_string()))?;

        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = index.get(session_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f64, MemoryEntry)> = entries
            .iter()
            .filter(|e| !e.archived)
            .map(|e| (cosine_similarity(&query_embedding, &e.embedding), e.clone()))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k.max(1));
        Ok(scored)
    }

    /// The `n` most recently added non-archived entries for a session, in
    /// chronological order.
    pub fn recent(&self, session_id: &str, n: usize) -> Vec<MemoryEntry> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = index.get(session_id) else {
            return Vec::new();
        };
        let live: Vec<&MemoryEntry> = entries.iter().filter(|e| !e.archived).collect();
        live.into_iter().rev().take(n).rev().cloned().collect()
    }

    pub fn query_k_default(&self) -> usize {
        self.config.query_k
    }

    pub fn backlog_drops(&self) -> u64 {
        self.backlog_drops.load(Ordering::SeqCst)
    }

    /// Entries queued for the write-behind log but not yet flushed.
    pub fn pending_queue_depth(&self) -> usize {
        self.pending_tx.max_capacity() - self.pending_tx.capacity()
    }

    /// Archive entries past `archive_age_days` and drop entries past
    /// `purge_age_days` from the in-memory index (spec.md §4.1 GC). Called
    /// on an hourly tick by the main loop.
    pub fn run_gc(&self) {
        let now = chrono::Utc::now();
        let archive_cutoff = now - chrono::Duration::days(self.config.archive_age_days);
        let purge_cutoff = now - chrono::Duration::days(self.config.purge_age_days);
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        for entries in index.values_mut() {
            for entry in entries.iter_mut() {
                if entry.created_at < archive_cutoff {
                    entry.archived = true;
                }
            }
            entries.retain(|e| e.created_at >= purge_cutoff);
        }
    }

    pub fn entry_count(&self, session_id: &str) -> usize {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index.get(session_id).map(Vec::len).unwrap_or(0)
    }
}

/// Background task flushing pending `MemoryEntry` writes to a JSONL file
/// on a fixed cadence, following `storage::Storage::run`'s "consume until
/// closed" loop shape.
struct WriteBehindLog {
    log_path: PathBuf,
    pending_rx: mpsc::Receiver<MemoryEntry>,
    flush_interval: std::time::Duration,
}

impl WriteBehindLog {
    fn new(log_path: PathBuf, pending_rx: mpsc::Receiver<MemoryEntry>, flush_interval: std::time::Duration) -> Self {
        Self {
            log_path,
            pending_rx,
            flush_interval,
        }
    }

    async fn run(mut self) {
        if let Some(parent) = self.log_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::error!("failed to create memory data dir {}: {e}", parent.display());
                return;
            }
        }
        let file = match OpenOptions::new().create(true).append(true).open(&self.log_path) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!("failed to open memory log {}: {e}", self.log_path.display());
                return;
            }
        };
        let mut writer = std::io::BufWriter::new(file);
        let mut interval = tokio::time::interval(self.flush_interval);
        let mut dirty = false;

        loop {
            tokio::select! {
                maybe_entry = self.pending_rx.recv() => {
                    match maybe_entry {
                        Some(entry) => {
                            match serde_json::to_string(&entry) {
                                Ok(json) => {
                                    if let Err(e) = writeln!(writer, "{json}") {
                                        tracing::error!("failed to write memory entry: {e}");
                                    } else {
                                        dirty = true;
                                    }
                                }
                                Err(e) => tracing::error!("failed to serialize memory entry: {e}"),
                            }
                        }
                        None => break,
                    }
                }
                _ = interval.tick() => {
                    if dirty {
                        if let Err(e) = writer.flush() {
                            tracing::error!("failed to flush memory log: {e}");
                        }
                        dirty = false;
                    }
                }
            }
        }
        let _ = writer.flush();
        tracing::info!("memory write-behind log shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedder::HashingEmbedder;

    fn store(dir: &std::path::Path) -> Arc<MemoryStore> {
        MemoryStore::new(
            MemoryConfig::default(),
            std::time::Duration::from_millis(50),
            Arc::new(HashingEmbedder::default()),
            dir.join("memory.jsonl"),
        )
    }

    #[tokio::test]
    async fn add_then_query_finds_relevant_entry() {
        let dir = tempdir();
        let store = store(dir.path());
        store.add("s1", "The capital of France is Paris").await.unwrap();
        store.add("s1", "Bananas are a good source of potassium").await.unwrap();
        let results = store.query("s1", "What is the capital of France?", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].text.contains("Paris"));
    }

    #[tokio::test]
    async fn recent_returns_chronological_order() {
        let dir = tempdir();
        let store = store(dir.path());
        store.add("s1", "first").await.unwrap();
        store.add("s1", "second").await.unwrap();
        store.add("s1", "third").await.unwrap();
        let recent = store.recent("s1", 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text, "second");
        assert_eq!(recent[1].text, "third");
    }

    #[tokio::test]
    async fn query_on_unknown_session_is_empty() {
        let dir = tempdir();
        let store = store(dir.path());
        let results = store.query("ghost", "anything", 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn gc_archives_and_purges_by_age() {
        let dir = tempdir();
        let store = store(dir.path());
        store.add("s1", "old entry").await.unwrap();
        {
            let mut index = store.index.write().unwrap();
            for entry in index.get_mut("s1").unwrap() {
                entry.created_at = chrono::Utc::now() - chrono::Duration::days(200);
            }
        }
        store.run_gc();
        assert_eq!(store.entry_count("s1"), 0);
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().expect("create temp dir")
    }
}
