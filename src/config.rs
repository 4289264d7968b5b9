//! Configuration for the council core.
//!
//! Loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/council-core/config.toml)
//! 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error. RUST_LOG overrides this.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Agent-0 draft model settings (spec.md §4.7, §6).
#[derive(Debug, Clone)]
pub struct DraftConfig {
    pub max_tokens: u32,
    pub timeout: Duration,
    pub confidence_gate: f64,
    pub temperature: f64,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            max_tokens: 24,
            timeout: Duration::from_secs(5),
            confidence_gate: 0.60,
            temperature: 0.0,
        }
    }
}

/// Specialist execution settings (spec.md §4.5, §6).
#[derive(Debug, Clone)]
pub struct SpecialistConfig {
    pub max_tokens: u32,
    pub timeout: Duration,
    pub concurrency: usize,
}

impl Default for SpecialistConfig {
    fn default() -> Self {
        Self {
            max_tokens: 160,
            timeout: Duration::from_secs(4),
            concurrency: 8,
        }
    }
}

/// Voting/fusion settings (spec.md §4.6, §6).
#[derive(Debug, Clone)]
pub struct VotingConfig {
    pub deadline: Duration,
    pub fusion_topk: usize,
    pub shortcut_threshold: f64,
    pub replace_margin: f64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(4),
            fusion_topk: 3,
            shortcut_threshold: 0.80,
            replace_margin: 0.15,
        }
    }
}

/// Background refinement settings (spec.md §4.7, §6).
#[derive(Debug, Clone)]
pub struct RefinementConfig {
    pub deadline: Duration,
    pub enabled: bool,
    /// Intent confidence floor for specialist selection (spec.md §4.7 step 5a).
    pub intent_confidence_floor: f64,
    /// Max specialists dispatched per refinement (spec.md §4.7 step 5a).
    pub max_specialists: usize,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(8),
            enabled: true,
            intent_confidence_floor: 0.2,
            max_specialists: 3,
        }
    }
}

/// Budget guardrail settings (spec.md §4.4, §6).
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub per_request_usd: f64,
    pub session_usd: f64,
    pub daily_usd: f64,
    /// Daily reset boundary, "HH:MM" in UTC.
    pub reset_utc: String,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_request_usd: 0.05,
            session_usd: 0.30,
            daily_usd: 1.00,
            reset_utc: "00:00".to_string(),
        }
    }
}

/// MemoryStore settings (spec.md §4.1, §6).
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub query_k: usize,
    pub flush_interval: Duration,
    pub reindex_interval: Duration,
    pub archive_age_days: i64,
    pub purge_age_days: i64,
    /// Soft/hard latency budgets for Query (spec.md §5).
    pub query_soft_ms: u64,
    pub query_hard_ms: u64,
    /// Seconds a degraded-persistence condition must persist before it is
    /// surfaced to HealthMonitor (spec.md §4.1).
    pub degraded_grace_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            query_k: 3,
            flush_interval: Duration::from_millis(500),
            reindex_interval: Duration::from_secs(30),
            archive_age_days: 30,
            purge_age_days: 90,
            query_soft_ms: 20,
            query_hard_ms: 100,
            degraded_grace_secs: 10,
        }
    }
}

/// HealthMonitor thresholds (spec.md §4.8, §6).
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub gpu_low_util_pct: f64,
    pub draft_latency_p95_ms: u64,
    pub pending_queue_warn: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            gpu_low_util_pct: 20.0,
            draft_latency_p95_ms: 400,
            pending_queue_warn: 1000,
        }
    }
}

/// Per-request concurrency/cancellation settings (spec.md §5).
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub budget: Duration,
    pub cancellation_grace: Duration,
    pub embedder_timeout: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(15),
            cancellation_grace: Duration::from_millis(250),
            embedder_timeout: Duration::from_millis(50),
        }
    }
}

/// Static specialist roster entry, loaded at startup (spec.md §3
/// `SpecialistDescriptor`; hot-reload is explicitly out of scope).
#[derive(Debug, Clone, Deserialize)]
pub struct SpecialistDescriptorConfig {
    pub name: String,
    pub domain_tags: Vec<String>,
    pub provider_ref: String,
    #[serde(default)]
    pub token_cap: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub priority: i32,
}

fn default_specialists() -> Vec<SpecialistDescriptorConfig> {
    vec![
        SpecialistDescriptorConfig {
            name: "math".to_string(),
            domain_tags: vec!["arithmetic".to_string(), "math".to_string()],
            provider_ref: "local".to_string(),
            token_cap: None,
            timeout_ms: None,
            temperature: Some(0.0),
            priority: 0,
        },
        SpecialistDescriptorConfig {
            name: "code".to_string(),
            domain_tags: vec!["code".to_string(), "programming".to_string()],
            provider_ref: "local".to_string(),
            token_cap: None,
            timeout_ms: None,
            temperature: Some(0.2),
            priority: 1,
        },
        SpecialistDescriptorConfig {
            name: "logic".to_string(),
            domain_tags: vec!["logic".to_string(), "proof".to_string()],
            provider_ref: "local".to_string(),
            token_cap: None,
            timeout_ms: None,
            temperature: Some(0.1),
            priority: 2,
        },
        SpecialistDescriptorConfig {
            name: "knowledge".to_string(),
            domain_tags: vec!["knowledge".to_string(), "general".to_string()],
            provider_ref: "local".to_string(),
            token_cap: None,
            timeout_ms: None,
            temperature: Some(0.3),
            priority: 3,
        },
    ]
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the transport server to.
    pub bind_addr: SocketAddr,
    /// Directory for the durable memory log + archive.
    pub data_dir: PathBuf,
    pub logging: LoggingConfig,
    pub draft: DraftConfig,
    pub specialist: SpecialistConfig,
    pub voting: VotingConfig,
    pub refinement: RefinementConfig,
    pub budget: BudgetConfig,
    pub memory: MemoryConfig,
    pub health: HealthConfig,
    pub request: RequestConfig,
    pub specialists: Vec<SpecialistDescriptorConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct FileDraft {
    max_tokens: Option<u32>,
    timeout_s: Option<u64>,
    confidence_gate: Option<f64>,
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct FileSpecialist {
    max_tokens: Option<u32>,
    timeout_s: Option<u64>,
    concurrency: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct FileVoting {
    deadline_s: Option<u64>,
    fusion_topk: Option<usize>,
    shortcut_threshold: Option<f64>,
    replace_margin: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct FileRefinement {
    deadline_s: Option<u64>,
    enabled: Option<bool>,
    intent_confidence_floor: Option<f64>,
    max_specialists: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct FileBudget {
    per_request_usd: Option<f64>,
    session_usd: Option<f64>,
    daily_usd: Option<f64>,
    reset_utc: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FileMemory {
    query_k: Option<usize>,
    flush_interval_ms: Option<u64>,
    reindex_interval_s: Option<u64>,
    archive_age_days: Option<i64>,
    purge_age_days: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct FileHealth {
    gpu_low_util_pct: Option<f64>,
    draft_latency_p95_ms: Option<u64>,
    pending_queue_warn: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct FileLogging {
    level: Option<String>,
}

/// Config file structure (subset of Config that makes sense to persist).
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    bind_addr: Option<String>,
    data_dir: Option<String>,
    logging: Option<FileLogging>,
    draft: Option<FileDraft>,
    specialist: Option<FileSpecialist>,
    voting: Option<FileVoting>,
    refinement: Option<FileRefinement>,
    budget: Option<FileBudget>,
    memory: Option<FileMemory>,
    health: Option<FileHealth>,
    #[serde(default)]
    specialists: Vec<SpecialistDescriptorConfig>,
}

impl Config {
    /// ~/.config/council-core/config.toml
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("council-core").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist.
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };
        if path.exists() {
            return;
        }
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let template = Self::default().to_toml();
        let _ = std::fs::write(&path, template);
    }

    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                FileConfig::default()
            }),
            Err(_) => FileConfig::default(),
        }
    }

    /// Serialize config to TOML string (single source of truth for format).
    pub fn to_toml(&self) -> String {
        format!(
            r#"# council-core configuration

# Transport bind address
bind_addr = "{bind}"

# Directory for the durable memory log and archive
data_dir = "{data_dir}"

[logging]
level = "{log_level}"

[draft]
max_tokens = {draft_max_tokens}
timeout_s = {draft_timeout}
confidence_gate = {draft_gate}
temperature = {draft_temp}

[specialist]
max_tokens = {spec_max_tokens}
timeout_s = {spec_timeout}
concurrency = {spec_concurrency}

[voting]
deadline_s = {voting_deadline}
fusion_topk = {voting_topk}
shortcut_threshold = {voting_shortcut}
replace_margin = {voting_margin}

[refinement]
deadline_s = {refine_deadline}
enabled = {refine_enabled}
intent_confidence_floor = {refine_floor}
max_specialists = {refine_max}

[budget]
per_request_usd = {budget_request}
session_usd = {budget_session}
daily_usd = {budget_daily}
reset_utc = "{budget_reset}"

[memory]
query_k = {mem_k}
flush_interval_ms = {mem_flush}
reindex_interval_s = {mem_reindex}
archive_age_days = {mem_archive}
purge_age_days = {mem_purge}

[health]
gpu_low_util_pct = {health_gpu}
draft_latency_p95_ms = {health_latency}
pending_queue_warn = {health_queue}
"#,
            bind = self.bind_addr,
            data_dir = self.data_dir.display(),
            log_level = self.logging.level,
            draft_max_tokens = self.draft.max_tokens,
            draft_timeout = self.draft.timeout.as_secs(),
            draft_gate = self.draft.confidence_gate,
            draft_temp = self.draft.temperature,
            spec_max_tokens = self.specialist.max_tokens,
            spec_timeout = self.specialist.timeout.as_secs(),
            spec_concurrency = self.specialist.concurrency,
            voting_deadline = self.voting.deadline.as_secs(),
            voting_topk = self.voting.fusion_topk,
            voting_shortcut = self.voting.shortcut_threshold,
            voting_margin = self.voting.replace_margin,
            refine_deadline = self.refinement.deadline.as_secs(),
            refine_enabled = self.refinement.enabled,
            refine_floor = self.refinement.intent_confidence_floor,
            refine_max = self.refinement.max_specialists,
            budget_request = self.budget.per_request_usd,
            budget_session = self.budget.session_usd,
            budget_daily = self.budget.daily_usd,
            budget_reset = self.budget.reset_utc,
            mem_k = self.memory.query_k,
            mem_flush = self.memory.flush_interval.as_millis(),
            mem_reindex = self.memory.reindex_interval.as_secs(),
            mem_archive = self.memory.archive_age_days,
            mem_purge = self.memory.purge_age_days,
            health_gpu = self.health.gpu_low_util_pct,
            health_latency = self.health.draft_latency_p95_ms,
            health_queue = self.health.pending_queue_warn,
        )
    }

    /// Save current configuration to file.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = Self::config_path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config path",
            ));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.to_toml())
    }

    /// Load configuration: env vars > file > defaults.
    pub fn from_env() -> Self {
        let file = Self::load_file_config();

        let bind_addr = std::env::var("COUNCIL_BIND")
            .ok()
            .or(file.bind_addr)
            .unwrap_or_else(|| "127.0.0.1:8099".to_string())
            .parse()
            .expect("Invalid bind address");

        let data_dir = std::env::var("COUNCIL_DATA_DIR")
            .ok()
            .or(file.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let file_logging = file.logging.unwrap_or_default();
        let logging = LoggingConfig {
            level: std::env::var("COUNCIL_LOG_LEVEL")
                .ok()
                .or(file_logging.level)
                .unwrap_or_else(|| "info".to_string()),
        };

        let fd = file.draft.unwrap_or_default();
        let draft = DraftConfig {
            max_tokens: fd.max_tokens.unwrap_or(24),
            timeout: Duration::from_secs(fd.timeout_s.unwrap_or(5)),
            confidence_gate: fd.confidence_gate.unwrap_or(0.60),
            temperature: fd.temperature.unwrap_or(0.0),
        };

        let fs = file.specialist.unwrap_or_default();
        let specialist = SpecialistConfig {
            max_tokens: fs.max_tokens.unwrap_or(160),
            timeout: Duration::from_secs(fs.timeout_s.unwrap_or(4)),
            concurrency: fs.concurrency.unwrap_or(8),
        };

        let fv = file.voting.unwrap_or_default();
        let voting = VotingConfig {
            deadline: Duration::from_secs(fv.deadline_s.unwrap_or(4)),
            fusion_topk: fv.fusion_topk.unwrap_or(3),
            shortcut_threshold: fv.shortcut_threshold.unwrap_or(0.80),
            replace_margin: fv.replace_margin.unwrap_or(0.15),
        };

        let fr = file.refinement.unwrap_or_default();
        let refinement = RefinementConfig {
            deadline: Duration::from_secs(fr.deadline_s.unwrap_or(8)),
            enabled: fr.enabled.unwrap_or(true),
            intent_confidence_floor: fr.intent_confidence_floor.unwrap_or(0.2),
            max_specialists: fr.max_specialists.unwrap_or(3),
        };

        let fb = file.budget.unwrap_or_default();
        let budget = BudgetConfig {
            per_request_usd: fb.per_request_usd.unwrap_or(0.05),
            session_usd: fb.session_usd.unwrap_or(0.30),
            daily_usd: fb.daily_usd.unwrap_or(1.00),
            reset_utc: fb.reset_utc.unwrap_or_else(|| "00:00".to_string()),
        };

        let fm = file.memory.unwrap_or_default();
        let memory = MemoryConfig {
            query_k: fm.query_k.unwrap_or(3),
            flush_interval: Duration::from_millis(fm.flush_interval_ms.unwrap_or(500)),
            reindex_interval: Duration::from_secs(fm.reindex_interval_s.unwrap_or(30)),
            archive_age_days: fm.archive_age_days.unwrap_or(30),
            purge_age_days: fm.purge_age_days.unwrap_or(90),
            ..MemoryConfig::default()
        };

        let fh = file.health.unwrap_or_default();
        let health = HealthConfig {
            gpu_low_util_pct: fh.gpu_low_util_pct.unwrap_or(20.0),
            draft_latency_p95_ms: fh.draft_latency_p95_ms.unwrap_or(400),
            pending_queue_warn: fh.pending_queue_warn.unwrap_or(1000),
        };

        let specialists = if file.specialists.is_empty() {
            default_specialists()
        } else {
            file.specialists
        };

        Self {
            bind_addr,
            data_dir,
            logging,
            draft,
            specialist,
            voting,
            refinement,
            budget,
            memory,
            health,
            request: RequestConfig::default(),
            specialists,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8099".parse().unwrap(),
            data_dir: PathBuf::from("./data"),
            logging: LoggingConfig::default(),
            draft: DraftConfig::default(),
            specialist: SpecialistConfig::default(),
            voting: VotingConfig::default(),
            refinement: RefinementConfig::default(),
            budget: BudgetConfig::default(),
            memory: MemoryConfig::default(),
            health: HealthConfig::default(),
            request: RequestConfig::default(),
            specialists: default_specialists(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml_shape() {
        let cfg = Config::default();
        let toml = cfg.to_toml();
        assert!(toml.contains("confidence_gate = 0.6"));
        assert!(toml.contains("fusion_topk = 3"));
    }

    #[test]
    fn default_specialists_cover_four_domains() {
        let specialists = default_specialists();
        assert_eq!(specialists.len(), 4);
        assert!(specialists.iter().any(|s| s.name == "math"));
        assert!(specialists.iter().any(|s| s.name == "code"));
    }
}
