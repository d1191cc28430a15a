//! # banwatch - Core Library
//!
//! Intrusion-response engine driving fail2ban.
//!
//! banwatch tails SSH and web-server access logs, classifies each line into
//! a closed attack taxonomy, accumulates per-IP threat scores, and bans the
//! worst offenders through the fail2ban backend. A small HTTP/JSON control
//! plane exposes the threat map, manual ban overrides, and on-demand log
//! analysis.
//!
//! ## Design Philosophy
//! - **Observe, score, ban.** No packet filtering in-process; enforcement is
//!   delegated to fail2ban jails.
//! - Scan-path failures are absorbed and logged; the engine self-heals on
//!   the next tick.
//! - Whitelisted address space is untouchable under every code path,
//!   including manual bans.

pub mod api;
pub mod classifier;
pub mod decision;
pub mod enforce;
pub mod engine;
pub mod log_sources;
pub mod registry;
pub mod whitelist;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for banwatch.
#[derive(Error, Debug)]
pub enum BanwatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Log parse error: {0}")]
    Parse(String),

    #[error("Banning backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend command failed: {0}")]
    Backend(String),

    #[error("No jail available for ban")]
    NoJailAvailable,

    #[error("IP {0} is whitelisted")]
    Whitelisted(String),

    #[error("Engine is shutting down")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

pub type BanwatchResult<T> = Result<T, BanwatchError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for banwatch.
///
/// Loaded from `banwatch.toml` in the working directory or a path supplied
/// via CLI flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanwatchConfig {
    /// General daemon settings.
    pub general: GeneralConfig,

    /// HTTP control plane settings.
    pub server: ServerConfig,

    /// Scan engine intervals and ban policy.
    pub engine: EngineConfig,

    /// Log source paths.
    pub log_sources: LogSourcesConfig,

    /// Banning backend settings.
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Path where banwatch keeps its state (ban ledger, PID file).
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1").
    pub bind_address: String,

    /// Port to listen on.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often (in seconds) the engine tails the log sources.
    pub scan_interval_secs: u64,

    /// How often (in seconds) the decision loop inspects the registry.
    pub decision_interval_secs: u64,

    /// How often (in seconds) the whole access log is re-analyzed.
    pub analysis_interval_secs: u64,

    /// How long (in seconds) a ban stays active in the ledger.
    pub ban_duration_secs: u64,

    /// How many trailing log records each scan pulls per source.
    pub tail_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSourcesConfig {
    /// Primary SSH auth log path. Well-known fallbacks are tried after it.
    pub ssh_log_path: PathBuf,

    /// Primary web access log path. Well-known fallbacks are tried after it.
    pub access_log_path: PathBuf,

    /// Web error log path (reported by `status`, not scanned).
    pub error_log_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// fail2ban server socket, used to probe whether sudo is needed.
    pub socket_path: PathBuf,

    /// Always invoke fail2ban-client through sudo.
    pub force_sudo: bool,

    /// Serve synthetic log lines instead of reading real files.
    pub dev_mode: bool,
}

impl Default for BanwatchConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                data_dir: PathBuf::from("./banwatch-data"),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8092,
            },
            engine: EngineConfig {
                scan_interval_secs: 300,
                decision_interval_secs: 30,
                analysis_interval_secs: 1800,
                ban_duration_secs: 86_400,
                tail_lines: 200,
            },
            log_sources: LogSourcesConfig {
                ssh_log_path: PathBuf::from("/var/log/auth.log"),
                access_log_path: PathBuf::from("/var/log/nginx/access.log"),
                error_log_path: PathBuf::from("/var/log/nginx/error.log"),
            },
            backend: BackendConfig {
                socket_path: PathBuf::from("/var/run/fail2ban/fail2ban.sock"),
                force_sudo: false,
                dev_mode: false,
            },
        }
    }
}

impl BanwatchConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> BanwatchResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BanwatchConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Write the default configuration to a TOML file.
    pub fn write_default(path: &std::path::Path) -> BanwatchResult<()> {
        let config = Self::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| BanwatchError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ban duration as a chrono Duration.
    pub fn ban_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.engine.ban_duration_secs as i64)
    }
}

// ---------------------------------------------------------------------------
// Core Types
// ---------------------------------------------------------------------------

/// Which log family produced an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Ssh,
    Http,
}

/// A single normalized log record.
///
/// Log parsers produce these; the classifier and registry consume them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,

    /// Which log family produced it.
    pub source: EventSource,

    /// Source IP in textual form (IPv4 or IPv6).
    pub ip: String,

    /// Target username (SSH only).
    pub user: Option<String>,

    /// HTTP request method.
    pub method: Option<String>,

    /// HTTP request URL.
    pub url: Option<String>,

    /// HTTP response status.
    pub status_code: Option<u16>,

    /// HTTP user agent.
    pub user_agent: Option<String>,

    /// Raw event kind as seen in the log (e.g. `failed_password`).
    pub raw_event_kind: String,
}

/// Threat level bands derived from the 0..=100 score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Severe,
    High,
    Medium,
    Low,
    Suspect,
}

impl ThreatLevel {
    /// Band table: >=80 severe, >=60 high, >=40 medium, >=20 low, else suspect.
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => ThreatLevel::Severe,
            60..=79 => ThreatLevel::High,
            40..=59 => ThreatLevel::Medium,
            20..=39 => ThreatLevel::Low,
            _ => ThreatLevel::Suspect,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Severe => "severe",
            ThreatLevel::High => "high",
            ThreatLevel::Medium => "medium",
            ThreatLevel::Low => "low",
            ThreatLevel::Suspect => "suspect",
        }
    }
}

/// Per-IP threat aggregate, owned by the registry.
///
/// The score saturates at 100 and only eviction resets it; the attack-type
/// set grows monotonically and keeps insertion order for stable display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatRecord {
    pub ip: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub ssh_attempts: u32,
    pub http_attempts: u32,
    pub attack_types: Vec<String>,
    pub score: u8,
    pub level: ThreatLevel,
    pub banned: bool,
    pub auto_banned: bool,
}

impl ThreatRecord {
    /// Create a fresh record for an IP first seen at `timestamp`.
    pub fn new(ip: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            ip: ip.to_string(),
            first_seen: timestamp,
            last_seen: timestamp,
            ssh_attempts: 0,
            http_attempts: 0,
            attack_types: Vec::new(),
            score: 0,
            level: ThreatLevel::Suspect,
            banned: false,
            auto_banned: false,
        }
    }

    /// Fold one classified event into this record.
    pub fn register(
        &mut self,
        source: EventSource,
        tag: &str,
        weight: u32,
        timestamp: DateTime<Utc>,
    ) {
        if timestamp > self.last_seen {
            self.last_seen = timestamp;
        }
        if timestamp < self.first_seen {
            self.first_seen = timestamp;
        }
        match source {
            EventSource::Ssh => self.ssh_attempts += 1,
            EventSource::Http => self.http_attempts += 1,
        }
        self.add_attack_type(tag);
        self.raise_score(weight);
    }

    /// Add a tag with set semantics. Composite tags are split into their
    /// components so the set stays closed over single tags.
    pub fn add_attack_type(&mut self, tag: &str) {
        for part in tag.split(',') {
            let part = part.trim();
            if !part.is_empty() && !self.attack_types.iter().any(|t| t == part) {
                self.attack_types.push(part.to_string());
            }
        }
    }

    /// Raise the score by `weight`, saturating at 100, and re-derive the level.
    pub fn raise_score(&mut self, weight: u32) {
        self.score = (self.score as u32 + weight).min(100) as u8;
        self.level = ThreatLevel::from_score(self.score);
    }

    /// Pin the score to the maximum (manual-ban path).
    pub fn pin_max_score(&mut self) {
        self.score = 100;
        self.level = ThreatLevel::Severe;
    }

    /// Merge another aggregate for the same IP into this one.
    ///
    /// Used when a whole-file analysis batch is absorbed into the registry.
    pub fn merge(&mut self, other: &ThreatRecord) {
        if other.last_seen > self.last_seen {
            self.last_seen = other.last_seen;
        }
        if other.first_seen < self.first_seen {
            self.first_seen = other.first_seen;
        }
        self.ssh_attempts += other.ssh_attempts;
        self.http_attempts += other.http_attempts;
        for tag in &other.attack_types {
            self.add_attack_type(tag);
        }
        self.raise_score(other.score as u32);
    }
}

/// Snapshot summary returned by the scan-result endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub timestamp: DateTime<Utc>,
    pub ssh_threats: Vec<ThreatRecord>,
    pub http_threats: Vec<ThreatRecord>,
    pub new_bans: Vec<String>,
    pub high_risk_ips: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub total_threats: usize,
}

/// Aggregate counters for the stats endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreatStats {
    pub total_threats: usize,
    pub high_risk: usize,
    pub medium_risk: usize,
    pub low_risk: usize,
    pub auto_banned: usize,
    pub ssh_threats: usize,
    pub http_threats: usize,
}
