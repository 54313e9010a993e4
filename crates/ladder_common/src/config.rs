//! Configuration for the ladder engine.
//!
//! Loads settings from /etc/ladder/config.toml or uses defaults. Every field
//! has a serde default so partial files are valid; `validate` rejects values
//! that would break the engine's invariants.

use crate::error::{LadderError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/ladder/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/ladder/config.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "LADDER_CONFIG";

/// Remote store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    /// REST endpoint of the store
    #[serde(default = "default_kv_url")]
    pub url: String,

    /// Bearer token (prefer `token_env` outside of tests)
    #[serde(default)]
    pub token: Option<String>,

    /// Environment variable holding the bearer token
    #[serde(default)]
    pub token_env: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_kv_timeout")]
    pub timeout_secs: u64,
}

fn default_kv_url() -> String {
    "http://127.0.0.1:8079".to_string()
}

fn default_kv_timeout() -> u64 {
    3
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            url: default_kv_url(),
            token: None,
            token_env: None,
            timeout_secs: default_kv_timeout(),
        }
    }
}

impl KvConfig {
    /// Inline token wins over `token_env`. A named but unset variable is an error.
    pub fn resolve_token(&self) -> Result<Option<String>> {
        if let Some(token) = &self.token {
            return Ok(Some(token.clone()));
        }
        match &self.token_env {
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| LadderError::Config(format!("token variable {} is not set", var))),
            None => Ok(None),
        }
    }
}

/// Store key names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Canonical XP total (integer)
    #[serde(default = "default_xp_total_key")]
    pub xp_total: String,

    /// Last ledger sum folded into the total (integer)
    #[serde(default = "default_watermark_key")]
    pub watermark: String,

    /// Per-entity XP hash written by external producers
    #[serde(default = "default_ledger_key")]
    pub ledger: String,

    /// Hash of XP credited per "<phase>:<level>"
    #[serde(default = "default_level_credits_key")]
    pub level_credits: String,

    /// Last notification timestamp in ms (integer)
    #[serde(default = "default_notify_state_key")]
    pub notify_state: String,
}

fn default_xp_total_key() -> String {
    "xp:total".to_string()
}

fn default_watermark_key() -> String {
    "xp:ledger:watermark".to_string()
}

fn default_ledger_key() -> String {
    "xp:ledger".to_string()
}

fn default_level_credits_key() -> String {
    "xp:ladder:credits".to_string()
}

fn default_notify_state_key() -> String {
    "xp:notify:last_ms".to_string()
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            xp_total: default_xp_total_key(),
            watermark: default_watermark_key(),
            ledger: default_ledger_key(),
            level_credits: default_level_credits_key(),
            notify_state: default_notify_state_key(),
        }
    }
}

/// One level of a phase as written in config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub name: String,
    pub cost: i64,
}

/// One phase as written in config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: String,
    #[serde(default)]
    pub levels: Vec<LevelSpec>,
}

/// Where the ladder table comes from. Exactly one source must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LadderConfig {
    /// Priority order of phases; required for `remote_hash`
    #[serde(default)]
    pub phase_order: Vec<String>,

    /// Inline phases
    #[serde(default)]
    pub phases: Vec<PhaseSpec>,

    /// TOML or JSON file holding `phases`
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Store hash: field = phase name, value = JSON list of levels
    #[serde(default)]
    pub remote_hash: Option<String>,
}

/// Watermark aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reconcile interval; kept low-frequency to shrink the crash window
    #[serde(default = "default_aggregator_interval")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_aggregator_interval() -> u64 {
    60
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_aggregator_interval(),
        }
    }
}

/// Overflow check: reset `key` to `reference_key` when out of bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverflowCheck {
    pub key: String,
    pub reference_key: String,
    #[serde(default = "default_max_ratio")]
    pub max_ratio: f64,
}

fn default_max_ratio() -> f64 {
    2.0
}

/// Self-healer passes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_healer_interval")]
    pub interval_secs: u64,

    /// Also coerce the XP total, watermark and notify-state keys
    #[serde(default = "default_true")]
    pub coerce_canonical: bool,

    /// Extra keys to coerce
    #[serde(default)]
    pub coerce_keys: Vec<String>,

    /// JSON object fields tried in order when extracting a number
    #[serde(default = "default_candidate_fields")]
    pub candidate_fields: Vec<String>,

    #[serde(default)]
    pub overflow_checks: Vec<OverflowCheck>,
}

fn default_healer_interval() -> u64 {
    300
}

fn default_candidate_fields() -> Vec<String> {
    vec!["total".to_string(), "value".to_string(), "amount".to_string()]
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_healer_interval(),
            coerce_canonical: true,
            coerce_keys: Vec::new(),
            candidate_fields: default_candidate_fields(),
            overflow_checks: Vec::new(),
        }
    }
}

impl HealerConfig {
    /// Keys the coerce pass visits, canonical keys first, without duplicates.
    pub fn coerce_targets(&self, keys: &KeysConfig) -> Vec<String> {
        let mut targets = Vec::new();
        if self.coerce_canonical {
            targets.push(keys.xp_total.clone());
            targets.push(keys.watermark.clone());
            targets.push(keys.notify_state.clone());
        }
        for key in &self.coerce_keys {
            if !targets.contains(key) {
                targets.push(key.clone());
            }
        }
        targets
    }
}

/// When a phase-transition notification is due
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Completion {
    /// Total reached the cumulative end of `phase`
    PhaseCompleted { phase: String },
    /// Total reached the start of `level` in `phase`; the very first level
    /// of the ladder is rejected since it holds at 0 XP
    LevelReached { phase: String, level: String },
}

/// Delivery channel, tried in list order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// POST `{"text": ...}`, success on 2xx
    Webhook {
        url: String,
        #[serde(default = "default_webhook_timeout")]
        timeout_secs: u64,
    },
    /// Run a program with the text as last argument, success on exit 0
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Write the text to the log; always succeeds
    Log,
}

fn default_webhook_timeout() -> u64 {
    5
}

/// Phase transition notifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_notifier_interval")]
    pub interval_secs: u64,

    /// Minimum time between two deliveries, persisted across restarts
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: i64,

    /// Notifier is disabled when unset
    #[serde(default)]
    pub completion: Option<Completion>,

    /// Placeholders: {phase} {level} {total}
    #[serde(default = "default_message")]
    pub message: String,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

fn default_notifier_interval() -> u64 {
    30
}

fn default_min_interval_ms() -> i64 {
    6 * 60 * 60 * 1000
}

fn default_message() -> String {
    "Ladder milestone reached: {phase} / {level} at {total} XP".to_string()
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_notifier_interval(),
            min_interval_ms: default_min_interval_ms(),
            completion: None,
            message: default_message(),
            channels: Vec::new(),
        }
    }
}

impl NotifierConfig {
    pub fn enabled(&self) -> bool {
        self.completion.is_some()
    }
}

/// Distributed gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_gate_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_gate_ttl")]
    pub default_ttl_secs: u64,
}

fn default_gate_prefix() -> String {
    "gate:".to_string()
}

fn default_gate_ttl() -> u64 {
    120
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_gate_prefix(),
            default_ttl_secs: default_gate_ttl(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Fallback log filter when RUST_LOG is unset
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub kv: KvConfig,

    #[serde(default)]
    pub keys: KeysConfig,

    #[serde(default)]
    pub ladder: LadderConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,

    #[serde(default)]
    pub healer: HealerConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub gate: GateConfig,
}

impl Config {
    /// Load config: explicit path (or `LADDER_CONFIG`) must exist; otherwise
    /// the system paths are tried and defaults used when neither is present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let config = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::load_from_path(&path)?,
            None => {
                let mut found = None;
                for candidate in [CONFIG_PATH, DEFAULT_CONFIG_PATH] {
                    if Path::new(candidate).exists() {
                        found = Some(Self::load_from_path(Path::new(candidate))?);
                        break;
                    }
                }
                found.unwrap_or_else(|| {
                    warn!("Config not found, using defaults");
                    Config::default()
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load config from specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject settings that would break the engine's invariants.
    pub fn validate(&self) -> Result<()> {
        if self.kv.timeout_secs == 0 {
            return Err(LadderError::Config("kv.timeout_secs must be > 0".into()));
        }
        for (name, secs) in [
            ("aggregator.interval_secs", self.aggregator.interval_secs),
            ("healer.interval_secs", self.healer.interval_secs),
            ("notifier.interval_secs", self.notifier.interval_secs),
            ("gate.default_ttl_secs", self.gate.default_ttl_secs),
        ] {
            if secs == 0 {
                return Err(LadderError::Config(format!("{} must be > 0", name)));
            }
        }
        for check in &self.healer.overflow_checks {
            if !(check.max_ratio >= 1.0) || !check.max_ratio.is_finite() {
                return Err(LadderError::Config(format!(
                    "overflow check on '{}': max_ratio must be a finite value >= 1 (got {})",
                    check.key, check.max_ratio
                )));
            }
        }
        if self.notifier.min_interval_ms < 0 {
            return Err(LadderError::Config(
                "notifier.min_interval_ms must be >= 0".into(),
            ));
        }
        if self.notifier.enabled() && self.notifier.channels.is_empty() {
            return Err(LadderError::Config(
                "notifier.completion is set but no channels are configured".into(),
            ));
        }
        Ok(())
    }
}
