//! Runtime Configuration
//!
//! All responder and learning tunables live in one TOML file with built-in
//! defaults, so a missing config file means stock behavior.
//!
//! ## Loading Order
//!
//! 1. `OPENCLAW_CONFIG` environment variable (path to TOML file)
//! 2. `openclaw.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Validation is fatal at startup: a config file that parses but violates a
//! constraint (zero batch size, malformed quiet hours, out-of-range
//! baseline rate) is surfaced to the operator instead of silently patched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::digest::schedule::{parse_minute_of_day, QuietHours};
use crate::digest::store::FlushPolicy;

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenClawConfig {
    /// Insight extractor tunables
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Insight digest responder tunables
    #[serde(default)]
    pub digest: DigestConfig,

    /// Learning layer and sidecar connection
    #[serde(default)]
    pub learning: LearningConfig,
}

impl OpenClawConfig {
    /// Load configuration using the standard search order:
    /// 1. `$OPENCLAW_CONFIG` environment variable
    /// 2. `./openclaw.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// A file that exists but fails to parse or validate is a fatal error.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("OPENCLAW_CONFIG") {
            let path = PathBuf::from(&path);
            if path.exists() {
                let config = Self::load_from_file(&path)?;
                info!(path = %path.display(), "Loaded config from OPENCLAW_CONFIG");
                return Ok(config);
            }
            warn!(path = %path.display(), "OPENCLAW_CONFIG points to a non-existent file, falling back");
        }

        let local = PathBuf::from("openclaw.toml");
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!("Loaded config from ./openclaw.toml");
            return Ok(config);
        }

        info!("No openclaw.toml found — using built-in defaults");
        Ok(Self::default())
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every constraint the runtime relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.extractor.validate()?;
        self.digest.validate()?;
        self.learning.validate()?;
        Ok(())
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// A content pillar the extractor can attribute insights to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pillar {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Insight extractor tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Pillar catalogue baked into the system prompt.
    #[serde(default)]
    pub pillars: Vec<Pillar>,

    /// Sentinel prefix that opts a note into extraction. Case-sensitive.
    #[serde(default = "default_magic_string")]
    pub magic_string: String,

    /// Minimum content length after the sentinel, in bytes.
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,

    /// Per-path debounce window.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Maximum extractions per LLM batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Minimum spacing between batch deliveries.
    #[serde(default = "default_min_batch_delay_ms")]
    pub min_batch_delay_ms: u64,
}

fn default_magic_string() -> String {
    "::publish".to_string()
}
fn default_min_content_length() -> usize {
    80
}
fn default_debounce_ms() -> u64 {
    5_000
}
fn default_max_batch_size() -> usize {
    5
}
fn default_min_batch_delay_ms() -> u64 {
    30_000
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            pillars: Vec::new(),
            magic_string: default_magic_string(),
            min_content_length: default_min_content_length(),
            debounce_ms: default_debounce_ms(),
            max_batch_size: default_max_batch_size(),
            min_batch_delay_ms: default_min_batch_delay_ms(),
        }
    }
}

impl ExtractorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.magic_string.is_empty() {
            return Err(invalid("extractor.magic_string", "must not be empty"));
        }
        if self.max_batch_size == 0 {
            return Err(invalid("extractor.max_batch_size", "must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Digest
// ============================================================================

/// Insight digest responder tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    /// Settled insights needed for a count-triggered flush.
    #[serde(default = "default_min_insights_to_flush")]
    pub min_insights_to_flush: usize,

    /// Time-triggered flush interval.
    #[serde(default = "default_max_hours_between_flushes")]
    pub max_hours_between_flushes: f64,

    /// Daily quiet window, `HH:MM`.
    #[serde(default = "default_quiet_hours_start")]
    pub quiet_hours_start: String,
    #[serde(default = "default_quiet_hours_end")]
    pub quiet_hours_end: String,

    /// IANA zone name the quiet window is evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Minimum insight age before it is eligible for flushing.
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: f64,

    /// JSONL accumulator file. One responder per path.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Periodic flush-check interval.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

fn default_min_insights_to_flush() -> usize {
    3
}
fn default_max_hours_between_flushes() -> f64 {
    24.0
}
fn default_quiet_hours_start() -> String {
    "22:00".to_string()
}
fn default_quiet_hours_end() -> String {
    "08:00".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_cooldown_hours() -> f64 {
    1.0
}
fn default_store_path() -> PathBuf {
    PathBuf::from("data/insight-queue.jsonl")
}
fn default_check_interval_ms() -> u64 {
    60_000
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            min_insights_to_flush: default_min_insights_to_flush(),
            max_hours_between_flushes: default_max_hours_between_flushes(),
            quiet_hours_start: default_quiet_hours_start(),
            quiet_hours_end: default_quiet_hours_end(),
            timezone: default_timezone(),
            cooldown_hours: default_cooldown_hours(),
            store_path: default_store_path(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

impl DigestConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_insights_to_flush == 0 {
            return Err(invalid("digest.min_insights_to_flush", "must be at least 1"));
        }
        if self.max_hours_between_flushes <= 0.0 {
            return Err(invalid(
                "digest.max_hours_between_flushes",
                "must be a positive number",
            ));
        }
        if self.cooldown_hours < 0.0 || !self.cooldown_hours.is_finite() {
            return Err(invalid("digest.cooldown_hours", "must be non-negative"));
        }
        if self.check_interval_ms == 0 {
            return Err(invalid("digest.check_interval_ms", "must be at least 1"));
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(invalid("digest.store_path", "must not be empty"));
        }
        self.quiet_hours()?;
        Ok(())
    }

    /// Parse the quiet window. Unknown zone names fall back to the system
    /// local zone; malformed `HH:MM` strings are a validation error.
    pub fn quiet_hours(&self) -> Result<QuietHours, ConfigError> {
        let start = parse_minute_of_day(&self.quiet_hours_start).ok_or_else(|| {
            invalid(
                "digest.quiet_hours_start",
                format!("not an HH:MM time: {:?}", self.quiet_hours_start),
            )
        })?;
        let end = parse_minute_of_day(&self.quiet_hours_end).ok_or_else(|| {
            invalid(
                "digest.quiet_hours_end",
                format!("not an HH:MM time: {:?}", self.quiet_hours_end),
            )
        })?;
        Ok(QuietHours::new(start, end, &self.timezone))
    }

    pub fn cooldown_ms(&self) -> u64 {
        (self.cooldown_hours * 3_600_000.0) as u64
    }

    pub fn max_flush_interval_ms(&self) -> u64 {
        (self.max_hours_between_flushes * 3_600_000.0) as u64
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            min_insights_to_flush: self.min_insights_to_flush,
            max_flush_interval_ms: self.max_flush_interval_ms(),
        }
    }
}

// ============================================================================
// Learning
// ============================================================================

/// Whether observed outcomes update posteriors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningPhase {
    /// Selections run but outcomes are not recorded.
    #[default]
    Passive,
    /// Outcomes update posteriors.
    Active,
}

/// Sidecar transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSidecarConfig {
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Sidecar connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SidecarConfig {
    /// Command line for the stdio transport, e.g. `"uvx qortex serve"`.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub http: Option<HttpSidecarConfig>,
}

/// Learning layer tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub phase: LearningPhase,

    /// Token budget for prompt-component selection.
    #[serde(default = "default_token_budget")]
    pub token_budget: u32,

    /// Probability of a deliberate baseline (explore-everything) selection.
    #[serde(default = "default_baseline_rate")]
    pub baseline_rate: f64,

    /// Arms with fewer pulls get their sample boosted for exploration.
    #[serde(default = "default_min_pulls")]
    pub min_pulls: u64,

    #[serde(default = "default_learner_name")]
    pub learner_name: String,

    #[serde(default)]
    pub sidecar: SidecarConfig,
}

fn default_token_budget() -> u32 {
    2_000
}
fn default_baseline_rate() -> f64 {
    0.1
}
fn default_min_pulls() -> u64 {
    5
}
fn default_learner_name() -> String {
    "openclaw".to_string()
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            phase: LearningPhase::default(),
            token_budget: default_token_budget(),
            baseline_rate: default_baseline_rate(),
            min_pulls: default_min_pulls(),
            learner_name: default_learner_name(),
            sidecar: SidecarConfig::default(),
        }
    }
}

impl LearningConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.token_budget == 0 {
            return Err(invalid("learning.token_budget", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.baseline_rate) {
            return Err(invalid("learning.baseline_rate", "must be within [0, 1]"));
        }
        if self.learner_name.is_empty() {
            return Err(invalid("learning.learner_name", "must not be empty"));
        }
        if self.enabled {
            match self.sidecar.transport {
                TransportKind::Stdio => {
                    if self.sidecar.command.as_deref().unwrap_or("").is_empty() {
                        return Err(invalid(
                            "learning.sidecar.command",
                            "required for the stdio transport",
                        ));
                    }
                }
                TransportKind::Http => {
                    let base_url = self
                        .sidecar
                        .http
                        .as_ref()
                        .map(|h| h.base_url.as_str())
                        .unwrap_or("");
                    if base_url.is_empty() {
                        return Err(invalid(
                            "learning.sidecar.http.base_url",
                            "required for the http transport",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        OpenClawConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: OpenClawConfig = toml::from_str(
            r#"
[extractor]
magic_string = "::share"

[[extractor.pillars]]
id = "craft"
name = "Craft"
keywords = ["writing"]

[digest]
min_insights_to_flush = 5
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.extractor.magic_string, "::share");
        assert_eq!(config.extractor.debounce_ms, 5_000);
        assert_eq!(config.digest.min_insights_to_flush, 5);
        assert_eq!(config.digest.quiet_hours_start, "22:00");
        assert_eq!(config.extractor.pillars.len(), 1);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let config: OpenClawConfig = toml::from_str("[extractor]\nmax_batch_size = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "extractor.max_batch_size"
        ));
    }

    #[test]
    fn rejects_malformed_quiet_hours() {
        let config: OpenClawConfig =
            toml::from_str("[digest]\nquiet_hours_start = \"25:00\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_baseline_rate() {
        let config: OpenClawConfig =
            toml::from_str("[learning]\nbaseline_rate = 1.5\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "learning.baseline_rate"
        ));
    }

    #[test]
    fn enabled_stdio_learning_requires_a_command() {
        let config: OpenClawConfig = toml::from_str("[learning]\nenabled = true\n").unwrap();
        assert!(config.validate().is_err());

        let config: OpenClawConfig = toml::from_str(
            "[learning]\nenabled = true\n[learning.sidecar]\ncommand = \"uvx qortex\"\n",
        )
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn enabled_http_learning_requires_a_base_url() {
        let config: OpenClawConfig = toml::from_str(
            "[learning]\nenabled = true\n[learning.sidecar]\ntransport = \"http\"\n",
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config: OpenClawConfig = toml::from_str(
            "[learning]\nenabled = true\n[learning.sidecar]\ntransport = \"http\"\n[learning.sidecar.http]\nbase_url = \"http://localhost:8763\"\n",
        )
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn derived_digest_values() {
        let digest = DigestConfig {
            cooldown_hours: 0.5,
            max_hours_between_flushes: 2.0,
            ..DigestConfig::default()
        };
        assert_eq!(digest.cooldown_ms(), 1_800_000);
        assert_eq!(digest.max_flush_interval_ms(), 7_200_000);
    }
}
