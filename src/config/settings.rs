use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration settings for the suspicious input guard
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Per-IP throttle and persistence configuration
    pub throttle: ThrottleConfig,
    /// Signature matching and redaction configuration
    pub detection: DetectionConfig,
}

/// How the throttle store writes its state file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Collapse mutations within the debounce interval into one background write
    #[default]
    Debounced,
    /// Write synchronously after every mutation (deterministic, for tests)
    Immediate,
}

/// Throttle configuration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Length of the counting window in milliseconds
    pub window_ms: u64,
    /// Hits allowed per window before the identifier is blocked
    pub limit: u32,
    /// Cooldown in milliseconds once the limit is exceeded
    pub block_ms: u64,
    /// Identifiers idle longer than this are pruned
    pub retention_ms: u64,
    /// Debounce interval for background flushes
    pub flush_debounce_ms: u64,
    /// Upper bound on a single state file write
    pub flush_timeout_ms: u64,
    /// Periodic pruning interval; 0 prunes only on load
    pub prune_interval_ms: u64,
    /// Location of the state file
    pub storage_path: PathBuf,
    pub flush_mode: FlushMode,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            limit: 5,
            block_ms: 5 * 60_000,
            retention_ms: 24 * 60 * 60_000,
            flush_debounce_ms: 2_000,
            flush_timeout_ms: 5_000,
            prune_interval_ms: 0,
            storage_path: PathBuf::from("log").join("suspiciousIps.json"),
            flush_mode: FlushMode::Debounced,
        }
    }
}

impl ThrottleConfig {
    pub fn flush_debounce(&self) -> Duration {
        Duration::from_millis(self.flush_debounce_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn prune_interval(&self) -> Option<Duration> {
        (self.prune_interval_ms > 0).then(|| Duration::from_millis(self.prune_interval_ms))
    }
}

/// Which request structures go through key-aware redaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionScope {
    /// Only the body is redacted; query and path parameters are scanned whole
    #[default]
    BodyOnly,
    /// Query, path parameters and body are all redacted
    All,
}

/// Detection configuration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Samples longer than this many characters are truncated
    pub sample_max_len: usize,
    pub redaction_scope: RedactionScope,
    /// Added to the built-in sensitive key names
    pub extra_sensitive_keys: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sample_max_len: crate::core::DEFAULT_SAMPLE_MAX_LEN,
            redaction_scope: RedactionScope::BodyOnly,
            extra_sensitive_keys: Vec::new(),
        }
    }
}

impl Settings {
    /// Load configuration from `config/guard.*` and environment variables
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(Path::new("config/guard"))
    }

    /// Load configuration from an optional file (any extension `config`
    /// understands), then `GUARD__*` environment variables
    pub fn load_from(file: &Path) -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::from(file).required(false))
            // e.g. GUARD__THROTTLE__LIMIT=10
            .add_source(
                config::Environment::with_prefix("GUARD")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option(
                "throttle.storage_path",
                env::var("SUSPICIOUS_IPS_PATH").ok(),
            )?;

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make the throttle or matcher meaningless
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let invalid = |msg: &str| Err(config::ConfigError::Message(msg.to_string()));

        if self.throttle.window_ms == 0 {
            return invalid("throttle.window_ms must be greater than zero");
        }
        if self.throttle.limit == 0 {
            return invalid("throttle.limit must be greater than zero");
        }
        if self.throttle.storage_path.as_os_str().is_empty() {
            return invalid("throttle.storage_path must not be empty");
        }
        if self.detection.sample_max_len == 0 {
            return invalid("detection.sample_max_len must be greater than zero");
        }
        Ok(())
    }
}
