//! Configuration types for the ipguard system
//!
//! The engine never loads configuration itself. It is handed a
//! [`GuardConfig`] through a `tokio::sync::watch` channel and takes a fresh
//! copy at the start of every cycle, so a new value published between
//! cycles (different interval, different threat levels) is picked up
//! without a restart.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::{MAX_BATCH_SIZE, ThreatLevel, batch_name};
use crate::retry::RetryPolicy;

/// Main ipguard configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Firewall connection settings
    pub device: DeviceConfig,

    /// Threat feed location
    #[serde(default)]
    pub feed: FeedConfig,

    /// Primary threat level (0 = complete feed, 100 = most curated)
    #[serde(default = "default_threat_level")]
    pub threat_level: u32,

    /// Whether `additional_threat_levels` are merged into the primary list
    #[serde(default)]
    pub enable_multiple_lists: bool,

    /// Extra levels unioned into the primary list when enabled
    #[serde(default)]
    pub additional_threat_levels: Vec<u32>,

    /// Minutes between two synchronization cycles
    #[serde(default = "default_update_interval_minutes")]
    pub update_interval_minutes: u64,

    /// Snapshot storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Firewall objects maintained by the engine
    #[serde(default)]
    pub rule: RuleConfig,

    /// Engine tuning
    #[serde(default)]
    pub engine: EngineConfig,
}

impl GuardConfig {
    /// Create a configuration for a device with defaults everywhere else
    pub fn new(device: DeviceConfig) -> Self {
        Self {
            device,
            feed: FeedConfig::default(),
            threat_level: default_threat_level(),
            enable_multiple_lists: false,
            additional_threat_levels: Vec::new(),
            update_interval_minutes: default_update_interval_minutes(),
            storage: StorageConfig::default(),
            rule: RuleConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    ///
    /// The primary threat level is rejected when out of range, never
    /// clamped. Additional levels are checked per cycle by
    /// [`GuardConfig::additional_levels`], where a bad one is skipped.
    pub fn validate(&self) -> Result<()> {
        self.device.validate()?;
        self.rule.validate()?;

        if self.feed.base_url.is_empty() {
            return Err(Error::config("Feed base URL cannot be empty"));
        }
        if self.update_interval_minutes == 0 {
            return Err(Error::config("Update interval must be > 0 minutes"));
        }
        if self.engine.max_attempts == 0 {
            return Err(Error::config("Engine max_attempts must be >= 1"));
        }

        self.primary_level()?;

        Ok(())
    }

    /// The validated primary threat level
    pub fn primary_level(&self) -> Result<ThreatLevel> {
        ThreatLevel::try_from(self.threat_level)
    }

    /// Additional levels to fetch this cycle, in configured order
    ///
    /// Empty unless multi-list mode is on. Duplicates and the primary level
    /// are dropped. Each entry keeps its own validation result so a single
    /// bad level cannot hide the others.
    pub fn additional_levels(&self) -> Vec<Result<ThreatLevel>> {
        if !self.enable_multiple_lists {
            return Vec::new();
        }

        let mut seen = vec![self.threat_level];
        let mut levels = Vec::new();
        for &raw in &self.additional_threat_levels {
            if seen.contains(&raw) {
                continue;
            }
            seen.push(raw);
            levels.push(ThreatLevel::try_from(raw));
        }
        levels
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_minutes.saturating_mul(60))
    }
}

/// Firewall connection settings
///
/// Credentials travel with every request; nothing is cached by the client.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Firewall host name or address
    pub host: String,

    /// Admin API port
    #[serde(default = "default_device_port")]
    pub port: u16,

    /// Path of the XML API endpoint
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// URL scheme, `https` for real devices
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// API user
    pub username: String,

    /// API password
    /// ⚠️ NEVER log this value
    pub password: String,

    /// Accept self-signed or device-issued certificates for this device only
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_path", &self.api_path)
            .field("scheme", &self.scheme)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

impl DeviceConfig {
    /// Create a device configuration with the default port and API path
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_device_port(),
            api_path: default_api_path(),
            scheme: default_scheme(),
            username: username.into(),
            password: password.into(),
            accept_invalid_certs: false,
        }
    }

    /// Full URL of the XML API endpoint
    pub fn api_url(&self) -> String {
        format!(
            "{}://{}:{}/{}",
            self.scheme,
            self.host,
            self.port,
            self.api_path.trim_start_matches('/')
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::config("Firewall host cannot be empty"));
        }
        if self.username.is_empty() {
            return Err(Error::config("Firewall username cannot be empty"));
        }
        if self.password.is_empty() {
            return Err(Error::config("Firewall password cannot be empty"));
        }
        match self.scheme.as_str() {
            "https" | "http" => Ok(()),
            other => Err(Error::config(format!(
                "Unsupported firewall URL scheme '{}'",
                other
            ))),
        }
    }
}

/// Threat feed location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Directory URL holding `threat-<level>.txt` files
    #[serde(default = "default_feed_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
}

impl FeedConfig {
    /// URL of the feed file for one level
    pub fn url_for(&self, level: ThreatLevel) -> String {
        format!(
            "{}/threat-{}.txt",
            self.base_url.trim_end_matches('/'),
            level
        )
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_feed_base_url(),
            timeout_secs: default_feed_timeout_secs(),
        }
    }
}

/// Snapshot storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the current snapshot and its backups
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,

    /// Number of timestamped backups kept
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            max_backups: default_max_backups(),
        }
    }
}

/// Firewall objects maintained by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Prefix of the address list objects (`<prefix>_0`, `<prefix>_1`, ...)
    #[serde(default = "default_list_prefix")]
    pub list_prefix: String,

    /// Name of the blocking firewall rule
    #[serde(default = "default_rule_name")]
    pub rule_name: String,

    /// Description shown on the device
    #[serde(default = "default_rule_description")]
    pub description: String,

    /// Addresses per list object, at most 1000
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl RuleConfig {
    /// Name of list object `index`
    pub fn list_name(&self, index: usize) -> String {
        batch_name(&self.list_prefix, index)
    }

    pub fn validate(&self) -> Result<()> {
        if self.list_prefix.is_empty() {
            return Err(Error::config("List prefix cannot be empty"));
        }
        if self.rule_name.is_empty() {
            return Err(Error::config("Rule name cannot be empty"));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(Error::config(format!(
                "Batch size must be between 1 and {}. Got: {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        Ok(())
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            list_prefix: default_list_prefix(),
            rule_name: default_rule_name(),
            description: default_rule_description(),
            batch_size: default_batch_size(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts per phase (fetch, push), including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between two attempts of the same phase (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Delay before the one-shot retry after a failed cycle (in seconds)
    #[serde(default = "default_failure_retry_secs")]
    pub failure_retry_secs: u64,

    /// Probe the firewall credentials before fetching
    #[serde(default = "default_verify_connection")]
    pub verify_connection: bool,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.retry_delay_secs))
    }

    pub fn failure_retry_delay(&self) -> Duration {
        Duration::from_secs(self.failure_retry_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            failure_retry_secs: default_failure_retry_secs(),
            verify_connection: default_verify_connection(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_threat_level() -> u32 {
    50
}

fn default_update_interval_minutes() -> u64 {
    60
}

fn default_device_port() -> u16 {
    4444
}

fn default_api_path() -> String {
    "webconsole/APIController".to_string()
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_feed_base_url() -> String {
    "https://lists.ipthreat.net/file/ipthreat-lists/threat".to_string()
}

fn default_feed_timeout_secs() -> u64 {
    120
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("/var/lib/ipguard")
}

fn default_max_backups() -> usize {
    5
}

fn default_list_prefix() -> String {
    "IPThreatList".to_string()
}

fn default_rule_name() -> String {
    "Block_IPThreat_List".to_string()
}

fn default_rule_description() -> String {
    "Block known malicious IPs from IPThreat.net".to_string()
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    30
}

fn default_failure_retry_secs() -> u64 {
    5 * 60
}

fn default_verify_connection() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    100
}
