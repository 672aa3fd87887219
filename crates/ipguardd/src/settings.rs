//! Environment-based daemon settings
//!
//! Every setting comes from an `IPGUARD_*` variable. Parsing goes through a
//! lookup function so tests do not have to touch the process environment.

use anyhow::{Context, Result, bail};
use ipguard_core::config::{DeviceConfig, GuardConfig};
use ipguard_core::ThreatLevel;
use std::path::PathBuf;
use std::str::FromStr;

/// Daemon settings read from the environment
#[derive(Clone)]
pub struct Settings {
    pub firewall_host: String,
    pub firewall_port: Option<u16>,
    pub username: String,
    pub password: String,
    pub accept_invalid_certs: bool,
    pub threat_level: u32,
    pub enable_multiple_lists: bool,
    pub additional_threat_levels: Vec<u32>,
    pub update_interval_minutes: u64,
    pub feed_base_url: Option<String>,
    pub state_dir: PathBuf,
    pub max_retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("firewall_host", &self.firewall_host)
            .field("firewall_port", &self.firewall_port)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("threat_level", &self.threat_level)
            .field("enable_multiple_lists", &self.enable_multiple_lists)
            .field("additional_threat_levels", &self.additional_threat_levels)
            .field("update_interval_minutes", &self.update_interval_minutes)
            .field("state_dir", &self.state_dir)
            .finish_non_exhaustive()
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<bool> {
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            _ => bail!("{} must be true or false. Got: {}", key, v),
        },
    }
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let additional_threat_levels = lookup("IPGUARD_ADDITIONAL_THREAT_LEVELS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u32>().with_context(|| {
                    format!("IPGUARD_ADDITIONAL_THREAT_LEVELS contains an invalid level '{}'", s)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            firewall_host: lookup("IPGUARD_FIREWALL_HOST").unwrap_or_default(),
            firewall_port: parse_var(&lookup, "IPGUARD_FIREWALL_PORT")?,
            username: lookup("IPGUARD_FIREWALL_USERNAME").unwrap_or_default(),
            password: lookup("IPGUARD_FIREWALL_PASSWORD").unwrap_or_default(),
            accept_invalid_certs: parse_flag(&lookup, "IPGUARD_ACCEPT_INVALID_CERTS")?,
            threat_level: parse_var(&lookup, "IPGUARD_THREAT_LEVEL")?.unwrap_or(50),
            enable_multiple_lists: parse_flag(&lookup, "IPGUARD_ENABLE_MULTIPLE_LISTS")?,
            additional_threat_levels,
            update_interval_minutes: parse_var(&lookup, "IPGUARD_UPDATE_INTERVAL_MINUTES")?
                .unwrap_or(60),
            feed_base_url: lookup("IPGUARD_FEED_BASE_URL").filter(|s| !s.is_empty()),
            state_dir: lookup("IPGUARD_STATE_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/var/lib/ipguard")),
            max_retries: parse_var(&lookup, "IPGUARD_MAX_RETRIES")?,
            retry_delay_secs: parse_var(&lookup, "IPGUARD_RETRY_DELAY_SECS")?,
            log_file: lookup("IPGUARD_LOG_FILE")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            log_level: lookup("IPGUARD_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the settings with actionable messages
    pub fn validate(&self) -> Result<()> {
        if self.firewall_host.is_empty() {
            bail!(
                "IPGUARD_FIREWALL_HOST is required. \
                Set it via: export IPGUARD_FIREWALL_HOST=firewall.example.lan"
            );
        }
        if self.firewall_host.contains("://") || self.firewall_host.contains('/') {
            bail!(
                "IPGUARD_FIREWALL_HOST must be a host name or address, not a URL. Got: {}",
                self.firewall_host
            );
        }
        if self.username.is_empty() {
            bail!("IPGUARD_FIREWALL_USERNAME is required");
        }
        if self.password.is_empty() {
            bail!("IPGUARD_FIREWALL_PASSWORD is required");
        }

        if let Err(e) = ThreatLevel::try_from(self.threat_level) {
            bail!("IPGUARD_THREAT_LEVEL: {}", e);
        }

        if !(1..=10080).contains(&self.update_interval_minutes) {
            bail!(
                "IPGUARD_UPDATE_INTERVAL_MINUTES must be between 1 and 10080. Got: {}",
                self.update_interval_minutes
            );
        }

        if let Some(ref url) = self.feed_base_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                bail!("IPGUARD_FEED_BASE_URL must use HTTP or HTTPS scheme. Got: {}", url);
            }
        }

        if let Some(max_retries) = self.max_retries {
            if !(1..=10).contains(&max_retries) {
                bail!("IPGUARD_MAX_RETRIES must be between 1 and 10. Got: {}", max_retries);
            }
        }

        if let Some(retry_delay) = self.retry_delay_secs {
            if !(1..=300).contains(&retry_delay) {
                bail!(
                    "IPGUARD_RETRY_DELAY_SECS must be between 1 and 300 seconds. Got: {}",
                    retry_delay
                );
            }
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => bail!(
                "IPGUARD_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Engine configuration for these settings
    pub fn to_guard_config(&self) -> GuardConfig {
        let mut device = DeviceConfig::new(&self.firewall_host, &self.username, &self.password);
        if let Some(port) = self.firewall_port {
            device.port = port;
        }
        device.accept_invalid_certs = self.accept_invalid_certs;

        let mut config = GuardConfig::new(device);
        config.threat_level = self.threat_level;
        config.enable_multiple_lists = self.enable_multiple_lists;
        config.additional_threat_levels = self.additional_threat_levels.clone();
        config.update_interval_minutes = self.update_interval_minutes;
        config.storage.dir = self.state_dir.clone();
        if let Some(ref url) = self.feed_base_url {
            config.feed.base_url = url.clone();
        }
        if let Some(max_retries) = self.max_retries {
            config.engine.max_attempts = max_retries;
        }
        if let Some(retry_delay) = self.retry_delay_secs {
            config.engine.retry_delay_secs = retry_delay;
        }
        config
    }
}
