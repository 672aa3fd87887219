// # HTTP Feed Source
//
// This crate provides the HTTP-based threat feed for ipguard.
//
// ## Feed Layout
//
// One plain-text file per threat level under a common base URL:
//
// ```text
// https://lists.ipthreat.net/file/ipthreat-lists/threat/threat-<level>.txt
// ```
//
// ## Behavior
//
// - One GET per `fetch`, no retries (the engine owns the retry policy)
// - Request timeout from `FeedConfig::timeout_secs` (2 minutes by default)
// - gzip/deflate responses decoded transparently
// - Non-2xx statuses and transport errors map to `Error::FeedUnreachable`

use ipguard_core::config::FeedConfig;
use ipguard_core::parser::parse_feed_with_stats;
use ipguard_core::traits::FeedSource;
use ipguard_core::{AddressSet, Error, Result, ThreatLevel};

use std::time::Duration;

/// User agent sent with every feed request
pub const USER_AGENT: &str = concat!("ipguard/", env!("CARGO_PKG_VERSION"));

/// HTTP threat feed
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    /// Feed location and timeout
    config: FeedConfig,

    /// HTTP client, reused across fetches
    client: reqwest::Client,
}

impl HttpFeedSource {
    /// Create a feed source from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the HTTP client cannot be built.
    pub fn new(config: FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::config(format!("Failed to create feed HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create a feed source for `base_url` with default settings
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Self::new(FeedConfig {
            base_url: base_url.into(),
            ..FeedConfig::default()
        })
    }

    /// URL fetched for `level`
    pub fn url_for(&self, level: ThreatLevel) -> String {
        self.config.url_for(level)
    }

    async fn download(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::feed_unreachable(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::feed_unreachable(format!(
                "HTTP error {} from {}",
                status, url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| Error::feed_unreachable(format!("Failed to read feed body: {}", e)))
    }
}

#[async_trait::async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, level: ThreatLevel) -> Result<AddressSet> {
        let url = self.url_for(level);
        tracing::debug!("Downloading threat list from {}", url);

        let body = self.download(&url).await?;
        let (set, stats) = parse_feed_with_stats(&body);

        tracing::info!(
            "Threat list level {}: {} lines, {} unique addresses",
            level,
            stats.lines,
            set.len()
        );
        if stats.malformed > 0 {
            tracing::debug!(
                "Threat list level {}: {} malformed lines ignored",
                level,
                stats.malformed
            );
        }

        Ok(set)
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}
