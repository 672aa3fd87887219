// # Feed Source Trait
//
// Defines the interface for retrieving the address set of one threat level.
//
// ## Implementations
//
// - HTTP: `ipguard-feed-http` crate (IPThreat text files)
//
// ## Usage
//
// ```rust,ignore
// use ipguard_core::{FeedSource, ThreatLevel};
//
// let set = source.fetch(ThreatLevel::new(50)?).await?;
// println!("{} addresses", set.len());
// ```

use async_trait::async_trait;

use crate::model::{AddressSet, ThreatLevel};

/// Trait for threat feed implementations
///
/// A feed source performs a single download per call and parses it with
/// [`crate::parser::parse_feed`]. It must not retry: the engine wraps the
/// whole fetch phase in its own retry policy.
///
/// # Errors
///
/// Transport and HTTP failures are reported as
/// [`crate::Error::FeedUnreachable`]. Malformed lines are never an error.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse the feed for `level`
    async fn fetch(&self, level: ThreatLevel) -> Result<AddressSet, crate::Error>;

    /// Short name used in logs
    fn source_name(&self) -> &'static str;
}
