// # Firewall Client Trait
//
// Defines the interface for installing the blocklist on the firewall.
//
// ## Implementations
//
// - Sophos XML API: `ipguard-firewall-sophos` crate
//
// ## Ordering
//
// The engine pushes every batch of a cycle before it pushes the rule, so the
// rule never references a list object that does not exist yet.

use async_trait::async_trait;

use crate::config::{DeviceConfig, RuleConfig};
use crate::model::RemoteBatch;

/// Trait for firewall API implementations
///
/// Clients are stateless apart from a reusable transport handle. Device
/// address and credentials are passed on every call and never cached.
///
/// Both push operations are upserts keyed by object name: repeating a push
/// with the same name replaces the object instead of duplicating it.
///
/// # Errors
///
/// - [`crate::Error::RemoteAuth`]: credentials rejected (never retried)
/// - [`crate::Error::RemoteApi`]: the device reported a failure in the body
/// - [`crate::Error::RemoteTransport`]: network or HTTP-level failure
#[async_trait]
pub trait FirewallClient: Send + Sync {
    /// Check that the device is reachable and accepts the credentials
    async fn verify_connection(&self, device: &DeviceConfig) -> Result<(), crate::Error>;

    /// Create or replace the address list object named `batch.name`
    async fn push_address_list(
        &self,
        device: &DeviceConfig,
        batch: &RemoteBatch,
    ) -> Result<(), crate::Error>;

    /// Create or replace the blocking rule
    ///
    /// The rule's source networks are exactly the list objects
    /// `rule.list_name(0) .. rule.list_name(batch_count - 1)`.
    async fn push_rule(
        &self,
        device: &DeviceConfig,
        rule: &RuleConfig,
        batch_count: usize,
    ) -> Result<(), crate::Error>;

    /// Short name used in logs
    fn client_name(&self) -> &'static str;
}
