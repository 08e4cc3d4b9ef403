use anyhow::Result;
use async_trait::async_trait;

use crate::types::{HostEntry, HostPublicKey, ScoreBreakdown};

/// Scored, priced host records with blacklist/whitelist filtering applied.
#[async_trait]
pub trait HostDb: Send + Sync {
    async fn host(&self, public_key: &HostPublicKey) -> Option<HostEntry>;

    /// Returns up to `n` random unfiltered hosts. Hosts in `exclude` are never
    /// returned; hosts sharing an address range with any of
    /// `address_exclude` are skipped as well.
    async fn random_hosts(
        &self,
        n: usize,
        exclude: &[HostPublicKey],
        address_exclude: &[HostPublicKey],
    ) -> Result<Vec<HostEntry>>;

    async fn score_breakdown(&self, host: &HostEntry) -> Result<ScoreBreakdown>;

    /// Returns the subset of `hosts` that violate the address-range policy.
    async fn check_for_ip_violations(&self, hosts: &[HostPublicKey]) -> Vec<HostPublicKey>;
}
