use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Allowance, BlockHeight, ContractId, RecoverableContract, RenterContract};

/// Durable image of the contractor. The pubkey index is not stored; it is
/// rebuilt from `contracts` on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub allowance: Allowance,
    pub block_height: BlockHeight,
    pub current_period: BlockHeight,
    pub contracts: Vec<RenterContract>,
    pub old_contracts: Vec<RenterContract>,
    /// `(old, new)` renewal links.
    pub renewals: Vec<(ContractId, ContractId)>,
    pub recoverable_contracts: Vec<RecoverableContract>,
}

#[async_trait]
pub trait Persister: Send + Sync {
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Discards every snapshot. Useful when durability is handled elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersister;

#[async_trait]
impl Persister for NoopPersister {
    async fn save(&self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }
}
