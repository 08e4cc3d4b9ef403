use std::collections::HashMap;

use indexmap::IndexMap;

use crate::{
    history::RenewalHistory,
    types::{Allowance, BlockHeight, ContractId, HostPublicKey, RecoverableContract},
};

/// Mutable contractor state, guarded by a single `RwLock` in
/// [`super::Contractor`]. Readers take the shared lock; the lock is never
/// held across network I/O.
#[derive(Debug, Default)]
pub struct ContractorState {
    pub allowance: Allowance,
    pub block_height: BlockHeight,
    /// First block of the billing period that spending is attributed to.
    pub current_period: BlockHeight,
    pub history: RenewalHistory,
    /// Consecutive host-fault renewal failures per contract.
    pub num_failed_renews: HashMap<ContractId, u64>,
    /// Latest live contract per host. Derived from the contract set.
    pub pubkeys_to_contract_id: HashMap<HostPublicKey, ContractId>,
    pub recoverable_contracts: IndexMap<ContractId, RecoverableContract>,
}

impl ContractorState {
    /// End height for contracts formed or renewed in the current period.
    pub fn contract_end_height(&self) -> BlockHeight {
        self.current_period + self.allowance.period + self.allowance.renew_window
    }

    /// Moves to `height`, rolling the billing period forward once the renew
    /// window of the current period has been entered.
    pub fn set_block_height(&mut self, height: BlockHeight) {
        self.block_height = height;
        if !self.allowance.is_set() || self.allowance.period == 0 {
            return;
        }
        while self.block_height + self.allowance.renew_window
            >= self.current_period + self.allowance.period
        {
            self.current_period += self.allowance.period;
        }
    }
}
