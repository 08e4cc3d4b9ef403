use std::collections::HashMap;

use thiserror::Error as ThisError;

use crate::types::{BlockHeight, ContractId, RenterContract};

/// Upper bound on how far back a renewal chain is walked. A longer chain means
/// the links contain a cycle.
pub const MAX_CHAIN_HOPS: usize = 10_000;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("contract {0} cannot be renewed into itself")]
    SelfLink(ContractId),
    #[error("contract {0} was already renewed")]
    AlreadyRenewed(ContractId),
    #[error("contract {0} already has a predecessor")]
    AlreadyHasPredecessor(ContractId),
}

/// Why a walk back through the renewal chain stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEnd {
    /// The first contract of the lineage was reached.
    Origin,
    /// A predecessor started before the period being accounted.
    OutsidePeriod(ContractId),
    /// A link points at a contract missing from historic storage.
    MissingPredecessor(ContractId),
    /// The hop guard tripped.
    Cycle,
}

/// Renewal links between contracts plus the metadata of superseded contracts.
///
/// Forward and backward links are only ever written together by
/// [`RenewalHistory::link`], so one map can never hold an entry the other
/// lacks.
#[derive(Debug, Clone, Default)]
pub struct RenewalHistory {
    renewed_from: HashMap<ContractId, ContractId>,
    renewed_to: HashMap<ContractId, ContractId>,
    old_contracts: HashMap<ContractId, RenterContract>,
}

impl RenewalHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `new` is the renewal of `old`. Each id can be renewed at
    /// most once and have at most one predecessor.
    pub fn link(&mut self, old: ContractId, new: ContractId) -> Result<(), HistoryError> {
        if old == new {
            return Err(HistoryError::SelfLink(old));
        }
        if self.renewed_to.contains_key(&old) {
            return Err(HistoryError::AlreadyRenewed(old));
        }
        if self.renewed_from.contains_key(&new) {
            return Err(HistoryError::AlreadyHasPredecessor(new));
        }
        self.renewed_from.insert(new, old);
        self.renewed_to.insert(old, new);
        Ok(())
    }

    pub fn archive(&mut self, contract: RenterContract) {
        self.old_contracts.insert(contract.id, contract);
    }

    pub fn renewed_from(&self, id: &ContractId) -> Option<ContractId> {
        self.renewed_from.get(id).copied()
    }

    pub fn renewed_to(&self, id: &ContractId) -> Option<ContractId> {
        self.renewed_to.get(id).copied()
    }

    pub fn old_contract(&self, id: &ContractId) -> Option<&RenterContract> {
        self.old_contracts.get(id)
    }

    pub fn old_contracts(&self) -> impl Iterator<Item = &RenterContract> {
        self.old_contracts.values()
    }

    pub fn is_archived(&self, id: &ContractId) -> bool {
        self.old_contracts.contains_key(id)
    }

    /// All `(old, new)` links, sorted for stable output.
    pub fn links(&self) -> Vec<(ContractId, ContractId)> {
        let mut links: Vec<_> = self.renewed_to.iter().map(|(o, n)| (*o, *n)).collect();
        links.sort();
        links
    }

    /// Predecessors of `id` that started at or after `period_start`, newest
    /// first, together with the reason the walk stopped.
    pub fn predecessors_in_period(
        &self,
        id: &ContractId,
        period_start: BlockHeight,
    ) -> (Vec<&RenterContract>, ChainEnd) {
        let mut found = vec![];
        let mut current = *id;
        for _ in 0..MAX_CHAIN_HOPS {
            let Some(prev) = self.renewed_from(&current) else {
                return (found, ChainEnd::Origin);
            };
            let Some(contract) = self.old_contracts.get(&prev) else {
                return (found, ChainEnd::MissingPredecessor(prev));
            };
            if contract.start_height < period_start {
                return (found, ChainEnd::OutsidePeriod(prev));
            }
            found.push(contract);
            current = prev;
        }
        (found, ChainEnd::Cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{currency::Currency, types::HostPublicKey};

    fn contract(n: u8, start_height: BlockHeight) -> RenterContract {
        RenterContract::builder()
            .id(ContractId([n; 32]))
            .host_public_key(HostPublicKey::new("ed25519:host"))
            .start_height(start_height)
            .end_height(start_height + 100)
            .upload_spending(Currency::new(n as u128))
            .build()
    }

    #[test]
    fn test_link_is_one_shot() {
        let mut history = RenewalHistory::new();
        let (a, b, c) = (ContractId([1; 32]), ContractId([2; 32]), ContractId([3; 32]));
        history.link(a, b).unwrap();
        assert_eq!(history.renewed_from(&b), Some(a));
        assert_eq!(history.renewed_to(&a), Some(b));

        assert_eq!(history.link(a, c), Err(HistoryError::AlreadyRenewed(a)));
        assert_eq!(
            history.link(c, b),
            Err(HistoryError::AlreadyHasPredecessor(b))
        );
        assert_eq!(history.link(c, c), Err(HistoryError::SelfLink(c)));
        assert_eq!(history.links(), vec![(a, b)]);
    }

    #[test]
    fn test_predecessors_stop_outside_period() {
        let mut history = RenewalHistory::new();
        let first = contract(1, 50);
        let second = contract(2, 120);
        let live = ContractId([3; 32]);
        history.link(first.id, second.id).unwrap();
        history.link(second.id, live).unwrap();
        history.archive(first.clone());
        history.archive(second.clone());

        let (found, end) = history.predecessors_in_period(&live, 100);
        assert_eq!(found, vec![&second]);
        assert_eq!(end, ChainEnd::OutsidePeriod(first.id));

        let (found, end) = history.predecessors_in_period(&live, 0);
        assert_eq!(found, vec![&second, &first]);
        assert_eq!(end, ChainEnd::Origin);
    }

    #[test]
    fn test_predecessors_stop_at_missing_contract() {
        let mut history = RenewalHistory::new();
        let live = ContractId([3; 32]);
        let lost = ContractId([2; 32]);
        history.link(lost, live).unwrap();

        let (found, end) = history.predecessors_in_period(&live, 0);
        assert!(found.is_empty());
        assert_eq!(end, ChainEnd::MissingPredecessor(lost));
    }

    #[test]
    fn test_predecessor_cycle_is_bounded() {
        let mut history = RenewalHistory::new();
        let a = contract(1, 10);
        let b = contract(2, 10);
        history.link(a.id, b.id).unwrap();
        history.link(b.id, a.id).unwrap();
        history.archive(a.clone());
        history.archive(b);

        let (found, end) = history.predecessors_in_period(&a.id, 0);
        assert_eq!(end, ChainEnd::Cycle);
        assert_eq!(found.len(), MAX_CHAIN_HOPS);
    }
}
