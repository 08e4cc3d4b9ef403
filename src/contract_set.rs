use std::sync::Arc;

use indexmap::IndexMap;
use tokio::{
    select,
    sync::{Mutex, OwnedMutexGuard, RwLock},
};
use tokio_util::sync::CancellationToken;

use crate::types::{ContractId, ContractUtility, RenterContract};

struct SafeContract {
    header: RwLock<RenterContract>,
    lock: Arc<Mutex<()>>,
}

/// Exclusive ownership of one live contract. Dropping it returns the
/// contract to the set.
pub struct AcquiredContract {
    contract: Arc<SafeContract>,
    _guard: OwnedMutexGuard<()>,
}

impl AcquiredContract {
    pub async fn metadata(&self) -> RenterContract {
        self.contract.header.read().await.clone()
    }

    /// Updates the utility, never letting a locked utility improve.
    pub async fn update_utility(&self, utility: ContractUtility) -> ContractUtility {
        let mut header = self.contract.header.write().await;
        header.utility = header.utility.ratchet(utility);
        header.utility
    }
}

/// Live contracts, in insertion order. Views never block on acquired
/// contracts; acquiring an id blocks only other acquirers of that id.
#[derive(Clone, Default)]
pub struct ContractSet {
    contracts: Arc<RwLock<IndexMap<ContractId, Arc<SafeContract>>>>,
}

impl ContractSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `contract`, replacing nothing: returns false if the id is
    /// already live.
    pub async fn insert(&self, contract: RenterContract) -> bool {
        let mut contracts = self.contracts.write().await;
        if contracts.contains_key(&contract.id) {
            return false;
        }
        contracts.insert(
            contract.id,
            Arc::new(SafeContract {
                header: RwLock::new(contract),
                lock: Arc::new(Mutex::new(())),
            }),
        );
        true
    }

    /// Waits for exclusive ownership of `id`. Returns `None` if the contract
    /// does not exist, was deleted while waiting, or `cancel_token` fired.
    pub async fn acquire(
        &self,
        id: &ContractId,
        cancel_token: &CancellationToken,
    ) -> Option<AcquiredContract> {
        let contract = self.contracts.read().await.get(id).cloned()?;
        let guard = select! {
            guard = contract.lock.clone().lock_owned() => guard,
            _ = cancel_token.cancelled() => return None,
        };
        let still_live = self
            .contracts
            .read()
            .await
            .get(id)
            .is_some_and(|c| Arc::ptr_eq(c, &contract));
        if !still_live {
            return None;
        }
        Some(AcquiredContract {
            contract,
            _guard: guard,
        })
    }

    /// Removes an acquired contract from the live set.
    pub async fn delete(&self, acquired: AcquiredContract) {
        let id = acquired.contract.header.read().await.id;
        self.contracts.write().await.shift_remove(&id);
    }

    pub async fn view(&self, id: &ContractId) -> Option<RenterContract> {
        let contract = self.contracts.read().await.get(id).cloned()?;
        let header = contract.header.read().await.clone();
        Some(header)
    }

    pub async fn view_all(&self) -> Vec<RenterContract> {
        let contracts: Vec<_> = self.contracts.read().await.values().cloned().collect();
        let mut views = Vec::with_capacity(contracts.len());
        for contract in contracts {
            views.push(contract.header.read().await.clone());
        }
        views
    }

    pub async fn ids(&self) -> Vec<ContractId> {
        self.contracts.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.contracts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
