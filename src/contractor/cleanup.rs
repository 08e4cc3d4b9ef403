use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use super::Contractor;
use crate::types::{ContractUtility, HostPublicKey, RenterContract};

impl Contractor {
    /// Housekeeping that runs at the start of every maintenance pass.
    pub(super) async fn cleanup(&self) {
        self.recover_contracts().await;
        self.archive_contracts().await;
        self.check_for_duplicates().await;
        self.prune_pubkey_map().await;
        self.prune_redundant_address_range().await;
    }

    /// Re-fetches contracts the store lost track of. Expired ones are
    /// forgotten; failed recoveries are retried on the next pass.
    async fn recover_contracts(&self) {
        let (block_height, recoverable) = {
            let state = self.state.read().await;
            let recoverable: Vec<_> = state.recoverable_contracts.values().cloned().collect();
            (state.block_height, recoverable)
        };

        let mut changed = false;
        for rc in recoverable {
            if self.maintenance_interrupted() {
                break;
            }
            if block_height >= rc.end_height || self.contracts.view(&rc.id).await.is_some() {
                debug!("Dropping recoverable contract {}", rc.id);
                self.state.write().await.recoverable_contracts.shift_remove(&rc.id);
                changed = true;
                continue;
            }

            let mut contract = match self
                .negotiator
                .recover_contract(&rc, self.cancel_token.clone())
                .await
            {
                Ok(contract) => contract,
                Err(e) => {
                    debug!("Failed to recover contract {}: {}", rc.id, e);
                    continue;
                }
            };
            contract.utility = ContractUtility::GOOD;
            let (id, host) = (contract.id, contract.host_public_key.clone());
            if !self.contracts.insert(contract).await {
                warn!("Recovered contract {} is already live", id);
            }
            {
                let mut state = self.state.write().await;
                state.recoverable_contracts.shift_remove(&rc.id);
                state.pubkeys_to_contract_id.insert(host, id);
            }
            info!("Recovered contract {}", id);
            changed = true;
        }
        if changed {
            self.save().await;
        }
    }

    /// Moves contracts whose end height has passed into historic storage.
    async fn archive_contracts(&self) {
        let block_height = self.block_height().await;
        let mut archived = 0;
        for contract in self.contracts.view_all().await {
            if block_height <= contract.end_height {
                continue;
            }
            let Some(acquired) = self.contracts.acquire(&contract.id, &self.cancel_token).await
            else {
                continue;
            };
            let metadata = acquired.metadata().await;
            {
                let mut state = self.state.write().await;
                if state.pubkeys_to_contract_id.get(&metadata.host_public_key)
                    == Some(&metadata.id)
                {
                    state.pubkeys_to_contract_id.remove(&metadata.host_public_key);
                }
                state.num_failed_renews.remove(&metadata.id);
                state.history.archive(metadata);
            }
            self.contracts.delete(acquired).await;
            archived += 1;
        }
        if archived > 0 {
            info!("Archived {} expired contracts", archived);
            self.save().await;
        }
    }

    /// Resolves hosts that hold more than one live contract. The newest
    /// contract (by start height, then id) is kept; the older ones are
    /// linked into its renewal chain, canceled and moved to history.
    ///
    /// Two contracts with the same host are assumed to be renewals of each
    /// other.
    async fn check_for_duplicates(&self) {
        let mut by_host: BTreeMap<HostPublicKey, Vec<RenterContract>> = BTreeMap::new();
        for contract in self.contracts.view_all().await {
            by_host
                .entry(contract.host_public_key.clone())
                .or_default()
                .push(contract);
        }

        let mut resolved = false;
        for (host, mut contracts) in by_host {
            if contracts.len() < 2 {
                continue;
            }
            contracts.sort_by_key(|c| (c.start_height, c.id));
            let Some(newest) = contracts.last().map(|c| c.id) else {
                continue;
            };
            warn!(
                "Found {} contracts with host {}, keeping {}",
                contracts.len(),
                host,
                newest
            );

            {
                let mut state = self.state.write().await;
                for pair in contracts.windows(2) {
                    if let Err(e) = state.history.link(pair[0].id, pair[1].id) {
                        debug!("Not linking duplicates {} -> {}: {}", pair[0].id, pair[1].id, e);
                    }
                }
                state.pubkeys_to_contract_id.insert(host.clone(), newest);
            }

            for older in &contracts[..contracts.len() - 1] {
                let Some(acquired) = self.contracts.acquire(&older.id, &self.cancel_token).await
                else {
                    continue;
                };
                acquired.update_utility(ContractUtility::CANCELED).await;
                let metadata = acquired.metadata().await;
                self.state.write().await.history.archive(metadata);
                self.contracts.delete(acquired).await;
            }
            resolved = true;
        }
        if resolved {
            self.save().await;
        }
    }

    /// Drops index entries that point at contracts no longer live.
    async fn prune_pubkey_map(&self) {
        let live: HashSet<_> = self.contracts.ids().await.into_iter().collect();
        let mut state = self.state.write().await;
        state
            .pubkeys_to_contract_id
            .retain(|_, id| live.contains(id));
    }

    /// Cancels contracts whose hosts now share an address range with another
    /// host under contract.
    async fn prune_redundant_address_range(&self) {
        let contracts: Vec<_> = self
            .contracts
            .view_all()
            .await
            .into_iter()
            .filter(|c| !c.utility.is_canceled())
            .collect();
        let hosts: Vec<_> = contracts.iter().map(|c| c.host_public_key.clone()).collect();
        let violations: HashSet<_> = self
            .hdb
            .check_for_ip_violations(&hosts)
            .await
            .into_iter()
            .collect();

        for contract in contracts
            .iter()
            .filter(|c| violations.contains(&c.host_public_key))
        {
            info!(
                "Canceling contract {} with {} for an address range violation",
                contract.id, contract.host_public_key
            );
            if let Err(e) = self.cancel_contract(&contract.id).await {
                warn!("Unable to cancel contract {}: {}", contract.id, e);
            }
        }
    }
}
