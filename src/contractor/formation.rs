use tracing::{debug, info, warn};

use super::Contractor;
use crate::{
    currency::Currency,
    error::{Error, Result},
    types::{
        Allowance, BlockHeight, ContractParams, ContractUtility, HostEntry, HostPublicKey,
        RenterContract,
    },
};

impl Contractor {
    /// Rejects hosts that are too expensive or cannot hold a contract for a
    /// full period, and caps the collateral the renter asks for.
    pub(super) fn vet_host(&self, mut host: HostEntry, allowance: &Allowance) -> Result<HostEntry> {
        if host.storage_price > self.policy.max_storage_price {
            return Err(Error::TooExpensive);
        }
        if host.max_duration < allowance.period {
            return Err(Error::InsufficientMaxDuration);
        }
        if host.max_collateral > self.policy.max_collateral {
            host.max_collateral = self.policy.max_collateral;
        }
        Ok(host)
    }

    pub(super) async fn contract_params(
        &self,
        allowance: Allowance,
        host: HostEntry,
        funding: Currency,
        start_height: BlockHeight,
        end_height: BlockHeight,
    ) -> Result<ContractParams> {
        let refund_address = self.wallet.next_address().await.map_err(Error::Wallet)?;
        Ok(ContractParams {
            allowance,
            host,
            funding,
            start_height,
            end_height,
            refund_address,
        })
    }

    /// Forms a contract with `host`. Returns the funds spent and the new
    /// contract, which is already in the live set. A host that already has a
    /// contract still gets the new one, but `Error::DuplicateHost` is
    /// returned carrying what the new contract cost.
    pub async fn new_contract(
        &self,
        host: HostEntry,
        funding: Currency,
        end_height: BlockHeight,
    ) -> Result<(Currency, RenterContract)> {
        let (allowance, block_height) = {
            let state = self.state.read().await;
            (state.allowance, state.block_height)
        };
        if !allowance.is_set() {
            return Err(Error::AllowanceNotSet);
        }
        let host = self.vet_host(host, &allowance)?;
        let public_key = host.public_key.clone();
        let params = self
            .contract_params(allowance, host, funding, block_height, end_height)
            .await?;

        let txn = self.wallet.start_transaction().await.map_err(Error::Wallet)?;
        let mut contract = match self
            .negotiator
            .form_contract(params, txn, self.cancel_token.clone())
            .await
        {
            Ok(contract) => contract,
            Err(e) => {
                self.wallet.drop_transaction(txn).await;
                return Err(e.into());
            }
        };
        contract.utility = ContractUtility::GOOD;
        let spent = contract.total_cost;

        let previous = {
            let mut state = self.state.write().await;
            state
                .pubkeys_to_contract_id
                .insert(public_key.clone(), contract.id)
        };
        if !self.contracts.insert(contract.clone()).await {
            warn!("Formed contract {} is already in the contract set", contract.id);
        }
        info!(
            "Formed contract {} with {} for {}",
            contract.id, public_key, spent
        );
        if let Some(previous) = previous.filter(|p| *p != contract.id) {
            warn!(
                "Formed a second contract with host {} (previous {})",
                public_key, previous
            );
            return Err(Error::DuplicateHost {
                host: public_key,
                spent,
            });
        }
        Ok((spent, contract))
    }

    /// Forms contracts with new hosts until the allowance's host count is
    /// covered by contracts that are good for upload. Returns the number of
    /// contracts formed and the funds left afterwards.
    pub(super) async fn fill_host_gap(
        &self,
        allowance: &Allowance,
        mut funds_remaining: Currency,
    ) -> Result<(usize, Currency)> {
        let contracts = self.contracts.view_all().await;
        let good = contracts
            .iter()
            .filter(|c| c.utility.good_for_upload)
            .count() as u64;
        let needed = allowance.hosts.saturating_sub(good) as usize;
        if needed == 0 {
            return Ok((0, funds_remaining));
        }

        let (mut exclude, end_height) = {
            let state = self.state.read().await;
            let recoverable: Vec<HostPublicKey> = state
                .recoverable_contracts
                .values()
                .map(|c| c.host_public_key.clone())
                .collect();
            (recoverable, state.contract_end_height())
        };
        let mut address_exclude = Vec::new();
        for contract in &contracts {
            exclude.push(contract.host_public_key.clone());
            if !contract.utility.is_canceled() {
                address_exclude.push(contract.host_public_key.clone());
            }
        }

        let initial_funds = allowance.funds.div64(allowance.hosts).div64(3);
        let candidates = self
            .hdb
            .random_hosts(
                needed * 2 + self.policy.random_hosts_buffer_for_score,
                &exclude,
                &address_exclude,
            )
            .await
            .map_err(Error::HostDb)?;
        debug!(
            "Need {} more contracts, got {} candidate hosts",
            needed,
            candidates.len()
        );

        let mut formed = 0;
        for host in candidates {
            if formed >= needed {
                break;
            }
            if self.maintenance_interrupted() {
                info!("Contract formation interrupted");
                break;
            }
            if funds_remaining < initial_funds {
                warn!(
                    "Need to form {} more contracts but only {} remains",
                    needed - formed,
                    funds_remaining
                );
                break;
            }

            let public_key = host.public_key.clone();
            match self.new_contract(host, initial_funds, end_height).await {
                Ok((spent, _)) => {
                    funds_remaining = funds_remaining.saturating_sub(spent);
                    formed += 1;
                    self.save().await;
                }
                Err(Error::DuplicateHost { spent, .. }) => {
                    // Still a live contract that was paid for.
                    funds_remaining = funds_remaining.saturating_sub(spent);
                    formed += 1;
                    self.save().await;
                }
                Err(e) if e.is_fatal_to_pass() => return Err(e),
                Err(e) => {
                    debug!("Attempted to form a contract with {} but failed: {}", public_key, e);
                }
            }
        }
        Ok((formed, funds_remaining))
    }
}
