use scopeguard::defer;
use tracing::{debug, info, warn};

use super::{Contractor, planner::FileContractRenewal};
use crate::{
    contract_set::AcquiredContract,
    currency::Currency,
    error::{Error, Result},
    types::{Allowance, BlockHeight, ContractId, ContractUtility, RenterContract},
};

/// Result of one renewal work item.
#[derive(Debug)]
pub enum RenewalOutcome {
    Committed { new_id: ContractId, spent: Currency },
    /// `permanent` is set when the contract was given up on and will not be
    /// retried.
    Failed { error: Error, permanent: bool },
}

impl RenewalOutcome {
    pub fn spent(&self) -> Currency {
        match self {
            RenewalOutcome::Committed { spent, .. } => *spent,
            RenewalOutcome::Failed { .. } => Currency::ZERO,
        }
    }
}

impl Contractor {
    /// Renews or refreshes one contract. The contract is marked as renewing
    /// for the whole call, so no new sessions can be opened against it. The
    /// mark is also cleared when the call is dropped midway.
    pub async fn renew_contract(
        &self,
        renewal: &FileContractRenewal,
        allowance: &Allowance,
        block_height: BlockHeight,
        end_height: BlockHeight,
    ) -> RenewalOutcome {
        {
            let _state = self.state.write().await;
            self.renewing_set().insert(renewal.id);
        }
        defer! {
            self.renewing_set().remove(&renewal.id);
        }
        let result = self
            .managed_renew(renewal, allowance, block_height, end_height)
            .await;

        match result {
            Ok((new_id, spent)) => RenewalOutcome::Committed { new_id, spent },
            Err(error) => {
                let permanent = matches!(error, Error::RenewalAbandoned { .. });
                RenewalOutcome::Failed { error, permanent }
            }
        }
    }

    async fn managed_renew(
        &self,
        renewal: &FileContractRenewal,
        allowance: &Allowance,
        block_height: BlockHeight,
        end_height: BlockHeight,
    ) -> Result<(ContractId, Currency)> {
        self.sessions
            .invalidate(&renewal.id, &self.cancel_token)
            .await?;

        let acquired = match self.contracts.acquire(&renewal.id, &self.cancel_token).await {
            Some(acquired) => acquired,
            None if self.cancel_token.is_cancelled() => return Err(Error::Cancelled),
            None => return Err(Error::ContractNotFound(renewal.id)),
        };
        let old = acquired.metadata().await;
        if !old.utility.good_for_renew {
            return Err(Error::NotGoodForRenew(old.id));
        }

        debug!("Renewing contract {} with {}", old.id, renewal.amount);
        let negotiated = self
            .negotiate_renewal(&old, renewal.amount, allowance, block_height, end_height)
            .await;
        match negotiated {
            Ok(new_contract) => self.commit_renewal(acquired, old, new_contract).await,
            Err(e) => Err(self.record_failure(acquired, &old, allowance, block_height, e).await),
        }
    }

    async fn negotiate_renewal(
        &self,
        contract: &RenterContract,
        funding: Currency,
        allowance: &Allowance,
        start_height: BlockHeight,
        end_height: BlockHeight,
    ) -> Result<RenterContract> {
        if !allowance.is_set() {
            return Err(Error::AllowanceNotSet);
        }
        let host = self
            .hdb
            .host(&contract.host_public_key)
            .await
            .ok_or_else(|| Error::HostNotFound(contract.host_public_key.clone()))?;
        if host.filtered {
            return Err(Error::HostFiltered(host.public_key));
        }
        let host = self.vet_host(host, allowance)?;
        let params = self
            .contract_params(*allowance, host, funding, start_height, end_height)
            .await?;

        let txn = self.wallet.start_transaction().await.map_err(Error::Wallet)?;
        match self
            .negotiator
            .renew_contract(contract, params, txn, self.cancel_token.clone())
            .await
        {
            Ok(contract) => Ok(contract),
            Err(e) => {
                self.wallet.drop_transaction(txn).await;
                Err(e.into())
            }
        }
    }

    async fn commit_renewal(
        &self,
        acquired: AcquiredContract,
        old: RenterContract,
        mut new_contract: RenterContract,
    ) -> Result<(ContractId, Currency)> {
        new_contract.utility = ContractUtility::GOOD;
        let new_id = new_contract.id;
        let spent = new_contract.total_cost;
        if !self.contracts.insert(new_contract).await {
            warn!("Renewed contract {} is already in the contract set", new_id);
        }

        acquired.update_utility(ContractUtility::CANCELED).await;
        let archived = acquired.metadata().await;
        {
            let mut state = self.state.write().await;
            if let Err(e) = state.history.link(old.id, new_id) {
                warn!("Could not link renewal {} -> {}: {}", old.id, new_id, e);
            }
            state.history.archive(archived);
            state
                .pubkeys_to_contract_id
                .insert(old.host_public_key.clone(), new_id);
            state.num_failed_renews.remove(&old.id);
        }
        self.contracts.delete(acquired).await;
        self.save().await;

        info!(
            "Renewed contract {} with {} into {} for {}",
            old.id, old.host_public_key, new_id, spent
        );
        Ok((new_id, spent))
    }

    /// Counts host-fault failures and abandons the contract once it has
    /// failed too often in the second half of its renew window.
    async fn record_failure(
        &self,
        acquired: AcquiredContract,
        old: &RenterContract,
        allowance: &Allowance,
        block_height: BlockHeight,
        error: Error,
    ) -> Error {
        let host_fault = matches!(&error, Error::Negotiation(e) if e.host_fault);
        let failures = {
            let mut state = self.state.write().await;
            if host_fault {
                *state.num_failed_renews.entry(old.id).or_default() += 1;
            }
            state.num_failed_renews.get(&old.id).copied().unwrap_or(0)
        };

        let second_half_of_window = block_height + allowance.renew_window / 2 >= old.end_height;
        if failures >= self.policy.consecutive_renewals_before_replacement && second_half_of_window
        {
            acquired.update_utility(ContractUtility::CANCELED).await;
            drop(acquired);
            self.save().await;
            warn!(
                "Contract {} with {} marked as bad after {} consecutive failed renewals",
                old.id, old.host_public_key, failures
            );
            return Error::RenewalAbandoned {
                id: old.id,
                failures,
                source: Box::new(error),
            };
        }

        warn!(
            "Attempted to renew contract {} with {} but failed ({} consecutive failures): {}",
            old.id, old.host_public_key, failures, error
        );
        error
    }
}
