use tracing::{debug, info};

use super::{Contractor, utility::is_low_on_funds};
use crate::{
    currency::Currency,
    error::Result,
    policy::Policy,
    types::{Allowance, BlockHeight, ContractId, HostEntry, RenterContract},
};

/// An instruction to renew a contract with a specific amount of funding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileContractRenewal {
    pub id: ContractId,
    pub amount: Currency,
}

/// Work for one pass. `renew_set` holds contracts about to expire and is
/// always funded before `refresh_set`, which holds contracts that ran out of
/// money.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkPlan {
    pub renew_set: Vec<FileContractRenewal>,
    pub refresh_set: Vec<FileContractRenewal>,
}

impl WorkPlan {
    pub fn is_empty(&self) -> bool {
        self.renew_set.is_empty() && self.refresh_set.is_empty()
    }

    pub fn contains(&self, id: &ContractId) -> bool {
        self.renew_set
            .iter()
            .chain(&self.refresh_set)
            .any(|r| r.id == *id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalDecision {
    /// Inside the renew window; funding comes from the estimator.
    Renew,
    /// Out of funds; refresh with the given amount.
    Refresh(Currency),
    Skip,
}

pub fn renewal_decision(
    contract: &RenterContract,
    host: &HostEntry,
    allowance: &Allowance,
    block_height: BlockHeight,
    policy: &Policy,
) -> RenewalDecision {
    if block_height + allowance.renew_window >= contract.end_height {
        return RenewalDecision::Renew;
    }
    if is_low_on_funds(
        contract,
        host,
        allowance.period,
        policy.sector_size,
        policy.min_contract_fund_renewal_threshold,
    ) {
        // Spending may have come in one burst. Double the last funding.
        return RenewalDecision::Refresh(contract.total_cost.mul64(2));
    }
    RenewalDecision::Skip
}

impl Contractor {
    /// Scans every live contract and builds the renew and refresh sets.
    /// Estimation errors for a single contract skip that contract; errors
    /// that are fatal to the pass are returned.
    pub async fn plan_renewals(
        &self,
        allowance: &Allowance,
        block_height: BlockHeight,
    ) -> Result<WorkPlan> {
        let mut plan = WorkPlan::default();
        for contract in self.contracts.view_all().await {
            debug!("Examining a contract: {} {}", contract.host_public_key, contract.id);
            let Some(host) = self.hdb.host(&contract.host_public_key).await else {
                debug!("Contract skipped because its host is unknown");
                continue;
            };
            if host.filtered {
                debug!("Contract skipped because it is filtered");
                continue;
            }
            if !contract.utility.good_for_renew {
                debug!("Contract skipped because it is not good for renew");
                continue;
            }

            match renewal_decision(&contract, &host, allowance, block_height, &self.policy) {
                RenewalDecision::Renew => {
                    match self
                        .estimate_renew_funding_requirements(&contract, block_height, allowance)
                        .await
                    {
                        Ok(amount) => {
                            debug!("Contract {} added to the renew set", contract.id);
                            plan.renew_set.push(FileContractRenewal {
                                id: contract.id,
                                amount,
                            });
                        }
                        Err(e) if e.is_fatal_to_pass() => return Err(e),
                        Err(e) => {
                            debug!(
                                "Contract {} skipped, could not estimate renew funding: {}",
                                contract.id, e
                            );
                        }
                    }
                }
                RenewalDecision::Refresh(amount) => {
                    debug!(
                        "Contract {} added to the refresh set: {} of {} remaining",
                        contract.id, contract.renter_funds, contract.total_cost
                    );
                    plan.refresh_set.push(FileContractRenewal {
                        id: contract.id,
                        amount,
                    });
                }
                RenewalDecision::Skip => {}
            }
        }
        if !plan.is_empty() {
            info!(
                "Renewing {} contracts and refreshing {} contracts",
                plan.renew_set.len(),
                plan.refresh_set.len()
            );
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContractUtility, HostPublicKey};

    fn allowance() -> Allowance {
        Allowance {
            funds: Currency::coins(1_000),
            hosts: 5,
            period: 100,
            renew_window: 20,
        }
    }

    fn host() -> HostEntry {
        HostEntry::builder()
            .public_key(HostPublicKey::new("ed25519:host"))
            .build()
    }

    fn contract(renter_funds: u128, total_cost: u128) -> RenterContract {
        RenterContract::builder()
            .id(ContractId([1; 32]))
            .host_public_key(HostPublicKey::new("ed25519:host"))
            .start_height(0)
            .end_height(100)
            .renter_funds(Currency::new(renter_funds))
            .total_cost(Currency::new(total_cost))
            .utility(ContractUtility::GOOD)
            .build()
    }

    #[test]
    fn test_contract_in_renew_window_is_renewed() {
        let decision = renewal_decision(
            &contract(90, 100),
            &host(),
            &allowance(),
            85,
            &Policy::default(),
        );
        assert_eq!(decision, RenewalDecision::Renew);
    }

    #[test]
    fn test_renew_window_outranks_low_funds() {
        let decision = renewal_decision(
            &contract(2, 100),
            &host(),
            &allowance(),
            85,
            &Policy::default(),
        );
        assert_eq!(decision, RenewalDecision::Renew);
    }

    #[test]
    fn test_exhausted_contract_is_refreshed_with_double_cost() {
        let decision = renewal_decision(
            &contract(2, 100),
            &host(),
            &allowance(),
            10,
            &Policy::default(),
        );
        assert_eq!(decision, RenewalDecision::Refresh(Currency::new(200)));
    }

    #[test]
    fn test_healthy_contract_is_skipped() {
        let decision = renewal_decision(
            &contract(50, 100),
            &host(),
            &allowance(),
            10,
            &Policy::default(),
        );
        assert_eq!(decision, RenewalDecision::Skip);
    }

    #[test]
    fn test_three_sector_floor_triggers_refresh() {
        let mut pricey = host();
        pricey.download_bandwidth_price = Currency::new(1);
        let decision = renewal_decision(
            &contract(50, 100),
            &pricey,
            &allowance(),
            10,
            &Policy::default(),
        );
        assert_eq!(decision, RenewalDecision::Refresh(Currency::new(200)));
    }
}
