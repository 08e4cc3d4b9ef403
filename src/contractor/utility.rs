use tracing::{debug, warn};

use super::Contractor;
use crate::{
    currency::Currency,
    error::{Error, Result},
    policy::Policy,
    types::{Allowance, BlockHeight, ContractUtility, HostEntry, RenterContract},
};

/// Inputs shared by every classification in one pass.
#[derive(Debug, Clone, Copy)]
pub struct UtilityContext {
    pub allowance: Allowance,
    pub block_height: BlockHeight,
    /// Zero disables the score check.
    pub min_score: Currency,
}

/// Cost of storing, uploading and downloading one sector for a period.
pub fn sector_price(host: &HostEntry, period: BlockHeight, sector_size: u64) -> Currency {
    let storage = host.storage_price.mul64(sector_size).mul64(period);
    let upload = host.upload_bandwidth_price.mul64(sector_size);
    let download = host.download_bandwidth_price.mul64(sector_size);
    storage + upload + download
}

/// True when the contract cannot pay for three more sectors, or when less
/// than `threshold` of its total cost remains.
pub fn is_low_on_funds(
    contract: &RenterContract,
    host: &HostEntry,
    period: BlockHeight,
    sector_size: u64,
    threshold: f64,
) -> bool {
    let three_sectors = sector_price(host, period, sector_size).mul64(3);
    let below_fraction = contract
        .renter_funds
        .fraction_of(contract.total_cost)
        .is_some_and(|remaining| remaining < threshold);
    contract.renter_funds < three_sectors || below_fraction
}

/// Decides the utility of one contract. `host` is `None` when the host is
/// unknown to the hostdb; `score` is only consulted for known hosts.
pub fn classify(
    contract: &RenterContract,
    host: Option<&HostEntry>,
    score: Currency,
    is_offline: bool,
    ctx: &UtilityContext,
    policy: &Policy,
) -> ContractUtility {
    let mut u = contract.utility;
    if !u.locked {
        u.good_for_upload = true;
        u.good_for_renew = true;
    }

    let Some(host) = host.filter(|h| !h.filtered) else {
        u.good_for_upload = false;
        u.good_for_renew = false;
        return u;
    };

    if !ctx.min_score.is_zero() && score < ctx.min_score {
        u.good_for_upload = false;
        u.good_for_renew = false;
        return u;
    }

    if is_offline {
        u.good_for_upload = false;
        u.good_for_renew = false;
        return u;
    }

    if ctx.block_height + ctx.allowance.renew_window >= contract.end_height {
        u.good_for_upload = false;
        return u;
    }

    if is_low_on_funds(
        contract,
        host,
        ctx.allowance.period,
        policy.sector_size,
        policy.min_contract_fund_upload_threshold,
    ) {
        u.good_for_upload = false;
    }
    u
}

impl Contractor {
    /// Minimum acceptable host score: the lowest score among a random sample
    /// slightly larger than the allowance's host count, divided by the score
    /// leeway. Zero when the hostdb returns no hosts.
    pub(super) async fn minimum_host_score(&self, hosts: u64) -> Result<Currency> {
        let sample = self
            .hdb
            .random_hosts(
                hosts as usize + self.policy.random_hosts_buffer_for_score,
                &[],
                &[],
            )
            .await
            .map_err(Error::HostDb)?;
        let mut lowest: Option<Currency> = None;
        for host in &sample {
            let score = self
                .hdb
                .score_breakdown(host)
                .await
                .map_err(Error::HostDb)?
                .score;
            lowest = Some(lowest.map_or(score, |l| l.min(score)));
        }
        Ok(lowest.map_or(Currency::ZERO, |l| l.div64(self.policy.score_leeway)))
    }

    /// Recomputes the utility of every live contract.
    pub async fn mark_contracts_utility(&self) -> Result<()> {
        let (allowance, block_height) = {
            let state = self.state.read().await;
            (state.allowance, state.block_height)
        };
        let ctx = UtilityContext {
            allowance,
            block_height,
            min_score: self.minimum_host_score(allowance.hosts).await?,
        };

        for contract in self.contracts.view_all().await {
            let host = self.hdb.host(&contract.host_public_key).await;
            let score = match &host {
                Some(h) if !h.filtered => self
                    .hdb
                    .score_breakdown(h)
                    .await
                    .map_err(Error::HostDb)?
                    .score,
                _ => Currency::ZERO,
            };
            let is_offline = host.as_ref().is_some_and(HostEntry::is_offline);
            let utility = classify(
                &contract,
                host.as_ref(),
                score,
                is_offline,
                &ctx,
                &self.policy,
            );
            match self.update_contract_utility(&contract.id, utility).await {
                Ok(applied) => {
                    if applied != contract.utility {
                        debug!(
                            "Contract {} utility {:?} -> {:?}",
                            contract.id, contract.utility, applied
                        );
                    }
                }
                Err(Error::ContractNotFound(id)) => {
                    warn!("Contract {} disappeared while marking utility", id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContractId, HostPublicKey};

    fn ctx(block_height: BlockHeight) -> UtilityContext {
        UtilityContext {
            allowance: Allowance {
                funds: Currency::coins(1_000),
                hosts: 5,
                period: 100,
                renew_window: 20,
            },
            block_height,
            min_score: Currency::new(10),
        }
    }

    fn host() -> HostEntry {
        HostEntry::builder()
            .public_key(HostPublicKey::new("ed25519:good"))
            .build()
    }

    fn contract(utility: ContractUtility) -> RenterContract {
        RenterContract::builder()
            .id(ContractId([1; 32]))
            .host_public_key(HostPublicKey::new("ed25519:good"))
            .start_height(0)
            .end_height(100)
            .renter_funds(Currency::new(90))
            .total_cost(Currency::new(100))
            .utility(utility)
            .build()
    }

    #[test]
    fn test_healthy_contract_is_good() {
        let policy = Policy::default();
        let u = classify(
            &contract(ContractUtility::default()),
            Some(&host()),
            Currency::new(100),
            false,
            &ctx(10),
            &policy,
        );
        assert_eq!(u, ContractUtility::GOOD);
    }

    #[test]
    fn test_missing_filtered_low_score_offline_hosts_lose_all_utility() {
        let policy = Policy::default();
        let c = contract(ContractUtility::GOOD);
        let mut filtered = host();
        filtered.filtered = true;

        let none = ContractUtility::default();
        assert_eq!(classify(&c, None, Currency::ZERO, false, &ctx(10), &policy), none);
        assert_eq!(
            classify(&c, Some(&filtered), Currency::new(100), false, &ctx(10), &policy),
            none
        );
        assert_eq!(
            classify(&c, Some(&host()), Currency::new(9), false, &ctx(10), &policy),
            none
        );
        assert_eq!(
            classify(&c, Some(&host()), Currency::new(100), true, &ctx(10), &policy),
            none
        );
    }

    #[test]
    fn test_renew_window_only_blocks_upload() {
        let policy = Policy::default();
        let u = classify(
            &contract(ContractUtility::GOOD),
            Some(&host()),
            Currency::new(100),
            false,
            &ctx(85),
            &policy,
        );
        assert!(!u.good_for_upload);
        assert!(u.good_for_renew);
    }

    #[test]
    fn test_low_funds_block_upload() {
        let policy = Policy::default();
        let mut c = contract(ContractUtility::GOOD);
        c.renter_funds = Currency::new(4);
        let u = classify(&c, Some(&host()), Currency::new(100), false, &ctx(10), &policy);
        assert!(!u.good_for_upload);
        assert!(u.good_for_renew);

        let mut priced = host();
        priced.upload_bandwidth_price = Currency::new(1);
        c.renter_funds = Currency::new(90);
        let u = classify(&c, Some(&priced), Currency::new(100), false, &ctx(10), &policy);
        assert!(!u.good_for_upload);
    }

    #[test]
    fn test_locked_contract_never_regains_utility() {
        let policy = Policy::default();
        let u = classify(
            &contract(ContractUtility::CANCELED),
            Some(&host()),
            Currency::new(100),
            false,
            &ctx(10),
            &policy,
        );
        assert_eq!(u, ContractUtility::CANCELED);
    }

    #[test]
    fn test_zero_min_score_disables_score_check() {
        let policy = Policy::default();
        let mut context = ctx(10);
        context.min_score = Currency::ZERO;
        let u = classify(
            &contract(ContractUtility::default()),
            Some(&host()),
            Currency::ZERO,
            false,
            &context,
            &policy,
        );
        assert_eq!(u, ContractUtility::GOOD);
    }
}
