use tracing::{debug, warn};

use super::Contractor;
use crate::{
    currency::{Currency, tax},
    error::{Error, Result},
    history::ChainEnd,
    retry::retry,
    types::{Allowance, BlockHeight, RenterContract},
};

/// Everything the renewal funding estimate depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingInputs {
    pub data_stored: u64,
    pub period: BlockHeight,
    pub block_height: BlockHeight,
    pub storage_price: Currency,
    pub upload_bandwidth_price: Currency,
    pub contract_price: Currency,
    /// Upload spending of the contract and its predecessors this period.
    pub prev_upload_spending: Currency,
    /// Download spending of the contract and its predecessors this period.
    pub prev_download_spending: Currency,
    pub txn_fees: Currency,
    pub minimum: Currency,
}

/// Floor for any renewal: `funds * fraction / hosts`.
pub fn minimum_funding(allowance: &Allowance, fraction: f64) -> Currency {
    allowance.funds.mul_float(fraction).div64(allowance.hosts)
}

pub fn estimate_renew_funding(inputs: &FundingInputs) -> Currency {
    let data_stored = Currency::from(inputs.data_stored);
    let maintenance_cost = data_stored
        .mul64(inputs.period)
        .mul(inputs.storage_price);

    let mut prev_upload_data = inputs.prev_upload_spending;
    if !inputs.upload_bandwidth_price.is_zero() {
        prev_upload_data = prev_upload_data.div(inputs.upload_bandwidth_price);
    }
    // Prices may have changed since the uploads happened.
    if prev_upload_data > data_stored {
        prev_upload_data = data_stored;
    }
    let new_uploads_cost = inputs.prev_upload_spending
        + prev_upload_data
            .mul64(inputs.period)
            .mul(inputs.storage_price);
    let new_downloads_cost = inputs.prev_download_spending;

    let before_tax =
        maintenance_cost + new_uploads_cost + new_downloads_cost + inputs.contract_price;
    let after_tax = before_tax + tax(inputs.block_height, before_tax);

    let mut estimate = after_tax + inputs.txn_fees;
    estimate += estimate.div64(3);
    estimate.max(inputs.minimum)
}

impl Contractor {
    /// Transaction fees for one contract transaction set at the current
    /// maximum fee rate.
    pub(super) async fn estimate_txn_fees(&self) -> Result<Currency> {
        let (_, max_fee) = retry(
            || self.fee_oracle.fee_estimation(),
            "fee estimation",
            self.backoff.clone(),
            self.retry_token(),
        )
        .await
        .map_err(Error::FeeEstimation)?;
        Ok(max_fee.mul64(
            self.policy.estimated_file_contract_transaction_set_size,
        ))
    }

    /// Estimates how much a renewal of `contract` needs for the next period,
    /// from the data it stores and the spending of its renewal lineage in the
    /// current period.
    pub async fn estimate_renew_funding_requirements(
        &self,
        contract: &RenterContract,
        block_height: BlockHeight,
        allowance: &Allowance,
    ) -> Result<Currency> {
        let host = self
            .hdb
            .host(&contract.host_public_key)
            .await
            .ok_or_else(|| Error::HostNotFound(contract.host_public_key.clone()))?;
        if host.filtered {
            return Err(Error::HostFiltered(host.public_key));
        }

        let (prev_upload_spending, prev_download_spending) =
            self.lineage_spending(contract).await;
        let txn_fees = self.estimate_txn_fees().await?;

        let inputs = FundingInputs {
            data_stored: contract.size,
            period: allowance.period,
            block_height,
            storage_price: host.storage_price,
            upload_bandwidth_price: host.upload_bandwidth_price,
            contract_price: host.contract_price,
            prev_upload_spending,
            prev_download_spending,
            txn_fees,
            minimum: minimum_funding(allowance, self.policy.file_contract_minimum_funding),
        };
        let estimate = estimate_renew_funding(&inputs);
        debug!("Estimated renewal funding for {}: {}", contract.id, estimate);
        Ok(estimate)
    }

    /// Upload and download spending of `contract` plus every predecessor that
    /// started in the current period.
    async fn lineage_spending(&self, contract: &RenterContract) -> (Currency, Currency) {
        let mut upload = contract.upload_spending;
        let mut download = contract.download_spending;
        let state = self.state.read().await;
        let (predecessors, end) = state
            .history
            .predecessors_in_period(&contract.id, state.current_period);
        for prev in predecessors {
            upload += prev.upload_spending;
            download += prev.download_spending;
        }
        match end {
            ChainEnd::MissingPredecessor(id) => {
                warn!("A known previous contract is not found in old contracts: {}", id)
            }
            ChainEnd::Cycle => warn!("Renewal chain of {} contains a cycle", contract.id),
            ChainEnd::Origin | ChainEnd::OutsidePeriod(_) => {}
        }
        (upload, download)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> FundingInputs {
        FundingInputs {
            data_stored: 1_000,
            period: 100,
            block_height: 0,
            storage_price: Currency::new(10),
            upload_bandwidth_price: Currency::new(5),
            contract_price: Currency::new(3_000),
            prev_upload_spending: Currency::new(2_500),
            prev_download_spending: Currency::new(700),
            txn_fees: Currency::new(300),
            minimum: Currency::ZERO,
        }
    }

    #[test]
    fn test_estimate_breakdown() {
        // maintenance 1_000 * 100 * 10 = 1_000_000
        // implied uploads 2_500 / 5 = 500 bytes -> 500 * 100 * 10 = 500_000
        // uploads 2_500 + 500_000, downloads 700, contract price 3_000
        // before tax 1_506_200, tax 58_741, fees 300 -> 1_565_241
        // margin 521_747 -> 2_086_988
        assert_eq!(estimate_renew_funding(&inputs()), Currency::new(2_086_988));
    }

    #[test]
    fn test_implied_uploads_clamped_to_stored_data() {
        let mut cheap = inputs();
        cheap.upload_bandwidth_price = Currency::new(1);
        cheap.prev_upload_spending = Currency::new(1_000_000);
        let mut clamped = cheap;
        clamped.upload_bandwidth_price = Currency::new(2);
        // Both imply more than the 1_000 stored bytes.
        assert_eq!(
            estimate_renew_funding(&cheap),
            estimate_renew_funding(&clamped)
        );
    }

    #[test]
    fn test_zero_upload_price_uses_spending_as_bytes() {
        let mut free = inputs();
        free.upload_bandwidth_price = Currency::ZERO;
        free.prev_upload_spending = Currency::new(10);
        let mut priced = free;
        priced.upload_bandwidth_price = Currency::new(1);
        assert_eq!(estimate_renew_funding(&free), estimate_renew_funding(&priced));
    }

    #[test]
    fn test_minimum_is_a_floor() {
        let mut small = inputs();
        small.minimum = Currency::coins(1);
        assert_eq!(estimate_renew_funding(&small), Currency::coins(1));
    }

    #[test]
    fn test_minimum_funding() {
        let allowance = Allowance {
            funds: Currency::new(1_000),
            hosts: 5,
            period: 100,
            renew_window: 10,
        };
        assert_eq!(minimum_funding(&allowance, 0.15), Currency::new(30));
    }
}
