use crate::currency::{COIN_PRECISION, Currency};

/// Bytes per sector.
pub const SECTOR_SIZE: u64 = 1 << 22;

/// Fixed tunables of the maintenance engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    /// Below this fraction of remaining funds a contract stops being used
    /// for uploads.
    pub min_contract_fund_upload_threshold: f64,
    /// Below this fraction of remaining funds a contract is refreshed.
    pub min_contract_fund_renewal_threshold: f64,
    /// Fraction of `allowance.funds / allowance.hosts` that a renewal is
    /// always funded with at least.
    pub file_contract_minimum_funding: f64,
    /// The lowest score of a random host sample is divided by this to get
    /// the minimum acceptable score.
    pub score_leeway: u64,
    /// Extra hosts requested on top of the allowance's host count when
    /// sampling scores or forming contracts.
    pub random_hosts_buffer_for_score: usize,
    /// Host-fault renewal failures tolerated before a contract is abandoned.
    pub consecutive_renewals_before_replacement: u64,
    /// Hosts charging more than this per byte per block are rejected.
    pub max_storage_price: Currency,
    pub max_collateral: Currency,
    /// Estimated size in bytes of a contract formation transaction set.
    pub estimated_file_contract_transaction_set_size: u64,
    pub sector_size: u64,
    /// Block until the maintenance lock is free instead of skipping the pass.
    pub blocking_maintenance: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            min_contract_fund_upload_threshold: 0.05,
            min_contract_fund_renewal_threshold: 0.03,
            file_contract_minimum_funding: 0.15,
            score_leeway: 100,
            random_hosts_buffer_for_score: 50,
            consecutive_renewals_before_replacement: 5,
            // 30,000 coins per TB per 4320-block month.
            max_storage_price: Currency::new(30_000 * COIN_PRECISION / 1_000_000_000_000 / 4320),
            max_collateral: Currency::coins(1_000),
            estimated_file_contract_transaction_set_size: 2048,
            sector_size: SECTOR_SIZE,
            blocking_maintenance: false,
        }
    }
}
