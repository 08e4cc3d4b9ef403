use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::{currency::Currency, logging, policy::Policy, types::Allowance};

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[clap(
    version = "0.1.0",
    about = "Contractor",
    long_about = r#"Keeps a renter's storage contracts funded, renewed and replaced"#
)]
pub struct Config {
    #[clap(
        long,
        env = "LOG_FORMAT",
        help = "Log format (plain, json)",
        default_value = "plain"
    )]
    pub log_format: logging::Format,

    #[clap(
        long,
        env = "DATA_DIR",
        help = "Directory path for the contractor database"
    )]
    pub data_dir: PathBuf,

    #[clap(
        long,
        env = "ALLOWANCE_FUNDS",
        help = "Funds available for contracts each period, in whole coins",
        default_value = "5000"
    )]
    pub allowance_funds: u64,

    #[clap(
        long,
        env = "ALLOWANCE_HOSTS",
        help = "Number of hosts to keep contracts with",
        default_value = "50"
    )]
    pub allowance_hosts: u64,

    #[clap(
        long,
        env = "ALLOWANCE_PERIOD",
        help = "Billing period length in blocks",
        default_value = "12960"
    )]
    pub allowance_period: u64,

    #[clap(
        long,
        env = "ALLOWANCE_RENEW_WINDOW",
        help = "Blocks before expiry during which contracts are renewed",
        default_value = "4320"
    )]
    pub allowance_renew_window: u64,

    #[clap(
        long,
        env = "BLOCK_INTERVAL_MS",
        help = "Interval between simulated blocks in milliseconds",
        default_value = "1000"
    )]
    pub block_interval_ms: u64,

    #[clap(
        long,
        env = "SIMULATED_HOSTS",
        help = "Number of hosts in the simulated host network",
        default_value = "100"
    )]
    pub simulated_hosts: usize,

    #[clap(
        long,
        env = "BLOCKING_MAINTENANCE",
        help = "Wait for a running maintenance pass instead of skipping"
    )]
    pub blocking_maintenance: bool,

    #[clap(
        long,
        env = "CONSECUTIVE_RENEWALS_BEFORE_REPLACEMENT",
        help = "Host-fault renewal failures tolerated before a contract is abandoned",
        default_value = "5"
    )]
    pub consecutive_renewals_before_replacement: u64,
}

impl Config {
    pub fn allowance(&self) -> Allowance {
        Allowance {
            funds: Currency::coins(u128::from(self.allowance_funds)),
            hosts: self.allowance_hosts,
            period: self.allowance_period,
            renew_window: self.allowance_renew_window,
        }
    }

    pub fn policy(&self) -> Policy {
        Policy {
            blocking_maintenance: self.blocking_maintenance,
            consecutive_renewals_before_replacement: self.consecutive_renewals_before_replacement,
            ..Policy::default()
        }
    }
}
