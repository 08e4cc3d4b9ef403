use thiserror::Error as ThisError;

use crate::{
    currency::Currency,
    negotiation::NegotiationError,
    types::{ContractId, HostPublicKey},
};

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("allowance is not set")]
    AllowanceNotSet,
    #[error("invalid allowance: {0}")]
    InvalidAllowance(&'static str),
    #[error("could not find host in hostdb: {0}")]
    HostNotFound(HostPublicKey),
    #[error("host is blacklisted: {0}")]
    HostFiltered(HostPublicKey),
    #[error("host price was too high")]
    TooExpensive,
    #[error("insufficient max duration of host")]
    InsufficientMaxDuration,
    #[error("contract no longer exists: {0}")]
    ContractNotFound(ContractId),
    #[error("contract is marked not good for renew: {0}")]
    NotGoodForRenew(ContractId),
    #[error("contract is being renewed: {0}")]
    ContractRenewing(ContractId),
    #[error("already have a contract with host {host}")]
    DuplicateHost { host: HostPublicKey, spent: Currency },
    #[error("contract renewal with host was unsuccessful: {0}")]
    Negotiation(#[from] NegotiationError),
    #[error("contract {id} marked as bad after {failures} consecutive failed renew attempts: {source}")]
    RenewalAbandoned {
        id: ContractId,
        failures: u64,
        source: Box<Error>,
    },
    #[error("fee estimation failed: {0}")]
    FeeEstimation(anyhow::Error),
    #[error("wallet error: {0}")]
    Wallet(anyhow::Error),
    #[error("hostdb error: {0}")]
    HostDb(anyhow::Error),
    #[error("session invalidated for contract {0}")]
    SessionInvalidated(ContractId),
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Infrastructure failures abort the whole maintenance pass instead of
    /// skipping a single contract.
    pub fn is_fatal_to_pass(&self) -> bool {
        matches!(
            self,
            Error::FeeEstimation(_) | Error::HostDb(_) | Error::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
