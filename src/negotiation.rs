use async_trait::async_trait;
use thiserror::Error as ThisError;
use tokio_util::sync::CancellationToken;

use crate::{
    types::{ContractParams, RecoverableContract, RenterContract},
    wallet::TransactionBuilder,
};

/// A failed negotiation, classified upstream by whether the remote host was
/// at fault.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct NegotiationError {
    pub host_fault: bool,
    pub message: String,
}

impl NegotiationError {
    pub fn host_fault(message: impl Into<String>) -> Self {
        Self {
            host_fault: true,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            host_fault: false,
            message: message.into(),
        }
    }
}

/// The wire exchange with a host. Implementations must return promptly with
/// an error once `cancel_token` fires.
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn form_contract(
        &self,
        params: ContractParams,
        txn: TransactionBuilder,
        cancel_token: CancellationToken,
    ) -> Result<RenterContract, NegotiationError>;

    async fn renew_contract(
        &self,
        contract: &RenterContract,
        params: ContractParams,
        txn: TransactionBuilder,
        cancel_token: CancellationToken,
    ) -> Result<RenterContract, NegotiationError>;

    /// Fetches the latest revision of a contract the renter lost track of.
    async fn recover_contract(
        &self,
        contract: &RecoverableContract,
        cancel_token: CancellationToken,
    ) -> Result<RenterContract, NegotiationError>;
}
