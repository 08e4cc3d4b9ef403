use anyhow::Result;
use async_trait::async_trait;

use crate::currency::Currency;

/// Handle to an unsent funding transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionBuilder(pub u64);

#[async_trait]
pub trait Wallet: Send + Sync {
    async fn next_address(&self) -> Result<String>;

    async fn start_transaction(&self) -> Result<TransactionBuilder>;

    /// Returns the unused outputs of an unsent transaction to the wallet.
    async fn drop_transaction(&self, txn: TransactionBuilder);
}

#[async_trait]
pub trait FeeOracle: Send + Sync {
    /// Minimum and maximum fee per byte.
    async fn fee_estimation(&self) -> Result<(Currency, Currency)>;
}
