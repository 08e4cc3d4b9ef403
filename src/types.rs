use std::{fmt, str::FromStr};

use bon::Builder;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sha2::{Digest, Sha256};

use crate::currency::Currency;

pub type BlockHeight = u64;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ContractId(pub [u8; 32]);

impl ContractId {
    /// Derives an id from arbitrary seed material, e.g. a funding transaction.
    pub fn derive(seed: &[u8]) -> Self {
        Self(Sha256::digest(seed).into())
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractId({})", &hex::encode(self.0)[..16])
    }
}

impl FromStr for ContractId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for ContractId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContractId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostPublicKey(pub String);

impl HostPublicKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for HostPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Allowance {
    pub funds: Currency,
    pub hosts: u64,
    pub period: BlockHeight,
    pub renew_window: BlockHeight,
}

impl Allowance {
    pub fn is_set(&self) -> bool {
        *self != Allowance::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContractUtility {
    pub good_for_upload: bool,
    pub good_for_renew: bool,
    /// Once set, the utility can only get worse.
    pub locked: bool,
}

impl ContractUtility {
    pub const GOOD: ContractUtility = ContractUtility {
        good_for_upload: true,
        good_for_renew: true,
        locked: false,
    };

    pub const CANCELED: ContractUtility = ContractUtility {
        good_for_upload: false,
        good_for_renew: false,
        locked: true,
    };

    pub fn is_canceled(&self) -> bool {
        *self == Self::CANCELED
    }

    /// Applies `next` on top of `self`, refusing any improvement of a locked
    /// utility.
    pub fn ratchet(self, next: ContractUtility) -> ContractUtility {
        if !self.locked {
            return next;
        }
        ContractUtility {
            good_for_upload: self.good_for_upload && next.good_for_upload,
            good_for_renew: self.good_for_renew && next.good_for_renew,
            locked: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct RenterContract {
    pub id: ContractId,
    pub host_public_key: HostPublicKey,
    pub start_height: BlockHeight,
    pub end_height: BlockHeight,
    #[builder(default)]
    pub renter_funds: Currency,
    #[builder(default)]
    pub total_cost: Currency,
    /// Bytes currently stored with the host under this contract.
    #[builder(default)]
    pub size: u64,
    #[builder(default)]
    pub upload_spending: Currency,
    #[builder(default)]
    pub download_spending: Currency,
    #[builder(default)]
    pub storage_spending: Currency,
    #[builder(default)]
    pub contract_fee: Currency,
    #[builder(default)]
    pub txn_fee: Currency,
    #[builder(default)]
    pub tax_fee: Currency,
    #[builder(default)]
    pub utility: ContractUtility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverableContract {
    pub id: ContractId,
    pub host_public_key: HostPublicKey,
    pub start_height: BlockHeight,
    pub end_height: BlockHeight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostScan {
    pub timestamp: u64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct HostEntry {
    pub public_key: HostPublicKey,
    #[builder(default)]
    pub net_address: String,
    #[builder(default)]
    pub filtered: bool,
    #[builder(default)]
    pub storage_price: Currency,
    #[builder(default)]
    pub upload_bandwidth_price: Currency,
    #[builder(default)]
    pub download_bandwidth_price: Currency,
    #[builder(default)]
    pub contract_price: Currency,
    #[builder(default)]
    pub collateral: Currency,
    #[builder(default)]
    pub max_collateral: Currency,
    #[builder(default = BlockHeight::MAX)]
    pub max_duration: BlockHeight,
    #[builder(default = vec![HostScan { timestamp: 0, success: true }])]
    pub scan_history: Vec<HostScan>,
}

impl HostEntry {
    /// A host is offline when its most recent two scans both failed, or when
    /// its only scan failed, or when it has never been scanned.
    pub fn is_offline(&self) -> bool {
        match self.scan_history.as_slice() {
            [] => true,
            [only] => !only.success,
            [.., second_last, last] => !(last.success || second_last.success),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub score: Currency,
}

/// Everything the negotiation protocol needs to form or renew one contract.
#[derive(Debug, Clone)]
pub struct ContractParams {
    pub allowance: Allowance,
    pub host: HostEntry,
    pub funding: Currency,
    pub start_height: BlockHeight,
    pub end_height: BlockHeight,
    pub refund_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeriodSpending {
    pub total_allocated: Currency,
    pub contract_fees: Currency,
    pub upload_spending: Currency,
    pub download_spending: Currency,
    pub storage_spending: Currency,
    pub unspent: Currency,
}
