use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ContractorRow {
    pub allowance: String,
    pub block_height: i64,
    pub current_period: i64,
}

/// A JSON-encoded record.
#[derive(Debug, Deserialize)]
pub struct DataRow {
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct RenewalRow {
    pub old_id: String,
    pub new_id: String,
}
