use std::path::Path;

use anyhow::{Context, Result};
use deadpool::managed::{Object, Pool};
use libsql::{de::from_row, params};
use serde::de::DeserializeOwned;

use super::{
    pool::{Manager, new_pool},
    types::{ContractorRow, DataRow, RenewalRow},
};
use crate::{persist::Snapshot, types::ContractId};

#[derive(Clone)]
pub struct Reader {
    pool: Pool<Manager>,
}

impl Reader {
    pub async fn new(path: &Path) -> Result<Self> {
        let pool = new_pool(path).await?;
        Ok(Self { pool })
    }

    async fn get_connection(&self) -> Result<Object<Manager>> {
        self.pool
            .get()
            .await
            .context("Failed to get connection for database reader pool")
    }

    /// Loads the stored snapshot, or `None` if nothing was ever saved.
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let conn = self.get_connection().await?;
        let mut rows = conn
            .query(
                "SELECT allowance, block_height, current_period FROM contractor WHERE id = 0",
                params![],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let contractor: ContractorRow = from_row(&row)?;

        let mut renewals: Vec<(ContractId, ContractId)> = Vec::new();
        let mut rows = conn
            .query("SELECT old_id, new_id FROM renewals ORDER BY rowid", params![])
            .await?;
        while let Some(row) = rows.next().await? {
            let renewal: RenewalRow = from_row(&row)?;
            renewals.push((renewal.old_id.parse()?, renewal.new_id.parse()?));
        }

        Ok(Some(Snapshot {
            allowance: serde_json::from_str(&contractor.allowance)?,
            block_height: contractor.block_height as u64,
            current_period: contractor.current_period as u64,
            contracts: self.load_data(&conn, "contracts").await?,
            old_contracts: self.load_data(&conn, "old_contracts").await?,
            renewals,
            recoverable_contracts: self.load_data(&conn, "recoverable_contracts").await?,
        }))
    }

    async fn load_data<T: DeserializeOwned>(
        &self,
        conn: &libsql::Connection,
        table: &str,
    ) -> Result<Vec<T>> {
        let mut rows = conn
            .query(&format!("SELECT data FROM {} ORDER BY rowid", table), params![])
            .await?;
        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            let row: DataRow = from_row(&row)?;
            results.push(
                serde_json::from_str(&row.data)
                    .with_context(|| format!("Corrupt row in {}", table))?,
            );
        }
        Ok(results)
    }
}
