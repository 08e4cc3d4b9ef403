use std::{path::Path, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use libsql::{Connection, params};
use tokio::sync::Mutex;

use super::connection::new_connection;
use crate::{
    persist::{Persister, Snapshot},
    types::RenterContract,
};

/// Single writing connection. Each save replaces the stored snapshot in one
/// transaction.
#[derive(Clone)]
pub struct Writer {
    conn: Connection,
    lock: Arc<Mutex<()>>,
}

impl Writer {
    pub async fn new(path: &Path) -> Result<Self> {
        let conn = new_connection(path).await?;
        Ok(Self {
            conn,
            lock: Arc::new(Mutex::new(())),
        })
    }

    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        match self.write_snapshot(snapshot).await {
            Ok(()) => {
                self.conn.execute("COMMIT", ()).await?;
                Ok(())
            }
            Err(e) => {
                self.conn.execute("ROLLBACK", ()).await?;
                Err(e)
            }
        }
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        for table in [
            "contracts",
            "old_contracts",
            "renewals",
            "recoverable_contracts",
        ] {
            self.conn
                .execute(&format!("DELETE FROM {}", table), ())
                .await?;
        }

        self.conn
            .execute(
                "INSERT OR REPLACE INTO contractor (id, allowance, block_height, current_period)
                 VALUES (0, ?, ?, ?)",
                params![
                    serde_json::to_string(&snapshot.allowance)?,
                    snapshot.block_height as i64,
                    snapshot.current_period as i64
                ],
            )
            .await?;

        for contract in &snapshot.contracts {
            self.insert_contract("contracts", contract).await?;
        }
        for contract in &snapshot.old_contracts {
            self.insert_contract("old_contracts", contract).await?;
        }
        for (old, new) in &snapshot.renewals {
            self.conn
                .execute(
                    "INSERT INTO renewals (old_id, new_id) VALUES (?, ?)",
                    params![old.to_string(), new.to_string()],
                )
                .await?;
        }
        for contract in &snapshot.recoverable_contracts {
            self.conn
                .execute(
                    "INSERT INTO recoverable_contracts (id, data) VALUES (?, ?)",
                    params![contract.id.to_string(), serde_json::to_string(contract)?],
                )
                .await?;
        }
        Ok(())
    }

    async fn insert_contract(&self, table: &str, contract: &RenterContract) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (id, host_public_key, end_height, data) VALUES (?, ?, ?, ?)",
                    table
                ),
                params![
                    contract.id.to_string(),
                    contract.host_public_key.to_string(),
                    contract.end_height as i64,
                    serde_json::to_string(contract)?
                ],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Persister for Writer {
    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        self.save_snapshot(snapshot).await
    }
}
