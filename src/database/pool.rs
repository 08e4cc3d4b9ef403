use std::path::{Path, PathBuf};

use anyhow::Context;
use deadpool::managed::{self, Pool, RecycleError};
use libsql::{Builder, Error};

use super::tables::initialize_database;

pub const MAX_READERS: usize = 4;

#[derive(Debug)]
pub struct Manager {
    path: PathBuf,
}

impl Manager {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl managed::Manager for Manager {
    type Type = libsql::Connection;
    type Error = Error;

    async fn create(&self) -> Result<Self::Type, Error> {
        let db = Builder::new_local(&self.path).build().await?;
        let conn = db.connect()?;
        initialize_database(&conn).await?;
        Ok(conn)
    }

    /// A pooled connection is reused only if it can still see the schema.
    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> managed::RecycleResult<Error> {
        conn.query("SELECT COUNT(*) FROM contractor", ())
            .await
            .map_err(|e| RecycleError::Message(format!("{}", e).into()))?
            .next()
            .await
            .map_err(|e| RecycleError::Message(format!("{}", e).into()))?
            .ok_or_else(|| RecycleError::Message("No rows returned".into()))?;
        Ok(())
    }
}

pub async fn new_pool(path: &Path) -> anyhow::Result<Pool<Manager>> {
    Pool::builder(Manager::new(path))
        .max_size(MAX_READERS)
        .build()
        .context("Failed to build database pool")
}
