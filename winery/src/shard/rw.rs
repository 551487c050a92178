//! Write shard: a per-shard SQL table of `(key, content)` rows, mutated
//! only by the single process currently holding the shard's lock.

use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use sqlx::{PgPool, Row};
use thiserror::Error;

use super::table_name;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("key not found in shard")]
    NotFound,
}

impl Error {
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Sql(sqlx::Error::Database(db)) => db.code().as_deref() == Some("23505"),
            _ => false,
        }
    }
}

/// Handle to one shard's RW table.
pub struct RwShard {
    pool: PgPool,
    name: String,
}

impl RwShard {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the table if it doesn't exist yet. Idempotent.
    pub async fn create(&self) -> Result<(), Error> {
        let table = table_name(&self.name);
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (key BYTEA PRIMARY KEY, content BYTEA NOT NULL)"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drop the table. Called exactly once, by the RW-shard cleaner,
    /// after enough hosts have mapped the RO image.
    pub async fn drop_table(&self) -> Result<(), Error> {
        let table = table_name(&self.name);
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert a row. A unique-violation (the key already exists) is
    /// treated as a benign no-op, matching `add`'s idempotence contract.
    pub async fn add(&self, key: &[u8], content: &[u8]) -> Result<(), Error> {
        let table = table_name(&self.name);
        let result = sqlx::query(&format!(
            "INSERT INTO {table} (key, content) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING"
        ))
        .bind(key)
        .bind(content)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = Error::Sql(err);
                if err.is_unique_violation() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let table = table_name(&self.name);
        let row = sqlx::query(&format!("SELECT content FROM {table} WHERE key = $1"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("content")?),
            None => None,
        })
    }

    /// Remove a row. Fails `NotFound` if the key is absent.
    pub async fn delete(&self, key: &[u8]) -> Result<(), Error> {
        let table = table_name(&self.name);
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE key = $1"))
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    /// Stream every `(key, content)` pair, in key order, for the packer to
    /// copy into the RO image. Backed by a single server-side cursor; the
    /// returned stream yields rows as Postgres sends them rather than
    /// buffering the whole shard in memory.
    pub fn all(&self) -> BoxStream<'static, Result<(Vec<u8>, Vec<u8>), Error>> {
        let table = table_name(&self.name);
        let pool = self.pool.clone();

        Box::pin(try_stream! {
            let mut rows =
                sqlx::query(&format!("SELECT key, content FROM {table} ORDER BY key")).fetch(&pool);

            while let Some(row) = rows.try_next().await? {
                let key: Vec<u8> = row.try_get("key")?;
                let content: Vec<u8> = row.try_get("content")?;
                yield (key, content);
            }
        })
    }

    pub async fn count(&self) -> Result<i64, Error> {
        let table = table_name(&self.name);
        let row = sqlx::query(&format!("SELECT count(*) AS count FROM {table}"))
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("count")?)
    }

    /// Sum of content lengths, for fullness bookkeeping. Writers should
    /// prefer tracking this in memory as they add; this is the ground
    /// truth used by packers and tests.
    pub async fn total_size(&self) -> Result<i64, Error> {
        let table = table_name(&self.name);
        let row = sqlx::query(&format!(
            "SELECT coalesce(sum(octet_length(content)), 0) AS total FROM {table}"
        ))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("total")?)
    }
}
