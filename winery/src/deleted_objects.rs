//! Deleted-Objects Cleaner: punches deleted payloads out of RO images and
//! retires their catalog rows. A transient job, not a long-lived daemon —
//! it needs read-write access to RO images, which readers never have.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::pool::{ImagePool, MapMode};
use crate::shard::ro::{self, PerfectHashShard};

pub struct DeletedObjectsCleaner {
    catalog: crate::catalog::Catalog,
    pool: Arc<dyn ImagePool>,
}

impl DeletedObjectsCleaner {
    pub fn new(catalog: crate::catalog::Catalog, pool: Arc<dyn ImagePool>) -> Self {
        Self { catalog, pool }
    }

    /// One pass over every `deleted` signature. Returns the number of rows
    /// cleaned. Aborts (leaving remaining rows `deleted` for a future run)
    /// on the first hard error.
    pub async fn run_once(&self, cancellation: &CancellationToken) -> Result<u64, Error> {
        let mut cleaned = 0u64;

        for (signature, shard_name) in self.catalog.deleted_objects().await? {
            if cancellation.is_cancelled() {
                break;
            }

            if let Some(state) = self.catalog.get_shard_state(&shard_name).await? {
                if state.readonly() {
                    self.ensure_mapped_rw(&shard_name).await?;
                    self.punch(&shard_name, &signature).await?;
                }
            }

            self.catalog.clean_deleted_object(&signature).await?;
            cleaned += 1;
        }

        Ok(cleaned)
    }

    async fn ensure_mapped_rw(&self, name: &str) -> Result<(), Error> {
        if self.pool.image_mapped(name).await? != Some(MapMode::ReadWrite) {
            self.pool.image_map(name, MapMode::ReadWrite).await?;
        }
        Ok(())
    }

    async fn punch(&self, shard_name: &str, signature: &[u8]) -> Result<(), Error> {
        let key: [u8; 32] = signature
            .try_into()
            .map_err(|_| ro::Error::Corrupt("signature is not 32 bytes".into()))?;
        let path = self.pool.image_path(shard_name);

        tokio::task::spawn_blocking(move || ro::SwhShard::delete(&path, &key))
            .await
            .expect("blocking task panicked")?;

        Ok(())
    }
}
