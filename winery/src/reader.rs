//! Reader: `get`/`get_batch`/`contains`/`check`/`list_signatures`, with a
//! transparent RO-shard-then-RW-shard fallback.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};

use crate::catalog::Catalog;
use crate::error::Error;
use crate::object_id::ObjectId;
use crate::pool::{self, ImagePool, MapMode};
use crate::shard::ro::{self, PerfectHashShard};
use crate::shard::rw::RwShard;
use crate::stats::Stats;
use crate::throttler::Throttler;

pub struct Reader {
    catalog: Catalog,
    pool: Arc<dyn ImagePool>,
    throttler: Arc<dyn Throttler>,
    stats: Arc<Stats>,
    batch_concurrency: usize,
}

impl Reader {
    pub fn new(
        catalog: Catalog,
        pool: Arc<dyn ImagePool>,
        throttler: Arc<dyn Throttler>,
        stats: Arc<Stats>,
        batch_concurrency: usize,
    ) -> Self {
        Self {
            catalog,
            pool,
            throttler,
            stats,
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    pub async fn get(&self, obj_id: &ObjectId) -> Result<Bytes, Error> {
        let (name, state) = self
            .catalog
            .get(&obj_id.sha256)
            .await?
            .ok_or(Error::NotFound)?;

        if state.image_available() {
            match self.get_from_ro(&name, &obj_id.sha256).await {
                Ok(Some(content)) => {
                    self.throttler.throttle_get(content.len() as u64).await?;
                    self.stats.record_read(content.len() as u64);
                    return Ok(content);
                }
                Ok(None) => {}
                Err(Error::Pool(pool::Error::ShardNotMapped(_))) => {}
                Err(e) => return Err(e),
            }
        }

        let rw = RwShard::new(self.catalog.pool(), name);
        match rw.get(&obj_id.sha256).await? {
            Some(content) => {
                self.throttler.throttle_get(content.len() as u64).await?;
                self.stats.record_read(content.len() as u64);
                Ok(Bytes::from(content))
            }
            None => Err(Error::NotFound),
        }
    }

    async fn get_from_ro(&self, name: &str, key: &[u8; 32]) -> Result<Option<Bytes>, Error> {
        match self.pool.image_mapped(name).await? {
            Some(MapMode::ReadOnly) | Some(MapMode::ReadWrite) => {}
            None => return Err(pool::Error::ShardNotMapped(name.to_string()).into()),
        }

        let path = self.pool.image_path(name);
        let key = *key;

        let found = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, ro::Error> {
            let shard = ro::SwhShard::open(&path)?;
            shard.lookup(&key)
        })
        .await
        .expect("blocking task panicked")?;

        Ok(found.map(Bytes::from))
    }

    /// Order-preserving, bounded-concurrency fan-out of `get` over many
    /// ids. Any per-item error (not-found, unmapped shard, I/O) degrades to
    /// `None` rather than failing the whole batch; this method never calls
    /// `check`, so `Corrupted` cannot surface here.
    pub async fn get_batch(&self, obj_ids: &[ObjectId]) -> Vec<Option<Bytes>> {
        stream::iter(obj_ids.iter())
            .map(|id| async move { self.get(id).await.ok() })
            .buffered(self.batch_concurrency)
            .collect()
            .await
    }

    pub async fn contains(&self, obj_id: &ObjectId) -> Result<bool, Error> {
        Ok(self.catalog.contains(&obj_id.sha256).await?.is_some())
    }

    pub async fn list_signatures(
        &self,
        after: Option<&[u8]>,
        limit: i64,
    ) -> Result<Vec<Vec<u8>>, Error> {
        Ok(self.catalog.list_signatures(after, limit).await?)
    }

    /// Recompute digests against the fetched content and compare with the
    /// id the caller supplied.
    pub async fn check(&self, obj_id: &ObjectId) -> Result<(), Error> {
        let content = self.get(obj_id).await?;
        if !obj_id.matches(&content) {
            return Err(Error::Corrupted);
        }
        Ok(())
    }
}
