//! RW-Shard Cleaner: drops a packed shard's RW table once enough hosts
//! have acknowledged mapping its RO image.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backoff;
use crate::catalog::Catalog;
use crate::error::Error;
use crate::shard::rw::RwShard;
use crate::shard_lock::ShardLock;
use crate::state::ShardState;

pub struct RwShardCleaner {
    id: Uuid,
    catalog: Catalog,
}

impl RwShardCleaner {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            id: Uuid::new_v4(),
            catalog,
        }
    }

    pub async fn clean_one(&self, min_mapped_hosts: i64) -> Result<bool, Error> {
        let Some((name, _id)) = self
            .catalog
            .lock_one_shard(ShardState::Packed, ShardState::Cleaning, min_mapped_hosts, self.id)
            .await?
        else {
            return Ok(false);
        };

        let guard = ShardLock::new(&self.catalog, name.clone(), self.id, ShardState::Packed);

        let rw = RwShard::new(self.catalog.pool(), name.clone());
        rw.drop_table().await?;

        self.catalog.set_shard_state(&name, ShardState::Readonly, self.id).await?;
        guard.commit();

        tracing::info!(shard = %name, "dropped RW table, shard is now read-only");
        Ok(true)
    }

    pub async fn run_loop(
        &self,
        cancellation: &CancellationToken,
        stop_after_shards: Option<u64>,
        stop_instead_of_waiting: bool,
        min_mapped_hosts: i64,
    ) -> Result<(), Error> {
        let mut cleaned = 0u64;
        let mut attempt = 0u32;

        loop {
            if cancellation.is_cancelled() {
                return Ok(());
            }
            if let Some(limit) = stop_after_shards {
                if cleaned >= limit {
                    return Ok(());
                }
            }

            match self.clean_one(min_mapped_hosts).await {
                Ok(true) => {
                    cleaned += 1;
                    attempt = 0;
                }
                Ok(false) => {
                    if stop_instead_of_waiting {
                        return Ok(());
                    }
                    attempt += 1;
                    tokio::select! {
                        _ = backoff::wait(attempt) => {}
                        () = cancellation.cancelled() => return Ok(()),
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "clean attempt failed, will retry");
                    attempt += 1;
                }
            }
        }
    }
}
