//! Packer: converts one `FULL` write shard into an immutable RO image.
//! Runs either as the standalone daemon (`winery packer`) or as an
//! in-process one-shot spawned by a writer that just filled a shard.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backoff;
use crate::catalog::Catalog;
use crate::error::Error;
use crate::pool::ImagePool;
use crate::shard::ro::{self, PerfectHashShard, PerfectHashWriter};
use crate::shard::rw::RwShard;
use crate::shard_lock::ShardLock;
use crate::state::ShardState;
use crate::throttler::Throttler;

pub struct Packer {
    id: Uuid,
    catalog: Catalog,
    pool: Arc<dyn ImagePool>,
    throttler: Arc<dyn Throttler>,
    config: winery_config::Packer,
}

impl Packer {
    pub fn new(
        catalog: Catalog,
        pool: Arc<dyn ImagePool>,
        throttler: Arc<dyn Throttler>,
        config: winery_config::Packer,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            catalog,
            pool,
            throttler,
            config,
        }
    }

    /// Lock one `FULL` shard and pack it. Returns `false` if no shard was
    /// ready to pack.
    pub async fn pack_one(&self) -> Result<bool, Error> {
        let Some((name, _id)) = self.catalog.shard_packing_starts(self.id).await? else {
            return Ok(false);
        };

        let guard = ShardLock::new(&self.catalog, name.clone(), self.id, ShardState::Full);

        self.pack_shard(&name).await?;

        self.catalog.shard_packing_ends(&name, self.id).await?;
        guard.commit();

        tracing::info!(shard = %name, "packed shard");

        if self.config.clean_immediately {
            self.cleanup_rw_shard(&name).await?;
        }

        Ok(true)
    }

    async fn pack_shard(&self, name: &str) -> Result<(), Error> {
        let rw = RwShard::new(self.catalog.pool(), name.to_string());
        let object_count = rw.count().await? as u64;

        let image_path = self.pool.image_path(name);

        if self.config.create_images {
            if !self.pool.image_exists(name).await? {
                self.pool.image_create(name).await?;
            }
        } else {
            let mut attempt = 0u32;
            while !self.pool.image_exists(name).await? {
                backoff::wait(attempt).await;
                attempt += 1;
            }
        }

        self.sanitize_image(&image_path).await?;

        // Rows cross into the blocking writer thread through a bounded
        // channel rather than a `Vec`, so a shard near `max_size` never
        // needs its whole contents resident in memory at once.
        let (tx, mut rx) = tokio::sync::mpsc::channel::<(Vec<u8>, Vec<u8>)>(1024);

        let path = image_path.clone();
        let writer_task = tokio::task::spawn_blocking(move || -> Result<(), ro::Error> {
            let mut writer = ro::SwhShard::create(&path, object_count)?;
            while let Some((key, content)) = rx.blocking_recv() {
                let key32: [u8; 32] = key
                    .as_slice()
                    .try_into()
                    .map_err(|_| ro::Error::Corrupt("key is not 32 bytes".into()))?;
                writer.insert(&key32, &content)?;
            }
            writer.finalize()
        });

        let mut rows = rw.all();
        while let Some(row) = rows.next().await {
            let (key, content) = row?;
            self.throttler.throttle_add(content.len() as u64).await?;
            if tx.send((key, content)).await.is_err() {
                break;
            }
        }
        drop(tx);

        writer_task.await.expect("blocking task panicked")?;

        if self.config.create_images {
            self.pool.image_remap_ro(name).await?;
        }

        Ok(())
    }

    async fn sanitize_image(&self, path: &Path) -> Result<(), Error> {
        let path = path.to_owned();
        tokio::task::spawn_blocking(move || -> Result<(), ro::Error> {
            if ro::is_empty_image(&path)? {
                return Ok(());
            }
            if ro::is_finalized_image(&path)? {
                return Err(ro::Error::NotEmptyOrFinalized);
            }
            let size = std::fs::metadata(&path)?.len();
            ro::zero_image(&path, size)
        })
        .await
        .expect("blocking task panicked")?;

        Ok(())
    }

    /// Standalone daemon loop: repeatedly pack whatever is `FULL`, backing
    /// off between empty polls, until cancelled or `stop_after_shards` is
    /// reached.
    pub async fn run_loop(
        &self,
        cancellation: &CancellationToken,
        stop_after_shards: Option<u64>,
    ) -> Result<(), Error> {
        let mut packed = 0u64;
        let mut attempt = 0u32;

        loop {
            if cancellation.is_cancelled() {
                return Ok(());
            }
            if let Some(limit) = stop_after_shards {
                if packed >= limit {
                    return Ok(());
                }
            }

            match self.pack_one().await {
                Ok(true) => {
                    packed += 1;
                    attempt = 0;
                }
                Ok(false) => {
                    attempt += 1;
                    tokio::select! {
                        _ = backoff::wait(attempt) => {}
                        () = cancellation.cancelled() => return Ok(()),
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "pack attempt failed, will retry");
                    attempt += 1;
                }
            }
        }
    }

    /// Pack exactly one named shard then return, used by the in-process
    /// one-shot invocation (`winery packer --only-shard <name>`).
    pub async fn pack_named(&self, name: &str) -> Result<(), Error> {
        let locker = self.id;

        let locked = self
            .catalog
            .lock_named_shard(name, ShardState::Full, ShardState::Packing, locker)
            .await?;
        if !locked {
            tracing::info!(shard = %name, "shard no longer FULL, skipping");
            return Ok(());
        }

        let guard = ShardLock::new(&self.catalog, name.to_string(), locker, ShardState::Full);

        self.pack_shard(name).await?;

        self.catalog.shard_packing_ends(name, locker).await?;
        guard.commit();

        if self.config.clean_immediately {
            self.cleanup_rw_shard(name).await?;
        }

        Ok(())
    }

    /// Drop a just-packed shard's RW table right away, skipping the
    /// mapped-host wait the standalone `RwShardCleaner` otherwise enforces.
    /// Opt-in via `packer.clean_immediately`, for setups that don't need
    /// every host to confirm the RO image before trusting it.
    async fn cleanup_rw_shard(&self, name: &str) -> Result<(), Error> {
        let locked = self
            .catalog
            .lock_named_shard(name, ShardState::Packed, ShardState::Cleaning, self.id)
            .await?;
        if !locked {
            return Ok(());
        }

        let guard = ShardLock::new(&self.catalog, name.to_string(), self.id, ShardState::Packed);

        let rw = RwShard::new(self.catalog.pool(), name.to_string());
        rw.drop_table().await?;
        self.catalog.set_shard_state(name, ShardState::Readonly, self.id).await?;
        guard.commit();

        tracing::info!(shard = %name, "dropped RW table immediately after packing");
        Ok(())
    }
}

/// Spawn a detached child process re-invoking the current binary to pack
/// one named shard. Used by a writer's `pack_immediately` path; never
/// `fork()`s, since doing so inside a `tokio` runtime is unsound.
pub fn spawn_in_process(shard_name: &str) -> std::io::Result<tokio::process::Child> {
    let exe = std::env::current_exe()?;
    tokio::process::Command::new(exe)
        .args(["packer", "--stop-after-shards", "1", "--only-shard", shard_name])
        .spawn()
}
