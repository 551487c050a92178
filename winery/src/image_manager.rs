//! Image Manager: host-local daemon keeping RO (and optionally RW) pool
//! images in sync with the catalog's view of shard state.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

use crate::backoff;
use crate::catalog::{Catalog, ShardRow};
use crate::error::Error;
use crate::pool::{ImagePool, MapMode};
use crate::state::ShardState;

const MAPPED_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAPPED_WARN_EVERY: Duration = Duration::from_secs(10);
const RECORD_MAPPED_MAX_ATTEMPTS: u32 = 5;

pub struct ImageManager {
    hostname: String,
    catalog: Catalog,
    pool: Arc<dyn ImagePool>,
    manage_rw_images: bool,
    /// Shard name -> whether this host has already told the catalog it
    /// mapped it read-only.
    acked: DashMap<String, bool>,
}

impl ImageManager {
    pub fn new(
        hostname: String,
        catalog: Catalog,
        pool: Arc<dyn ImagePool>,
        manage_rw_images: bool,
    ) -> Self {
        Self {
            hostname,
            catalog,
            pool,
            manage_rw_images,
            acked: DashMap::new(),
        }
    }

    pub async fn run_loop(
        &self,
        cancellation: &CancellationToken,
        stop_instead_of_waiting: bool,
    ) -> Result<(), Error> {
        let mut attempt = 0u32;
        let mut notified = false;

        loop {
            if cancellation.is_cancelled() {
                return Ok(());
            }

            let did_work = self.pass().await?;

            if !notified {
                notify_ready();
                notified = true;
            }

            if did_work {
                attempt = 0;
                continue;
            }

            if stop_instead_of_waiting {
                return Ok(());
            }

            attempt += 1;
            tokio::select! {
                _ = backoff::wait(attempt) => {}
                () = cancellation.cancelled() => return Ok(()),
            }
        }
    }

    async fn pass(&self) -> Result<bool, Error> {
        let mut shards = self.catalog.list_shards().await?;
        shards.shuffle(&mut rand::rng());

        let mut did_work = false;

        for shard in &shards {
            if shard.state.image_available() {
                did_work |= self.manage_ro_image(shard).await?;
            } else if self.manage_rw_images
                && matches!(
                    shard.state,
                    ShardState::Standby | ShardState::Writing | ShardState::Full
                )
            {
                did_work |= self.manage_rw_image(shard).await?;
            }
        }

        Ok(did_work)
    }

    async fn manage_ro_image(&self, shard: &ShardRow) -> Result<bool, Error> {
        if let Some(mut acked) = self.acked.get_mut(&shard.name) {
            if shard.state == ShardState::Packed && !*acked {
                self.record_shard_mapped_retrying(&shard.name).await?;
                *acked = true;
                return Ok(true);
            }
            return Ok(false);
        }

        match self.pool.image_mapped(&shard.name).await? {
            Some(MapMode::ReadWrite) => {
                self.pool.image_remap_ro(&shard.name).await?;
                self.wait_until_ro(&shard.name).await?;
            }
            Some(MapMode::ReadOnly) => {}
            None => {
                self.pool.image_map(&shard.name, MapMode::ReadOnly).await?;
            }
        }

        let acked = shard.state == ShardState::Packed;
        if acked {
            self.record_shard_mapped_retrying(&shard.name).await?;
        }
        self.acked.insert(shard.name.clone(), acked);

        Ok(true)
    }

    async fn manage_rw_image(&self, shard: &ShardRow) -> Result<bool, Error> {
        if !self.pool.image_exists(&shard.name).await? {
            self.pool.image_create(&shard.name).await?;
            return Ok(true);
        }

        if self.pool.image_mapped(&shard.name).await?.is_none() {
            self.pool.image_map(&shard.name, MapMode::ReadWrite).await?;
            return Ok(true);
        }

        Ok(false)
    }

    async fn wait_until_ro(&self, name: &str) -> Result<(), Error> {
        let mut waited = Duration::ZERO;
        loop {
            if self.pool.image_mapped(name).await? == Some(MapMode::ReadOnly) {
                return Ok(());
            }

            tokio::time::sleep(MAPPED_POLL_INTERVAL).await;
            waited += MAPPED_POLL_INTERVAL;

            if waited.as_millis() % MAPPED_WARN_EVERY.as_millis() == 0 {
                tracing::warn!(shard = %name, ?waited, "still waiting for RO remap to settle");
            }
        }
    }

    async fn record_shard_mapped_retrying(&self, name: &str) -> Result<(), Error> {
        let mut attempt = 0u32;
        loop {
            match self.catalog.record_shard_mapped(&self.hostname, name).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt + 1 < RECORD_MAPPED_MAX_ATTEMPTS => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                    let _ = e;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    use std::os::unix::net::UnixDatagram;

    let Ok(addr) = std::env::var("NOTIFY_SOCKET") else {
        return;
    };
    let Ok(socket) = UnixDatagram::unbound() else {
        return;
    };
    if let Err(e) = socket.send_to(b"READY=1\n", &addr) {
        tracing::debug!(error = %e, "sd_notify readiness send failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}
