//! Writer: the client-facing entry point for `add`/`delete`, holding at
//! most one locked RW shard at a time and releasing it on an idle timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::Error;
use crate::object_id::ObjectId;
use crate::pool::ImagePool;
use crate::shard::rw::RwShard;
use crate::state::ShardState;
use crate::stats::Stats;
use crate::throttler::Throttler;

struct CurrentShard {
    id: i64,
    name: String,
    rw: RwShard,
    size: u64,
    last_add: watch::Sender<Instant>,
    idle_task: JoinHandle<()>,
}

/// One writer process's view of the world: its own UUID (used as the
/// catalog `locker`), the shard it currently holds open, and the shards it
/// has filled during its lifetime.
pub struct Writer {
    id: Uuid,
    catalog: Catalog,
    pool: Arc<dyn ImagePool>,
    throttler: Arc<dyn Throttler>,
    shards_config: winery_config::Shards,
    packer_config: winery_config::Packer,
    allow_delete: bool,
    read_only: bool,
    stats: Arc<Stats>,
    current: Arc<Mutex<Option<CurrentShard>>>,
    filled_shards: Mutex<Vec<String>>,
}

impl Writer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Catalog,
        pool: Arc<dyn ImagePool>,
        throttler: Arc<dyn Throttler>,
        shards_config: winery_config::Shards,
        packer_config: winery_config::Packer,
        allow_delete: bool,
        read_only: bool,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            catalog,
            pool,
            throttler,
            shards_config,
            packer_config,
            allow_delete,
            read_only,
            stats,
            current: Arc::new(Mutex::new(None)),
            filled_shards: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Names of shards this writer process has filled to `FULL` so far.
    pub async fn filled_shards(&self) -> Vec<String> {
        self.filled_shards.lock().await.clone()
    }

    async fn ensure_shard(&self) -> Result<(), Error> {
        let mut guard = self.current.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let (name, id) = match self
            .catalog
            .lock_one_shard(ShardState::Standby, ShardState::Writing, 0, self.id)
            .await?
        {
            Some(found) => found,
            None => self.catalog.create_shard(ShardState::Writing, self.id).await?,
        };

        let rw = RwShard::new(self.catalog.pool(), name.clone());
        rw.create().await?;
        let size = rw.total_size().await? as u64;

        let (tx, rx) = watch::channel(Instant::now());
        let idle_task = spawn_idle_task(
            self.current.clone(),
            self.catalog.clone(),
            self.id,
            name.clone(),
            Duration::from_secs(self.shards_config.rw_idle_timeout),
            rx,
        );

        *guard = Some(CurrentShard {
            id,
            name,
            rw,
            size,
            last_add: tx,
            idle_task,
        });

        Ok(())
    }

    /// Add `content` under `obj_id`. Idempotent when `check_presence` is
    /// set; otherwise may silently overwrite whatever shard currently owns
    /// the signature (used by `restore`).
    pub async fn add(
        &self,
        content: &[u8],
        obj_id: &ObjectId,
        check_presence: bool,
    ) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }

        if check_presence && self.catalog.contains(&obj_id.sha256).await?.is_some() {
            return Ok(());
        }

        self.ensure_shard().await?;

        let mut guard = self.current.lock().await;
        let cur = guard.as_mut().expect("ensure_shard just populated this");

        let winning_shard_id = self.catalog.record_new_obj_id(&obj_id.sha256, cur.id).await?;
        if winning_shard_id != cur.id {
            // A concurrent writer already recorded this signature against
            // its own shard; that writer owns the payload now.
            return Ok(());
        }

        cur.rw.add(&obj_id.sha256, content).await?;
        cur.size += content.len() as u64;
        let _ = cur.last_add.send(Instant::now());
        self.stats.record_write(content.len() as u64);

        self.throttler.throttle_add(content.len() as u64).await?;

        if cur.size >= self.shards_config.max_size {
            let name = cur.name.clone();
            cur.idle_task.abort();
            *guard = None;
            drop(guard);

            self.catalog.set_shard_state(&name, ShardState::Full, self.id).await?;
            self.filled_shards.lock().await.push(name.clone());

            if self.packer_config.pack_immediately {
                match crate::packer::spawn_in_process(&name) {
                    Ok(_child) => tracing::info!(shard = %name, "spawned packer for full shard"),
                    Err(e) => tracing::warn!(shard = %name, error = %e, "failed to spawn packer"),
                }
            }
        }

        Ok(())
    }

    /// `restore` is `add` without the presence check.
    pub async fn restore(&self, content: &[u8], obj_id: &ObjectId) -> Result<(), Error> {
        self.add(content, obj_id, false).await
    }

    pub async fn delete(&self, obj_id: &ObjectId) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        if !self.allow_delete {
            return Err(Error::PermissionDenied);
        }

        let (name, state) = self
            .catalog
            .get(&obj_id.sha256)
            .await?
            .ok_or(Error::NotFound)?;

        if !state.readonly() {
            let rw = RwShard::new(self.catalog.pool(), name.clone());
            match rw.delete(&obj_id.sha256).await {
                Ok(()) => {}
                Err(crate::shard::rw::Error::NotFound) => {
                    tracing::warn!(shard = %name, obj_id = %obj_id, "delete: row missing from RW shard");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.catalog.delete(&obj_id.sha256).await?;
        Ok(())
    }

    /// Release the currently held shard back to STANDBY without waiting
    /// for the idle timer. Used on graceful shutdown.
    pub async fn release(&self) -> Result<(), Error> {
        let mut guard = self.current.lock().await;
        let Some(cur) = guard.take() else {
            return Ok(());
        };
        cur.idle_task.abort();
        self.catalog
            .set_shard_state(&cur.name, ShardState::Standby, self.id)
            .await?;
        Ok(())
    }
}

fn spawn_idle_task(
    current: Arc<Mutex<Option<CurrentShard>>>,
    catalog: Catalog,
    locker: Uuid,
    name: String,
    timeout: Duration,
    mut last_add_rx: watch::Receiver<Instant>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let last = *last_add_rx.borrow();
            let elapsed = last.elapsed();

            if elapsed >= timeout {
                let mut guard = current.lock().await;
                let still_current = matches!(guard.as_ref(), Some(cur) if cur.name == name);
                if still_current {
                    if let Err(e) = catalog.set_shard_state(&name, ShardState::Standby, locker).await
                    {
                        tracing::warn!(shard = %name, error = %e, "idle release failed");
                    } else {
                        tracing::debug!(shard = %name, "released idle shard to standby");
                    }
                    *guard = None;
                }
                return;
            }

            let remaining = timeout - elapsed;
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                changed = last_add_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    })
}
