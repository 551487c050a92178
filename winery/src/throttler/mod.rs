//! Cooperative cross-process bandwidth throttling, shared across direction
//! (read/write) via one catalog table per direction (`t_read`, `t_write`).

pub mod bandwidth;
pub mod error;
pub mod leaky_bucket;

pub use error::Error;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use bandwidth::BandwidthCalculator;
use leaky_bucket::LeakyBucket;

/// Rows older than this are considered part of the fair-share window.
const THROTTLER_WINDOW_SECS: i64 = 300;
/// Rows older than twice the window are vacuumed opportunistically.
const STALE_AFTER_SECS: i64 = THROTTLER_WINDOW_SECS * 2;
/// How often a direction resyncs its bucket capacity against its peers.
const SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn table(self) -> &'static str {
        match self {
            Direction::Read => "t_read",
            Direction::Write => "t_write",
        }
    }
}

/// Shared contract between the no-op and SQL-synced implementations. Callers
/// invoke these around the byte-moving operation they wrap (`get`/`add`),
/// passing the size actually transferred so the bucket and bandwidth
/// calculator can account for it.
#[async_trait]
pub trait Throttler: Send + Sync {
    async fn throttle_get(&self, n: u64) -> Result<(), Error>;
    async fn throttle_add(&self, n: u64) -> Result<(), Error>;
}

/// Used when no `[throttler]` section is configured.
pub struct NoopThrottler;

#[async_trait]
impl Throttler for NoopThrottler {
    async fn throttle_get(&self, _n: u64) -> Result<(), Error> {
        Ok(())
    }

    async fn throttle_add(&self, _n: u64) -> Result<(), Error> {
        Ok(())
    }
}

struct DirectionState {
    bucket: LeakyBucket,
    bandwidth: BandwidthCalculator,
    row_id: i64,
    last_sync: Instant,
}

/// Cross-process fair-share throttler. Two instances on different hosts
/// converge on `max_bps / active_count` for each direction by periodically
/// publishing their own mean bandwidth and reading everyone else's.
pub struct SyncedThrottler {
    pool: sqlx::PgPool,
    max_read_bps: Option<u64>,
    max_write_bps: Option<u64>,
    read: Mutex<DirectionState>,
    write: Mutex<DirectionState>,
}

impl SyncedThrottler {
    pub async fn connect(
        pool: sqlx::PgPool,
        config: &winery_config::Throttler,
    ) -> Result<Self, Error> {
        let read = Self::new_direction(&pool, Direction::Read, config.max_read_bps).await?;
        let write = Self::new_direction(&pool, Direction::Write, config.max_write_bps).await?;

        Ok(Self {
            pool,
            max_read_bps: config.max_read_bps,
            max_write_bps: config.max_write_bps,
            read: Mutex::new(read),
            write: Mutex::new(write),
        })
    }

    async fn new_direction(
        pool: &sqlx::PgPool,
        direction: Direction,
        max_bps: Option<u64>,
    ) -> Result<DirectionState, Error> {
        let rate = max_bps.unwrap_or(u64::MAX) as f64;

        let row = sqlx::query(&format!(
            "INSERT INTO {} (bytes) VALUES (0) RETURNING id",
            direction.table()
        ))
        .fetch_one(pool)
        .await?;

        Ok(DirectionState {
            bucket: LeakyBucket::new(rate),
            bandwidth: BandwidthCalculator::new(),
            row_id: row.try_get("id")?,
            last_sync: Instant::now() - SYNC_INTERVAL,
        })
    }

    async fn throttle(&self, direction: Direction, n: u64) -> Result<(), Error> {
        let max_bps = match direction {
            Direction::Read => self.max_read_bps,
            Direction::Write => self.max_write_bps,
        };

        let lock = match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        };
        let mut state = lock.lock().await;

        state.bandwidth.record(n);
        state.bucket.consume(n).await;

        if state.last_sync.elapsed() >= SYNC_INTERVAL {
            self.sync(direction, &mut state, max_bps).await?;
        }

        Ok(())
    }

    async fn sync(
        &self,
        direction: Direction,
        state: &mut DirectionState,
        max_bps: Option<u64>,
    ) -> Result<(), Error> {
        let table = direction.table();
        let mean = state.bandwidth.mean() as i64;

        sqlx::query(&format!(
            "UPDATE {table} SET updated = now(), bytes = $1 WHERE id = $2"
        ))
        .bind(mean)
        .bind(state.row_id)
        .execute(&self.pool)
        .await?;

        if let Some(max_bps) = max_bps {
            let window_start = Utc::now() - chrono::Duration::seconds(THROTTLER_WINDOW_SECS);

            let row = sqlx::query(&format!(
                "SELECT count(*) AS count, coalesce(sum(bytes), 0) AS sum FROM {table} WHERE updated > $1"
            ))
            .bind(window_start)
            .fetch_one(&self.pool)
            .await?;

            let count: i64 = row.try_get("count")?;
            let sum: i64 = row.try_get("sum")?;

            if count > 0 && sum as u64 > max_bps {
                state.bucket.reset_capacity(max_bps as f64 / count as f64);
            }

            let stale_before = Utc::now() - chrono::Duration::seconds(STALE_AFTER_SECS);
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE updated < $1 AND id != $2"
            ))
            .bind(stale_before)
            .bind(state.row_id)
            .execute(&self.pool)
            .await?;
        }

        state.last_sync = Instant::now();
        Ok(())
    }
}

#[async_trait]
impl Throttler for SyncedThrottler {
    async fn throttle_get(&self, n: u64) -> Result<(), Error> {
        self.throttle(Direction::Read, n).await
    }

    async fn throttle_add(&self, n: u64) -> Result<(), Error> {
        self.throttle(Direction::Write, n).await
    }
}
