//! The shared SQL catalog: shard metadata and the object -> shard index.
//!
//! This is the single source of truth coordinating writers, packers, image
//! managers and cleaners across processes and hosts. Every operation here
//! is one short transaction; callers retry at their own loop boundary on
//! failure (see `crate::error`).

pub mod error;

pub use error::Error;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Executor, Row};
use uuid::Uuid;

use crate::state::ShardState;

/// One row of the `shards` table.
#[derive(Debug, Clone)]
pub struct ShardRow {
    pub id: i64,
    pub name: String,
    pub state: ShardState,
    pub locker: Option<Uuid>,
    pub locker_ts: Option<DateTime<Utc>>,
    pub mapped_on_hosts_when_packed: Vec<String>,
}

impl ShardRow {
    fn from_row(row: &PgRow) -> Result<Self, Error> {
        let state_str: String = row.try_get("state")?;
        Ok(ShardRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            state: ShardState::from_str(&state_str)
                .ok_or_else(|| Error::Sql(sqlx::Error::Decode("unknown shard state".into())))?,
            locker: row.try_get("locker")?,
            locker_ts: row.try_get("locker_ts")?,
            mapped_on_hosts_when_packed: row
                .try_get::<Option<Vec<String>>, _>("mapped_on_hosts_when_packed")?
                .unwrap_or_default(),
        })
    }
}

/// Handle to the shared catalog database.
#[derive(Clone)]
pub struct Catalog {
    pool: sqlx::PgPool,
}

impl Catalog {
    /// Connect to the catalog and size the pool from configuration.
    pub async fn connect(config: &winery_config::Database) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .after_connect({
                let application_name = config.application_name.clone();
                move |conn, _meta| {
                    let application_name = application_name.clone();
                    Box::pin(async move {
                        conn.execute(
                            format!("SET application_name = '{}'", application_name).as_str(),
                        )
                        .await?;
                        Ok(())
                    })
                }
            })
            .connect(&config.db)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an already-constructed pool. Used by tests that set up their
    /// own connection (e.g. against a container-local Postgres).
    pub fn from_pool(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Clone of the underlying connection pool, for callers (write/read
    /// shards, the throttler) that need to issue their own queries against
    /// the same database. `PgPool` is a cheap `Arc`-backed handle.
    pub fn pool(&self) -> sqlx::PgPool {
        self.pool.clone()
    }

    /// Create the catalog's tables if they don't already exist. Idempotent;
    /// safe to call from every process at startup.
    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shards (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                state TEXT NOT NULL,
                locker UUID,
                locker_ts TIMESTAMPTZ,
                mapped_on_hosts_when_packed TEXT[] NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signature2shard (
                signature BYTEA PRIMARY KEY,
                shard BIGINT NOT NULL REFERENCES shards(id),
                state TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for direction in ["t_read", "t_write"] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {direction} (
                    id BIGSERIAL PRIMARY KEY,
                    updated TIMESTAMPTZ NOT NULL DEFAULT now(),
                    bytes BIGINT NOT NULL
                )
                "#
            ))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Lock one shard in `current_state` whose mapped-host count meets
    /// `min_mapped_hosts`, transitioning it to `new_state`. Returns `None`
    /// if no eligible shard exists; never blocks on a peer's lock thanks to
    /// `SKIP LOCKED`.
    pub async fn lock_one_shard(
        &self,
        current_state: ShardState,
        new_state: ShardState,
        min_mapped_hosts: i64,
        locker: Uuid,
    ) -> Result<Option<(String, i64)>, Error> {
        debug_assert!(new_state.is_locked());

        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query(
            r#"
            SELECT name, id FROM shards
            WHERE state = $1
              AND coalesce(array_length(mapped_on_hosts_when_packed, 1), 0) >= $2
            ORDER BY id
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(current_state.as_str())
        .bind(min_mapped_hosts)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let name: String = row.try_get("name")?;
        let id: i64 = row.try_get("id")?;

        sqlx::query("UPDATE shards SET state = $1, locker = $2, locker_ts = now() WHERE id = $3")
            .bind(new_state.as_str())
            .bind(locker)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some((name, id)))
    }

    /// Transition `name` to `new_state`, checking that it is currently
    /// locked by `locker`, and clearing the locker column (every caller of
    /// this method moves a shard out of a locked state).
    pub async fn set_shard_state(
        &self,
        name: &str,
        new_state: ShardState,
        locker: Uuid,
    ) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE shards SET state = $1, locker = NULL, locker_ts = NULL WHERE name = $2 AND locker = $3",
        )
        .bind(new_state.as_str())
        .bind(name)
        .bind(locker)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NoRowsAffected {
                name: name.to_string(),
                new_state: new_state.as_str().to_string(),
            });
        }

        Ok(())
    }

    /// Lock one specific shard by name, checking its current state rather
    /// than picking any candidate (used by the in-process one-shot packer,
    /// which already knows which shard it's packing). Returns `false`
    /// without error if the shard wasn't in `current_state` any more.
    pub async fn lock_named_shard(
        &self,
        name: &str,
        current_state: ShardState,
        new_state: ShardState,
        locker: Uuid,
    ) -> Result<bool, Error> {
        debug_assert!(new_state.is_locked());

        let result = sqlx::query(
            "UPDATE shards SET state = $1, locker = $2, locker_ts = now() WHERE name = $3 AND state = $4",
        )
        .bind(new_state.as_str())
        .bind(locker)
        .bind(name)
        .bind(current_state.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert a brand new shard, locked to `locker` in `new_state`.
    /// Name is `i` followed by 31 hex characters derived from a fresh UUID.
    pub async fn create_shard(
        &self,
        new_state: ShardState,
        locker: Uuid,
    ) -> Result<(String, i64), Error> {
        debug_assert!(new_state.is_locked());

        let name = format!("i{}", &Uuid::new_v4().simple().to_string()[..31]);

        let row = sqlx::query(
            "INSERT INTO shards (name, state, locker, locker_ts) VALUES ($1, $2, $3, now()) RETURNING id",
        )
        .bind(&name)
        .bind(new_state.as_str())
        .bind(locker)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;

        Ok((name, id))
    }

    /// Upsert `signature -> locked_shard_id` with state `present`, unless a
    /// `present` row already exists for this signature (in which case the
    /// existing shard wins the race). Returns the shard id the object is
    /// now associated with, which may differ from `locked_shard_id`.
    pub async fn record_new_obj_id(
        &self,
        signature: &[u8],
        locked_shard_id: i64,
    ) -> Result<i64, Error> {
        let won = sqlx::query(
            r#"
            INSERT INTO signature2shard (signature, shard, state)
            VALUES ($1, $2, 'present')
            ON CONFLICT (signature) DO UPDATE
                SET shard = excluded.shard, state = 'present'
                WHERE signature2shard.state = 'deleted'
            RETURNING shard
            "#,
        )
        .bind(signature)
        .bind(locked_shard_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = won {
            return Ok(row.try_get("shard")?);
        }

        // Someone else's `present` row already claimed this signature.
        let row = sqlx::query("SELECT shard FROM signature2shard WHERE signature = $1")
            .bind(signature)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("shard")?)
    }

    /// Shard id for a `present` signature, if any.
    pub async fn contains(&self, signature: &[u8]) -> Result<Option<i64>, Error> {
        let row =
            sqlx::query("SELECT shard FROM signature2shard WHERE signature = $1 AND state = 'present'")
                .bind(signature)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("shard")?),
            None => None,
        })
    }

    /// Shard name and state for a `present` signature.
    pub async fn get(&self, signature: &[u8]) -> Result<Option<(String, ShardState)>, Error> {
        let row = sqlx::query(
            r#"
            SELECT s.name AS name, s.state AS state
            FROM signature2shard ss
            JOIN shards s ON s.id = ss.shard
            WHERE ss.signature = $1 AND ss.state = 'present'
            "#,
        )
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let name: String = row.try_get("name")?;
        let state_str: String = row.try_get("state")?;
        let state = ShardState::from_str(&state_str)
            .ok_or_else(|| Error::Sql(sqlx::Error::Decode("unknown shard state".into())))?;

        Ok(Some((name, state)))
    }

    /// Ordered iteration over `present` signatures, for `list_content`.
    pub async fn list_signatures(
        &self,
        after: Option<&[u8]>,
        limit: i64,
    ) -> Result<Vec<Vec<u8>>, Error> {
        let rows = match after {
            Some(after) => {
                sqlx::query(
                    "SELECT signature FROM signature2shard WHERE state = 'present' AND signature > $1 ORDER BY signature LIMIT $2",
                )
                .bind(after)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT signature FROM signature2shard WHERE state = 'present' ORDER BY signature LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter()
            .map(|row| Ok(row.try_get::<Vec<u8>, _>("signature")?))
            .collect()
    }

    /// Mark a signature's row `deleted`. Errors `NotFound` if it wasn't
    /// `present`.
    pub async fn delete(&self, signature: &[u8]) -> Result<(), Error> {
        let result =
            sqlx::query("UPDATE signature2shard SET state = 'deleted' WHERE signature = $1 AND state = 'present'")
                .bind(signature)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    /// All `deleted` rows, for the deleted-objects cleaner.
    pub async fn deleted_objects(&self) -> Result<Vec<(Vec<u8>, String)>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT ss.signature AS signature, s.name AS name
            FROM signature2shard ss
            JOIN shards s ON s.id = ss.shard
            WHERE ss.state = 'deleted'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok((row.try_get("signature")?, row.try_get("name")?)))
            .collect()
    }

    /// Remove a `deleted` row entirely once its payload has been punched
    /// out of the RO image.
    pub async fn clean_deleted_object(&self, signature: &[u8]) -> Result<(), Error> {
        sqlx::query("DELETE FROM signature2shard WHERE signature = $1")
            .bind(signature)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Lock a `FULL` shard for packing. Thin alias over `lock_one_shard`
    /// kept separate so packer call sites read as intent, not mechanism.
    pub async fn shard_packing_starts(&self, locker: Uuid) -> Result<Option<(String, i64)>, Error> {
        self.lock_one_shard(ShardState::Full, ShardState::Packing, 0, locker)
            .await
    }

    /// Finish packing: the RO image is finalized, move the shard to
    /// `PACKED`.
    pub async fn shard_packing_ends(&self, name: &str, locker: Uuid) -> Result<(), Error> {
        self.set_shard_state(name, ShardState::Packed, locker).await
    }

    /// Record that `host` has mapped this shard's RO image read-only.
    /// Idempotent: calling twice with the same host leaves the set
    /// unchanged.
    pub async fn record_shard_mapped(&self, host: &str, name: &str) -> Result<Vec<String>, Error> {
        let row = sqlx::query(
            r#"
            UPDATE shards
            SET mapped_on_hosts_when_packed =
                CASE WHEN $1 = ANY(mapped_on_hosts_when_packed)
                     THEN mapped_on_hosts_when_packed
                     ELSE array_append(mapped_on_hosts_when_packed, $1)
                END
            WHERE name = $2
            RETURNING mapped_on_hosts_when_packed
            "#,
        )
        .bind(host)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row
            .try_get::<Option<Vec<String>>, _>("mapped_on_hosts_when_packed")?
            .unwrap_or_default())
    }

    pub async fn list_shards(&self) -> Result<Vec<ShardRow>, Error> {
        let rows = sqlx::query("SELECT * FROM shards ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(ShardRow::from_row).collect()
    }

    pub async fn get_shard_info(&self, id: i64) -> Result<Option<ShardRow>, Error> {
        let row = sqlx::query("SELECT * FROM shards WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(ShardRow::from_row).transpose()
    }

    pub async fn get_shard_state(&self, name: &str) -> Result<Option<ShardState>, Error> {
        let row = sqlx::query("SELECT state FROM shards WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state_str: String = row.try_get("state")?;
        Ok(Some(ShardState::from_str(&state_str).ok_or_else(|| {
            Error::Sql(sqlx::Error::Decode("unknown shard state".into()))
        })?))
    }

    /// Number of `present` objects, optionally restricted to one shard.
    pub async fn count_objects(&self, shard_name: Option<&str>) -> Result<i64, Error> {
        let row = match shard_name {
            Some(name) => {
                sqlx::query(
                    r#"
                    SELECT count(*) AS count
                    FROM signature2shard ss
                    JOIN shards s ON s.id = ss.shard
                    WHERE ss.state = 'present' AND s.name = $1
                    "#,
                )
                .bind(name)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT count(*) AS count FROM signature2shard WHERE state = 'present'")
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(row.try_get("count")?)
    }
}
