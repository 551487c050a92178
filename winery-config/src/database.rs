use serde::{Deserialize, Serialize};

/// Connection settings for the shared SQL catalog.
///
/// https://docs.swh.dev/winery/configuration/database/
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Database {
    /// PostgreSQL connection string for the shared catalog
    /// (shards, signature2shard, throttler tables).
    pub db: String,

    /// Reported via `application_name` on every connection, useful
    /// for telling writers, packers and cleaners apart in `pg_stat_activity`.
    #[serde(default = "Database::application_name")]
    pub application_name: String,

    /// Number of pooled connections this process keeps open to the catalog.
    ///
    /// _Default:_ `8`
    #[serde(default = "Database::pool_size")]
    pub pool_size: u32,
}

impl Database {
    fn application_name() -> String {
        "winery".into()
    }

    fn pool_size() -> u32 {
        8
    }
}

impl Default for Database {
    fn default() -> Self {
        Self {
            db: "postgres://localhost/winery".into(),
            application_name: Self::application_name(),
            pool_size: Self::pool_size(),
        }
    }
}
