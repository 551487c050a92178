use std::fs::read_to_string;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::database::Database;
use crate::error::Error;
use crate::logging::Logging;
use crate::packer::Packer;
use crate::pooling::ShardsPool;
use crate::shards::Shards;
use crate::throttler::Throttler;

/// Top-level `winery.toml` configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Shared SQL catalog connection.
    #[serde(default)]
    pub database: Database,

    /// Write-shard sizing.
    #[serde(default)]
    pub shards: Shards,

    /// Read-only image pool.
    #[serde(default)]
    pub shards_pool: ShardsPool,

    /// Cross-process bandwidth throttling. Absent means unthrottled.
    pub throttler: Option<Throttler>,

    /// Packer behavior.
    #[serde(default)]
    pub packer: Packer,

    /// Whether `delete` is permitted at all. Defaults to `false`: Winery is
    /// an archival backend and deleting is an operator escape hatch, not a
    /// routine operation.
    #[serde(default)]
    pub allow_delete: bool,

    /// Reject every write operation (`add`, `restore`, `delete`) with
    /// `Error::ReadOnly`. Used to run a Winery instance purely for reads,
    /// e.g. while its catalog is being migrated elsewhere.
    #[serde(default)]
    pub read_only: bool,

    /// Logging.
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    /// Load configuration from disk, or fall back to defaults if the file
    /// doesn't exist.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let config: Config = match read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents)
                    .map_err(|e| Error::Parse(path.to_owned(), Box::new(e)))?;
                info!("loaded \"{}\"", path.display());
                config
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "\"{}\" doesn't exist, loading defaults instead",
                    path.display()
                );
                Config::default()
            }
            Err(err) => return Err(Error::Io(path.to_owned(), err)),
        };

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a TOML string without touching disk.
    /// Used by `configcheck` and by tests.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.shards.max_size == 0 {
            return Err(Error::Invalid("shards.max_size must be non-zero".into()));
        }

        if let ShardsPool::Directory { base_directory } = &self.shards_pool {
            if base_directory.as_os_str().is_empty() {
                return Err(Error::Invalid(
                    "shards_pool.base_directory must not be empty".into(),
                ));
            }
        }

        Ok(())
    }

    /// Convenience for `winery.toml`'s conventional default path.
    pub fn default_path() -> PathBuf {
        PathBuf::from("winery.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializable() {
        let config = Config::default();
        toml::to_string(&config).unwrap();
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/winery.toml")).unwrap();
        assert_eq!(config.shards.max_size, Shards::default().max_size);
    }

    #[test]
    fn test_parse_directory_pool() {
        let toml = r#"
            [database]
            db = "postgres://localhost/winery"

            [shards_pool]
            type = "directory"
            base_directory = "/tmp/winery-pool"
        "#;
        let config = Config::parse(toml).unwrap();
        match config.shards_pool {
            ShardsPool::Directory { base_directory } => {
                assert_eq!(base_directory, PathBuf::from("/tmp/winery-pool"));
            }
            _ => panic!("expected directory pool"),
        }
    }

    #[test]
    fn test_parse_rbd_pool() {
        let toml = r#"
            [database]
            db = "postgres://localhost/winery"

            [shards_pool]
            type = "rbd"
            pool_name = "winery"
        "#;
        let config = Config::parse(toml).unwrap();
        match config.shards_pool {
            ShardsPool::Rbd { pool_name, .. } => assert_eq!(pool_name, "winery"),
            _ => panic!("expected rbd pool"),
        }
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let toml = r#"
            [database]
            db = "postgres://localhost/winery"
            bogus = true
        "#;
        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_rejects_zero_max_size() {
        let toml = r#"
            [database]
            db = "postgres://localhost/winery"

            [shards]
            max_size = 0
        "#;
        let config = Config::parse(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
