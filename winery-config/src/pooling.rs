use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where read-only shard images live, and how they're mapped.
///
/// https://docs.swh.dev/winery/configuration/shards_pool/
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ShardsPool {
    /// Ceph RBD-backed images, one block device per shard.
    Rbd {
        /// RBD pool holding the shard images.
        pool_name: String,
        /// Optional separate data pool for erasure-coded backing.
        data_pool_name: Option<String>,
        /// Image features to disable at creation time (e.g. `fast-diff`),
        /// because this workload never needs them and they add overhead.
        #[serde(default)]
        image_features_unsupported: Vec<String>,
        /// Extra `-o` options passed to `rbd device map`.
        #[serde(default)]
        map_options: Option<String>,
        /// Prefix `rbd` invocations with `sudo`.
        #[serde(default)]
        use_sudo: bool,
    },
    /// Plain files in a directory, used in development and single-host
    /// deployments, or wherever a real block device isn't available.
    Directory {
        /// Directory holding one regular file per shard image.
        base_directory: PathBuf,
    },
}

impl Default for ShardsPool {
    fn default() -> Self {
        ShardsPool::Directory {
            base_directory: PathBuf::from("/srv/winery/pool"),
        }
    }
}
