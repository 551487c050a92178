use serde::{Deserialize, Serialize};

/// Write-shard sizing and idle behavior.
///
/// https://docs.swh.dev/winery/configuration/shards/
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Shards {
    /// Size, in bytes, at which a write shard is sealed (state WRITING -> FULL)
    /// and handed off to a packer.
    ///
    /// _Default:_ `20 GiB`
    #[serde(default = "Shards::max_size")]
    pub max_size: u64,

    /// Seconds a write shard may sit unwritten-to before it is released
    /// back to STANDBY.
    ///
    /// _Default:_ `300`
    #[serde(default = "Shards::rw_idle_timeout")]
    pub rw_idle_timeout: u64,
}

impl Shards {
    fn max_size() -> u64 {
        20 * 1024 * 1024 * 1024
    }

    fn rw_idle_timeout() -> u64 {
        300
    }
}

impl Default for Shards {
    fn default() -> Self {
        Self {
            max_size: Self::max_size(),
            rw_idle_timeout: Self::rw_idle_timeout(),
        }
    }
}
