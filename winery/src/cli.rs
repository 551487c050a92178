use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Winery is a sharded, write-optimized content-addressed object store
/// backend.
#[derive(Parser, Debug)]
#[command(name = "winery", version)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "winery.toml")]
    pub config_file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the standalone packer daemon.
    Packer {
        /// Exit after packing this many shards.
        #[arg(long)]
        stop_after_shards: Option<u64>,

        /// Pack exactly this shard once, then exit (used by the
        /// in-process one-shot spawned from a writer).
        #[arg(long)]
        only_shard: Option<String>,
    },

    /// Run the image manager daemon.
    Rbd {
        /// Do one pass and exit instead of waiting for new work.
        #[arg(long)]
        stop_instead_of_waiting: bool,

        /// Also create and map RW images for shards still accepting writes.
        #[arg(long)]
        manage_rw_images: bool,
    },

    /// Run the RW-shard cleaner daemon.
    RwShardCleaner {
        /// Exit after cleaning this many shards.
        #[arg(long)]
        stop_after_shards: Option<u64>,

        /// Do one pass and exit instead of waiting for new work.
        #[arg(long)]
        stop_instead_of_waiting: bool,

        /// Minimum number of hosts that must have mapped a shard's RO
        /// image before its RW table may be dropped.
        #[arg(long, default_value_t = 1)]
        min_mapped_hosts: i64,
    },

    /// Run one pass of the deleted-objects cleaner.
    CleanDeletedObjects,

    /// Parse the configuration file and exit without starting any daemon.
    Configcheck,
}
