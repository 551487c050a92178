//! Typed configuration for the Winery storage engine, parsed from
//! `winery.toml`.

pub mod core;
pub mod database;
pub mod error;
pub mod logging;
pub mod packer;
pub mod pooling;
pub mod shards;
pub mod throttler;

pub use core::Config;
pub use database::Database;
pub use error::Error;
pub use logging::{LogFormat, Logging};
pub use packer::Packer;
pub use pooling::ShardsPool;
pub use shards::Shards;
pub use throttler::Throttler;
