use thiserror::Error;

use crate::catalog;
use crate::pool;
use crate::shard::{ro, rw};
use crate::throttler;

/// Errors surfaced by the public object-storage operations
/// (`add`/`get`/`delete`/`check`/...).
#[derive(Debug, Error)]
pub enum Error {
    #[error("object not found")]
    NotFound,

    #[error("object is corrupted: digest mismatch")]
    Corrupted,

    #[error("delete is not permitted on this backend")]
    PermissionDenied,

    #[error("backend is configured read-only")]
    ReadOnly,

    #[error("catalog error: {0}")]
    Catalog(#[from] catalog::Error),

    #[error("image pool error: {0}")]
    Pool(#[from] pool::Error),

    #[error("read-only shard error: {0}")]
    RoShard(#[from] ro::Error),

    #[error("write shard error: {0}")]
    RwShard(#[from] rw::Error),

    #[error("throttler error: {0}")]
    Throttler(#[from] throttler::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
