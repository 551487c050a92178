//! Named, fixed-size block images (or regular files masquerading as one)
//! backing read-only shards, provided either by Ceph RBD or by a directory
//! of plain files.

pub mod directory;
pub mod error;
pub mod rbd;

pub use error::Error;

use std::path::PathBuf;

use async_trait::async_trait;

/// How an image is currently mapped on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    ReadOnly,
    ReadWrite,
}

impl MapMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MapMode::ReadOnly => "ro",
            MapMode::ReadWrite => "rw",
        }
    }
}

/// Contract shared by the RBD and directory pool variants. Every method
/// is async because both backends shell out or touch the filesystem, and
/// blocking that work off the reactor thread is the caller's job for the
/// directory variant (see `directory.rs`).
#[async_trait]
pub trait ImagePool: Send + Sync {
    async fn image_exists(&self, name: &str) -> Result<bool, Error>;
    async fn image_mapped(&self, name: &str) -> Result<Option<MapMode>, Error>;
    async fn image_list(&self) -> Result<Vec<String>, Error>;
    fn image_path(&self, name: &str) -> PathBuf;
    async fn image_create(&self, name: &str) -> Result<(), Error>;
    async fn image_map(&self, name: &str, mode: MapMode) -> Result<(), Error>;
    async fn image_unmap(&self, name: &str) -> Result<(), Error>;

    /// Unmap then re-map read-only. Used when a packer's leftover RW
    /// mapping needs to be handed over to readers.
    async fn image_remap_ro(&self, name: &str) -> Result<(), Error> {
        match self.image_unmap(name).await {
            Ok(()) => {}
            Err(Error::ShardNotMapped(_)) => {}
            Err(e) => return Err(e),
        }
        self.image_map(name, MapMode::ReadOnly).await
    }
}
