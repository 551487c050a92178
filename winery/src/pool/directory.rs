//! File-backed image pool: one regular file per shard in a directory,
//! with Unix permission bits standing in for RBD's map states.
//!
//! `0o400` (read-only) / `0o600` (read-write) / `0o000` (unmapped).

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::task::spawn_blocking;

use super::{Error, ImagePool, MapMode};

pub struct DirectoryPool {
    base_directory: PathBuf,
    image_size: u64,
}

impl DirectoryPool {
    pub fn new(base_directory: impl Into<PathBuf>, shard_max_size: u64) -> Self {
        Self {
            base_directory: base_directory.into(),
            image_size: image_size_bytes(shard_max_size),
        }
    }
}

/// `2 x shard_max_size`, rounded up to a whole MiB.
pub fn image_size_bytes(shard_max_size: u64) -> u64 {
    const MIB: u64 = 1024 * 1024;
    let doubled = shard_max_size * 2;
    doubled.div_ceil(MIB) * MIB
}

fn mode_of(path: &Path) -> std::io::Result<u32> {
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

#[async_trait]
impl ImagePool for DirectoryPool {
    async fn image_exists(&self, name: &str) -> Result<bool, Error> {
        let path = self.image_path(name);
        Ok(spawn_blocking(move || path.exists()).await.unwrap_or(false))
    }

    async fn image_mapped(&self, name: &str) -> Result<Option<MapMode>, Error> {
        let path = self.image_path(name);
        let mode = match spawn_blocking(move || mode_of(&path)).await.expect("blocking task panicked") {
            Ok(mode) => mode,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(match mode {
            0o400 => Some(MapMode::ReadOnly),
            0o600 => Some(MapMode::ReadWrite),
            _ => None,
        })
    }

    async fn image_list(&self) -> Result<Vec<String>, Error> {
        let dir = self.base_directory.clone();
        spawn_blocking(move || {
            let mut names = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
            Ok(names)
        })
        .await
        .expect("blocking task panicked")
    }

    fn image_path(&self, name: &str) -> PathBuf {
        self.base_directory.join(name)
    }

    async fn image_create(&self, name: &str) -> Result<(), Error> {
        let path = self.image_path(name);
        let size = self.image_size;

        if spawn_blocking({
            let path = path.clone();
            move || path.exists()
        })
        .await
        .unwrap_or(false)
        {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        spawn_blocking(move || {
            let file = File::create(&path)?;
            file.set_len(size)?;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
            Ok(())
        })
        .await
        .expect("blocking task panicked")
    }

    async fn image_map(&self, name: &str, mode: MapMode) -> Result<(), Error> {
        let path = self.image_path(name);
        let bits = match mode {
            MapMode::ReadOnly => 0o400,
            MapMode::ReadWrite => 0o600,
        };

        spawn_blocking(move || {
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_permissions(fs::Permissions::from_mode(bits))?;
            Ok(())
        })
        .await
        .expect("blocking task panicked")
    }

    async fn image_unmap(&self, name: &str) -> Result<(), Error> {
        let path = self.image_path(name);

        spawn_blocking(move || {
            if !path.exists() {
                return Err(Error::ShardNotMapped(
                    path.file_name().unwrap_or_default().to_string_lossy().into_owned(),
                ));
            }
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_permissions(fs::Permissions::from_mode(0o000))?;
            Ok(())
        })
        .await
        .expect("blocking task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_image_size_rounds_up_to_mib() {
        assert_eq!(image_size_bytes(1), 1024 * 1024);
        assert_eq!(image_size_bytes(1024 * 1024), 2 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_create_map_unmap_roundtrip() {
        let dir = tempdir().unwrap();
        let pool = DirectoryPool::new(dir.path(), 1024);

        assert!(!pool.image_exists("ishard1").await.unwrap());
        pool.image_create("ishard1").await.unwrap();
        assert!(pool.image_exists("ishard1").await.unwrap());
        assert_eq!(
            pool.image_mapped("ishard1").await.unwrap(),
            Some(MapMode::ReadWrite)
        );

        pool.image_map("ishard1", MapMode::ReadOnly).await.unwrap();
        assert_eq!(
            pool.image_mapped("ishard1").await.unwrap(),
            Some(MapMode::ReadOnly)
        );

        pool.image_unmap("ishard1").await.unwrap();
        assert_eq!(pool.image_mapped("ishard1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_image_mapped_on_never_created_path_is_none() {
        let dir = tempdir().unwrap();
        let pool = DirectoryPool::new(dir.path(), 1024);

        assert_eq!(pool.image_mapped("never-created").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remap_ro_from_rw() {
        let dir = tempdir().unwrap();
        let pool = DirectoryPool::new(dir.path(), 1024);
        pool.image_create("ishard1").await.unwrap();
        pool.image_remap_ro("ishard1").await.unwrap();
        assert_eq!(
            pool.image_mapped("ishard1").await.unwrap(),
            Some(MapMode::ReadOnly)
        );
    }
}
