//! Read-only shard: an immutable perfect-hash-table file consumed through
//! a small trait, with one concrete backing implementation (`SwhShard`).
//!
//! On-disk layout:
//!
//! ```text
//! [0..8)     magic, b"SWHShard" once finalized, all zero while empty
//! [8..16)    object_count: u64 LE
//! [16..1024) reserved, zero-padded
//! [1024..)   index: object_count entries of (key: [u8;32], offset: u64, len: u64),
//!            sorted by key for binary search
//! [..]       value area: content bytes, back to back, at their recorded offsets
//! ```
//!
//! A file whose first 1 KiB is all zero is "empty" and may be safely
//! (re)created; a half-written file left behind by a crashed packer must be
//! zeroed before reuse (`zero_image`).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const MAGIC: &[u8; 8] = b"SWHShard";
pub const HEADER_SIZE: u64 = 1024;
const ENTRY_SIZE: u64 = 32 + 8 + 8;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image is not empty and has no SWHShard magic; refuse to overwrite")]
    NotEmptyOrFinalized,

    #[error("writer received {inserted} inserts, expected {expected}")]
    WrongObjectCount { inserted: u64, expected: u64 },

    #[error("key not found in shard")]
    NotFound,

    #[error("image has trailing or corrupt data: {0}")]
    Corrupt(String),
}

/// Black-box contract the Winery layer needs from a perfect-hash shard
/// implementation.
pub trait PerfectHashShard: Sized {
    type Writer: PerfectHashWriter;

    fn create(path: &Path, object_count: u64) -> Result<Self::Writer, Error>;
    fn open(path: &Path) -> Result<Self, Error>;
    fn lookup(&self, key: &[u8; 32]) -> Result<Option<Vec<u8>>, Error>;
    fn delete(path: &Path, key: &[u8; 32]) -> Result<(), Error>;
}

pub trait PerfectHashWriter {
    fn insert(&mut self, key: &[u8; 32], content: &[u8]) -> Result<(), Error>;
    fn finalize(self) -> Result<(), Error>;
}

/// Is the image's leading 1 KiB entirely zero? An empty image may be
/// safely (re)initialized by a packer.
pub fn is_empty_image(path: &Path) -> Result<bool, Error> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; HEADER_SIZE as usize];
    let read = file.read(&mut buf)?;
    buf.truncate(read);
    Ok(buf.iter().all(|&b| b == 0))
}

/// Does the image carry the `SWHShard` magic from a prior successful
/// `finalize`?
pub fn is_finalized_image(path: &Path) -> Result<bool, Error> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 8];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Zero out an image that was left half-written by an interrupted
/// creation, so it can be safely recreated. Punches holes on Linux where
/// possible; falls back to a plain zero-fill elsewhere.
pub fn zero_image(path: &Path, size: u64) -> Result<(), Error> {
    let file = OpenOptions::new().write(true).open(path)?;

    #[cfg(target_os = "linux")]
    {
        if punch_hole(&file, size).is_ok() {
            return Ok(());
        }
    }

    zero_fill(&file, size)
}

#[cfg(target_os = "linux")]
fn punch_hole(file: &File, size: u64) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    const FALLOC_FL_PUNCH_HOLE: i32 = 0x02;
    const FALLOC_FL_KEEP_SIZE: i32 = 0x01;

    let ret = unsafe {
        libc::fallocate(
            file.as_raw_fd(),
            FALLOC_FL_PUNCH_HOLE | FALLOC_FL_KEEP_SIZE,
            0,
            size as libc::off_t,
        )
    };

    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn zero_fill(mut file: &File, size: u64) -> Result<(), Error> {
    file.seek(SeekFrom::Start(0))?;
    let chunk = vec![0u8; 1024 * 1024];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(chunk.len() as u64) as usize;
        file.write_all(&chunk[..n])?;
        remaining -= n as u64;
    }
    file.flush()?;
    Ok(())
}

struct IndexEntry {
    key: [u8; 32],
    offset: u64,
    len: u64,
}

/// The workspace's one concrete `PerfectHashShard` implementation: a
/// sorted-index map, read fully into memory on `open` for O(log n) lookup
/// (no external perfect-hash crate in this dependency pack; this is the
/// simplified stand-in the rest of the engine treats as a black box).
pub struct SwhShard {
    path: PathBuf,
    index: Vec<IndexEntry>,
}

pub struct SwhShardWriter {
    path: PathBuf,
    file: File,
    object_count: u64,
    entries: Vec<IndexEntry>,
    value_cursor: u64,
}

impl PerfectHashShard for SwhShard {
    type Writer = SwhShardWriter;

    fn create(path: &Path, object_count: u64) -> Result<Self::Writer, Error> {
        if !is_empty_image(path)? {
            return Err(Error::NotEmptyOrFinalized);
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let index_bytes = object_count * ENTRY_SIZE;
        let value_cursor = HEADER_SIZE + index_bytes;
        file.seek(SeekFrom::Start(value_cursor))?;

        Ok(SwhShardWriter {
            path: path.to_owned(),
            file,
            object_count,
            entries: Vec::with_capacity(object_count as usize),
            value_cursor,
        })
    }

    fn open(path: &Path) -> Result<Self, Error> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::Corrupt("missing SWHShard magic".into()));
        }

        let mut count_buf = [0u8; 8];
        file.read_exact(&mut count_buf)?;
        let object_count = u64::from_le_bytes(count_buf);

        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut index = Vec::with_capacity(object_count as usize);
        for _ in 0..object_count {
            let mut key = [0u8; 32];
            file.read_exact(&mut key)?;
            let mut offset_buf = [0u8; 8];
            file.read_exact(&mut offset_buf)?;
            let mut len_buf = [0u8; 8];
            file.read_exact(&mut len_buf)?;
            index.push(IndexEntry {
                key,
                offset: u64::from_le_bytes(offset_buf),
                len: u64::from_le_bytes(len_buf),
            });
        }

        Ok(SwhShard {
            path: path.to_owned(),
            index,
        })
    }

    fn lookup(&self, key: &[u8; 32]) -> Result<Option<Vec<u8>>, Error> {
        let found = self.index.binary_search_by(|e| e.key.cmp(key));
        let Ok(pos) = found else {
            return Ok(None);
        };
        let entry = &self.index[pos];

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(entry.offset))?;
        let mut buf = vec![0u8; entry.len as usize];
        file.read_exact(&mut buf)?;

        Ok(Some(buf))
    }

    fn delete(path: &Path, key: &[u8; 32]) -> Result<(), Error> {
        let shard = SwhShard::open(path)?;
        let found = shard.index.binary_search_by(|e| e.key.cmp(key));
        let Ok(pos) = found else {
            return Err(Error::NotFound);
        };
        let entry = &shard.index[pos];

        let mut file = OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::Start(entry.offset))?;
        let zeros = vec![0u8; entry.len as usize];
        file.write_all(&zeros)?;
        file.flush()?;

        Ok(())
    }
}

impl PerfectHashWriter for SwhShardWriter {
    fn insert(&mut self, key: &[u8; 32], content: &[u8]) -> Result<(), Error> {
        if self.entries.len() as u64 >= self.object_count {
            return Err(Error::WrongObjectCount {
                inserted: self.entries.len() as u64 + 1,
                expected: self.object_count,
            });
        }

        let offset = self.value_cursor;
        self.file.write_all(content)?;
        self.value_cursor += content.len() as u64;

        self.entries.push(IndexEntry {
            key: *key,
            offset,
            len: content.len() as u64,
        });

        Ok(())
    }

    fn finalize(mut self) -> Result<(), Error> {
        if self.entries.len() as u64 != self.object_count {
            return Err(Error::WrongObjectCount {
                inserted: self.entries.len() as u64,
                expected: self.object_count,
            });
        }

        self.entries.sort_by(|a, b| a.key.cmp(&b.key));

        self.file.seek(SeekFrom::Start(HEADER_SIZE))?;
        for entry in &self.entries {
            self.file.write_all(&entry.key)?;
            self.file.write_all(&entry.offset.to_le_bytes())?;
            self.file.write_all(&entry.len.to_le_bytes())?;
        }

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(MAGIC)?;
        self.file.write_all(&self.object_count.to_le_bytes())?;

        self.file.flush()?;

        let _ = &self.path;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn empty_file(size: u64) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard.img");
        let file = File::create(&path).unwrap();
        file.set_len(size).unwrap();
        (dir, path)
    }

    #[test]
    fn test_is_empty_image() {
        let (_dir, path) = empty_file(4096);
        assert!(is_empty_image(&path).unwrap());
    }

    #[test]
    fn test_create_and_lookup() {
        let (_dir, path) = empty_file(1024 * 1024);

        let objects: Vec<([u8; 32], Vec<u8>)> = vec![
            ([1u8; 32], b"PINOT GRIS".to_vec()),
            ([2u8; 32], b"CHARDONNAY".to_vec()),
        ];

        let mut writer = SwhShard::create(&path, objects.len() as u64).unwrap();
        for (key, content) in &objects {
            writer.insert(key, content).unwrap();
        }
        writer.finalize().unwrap();

        assert!(is_finalized_image(&path).unwrap());

        let shard = SwhShard::open(&path).unwrap();
        for (key, content) in &objects {
            assert_eq!(shard.lookup(key).unwrap().as_deref(), Some(content.as_slice()));
        }
        assert_eq!(shard.lookup(&[9u8; 32]).unwrap(), None);
    }

    #[test]
    fn test_create_refuses_dirty_image() {
        let (_dir, path) = empty_file(4096);
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.write_all(b"SWHShard interrupted bla").unwrap();
        }

        assert!(matches!(
            SwhShard::create(&path, 1),
            Err(Error::NotEmptyOrFinalized)
        ));

        zero_image(&path, 4096).unwrap();
        assert!(is_empty_image(&path).unwrap());
        let mut writer = SwhShard::create(&path, 1).unwrap();
        writer.insert(&[1u8; 32], b"ok").unwrap();
        writer.finalize().unwrap();
    }

    #[test]
    fn test_delete_punches_payload() {
        let (_dir, path) = empty_file(1024 * 1024);
        let key = [7u8; 32];
        let mut writer = SwhShard::create(&path, 1).unwrap();
        writer.insert(&key, b"secret bytes").unwrap();
        writer.finalize().unwrap();

        SwhShard::delete(&path, &key).unwrap();

        let shard = SwhShard::open(&path).unwrap();
        let content = shard.lookup(&key).unwrap().unwrap();
        assert!(content.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wrong_object_count_rejected() {
        let (_dir, path) = empty_file(4096);
        let mut writer = SwhShard::create(&path, 2).unwrap();
        writer.insert(&[1u8; 32], b"one").unwrap();
        assert!(matches!(
            writer.finalize(),
            Err(Error::WrongObjectCount { .. })
        ));
    }
}
