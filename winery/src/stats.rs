//! In-process object/byte counters. Deliberately not a metrics exporter —
//! no Prometheus/StatsD dependency, just a snapshot a caller can log or
//! expose however it likes.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    objects_written: AtomicU64,
    bytes_written: AtomicU64,
    objects_read: AtomicU64,
    bytes_read: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub objects_written: u64,
    pub bytes_written: u64,
    pub objects_read: u64,
    pub bytes_read: u64,
}

impl Stats {
    pub fn record_write(&self, bytes: u64) {
        self.objects_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: u64) {
        self.objects_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            objects_written: self.objects_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            objects_read: self.objects_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_accumulates() {
        let stats = Stats::default();
        stats.record_write(100);
        stats.record_write(50);
        stats.record_read(10);

        let snap = stats.snapshot();
        assert_eq!(snap.objects_written, 2);
        assert_eq!(snap.bytes_written, 150);
        assert_eq!(snap.objects_read, 1);
        assert_eq!(snap.bytes_read, 10);
    }
}
