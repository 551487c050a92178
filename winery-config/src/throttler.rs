use serde::{Deserialize, Serialize};

/// Cross-process bandwidth fairness, backed by `t_read`/`t_write` tables
/// in the catalog database. Absent entirely, reads and writes are unthrottled.
///
/// https://docs.swh.dev/winery/configuration/throttler/
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Throttler {
    /// Connection string for the table the throttler synchronizes through.
    /// Defaults to the catalog database when omitted.
    pub db: Option<String>,

    /// Maximum aggregate read bandwidth, in bytes/second, shared fairly
    /// across all cooperating processes.
    pub max_read_bps: Option<u64>,

    /// Maximum aggregate write bandwidth, in bytes/second.
    pub max_write_bps: Option<u64>,
}

impl Default for Throttler {
    fn default() -> Self {
        Self {
            db: None,
            max_read_bps: None,
            max_write_bps: None,
        }
    }
}
