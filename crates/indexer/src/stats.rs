use crate::merge::MergeStats;
use serde::{Deserialize, Serialize};

/// Counters for one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    /// Origins handed to the scanner
    pub origins_requested: usize,

    /// Origins turned into describe tasks
    pub origins_queried: usize,

    /// Distinct origin keys whose directory is gone
    pub origins_removed: usize,

    /// Directories without a descriptor file
    pub origins_skipped: usize,

    /// Origins that could not be probed
    pub origins_inaccessible: usize,

    /// Rows in the described table after the pool drained
    pub records_described: usize,

    pub tasks_failed: usize,

    /// `None` when nothing was described or removed and the index was not read
    pub merge: Option<MergeStats>,

    /// Whether the index file was replaced
    pub replaced: bool,

    pub lock_wait_ms: u64,

    pub time_ms: u64,
}

impl ReconcileStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines_read(&self) -> usize {
        self.merge.map_or(0, |m| m.lines_read)
    }

    pub fn lines_changed(&self) -> usize {
        self.merge.map_or(0, |m| m.lines_changed)
    }

    pub fn lines_removed(&self) -> usize {
        self.merge.map_or(0, |m| m.lines_removed)
    }

    pub fn lines_written(&self) -> usize {
        self.merge.map_or(0, |m| m.lines_written)
    }
}
