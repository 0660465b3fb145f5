//! Per-attempt metrics reported to the coordinator on completion.

use serde::{Deserialize, Serialize};

/// Counters aggregated from the input reader, output writer and channels of
/// one task attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub records_read: u64,
    pub bytes_read: u64,
    pub records_written: u64,
    pub bytes_written: u64,
    pub local_bytes_read: u64,
    pub local_bytes_written: u64,
    pub network_bytes_read: u64,
    pub network_bytes_written: u64,
    /// Partitions handed to this task after its initial assignment.
    pub dynamically_assigned_partitions: u32,
    /// Assigned partitions skipped because the coordinator reassigned them.
    pub discarded_partitions: u32,
}

impl TaskMetrics {
    /// Fold another attempt-part's counters into this one.
    pub fn merge_from(&mut self, other: &TaskMetrics) {
        self.records_read += other.records_read;
        self.bytes_read += other.bytes_read;
        self.records_written += other.records_written;
        self.bytes_written += other.bytes_written;
        self.local_bytes_read += other.local_bytes_read;
        self.local_bytes_written += other.local_bytes_written;
        self.network_bytes_read += other.network_bytes_read;
        self.network_bytes_written += other.network_bytes_written;
        self.dynamically_assigned_partitions += other.dynamically_assigned_partitions;
        self.discarded_partitions += other.discarded_partitions;
    }
}
