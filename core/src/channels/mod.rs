//! Channels carry records between an upstream stage's output and a
//! downstream stage's input.
//!
//! Only the contract and the file-backed implementation live here; a TCP
//! channel would implement the same traits over a live connection. Pipeline
//! channels have no channel object at all: they execute as a fused runner
//! inside the parent task (see [`crate::task::runner::ChainedRunner`]).

pub mod file;
pub mod multi;

use std::sync::Arc;

use crate::error::Result;
use crate::records::{Record, RecordReader, RecordWriter};
use crate::task::progress::ProgressSource;

/// The input side of a channel: per-partition record readers.
pub trait InputChannel<T: Record>: Send {
    /// The partitions initially assigned to this task.
    fn assigned_partitions(&self) -> Vec<usize>;

    /// Open a reader over one partition's records.
    fn open_partition(&mut self, partition: usize) -> Result<Box<dyn RecordReader<T>>>;

    /// A supplementary progress source (a merge running inside the channel),
    /// if the channel has one.
    fn progress_source(&self) -> Option<(String, Arc<dyn ProgressSource>)> {
        None
    }

    /// Channel-level I/O counters folded into the attempt metrics.
    fn metrics(&self) -> crate::task::metrics::TaskMetrics {
        crate::task::metrics::TaskMetrics::default()
    }
}

/// The output side of a channel: a partitioned record writer whose files
/// become visible only on commit.
pub trait OutputChannel<T: Record>: RecordWriter<T> {
    /// Make the finished output durably visible. Requires a prior
    /// [`RecordWriter::finish`].
    fn commit(&mut self) -> Result<()>;
}

pub use file::{
    FileInputChannel, FileOutputChannel, FileSetReader, PartitionFileWriter, segment_file_name,
    store_from_settings,
};
pub use multi::{MergingMultiInputReader, MultiPartitionReader, SourcePartitionCell};
