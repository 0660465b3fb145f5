//! Multi-input and multi-partition readers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::heap::Comparer;
use crate::merge::MergingReader;
use crate::records::{Record, RecordReader};
use crate::task::metrics::TaskMetrics;
use crate::task::progress::ProgressSource;

use super::InputChannel;

const NO_PARTITION: usize = usize::MAX;

/// Shared cell naming the source partition currently being read.
///
/// The reader side stores the partition it is positioned on; a
/// per-source-partition output writer reads the cell before every write and
/// rolls to a new file when it changed. This replaces callback-style
/// partition-changed notification with explicit polling.
#[derive(Debug)]
pub struct SourcePartitionCell {
    current: AtomicUsize,
}

impl Default for SourcePartitionCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SourcePartitionCell {
    pub fn new() -> Self {
        Self {
            current: AtomicUsize::new(NO_PARTITION),
        }
    }

    pub fn set(&self, partition: usize) {
        self.current.store(partition, Ordering::Relaxed);
    }

    pub fn current(&self) -> Option<usize> {
        match self.current.load(Ordering::Relaxed) {
            NO_PARTITION => None,
            partition => Some(partition),
        }
    }
}

/// Concatenates per-partition readers into one stream, publishing the
/// partition currently being read. Used when a task elects to process all
/// of its partitions through a single reader.
pub struct MultiPartitionReader<T: Record> {
    pending: VecDeque<(usize, Box<dyn RecordReader<T>>)>,
    current: Option<(usize, Box<dyn RecordReader<T>>)>,
    cell: Option<Arc<SourcePartitionCell>>,
    pending_change: Option<usize>,
    total: usize,
    exhausted: usize,
    records: u64,
    bytes: u64,
}

impl<T: Record> MultiPartitionReader<T> {
    pub fn new(segments: Vec<(usize, Box<dyn RecordReader<T>>)>) -> Self {
        let total = segments.len();
        Self {
            pending: segments.into(),
            current: None,
            cell: None,
            pending_change: None,
            total,
            exhausted: 0,
            records: 0,
            bytes: 0,
        }
    }

    /// Publish partition positions through `cell` as the reader advances.
    pub fn with_partition_cell(mut self, cell: Arc<SourcePartitionCell>) -> Self {
        self.cell = Some(cell);
        self
    }

    /// The partition the reader is currently positioned on.
    pub fn current_partition(&self) -> Option<usize> {
        self.current.as_ref().map(|(partition, _)| *partition)
    }

    /// The partition entered since the last poll, if any. Consumed on read.
    pub fn poll_partition_change(&mut self) -> Option<usize> {
        self.pending_change.take()
    }
}

impl<T: Record> RecordReader<T> for MultiPartitionReader<T> {
    fn read_record(&mut self) -> Result<Option<T>> {
        loop {
            if self.current.is_none() {
                match self.pending.pop_front() {
                    Some((partition, reader)) => {
                        self.pending_change = Some(partition);
                        if let Some(cell) = &self.cell {
                            cell.set(partition);
                        }
                        self.current = Some((partition, reader));
                    }
                    None => return Ok(None),
                }
            }
            let (_, reader) = self.current.as_mut().expect("segment selected above");
            match reader.read_record()? {
                Some(record) => {
                    self.records += 1;
                    return Ok(Some(record));
                }
                None => {
                    self.bytes += reader.bytes_read();
                    self.current = None;
                    self.exhausted += 1;
                }
            }
        }
    }

    fn progress(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        let current = self
            .current
            .as_ref()
            .map(|(_, reader)| reader.progress())
            .unwrap_or(0.0);
        (self.exhausted as f32 + current) / self.total as f32
    }

    fn records_read(&self) -> u64 {
        self.records
    }

    fn bytes_read(&self) -> u64 {
        self.bytes
            + self
                .current
                .as_ref()
                .map(|(_, reader)| reader.bytes_read())
                .unwrap_or(0)
    }
}

/// Fans several input channels into one: opening a partition opens it on
/// every underlying channel and merges the readers into a single sorted
/// stream. This is the multi-input record reader a stage declares when more
/// than one input stage feeds it.
pub struct MergingMultiInputReader<T: Record> {
    channels: Vec<Box<dyn InputChannel<T>>>,
    comparer: Arc<dyn Comparer<T>>,
}

impl<T: Record> MergingMultiInputReader<T> {
    pub fn new(channels: Vec<Box<dyn InputChannel<T>>>, comparer: Arc<dyn Comparer<T>>) -> Self {
        Self { channels, comparer }
    }
}

impl<T: Record> InputChannel<T> for MergingMultiInputReader<T> {
    fn assigned_partitions(&self) -> Vec<usize> {
        // All input channels of a stage carry the same partition assignment.
        self.channels
            .first()
            .map(|channel| channel.assigned_partitions())
            .unwrap_or_default()
    }

    fn open_partition(&mut self, partition: usize) -> Result<Box<dyn RecordReader<T>>> {
        let readers = self
            .channels
            .iter_mut()
            .map(|channel| channel.open_partition(partition))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(MergingReader::new(
            readers,
            Arc::clone(&self.comparer),
        )?))
    }

    fn progress_source(&self) -> Option<(String, Arc<dyn ProgressSource>)> {
        self.channels
            .iter()
            .find_map(|channel| channel.progress_source())
    }

    fn metrics(&self) -> TaskMetrics {
        let mut metrics = TaskMetrics::default();
        for channel in &self.channels {
            metrics.merge_from(&channel.metrics());
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::NaturalOrder;
    use crate::records::VecRecordReader;

    struct VecChannel {
        partitions: Vec<Vec<i64>>,
    }

    impl InputChannel<i64> for VecChannel {
        fn assigned_partitions(&self) -> Vec<usize> {
            (0..self.partitions.len()).collect()
        }

        fn open_partition(&mut self, partition: usize) -> Result<Box<dyn RecordReader<i64>>> {
            Ok(Box::new(VecRecordReader::new(
                self.partitions[partition].clone(),
            )))
        }
    }

    #[test]
    fn test_merging_multi_input_sorts_across_channels() {
        let a = VecChannel {
            partitions: vec![vec![1, 4, 7]],
        };
        let b = VecChannel {
            partitions: vec![vec![2, 5, 8]],
        };
        let mut multi =
            MergingMultiInputReader::new(vec![Box::new(a), Box::new(b)], Arc::new(NaturalOrder));
        let mut reader = multi.open_partition(0).unwrap();
        let mut out = Vec::new();
        while let Some(value) = reader.read_record().unwrap() {
            out.push(value);
        }
        assert_eq!(out, vec![1, 2, 4, 5, 7, 8]);
    }

    #[test]
    fn test_multi_partition_reader_publishes_partition() {
        let segments: Vec<(usize, Box<dyn RecordReader<i64>>)> = vec![
            (0, Box::new(VecRecordReader::new(vec![1, 2]))),
            (2, Box::new(VecRecordReader::new(vec![3]))),
        ];
        let cell = Arc::new(SourcePartitionCell::new());
        let mut reader = MultiPartitionReader::new(segments).with_partition_cell(Arc::clone(&cell));

        assert_eq!(cell.current(), None);
        assert_eq!(reader.read_record().unwrap(), Some(1));
        assert_eq!(reader.poll_partition_change(), Some(0));
        assert_eq!(cell.current(), Some(0));
        assert_eq!(reader.read_record().unwrap(), Some(2));
        assert_eq!(reader.poll_partition_change(), None);
        assert_eq!(reader.read_record().unwrap(), Some(3));
        assert_eq!(reader.poll_partition_change(), Some(2));
        assert_eq!(cell.current(), Some(2));
        assert_eq!(reader.read_record().unwrap(), None);
        assert_eq!(reader.progress(), 1.0);
    }
}
