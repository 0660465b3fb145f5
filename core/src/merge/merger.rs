//! External k-way merge over sorted segments.
//!
//! The fan-in of any single pass is bounded: when the number of disk
//! segments exceeds the cap, intermediate passes merge the oldest segments
//! into new scratch files until one final pass can cover everything. The
//! final pass is lazy; records surface through the returned iterator without
//! a full materialization.
//!
//! When every input can produce undecoded frame payloads and a raw
//! comparator is available, all passes move raw records and deserialization
//! is deferred to the consumer (and skipped entirely for records it never
//! looks at).

use std::cell::OnceCell;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering as AtomicOrdering};

use quern_common::storage::FileSystem;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::heap::{Comparer, NaturalOrder, PriorityQueue};
use crate::merge::input::{DiskInputOptions, MergeInput};
use crate::records::{
    BinaryRecordWriter, RawRecord, RawRecordWriter, Record, RecordReader, RecordWriter,
};

/// Comparison over undecoded frame payloads.
pub trait RawComparer: Send + Sync {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Raw comparator for encodings whose byte order equals the record order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseRawComparer;

impl RawComparer for BytewiseRawComparer {
    fn compare_raw(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Counters a concurrent observer may poll while a merge runs.
#[derive(Debug, Default)]
pub struct MergeCounters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    merge_passes: AtomicU32,
    progress_permille: AtomicU32,
}

impl MergeCounters {
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(AtomicOrdering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(AtomicOrdering::Relaxed)
    }

    /// Passes run so far, the final lazy pass included.
    pub fn merge_passes(&self) -> u32 {
        self.merge_passes.load(AtomicOrdering::Relaxed)
    }

    /// Average consumption fraction across the current pass's inputs.
    pub fn progress(&self) -> f32 {
        self.progress_permille.load(AtomicOrdering::Relaxed) as f32 / 1000.0
    }

    fn add_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, AtomicOrdering::Relaxed);
    }

    fn add_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, AtomicOrdering::Relaxed);
    }

    fn set_progress(&self, fraction: f32) {
        let permille = (fraction.clamp(0.0, 1.0) * 1000.0) as u32;
        self.progress_permille
            .store(permille, AtomicOrdering::Relaxed);
    }
}

/// Configuration of a merge.
pub struct MergeOptions<T: Record> {
    /// Directory receiving intermediate pass files.
    pub scratch_directory: PathBuf,
    /// Prefix for intermediate pass file names, so concurrent merges in the
    /// same scratch directory do not collide.
    pub file_prefix: String,
    /// Maximum disk segments opened by one pass. At least 2.
    pub max_disk_inputs_per_pass: usize,
    /// Storage options for intermediate pass files.
    pub intermediate: DiskInputOptions,
    pub comparer: Arc<dyn Comparer<T>>,
    /// Enables the raw fast path when all inputs support raw reads.
    pub raw_comparer: Option<Arc<dyn RawComparer>>,
}

impl<T: Record + Ord> MergeOptions<T> {
    /// Options with the record type's natural order and no raw fast path.
    pub fn new(scratch_directory: impl Into<PathBuf>) -> Self {
        Self::with_comparer(scratch_directory, Arc::new(NaturalOrder))
    }
}

impl<T: Record> MergeOptions<T> {
    pub fn with_comparer(
        scratch_directory: impl Into<PathBuf>,
        comparer: Arc<dyn Comparer<T>>,
    ) -> Self {
        Self {
            scratch_directory: scratch_directory.into(),
            file_prefix: String::new(),
            max_disk_inputs_per_pass: crate::jobs::settings::DEFAULT_MERGE_MAX_FILE_INPUTS,
            intermediate: DiskInputOptions::default(),
            comparer,
            raw_comparer: None,
        }
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    pub fn max_disk_inputs_per_pass(mut self, max: usize) -> Self {
        self.max_disk_inputs_per_pass = max;
        self
    }

    pub fn intermediate(mut self, options: DiskInputOptions) -> Self {
        self.intermediate = options;
        self
    }

    pub fn raw_comparer(mut self, comparer: Arc<dyn RawComparer>) -> Self {
        self.raw_comparer = Some(comparer);
        self
    }
}

/// One open segment in a merge pass, cursor at its next record.
struct Segment<R> {
    reader: Box<dyn RecordReader<R>>,
    current: R,
    last_bytes: u64,
    /// Input order, used to break comparison ties so the merge is stable.
    index: usize,
}

struct SegmentComparer<R> {
    compare: Arc<dyn Fn(&R, &R) -> Ordering + Send + Sync>,
}

impl<R> Comparer<Segment<R>> for SegmentComparer<R>
where
    R: Send,
{
    fn compare(&self, a: &Segment<R>, b: &Segment<R>) -> Ordering {
        (self.compare)(&a.current, &b.current).then(a.index.cmp(&b.index))
    }
}

/// The heap-driven merge loop shared by intermediate and final passes.
struct MergeQueue<R: Send> {
    queue: PriorityQueue<Segment<R>, SegmentComparer<R>>,
    counters: Arc<MergeCounters>,
    total_segments: usize,
    records_yielded: u64,
}

impl<R: Send> MergeQueue<R> {
    fn open(
        readers: Vec<Box<dyn RecordReader<R>>>,
        compare: Arc<dyn Fn(&R, &R) -> Ordering + Send + Sync>,
        counters: Arc<MergeCounters>,
    ) -> Result<Self> {
        let total_segments = readers.len();
        let mut segments = Vec::with_capacity(total_segments);
        for (index, mut reader) in readers.into_iter().enumerate() {
            if let Some(first) = reader.read_record()? {
                let last_bytes = reader.bytes_read();
                counters.add_read(last_bytes);
                segments.push(Segment {
                    reader,
                    current: first,
                    last_bytes,
                    index,
                });
            }
            // An empty segment is dropped here, closing its stream.
        }
        Ok(Self {
            queue: PriorityQueue::from_vec(segments, SegmentComparer { compare }),
            counters,
            total_segments,
            records_yielded: 0,
        })
    }

    fn next_record(&mut self) -> Result<Option<R>> {
        if self.queue.is_empty() {
            self.counters.set_progress(1.0);
            return Ok(None);
        }
        let head = self.queue.peek_mut()?;
        let next = head.reader.read_record()?;
        let bytes = head.reader.bytes_read();
        self.counters.add_read(bytes - head.last_bytes);
        head.last_bytes = bytes;
        let record = match next {
            Some(next) => {
                let record = std::mem::replace(&mut head.current, next);
                self.queue.adjust_first_item()?;
                record
            }
            // Exhausted; dropping the segment closes its stream.
            None => self.queue.dequeue()?.current,
        };
        self.records_yielded += 1;
        self.publish_progress();
        Ok(Some(record))
    }

    fn publish_progress(&self) {
        if self.total_segments == 0 {
            self.counters.set_progress(1.0);
            return;
        }
        let exhausted = (self.total_segments - self.queue.len()) as f32;
        let live: f32 = self
            .queue
            .iter()
            .map(|segment| segment.reader.progress())
            .sum();
        self.counters
            .set_progress((exhausted + live) / self.total_segments as f32);
    }
}

/// A record coming out of a merge: typed, or still undecoded on the raw
/// path. Decoding is performed at most once per record.
pub struct MergeResultRecord<T: Record> {
    inner: ResultRecord<T>,
}

enum ResultRecord<T: Record> {
    Typed(T),
    Raw {
        raw: RawRecord,
        decoded: OnceCell<T>,
    },
}

impl<T: Record> MergeResultRecord<T> {
    fn typed(value: T) -> Self {
        Self {
            inner: ResultRecord::Typed(value),
        }
    }

    fn raw(raw: RawRecord) -> Self {
        Self {
            inner: ResultRecord::Raw {
                raw,
                decoded: OnceCell::new(),
            },
        }
    }

    /// The typed record, decoding the raw payload on first access.
    pub fn value(&self) -> Result<&T> {
        match &self.inner {
            ResultRecord::Typed(value) => Ok(value),
            ResultRecord::Raw { raw, decoded } => {
                if let Some(value) = decoded.get() {
                    return Ok(value);
                }
                let value = raw.decode()?;
                Ok(decoded.get_or_init(|| value))
            }
        }
    }

    pub fn into_value(self) -> Result<T> {
        match self.inner {
            ResultRecord::Typed(value) => Ok(value),
            ResultRecord::Raw { raw, decoded } => match decoded.into_inner() {
                Some(value) => Ok(value),
                None => raw.decode(),
            },
        }
    }

    /// The undecoded payload, when this record came off the raw path.
    pub fn raw_record(&self) -> Option<&RawRecord> {
        match &self.inner {
            ResultRecord::Typed(_) => None,
            ResultRecord::Raw { raw, .. } => Some(raw),
        }
    }
}

enum ResultQueue<T: Record> {
    Typed(MergeQueue<T>),
    Raw(MergeQueue<RawRecord>),
}

/// The lazy final pass of a merge.
///
/// Dropping the result mid-iteration closes every remaining segment stream
/// and removes the scratch files left behind by intermediate passes.
pub struct MergeResult<T: Record> {
    inner: ResultQueue<T>,
    counters: Arc<MergeCounters>,
    fs: Arc<dyn FileSystem>,
    scratch_files: Vec<PathBuf>,
}

impl<T: Record> Drop for MergeResult<T> {
    fn drop(&mut self) {
        for path in self.scratch_files.drain(..) {
            if let Err(e) = self.fs.delete(&path, false) {
                warn!(path = %path.display(), error = %e, "scratch file not removed");
            }
        }
    }
}

impl<T: Record> MergeResult<T> {
    /// Whether records surface undecoded.
    pub fn is_raw(&self) -> bool {
        matches!(self.inner, ResultQueue::Raw(_))
    }

    pub fn counters(&self) -> Arc<MergeCounters> {
        Arc::clone(&self.counters)
    }

    pub fn progress(&self) -> f32 {
        self.counters.progress()
    }
}

impl<T: Record> Iterator for MergeResult<T> {
    type Item = Result<MergeResultRecord<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            ResultQueue::Typed(queue) => match queue.next_record() {
                Ok(Some(value)) => Some(Ok(MergeResultRecord::typed(value))),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            },
            ResultQueue::Raw(queue) => match queue.next_record() {
                Ok(Some(raw)) => Some(Ok(MergeResultRecord::raw(raw))),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            },
        }
    }
}

/// [`RecordReader`] view over a [`MergeResult`]; decodes raw records as it
/// goes.
pub struct MergeResultReader<T: Record> {
    result: MergeResult<T>,
    records: u64,
}

impl<T: Record> MergeResultReader<T> {
    pub fn new(result: MergeResult<T>) -> Self {
        Self { result, records: 0 }
    }
}

impl<T: Record> RecordReader<T> for MergeResultReader<T> {
    fn read_record(&mut self) -> Result<Option<T>> {
        match self.result.next() {
            Some(record) => {
                self.records += 1;
                record?.into_value().map(Some)
            }
            None => Ok(None),
        }
    }

    fn progress(&self) -> f32 {
        self.result.progress()
    }

    fn records_read(&self) -> u64 {
        self.records
    }

    fn bytes_read(&self) -> u64 {
        self.result.counters.bytes_read()
    }
}

/// Sorted merge over already-open readers, itself a reader. Used to fan
/// several channel readers into one ordered stream; the fan-in here is the
/// channel count, so no fan-in reduction applies.
pub struct MergingReader<T: Record> {
    queue: MergeQueue<T>,
    counters: Arc<MergeCounters>,
}

impl<T: Record> MergingReader<T> {
    pub fn new(
        readers: Vec<Box<dyn RecordReader<T>>>,
        comparer: Arc<dyn Comparer<T>>,
    ) -> Result<Self> {
        let counters = Arc::new(MergeCounters::default());
        let compare: Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync> =
            Arc::new(move |a, b| comparer.compare(a, b));
        Ok(Self {
            queue: MergeQueue::open(readers, compare, Arc::clone(&counters))?,
            counters,
        })
    }

    pub fn counters(&self) -> Arc<MergeCounters> {
        Arc::clone(&self.counters)
    }
}

impl<T: Record> RecordReader<T> for MergingReader<T> {
    fn read_record(&mut self) -> Result<Option<T>> {
        self.queue.next_record()
    }

    fn progress(&self) -> f32 {
        self.counters.progress()
    }

    fn records_read(&self) -> u64 {
        self.queue.records_yielded
    }

    fn bytes_read(&self) -> u64 {
        self.counters.bytes_read()
    }
}

/// Runs multi-pass merges with a bounded per-pass fan-in.
pub struct MergeHelper<T: Record> {
    fs: Arc<dyn FileSystem>,
    options: MergeOptions<T>,
    counters: Arc<MergeCounters>,
}

impl<T: Record> MergeHelper<T> {
    pub fn new(fs: Arc<dyn FileSystem>, options: MergeOptions<T>) -> Result<Self> {
        if options.max_disk_inputs_per_pass < 2 {
            return Err(EngineError::configuration(
                "merge fan-in must be at least 2",
            ));
        }
        Ok(Self {
            fs,
            options,
            counters: Arc::new(MergeCounters::default()),
        })
    }

    /// Counters for the progress loop; live across all passes.
    pub fn counters(&self) -> Arc<MergeCounters> {
        Arc::clone(&self.counters)
    }

    /// Merge `inputs` into one sorted stream.
    ///
    /// Intermediate passes always merge the oldest disk segments, sized so
    /// the remaining count lands on a multiple of (fan-in - 1) plus one and
    /// later passes can run at full width. Memory segments only join the
    /// final pass.
    pub fn merge(&self, inputs: Vec<MergeInput<T>>) -> Result<MergeResult<T>> {
        if inputs.is_empty() {
            return Err(EngineError::invalid_operation("merge with no inputs"));
        }
        let raw = self.options.raw_comparer.is_some()
            && inputs.iter().all(MergeInput::supports_raw);

        let mut disk = Vec::new();
        let mut memory = Vec::new();
        for input in inputs {
            if input.is_disk() {
                disk.push(input);
            } else {
                memory.push(input);
            }
        }
        debug!(
            disk_segments = disk.len(),
            memory_segments = memory.len(),
            raw,
            "starting merge"
        );

        let max = self.options.max_disk_inputs_per_pass;
        let mut pass_index = 0usize;
        // Scratch files written by earlier passes of this merge. Caller-owned
        // input segments are never deleted.
        let mut pass_outputs: Vec<PathBuf> = Vec::new();
        while disk.len() > max {
            let batch: Vec<MergeInput<T>> =
                disk.drain(..(disk.len() - 2) % (max - 1) + 2).collect();
            let consumed: Vec<PathBuf> = batch
                .iter()
                .filter_map(|input| match input {
                    MergeInput::Disk { path, .. } if pass_outputs.contains(path) => {
                        Some(path.clone())
                    }
                    _ => None,
                })
                .collect();
            let merged = self.run_intermediate_pass(batch, pass_index, raw)?;
            if let MergeInput::Disk { path, .. } = &merged {
                pass_outputs.push(path.clone());
            }
            for path in consumed {
                self.fs.delete(&path, false)?;
                pass_outputs.retain(|kept| kept != &path);
            }
            disk.push(merged);
            pass_index += 1;
        }

        disk.append(&mut memory);
        let result = self.open_final_pass(disk, raw, pass_outputs)?;
        info!(
            passes = self.counters.merge_passes(),
            raw,
            "merge ready"
        );
        Ok(result)
    }

    fn pass_path(&self, pass_index: usize) -> PathBuf {
        self.options.scratch_directory.join(format!(
            "{}merge_pass_{}.tmp",
            self.options.file_prefix, pass_index
        ))
    }

    fn run_intermediate_pass(
        &self,
        batch: Vec<MergeInput<T>>,
        pass_index: usize,
        raw: bool,
    ) -> Result<MergeInput<T>> {
        let path = self.pass_path(pass_index);
        debug!(
            segments = batch.len(),
            path = %path.display(),
            "intermediate merge pass"
        );
        let sink = self.fs.create(&path)?;
        let store = &self.options.intermediate;
        let written = if raw {
            let mut writer = RawRecordWriter::new(
                sink,
                store.buffer_size,
                store.compression,
                store.checksum,
            )?;
            self.drain_pass(self.open_raw(batch)?, self.raw_compare(), &mut writer)?
        } else {
            let mut writer = BinaryRecordWriter::<T>::new(
                sink,
                store.buffer_size,
                store.compression,
                store.checksum,
            )?;
            self.drain_pass(self.open_typed(batch)?, self.typed_compare(), &mut writer)?
        };
        self.counters
            .merge_passes
            .fetch_add(1, AtomicOrdering::Relaxed);
        Ok(MergeInput::Disk {
            path,
            uncompressed_len: Some(written),
            options: store.clone(),
        })
    }

    fn drain_pass<R: Send>(
        &self,
        readers: Vec<Box<dyn RecordReader<R>>>,
        compare: Arc<dyn Fn(&R, &R) -> Ordering + Send + Sync>,
        writer: &mut dyn RecordWriter<R>,
    ) -> Result<u64> {
        let mut queue = MergeQueue::open(readers, compare, Arc::clone(&self.counters))?;
        let mut last_written = 0;
        while let Some(record) = queue.next_record()? {
            writer.write_record(&record)?;
            let written = writer.bytes_written();
            self.counters.add_written(written - last_written);
            last_written = written;
        }
        writer.finish()?;
        Ok(writer.bytes_written())
    }

    fn open_final_pass(
        &self,
        inputs: Vec<MergeInput<T>>,
        raw: bool,
        scratch_files: Vec<PathBuf>,
    ) -> Result<MergeResult<T>> {
        self.counters
            .merge_passes
            .fetch_add(1, AtomicOrdering::Relaxed);
        let inner = if raw {
            ResultQueue::Raw(MergeQueue::open(
                self.open_raw(inputs)?,
                self.raw_compare(),
                Arc::clone(&self.counters),
            )?)
        } else {
            ResultQueue::Typed(MergeQueue::open(
                self.open_typed(inputs)?,
                self.typed_compare(),
                Arc::clone(&self.counters),
            )?)
        };
        Ok(MergeResult {
            inner,
            counters: Arc::clone(&self.counters),
            fs: Arc::clone(&self.fs),
            scratch_files,
        })
    }

    fn open_typed(&self, inputs: Vec<MergeInput<T>>) -> Result<Vec<Box<dyn RecordReader<T>>>> {
        inputs
            .into_iter()
            .map(|input| input.open_typed(&self.fs))
            .collect()
    }

    fn open_raw(
        &self,
        inputs: Vec<MergeInput<T>>,
    ) -> Result<Vec<Box<dyn RecordReader<RawRecord>>>> {
        inputs
            .into_iter()
            .map(|input| input.open_raw(&self.fs))
            .collect()
    }

    fn typed_compare(&self) -> Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync> {
        let comparer = Arc::clone(&self.options.comparer);
        Arc::new(move |a, b| comparer.compare(a, b))
    }

    fn raw_compare(&self) -> Arc<dyn Fn(&RawRecord, &RawRecord) -> Ordering + Send + Sync> {
        let comparer = self
            .options
            .raw_comparer
            .as_ref()
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::new(BytewiseRawComparer));
        Arc::new(move |a, b| comparer.compare_raw(a.as_bytes(), b.as_bytes()))
    }
}
