//! File-backed channel implementations.
//!
//! The sending stage writes one segment file per partition under the channel
//! directory's `temp/` subdirectory and commits them by rename when the task
//! attempt succeeds. The receiving stage pulls the committed files of all
//! upstream tasks and merges them per partition, which is where the sorted
//! shuffle happens.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use quern_common::compression::CompressionType;
use quern_common::storage::FileSystem;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::heap::Comparer;
use crate::jobs::TaskId;
use crate::jobs::settings::{DEFAULT_MERGE_MAX_FILE_INPUTS, keys};
use crate::merge::{
    DiskInputOptions, MergeCounters, MergeHelper, MergeInput, MergeOptions, MergeResultReader,
    RawComparer,
};
use crate::partitioner::Partitioner;
use crate::records::{
    BinaryRecordReader, BinaryRecordWriter, Record, RecordReader, RecordWriter, VecRecordReader,
};
use crate::task::context::TaskContext;
use crate::task::metrics::TaskMetrics;
use crate::task::progress::ProgressSource;

use super::multi::SourcePartitionCell;
use super::{InputChannel, OutputChannel};

const TEMP_SUBDIRECTORY: &str = "temp";

/// Name of the segment file holding `producing_task`'s records for
/// `partition`.
pub fn segment_file_name(producing_task: &TaskId, partition: usize) -> String {
    format!("{producing_task}_part{partition:05}.seg")
}

/// Resolve the segment-store options from the stage and job settings.
/// `buffer_key` picks the read- or write-side buffer size.
pub fn store_from_settings(context: &TaskContext, buffer_key: &str) -> Result<DiskInputOptions> {
    let mut store = DiskInputOptions::default();
    if let Some(size) = context.setting::<usize>(buffer_key)? {
        store.buffer_size = size;
    }
    if let Some(compression) = context.setting::<CompressionType>(keys::INTERMEDIATE_COMPRESSION)? {
        store.compression = compression;
    }
    if let Some(checksum) = context.setting::<bool>(keys::INTERMEDIATE_CHECKSUM)? {
        store.checksum = checksum;
    }
    Ok(store)
}

fn open_segment_reader<T: Record>(
    fs: &Arc<dyn FileSystem>,
    path: &std::path::Path,
    store: &DiskInputOptions,
) -> Result<BinaryRecordReader<T>> {
    let stream = fs.open_read(path)?;
    let len = match store.compression {
        quern_common::compression::CompressionType::None => Some(stream.len),
        _ => None,
    };
    BinaryRecordReader::new(
        stream.stream,
        store.buffer_size,
        store.compression,
        store.checksum,
        len,
    )
}

/// Output side of a file channel: routes each record to a per-partition
/// segment file through the stage's partitioner.
pub struct FileOutputChannel<T: Record> {
    fs: Arc<dyn FileSystem>,
    directory: PathBuf,
    temp_directory: PathBuf,
    task: TaskId,
    partitioner: Box<dyn Partitioner<T>>,
    store: DiskInputOptions,
    writers: Vec<Option<BinaryRecordWriter<T>>>,
    finished: bool,
}

impl<T: Record> FileOutputChannel<T> {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        directory: impl Into<PathBuf>,
        task: TaskId,
        partitioner: Box<dyn Partitioner<T>>,
        store: DiskInputOptions,
    ) -> Result<Self> {
        let directory = directory.into();
        let temp_directory = directory.join(TEMP_SUBDIRECTORY);
        fs.create_directory(&temp_directory)?;
        let partitions = partitioner.partitions();
        Ok(Self {
            fs,
            directory,
            temp_directory,
            task,
            partitioner,
            store,
            writers: (0..partitions).map(|_| None).collect(),
            finished: false,
        })
    }

    /// Build the channel with its store options taken from the stage and job
    /// settings instead of caller-supplied [`DiskInputOptions`].
    pub fn from_settings(
        context: &TaskContext,
        fs: Arc<dyn FileSystem>,
        directory: impl Into<PathBuf>,
        partitioner: Box<dyn Partitioner<T>>,
    ) -> Result<Self> {
        let store = store_from_settings(context, keys::WRITE_BUFFER_SIZE)?;
        Self::new(
            fs,
            directory,
            context.attempt_id().task_id().clone(),
            partitioner,
            store,
        )
    }

    fn writer_for(&mut self, partition: usize) -> Result<&mut BinaryRecordWriter<T>> {
        if self.writers[partition].is_none() {
            let path = self
                .temp_directory
                .join(segment_file_name(&self.task, partition));
            let sink = self.fs.create(&path)?;
            self.writers[partition] = Some(BinaryRecordWriter::new(
                sink,
                self.store.buffer_size,
                self.store.compression,
                self.store.checksum,
            )?);
        }
        Ok(self.writers[partition]
            .as_mut()
            .expect("writer created above"))
    }
}

impl<T: Record> RecordWriter<T> for FileOutputChannel<T> {
    fn write_record(&mut self, record: &T) -> Result<()> {
        if self.finished {
            return Err(EngineError::invalid_operation("write after finish"));
        }
        let partition = self.partitioner.partition(record);
        self.writer_for(partition)?.write_record(record)
    }

    fn records_written(&self) -> u64 {
        self.writers
            .iter()
            .flatten()
            .map(|writer| writer.records_written())
            .sum()
    }

    fn bytes_written(&self) -> u64 {
        self.writers
            .iter()
            .flatten()
            .map(|writer| writer.bytes_written())
            .sum()
    }

    fn finish(&mut self) -> Result<()> {
        if !self.finished {
            for writer in self.writers.iter_mut().flatten() {
                writer.finish()?;
            }
            self.finished = true;
        }
        Ok(())
    }
}

impl<T: Record> OutputChannel<T> for FileOutputChannel<T> {
    fn commit(&mut self) -> Result<()> {
        if !self.finished {
            return Err(EngineError::invalid_operation("commit before finish"));
        }
        for (partition, writer) in self.writers.iter().enumerate() {
            if writer.is_some() {
                let name = segment_file_name(&self.task, partition);
                self.fs
                    .rename(&self.temp_directory.join(&name), &self.directory.join(&name))?;
            }
        }
        debug!(task = %self.task, "committed channel output");
        Ok(())
    }
}

/// Tracks the most recent merge of a [`FileInputChannel`] for the progress
/// loop.
#[derive(Default)]
struct LatestMerge {
    counters: Mutex<Option<Arc<MergeCounters>>>,
}

impl ProgressSource for LatestMerge {
    fn fraction(&self) -> f32 {
        self.counters
            .lock()
            .expect("merge progress poisoned")
            .as_ref()
            .map(|counters| counters.progress())
            .unwrap_or(0.0)
    }
}

/// Input side of a file channel: merges the committed segment files of every
/// upstream task, one sorted stream per partition.
pub struct FileInputChannel<T: Record> {
    fs: Arc<dyn FileSystem>,
    directory: PathBuf,
    scratch_directory: PathBuf,
    upstream_tasks: Vec<TaskId>,
    assigned_partitions: Vec<usize>,
    store: DiskInputOptions,
    comparer: Arc<dyn Comparer<T>>,
    raw_comparer: Option<Arc<dyn RawComparer>>,
    max_file_inputs: usize,
    latest_merge: Arc<LatestMerge>,
    past_merges: Vec<Arc<MergeCounters>>,
}

impl<T: Record> FileInputChannel<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fs: Arc<dyn FileSystem>,
        directory: impl Into<PathBuf>,
        scratch_directory: impl Into<PathBuf>,
        upstream_tasks: Vec<TaskId>,
        assigned_partitions: Vec<usize>,
        store: DiskInputOptions,
        comparer: Arc<dyn Comparer<T>>,
        max_file_inputs: usize,
    ) -> Self {
        Self {
            fs,
            directory: directory.into(),
            scratch_directory: scratch_directory.into(),
            upstream_tasks,
            assigned_partitions,
            store,
            comparer,
            raw_comparer: None,
            max_file_inputs,
            latest_merge: Arc::new(LatestMerge::default()),
            past_merges: Vec::new(),
        }
    }

    /// Build the channel with its store options and merge fan-in taken from
    /// the stage and job settings.
    pub fn from_settings(
        context: &TaskContext,
        fs: Arc<dyn FileSystem>,
        directory: impl Into<PathBuf>,
        scratch_directory: impl Into<PathBuf>,
        upstream_tasks: Vec<TaskId>,
        assigned_partitions: Vec<usize>,
        comparer: Arc<dyn Comparer<T>>,
    ) -> Result<Self> {
        let store = store_from_settings(context, keys::READ_BUFFER_SIZE)?;
        let max_file_inputs = context
            .setting::<usize>(keys::MERGE_MAX_FILE_INPUTS)?
            .unwrap_or(DEFAULT_MERGE_MAX_FILE_INPUTS);
        Ok(Self::new(
            fs,
            directory,
            scratch_directory,
            upstream_tasks,
            assigned_partitions,
            store,
            comparer,
            max_file_inputs,
        ))
    }

    /// Enable the raw merge fast path for this channel's record encoding.
    pub fn with_raw_comparer(mut self, comparer: Arc<dyn RawComparer>) -> Self {
        self.raw_comparer = Some(comparer);
        self
    }
}

impl<T: Record> InputChannel<T> for FileInputChannel<T> {
    fn assigned_partitions(&self) -> Vec<usize> {
        self.assigned_partitions.clone()
    }

    fn open_partition(&mut self, partition: usize) -> Result<Box<dyn RecordReader<T>>> {
        let mut inputs = Vec::new();
        for task in &self.upstream_tasks {
            let path = self.directory.join(segment_file_name(task, partition));
            // A task that produced no records for this partition wrote no
            // segment file.
            if self.fs.exists(&path) {
                inputs.push(MergeInput::disk(path, self.store.clone()));
            }
        }
        if inputs.is_empty() {
            return Ok(Box::new(VecRecordReader::<T>::new(Vec::new())));
        }

        let mut options = MergeOptions::with_comparer(
            self.scratch_directory.clone(),
            Arc::clone(&self.comparer),
        )
        .file_prefix(format!("part{partition}_"))
        .max_disk_inputs_per_pass(self.max_file_inputs)
        .intermediate(self.store.clone());
        if let Some(raw) = &self.raw_comparer {
            options = options.raw_comparer(Arc::clone(raw));
        }

        let helper = MergeHelper::new(Arc::clone(&self.fs), options)?;
        let counters = helper.counters();
        *self
            .latest_merge
            .counters
            .lock()
            .expect("merge progress poisoned") = Some(Arc::clone(&counters));
        self.past_merges.push(counters);
        let result = helper.merge(inputs)?;
        Ok(Box::new(MergeResultReader::new(result)))
    }

    fn progress_source(&self) -> Option<(String, Arc<dyn ProgressSource>)> {
        Some((
            "merge".to_string(),
            Arc::clone(&self.latest_merge) as Arc<dyn ProgressSource>,
        ))
    }

    fn metrics(&self) -> TaskMetrics {
        let mut metrics = TaskMetrics::default();
        for counters in &self.past_merges {
            metrics.local_bytes_read += counters.bytes_read();
            metrics.local_bytes_written += counters.bytes_written();
        }
        metrics
    }
}

/// File-system output writer: one file per task, or one file per *source
/// partition* when a shared [`SourcePartitionCell`] is installed. Files land
/// under `temp/` and become visible on commit.
pub struct PartitionFileWriter<T: Record> {
    fs: Arc<dyn FileSystem>,
    directory: PathBuf,
    temp_directory: PathBuf,
    task: TaskId,
    store: DiskInputOptions,
    source_partition: Option<Arc<SourcePartitionCell>>,
    current: Option<(Option<usize>, BinaryRecordWriter<T>)>,
    produced: Vec<String>,
    records: u64,
    bytes: u64,
    finished: bool,
}

impl<T: Record> PartitionFileWriter<T> {
    /// One output file for the whole task.
    pub fn per_task(
        fs: Arc<dyn FileSystem>,
        directory: impl Into<PathBuf>,
        task: TaskId,
        store: DiskInputOptions,
    ) -> Result<Self> {
        Self::create(fs, directory, task, store, None)
    }

    /// One output file per source partition, switching whenever the cell's
    /// partition changes.
    pub fn per_source_partition(
        fs: Arc<dyn FileSystem>,
        directory: impl Into<PathBuf>,
        task: TaskId,
        store: DiskInputOptions,
        source_partition: Arc<SourcePartitionCell>,
    ) -> Result<Self> {
        Self::create(fs, directory, task, store, Some(source_partition))
    }

    fn create(
        fs: Arc<dyn FileSystem>,
        directory: impl Into<PathBuf>,
        task: TaskId,
        store: DiskInputOptions,
        source_partition: Option<Arc<SourcePartitionCell>>,
    ) -> Result<Self> {
        let directory = directory.into();
        let temp_directory = directory.join(TEMP_SUBDIRECTORY);
        fs.create_directory(&temp_directory)?;
        Ok(Self {
            fs,
            directory,
            temp_directory,
            task,
            store,
            source_partition,
            current: None,
            produced: Vec::new(),
            records: 0,
            bytes: 0,
            finished: false,
        })
    }

    pub fn produced_files(&self) -> &[String] {
        &self.produced
    }

    fn file_name(&self, partition: Option<usize>) -> String {
        match partition {
            Some(partition) => format!("{}_part{partition:05}", self.task),
            None => self.task.to_string(),
        }
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some((_, mut writer)) = self.current.take() {
            writer.finish()?;
            self.records += writer.records_written();
            self.bytes += writer.bytes_written();
        }
        Ok(())
    }
}

impl<T: Record> RecordWriter<T> for PartitionFileWriter<T> {
    fn write_record(&mut self, record: &T) -> Result<()> {
        if self.finished {
            return Err(EngineError::invalid_operation("write after finish"));
        }
        let desired = self
            .source_partition
            .as_ref()
            .and_then(|cell| cell.current());
        let stale = match &self.current {
            Some((partition, _)) => *partition != desired,
            None => true,
        };
        if stale {
            self.close_current()?;
            let name = self.file_name(desired);
            let sink = self.fs.create(&self.temp_directory.join(&name))?;
            self.produced.push(name);
            self.current = Some((
                desired,
                BinaryRecordWriter::new(
                    sink,
                    self.store.buffer_size,
                    self.store.compression,
                    self.store.checksum,
                )?,
            ));
        }
        match &mut self.current {
            Some((_, writer)) => writer.write_record(record),
            None => unreachable!("writer opened above"),
        }
    }

    fn records_written(&self) -> u64 {
        self.records
            + self
                .current
                .as_ref()
                .map(|(_, writer)| writer.records_written())
                .unwrap_or(0)
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
            + self
                .current
                .as_ref()
                .map(|(_, writer)| writer.bytes_written())
                .unwrap_or(0)
    }

    fn finish(&mut self) -> Result<()> {
        if !self.finished {
            self.close_current()?;
            self.finished = true;
        }
        Ok(())
    }
}

impl<T: Record> OutputChannel<T> for PartitionFileWriter<T> {
    fn commit(&mut self) -> Result<()> {
        if !self.finished {
            return Err(EngineError::invalid_operation("commit before finish"));
        }
        for name in &self.produced {
            self.fs
                .rename(&self.temp_directory.join(name), &self.directory.join(name))?;
        }
        debug!(task = %self.task, files = self.produced.len(), "committed task output");
        Ok(())
    }
}

/// Sequential reader over a fixed list of segment files; backs direct
/// file-system data inputs.
pub struct FileSetReader<T: Record> {
    fs: Arc<dyn FileSystem>,
    remaining: std::vec::IntoIter<PathBuf>,
    store: DiskInputOptions,
    current: Option<BinaryRecordReader<T>>,
    total: usize,
    exhausted: usize,
    records: u64,
    bytes: u64,
}

impl<T: Record> FileSetReader<T> {
    pub fn new(fs: Arc<dyn FileSystem>, paths: Vec<PathBuf>, store: DiskInputOptions) -> Self {
        let total = paths.len();
        Self {
            fs,
            remaining: paths.into_iter(),
            store,
            current: None,
            total,
            exhausted: 0,
            records: 0,
            bytes: 0,
        }
    }
}

impl<T: Record> RecordReader<T> for FileSetReader<T> {
    fn read_record(&mut self) -> Result<Option<T>> {
        loop {
            if self.current.is_none() {
                match self.remaining.next() {
                    Some(path) => {
                        self.current =
                            Some(open_segment_reader(&self.fs, &path, &self.store)?);
                    }
                    None => return Ok(None),
                }
            }
            let reader = self.current.as_mut().expect("reader opened above");
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
            .map(|reader| reader.progress())
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
                .map(|reader| reader.bytes_read())
                .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quern_common::storage::LocalFileSystem;

    use crate::partitioner::HashPartitioner;

    fn fs() -> Arc<dyn FileSystem> {
        Arc::new(LocalFileSystem::new())
    }

    fn write_channel_output(
        dir: &std::path::Path,
        task: TaskId,
        partitions: usize,
        values: &[i64],
    ) {
        let mut channel = FileOutputChannel::new(
            fs(),
            dir,
            task,
            Box::new(HashPartitioner::<i64>::new(partitions)),
            DiskInputOptions::default(),
        )
        .unwrap();
        for value in values {
            channel.write_record(value).unwrap();
        }
        channel.finish().unwrap();
        channel.commit().unwrap();
    }

    #[test]
    fn test_channel_round_trip_merges_upstream_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let partitions = 3;
        write_channel_output(
            dir.path(),
            TaskId::new("Map", 1),
            partitions,
            &(0..50).collect::<Vec<i64>>(),
        );
        write_channel_output(
            dir.path(),
            TaskId::new("Map", 2),
            partitions,
            &(50..100).collect::<Vec<i64>>(),
        );

        let mut channel = FileInputChannel::<i64>::new(
            fs(),
            dir.path(),
            scratch.path(),
            vec![TaskId::new("Map", 1), TaskId::new("Map", 2)],
            (0..partitions).collect(),
            DiskInputOptions::default(),
            Arc::new(crate::heap::NaturalOrder),
            64,
        );

        let partitioner = HashPartitioner::<i64>::new(partitions);
        let mut seen = Vec::new();
        for partition in 0..partitions {
            let mut reader = channel.open_partition(partition).unwrap();
            let mut previous: Option<i64> = None;
            while let Some(value) = reader.read_record().unwrap() {
                assert_eq!(partitioner.partition(&value), partition);
                if let Some(previous) = previous {
                    assert!(previous <= value);
                }
                previous = Some(value);
                seen.push(value);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<i64>>());
    }

    #[test]
    fn test_uncommitted_output_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel = FileOutputChannel::new(
            fs(),
            dir.path(),
            TaskId::new("Map", 1),
            Box::new(HashPartitioner::<i64>::new(1)),
            DiskInputOptions::default(),
        )
        .unwrap();
        channel.write_record(&7).unwrap();
        channel.finish().unwrap();
        // No commit: the segment exists only under temp/.
        let name = segment_file_name(&TaskId::new("Map", 1), 0);
        assert!(!dir.path().join(&name).exists());
        assert!(dir.path().join(TEMP_SUBDIRECTORY).join(&name).exists());
    }

    #[test]
    fn test_partition_file_writer_switches_on_source_partition() {
        let dir = tempfile::tempdir().unwrap();
        let cell = Arc::new(SourcePartitionCell::new());
        let mut writer = PartitionFileWriter::<i64>::per_source_partition(
            fs(),
            dir.path(),
            TaskId::new("Agg", 1),
            DiskInputOptions::default(),
            Arc::clone(&cell),
        )
        .unwrap();

        cell.set(0);
        writer.write_record(&1).unwrap();
        writer.write_record(&2).unwrap();
        cell.set(4);
        writer.write_record(&3).unwrap();
        writer.finish().unwrap();
        writer.commit().unwrap();

        assert_eq!(
            writer.produced_files(),
            &["Agg-001_part00000".to_string(), "Agg-001_part00004".to_string()]
        );
        assert!(dir.path().join("Agg-001_part00000").exists());
        assert!(dir.path().join("Agg-001_part00004").exists());
    }

    fn settings_context(
        stage_settings: &[(&str, &str)],
        job_settings: &[(&str, &str)],
    ) -> TaskContext {
        use crate::jobs::{JobConfiguration, StageConfiguration, TaskAttemptId};
        use crate::task::progress::StatusBuffer;

        let mut job = JobConfiguration::new("settings");
        for (key, value) in job_settings {
            job.job_settings.set(*key, value);
        }
        let mut stage = StageConfiguration::new("Reduce", "Identity", 1);
        for (key, value) in stage_settings {
            stage.settings.set(*key, value);
        }
        TaskContext::new(
            uuid::Uuid::new_v4(),
            job,
            stage,
            TaskAttemptId::new(TaskId::new("Reduce", 1), 1),
            std::env::temp_dir(),
            std::env::temp_dir(),
            StatusBuffer::new().handle(),
        )
    }

    #[test]
    fn test_store_options_resolve_stage_over_job() {
        let context = settings_context(
            &[(keys::INTERMEDIATE_COMPRESSION, "lz4")],
            &[
                (keys::INTERMEDIATE_COMPRESSION, "zstd"),
                (keys::INTERMEDIATE_CHECKSUM, "true"),
                (keys::WRITE_BUFFER_SIZE, "1024"),
            ],
        );
        let store = store_from_settings(&context, keys::WRITE_BUFFER_SIZE).unwrap();
        assert_eq!(store.compression, CompressionType::Lz4);
        assert!(store.checksum);
        assert_eq!(store.buffer_size, 1024);

        let err = settings_context(&[(keys::INTERMEDIATE_COMPRESSION, "brotli")], &[]);
        assert!(store_from_settings(&err, keys::WRITE_BUFFER_SIZE).is_err());
    }

    #[test]
    fn test_channels_built_from_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let context = settings_context(
            &[(keys::MERGE_MAX_FILE_INPUTS, "2")],
            &[
                (keys::INTERMEDIATE_COMPRESSION, "lz4"),
                (keys::INTERMEDIATE_CHECKSUM, "true"),
            ],
        );

        let mut out = FileOutputChannel::<i64>::from_settings(
            &context,
            fs(),
            dir.path(),
            Box::new(HashPartitioner::<i64>::new(2)),
        )
        .unwrap();
        for value in 0..100i64 {
            out.write_record(&value).unwrap();
        }
        out.finish().unwrap();
        out.commit().unwrap();

        // The committed segment opens with the LZ4 frame magic, so the
        // configured compression really reached the writer.
        let name = segment_file_name(&TaskId::new("Reduce", 1), 0);
        let bytes = std::fs::read(dir.path().join(&name)).unwrap();
        assert_eq!(&bytes[..4], &[0x04, 0x22, 0x4D, 0x18]);

        let mut input = FileInputChannel::<i64>::from_settings(
            &context,
            fs(),
            dir.path(),
            scratch.path(),
            vec![TaskId::new("Reduce", 1)],
            vec![0, 1],
            Arc::new(crate::heap::NaturalOrder),
        )
        .unwrap();
        let mut seen = Vec::new();
        for partition in 0..2 {
            let mut reader = input.open_partition(partition).unwrap();
            while let Some(value) = reader.read_record().unwrap() {
                seen.push(value);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<i64>>());
    }

    #[test]
    fn test_file_set_reader_concatenates() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskInputOptions::default();
        for (index, values) in [vec![1i64, 2], vec![], vec![3, 4, 5]].iter().enumerate() {
            let path = dir.path().join(format!("input{index}"));
            let mut writer = BinaryRecordWriter::<i64>::new(
                fs().create(&path).unwrap(),
                store.buffer_size,
                store.compression,
                store.checksum,
            )
            .unwrap();
            for value in values {
                writer.write_record(value).unwrap();
            }
            writer.finish().unwrap();
        }

        let paths = (0..3).map(|i| dir.path().join(format!("input{i}"))).collect();
        let mut reader = FileSetReader::<i64>::new(fs(), paths, store);
        let mut out = Vec::new();
        while let Some(value) = reader.read_record().unwrap() {
            out.push(value);
        }
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
        assert_eq!(reader.records_read(), 5);
        assert_eq!(reader.progress(), 1.0);
    }
}
