//! Runs one task attempt end to end.
//!
//! The execution wires an input source and an output sink around the task
//! runner, drives the partitioned-input protocol against the coordinator,
//! keeps a background progress loop fed, and commits the output only when
//! the attempt succeeded. Any error reaching the outermost boundary is
//! logged and reported to the coordinator exactly once; nothing below that
//! boundary swallows errors.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quern_common::storage::FileSystem;
use tracing::{error, info, warn};

use crate::channels::{InputChannel, MultiPartitionReader, SourcePartitionCell};
use crate::error::{EngineError, Result};
use crate::jobs::settings::{DEFAULT_PROGRESS_INTERVAL_MS, keys};
use crate::merge::DiskInputOptions;
use crate::records::{Record, RecordReader, RecordWriter};
use crate::task::context::TaskContext;
use crate::task::coordinator::CoordinatorClient;
use crate::task::metrics::TaskMetrics;
use crate::task::progress::{ProgressState, TrackedReader, run_progress_loop};
use crate::task::runner::TaskRunner;

/// Factory recreating the task runner between partitions.
pub type RunnerFactory<I, O> =
    Box<dyn Fn() -> Result<Box<dyn TaskRunner<I, O>>> + Send + Sync>;

/// Where a task attempt reads its records from.
pub enum TaskInput<I: Record> {
    /// Direct file-system input: the fixed split for this task number.
    Files {
        paths: Vec<PathBuf>,
        store: DiskInputOptions,
    },
    /// One or more input channels, already fanned into one (see
    /// [`crate::channels::MergingMultiInputReader`]).
    Channel(Box<dyn InputChannel<I>>),
    /// A ready-made reader; pipeline plumbing and tests.
    Reader(Box<dyn RecordReader<I>>),
}

/// Where a task attempt writes its records to. File-backed variants are
/// committed by the execution after a successful run.
pub enum TaskOutput<O: Record> {
    /// DFS output files (per task or per source partition).
    Files(crate::channels::PartitionFileWriter<O>),
    /// A file channel feeding the next stage.
    Channel(crate::channels::FileOutputChannel<O>),
    /// A ready-made sink; pipeline plumbing and tests.
    Writer(Box<dyn RecordWriter<O>>),
}

impl<O: Record> TaskOutput<O> {
    fn writer(&mut self) -> &mut dyn RecordWriter<O> {
        match self {
            Self::Files(writer) => writer,
            Self::Channel(channel) => channel,
            Self::Writer(writer) => writer.as_mut(),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.writer().finish()
    }

    fn commit(&mut self) -> Result<()> {
        use crate::channels::OutputChannel;
        match self {
            Self::Files(writer) => writer.commit(),
            Self::Channel(channel) => channel.commit(),
            Self::Writer(_) => Ok(()),
        }
    }
}

/// One task attempt, runnable exactly once.
pub struct TaskExecution<I: Record, O: Record> {
    context: TaskContext,
    fs: Arc<dyn FileSystem>,
    coordinator: Arc<dyn CoordinatorClient>,
    runner_factory: RunnerFactory<I, O>,
    input: Option<TaskInput<I>>,
    output: Option<TaskOutput<O>>,
    progress: Arc<ProgressState>,
    source_partition: Option<Arc<SourcePartitionCell>>,
    metrics: TaskMetrics,
    disposed: bool,
}

impl<I: Record, O: Record> TaskExecution<I, O> {
    pub fn new(
        context: TaskContext,
        fs: Arc<dyn FileSystem>,
        coordinator: Arc<dyn CoordinatorClient>,
        runner_factory: RunnerFactory<I, O>,
        input: TaskInput<I>,
        output: TaskOutput<O>,
        progress: Arc<ProgressState>,
    ) -> Self {
        Self {
            context,
            fs,
            coordinator,
            runner_factory,
            input: Some(input),
            output: Some(output),
            progress,
            source_partition: None,
            metrics: TaskMetrics::default(),
            disposed: false,
        }
    }

    /// Publish the current source partition through `cell` while reading, so
    /// a per-source-partition output writer can follow along.
    pub fn with_source_partition_cell(mut self, cell: Arc<SourcePartitionCell>) -> Self {
        self.source_partition = Some(cell);
        self
    }

    fn check_disposed(&self) -> Result<()> {
        if self.disposed {
            return Err(EngineError::invalid_operation(
                "task execution already completed",
            ));
        }
        Ok(())
    }

    /// Run the attempt: execute the task body, commit output on success, and
    /// report the outcome to the coordinator. This is the outermost error
    /// boundary of a task attempt.
    pub async fn run(&mut self) -> Result<TaskMetrics> {
        self.check_disposed()?;
        let attempt = self.context.attempt_id().clone();
        info!(%attempt, stage = self.context.stage().stage_id, "starting task attempt");

        let interval_ms = self
            .context
            .setting::<u64>(keys::PROGRESS_INTERVAL_MS)?
            .unwrap_or(DEFAULT_PROGRESS_INTERVAL_MS);
        let reporter = tokio::spawn(run_progress_loop(
            Arc::clone(&self.progress),
            attempt.clone(),
            Arc::clone(&self.coordinator),
            Duration::from_millis(interval_ms.max(1)),
        ));

        let outcome = self.execute().await;

        self.progress.force_report();
        self.progress.mark_finished();
        if let Err(e) = reporter.await {
            warn!(%attempt, error = %e, "progress loop aborted");
        }
        self.disposed = true;

        match outcome {
            Ok(()) => {
                self.coordinator
                    .report_completion(&attempt, &self.metrics)
                    .await?;
                info!(%attempt, records = self.metrics.records_written, "task attempt complete");
                Ok(self.metrics)
            }
            Err(e) => {
                error!(%attempt, error = %e, "task attempt failed");
                if let Err(report) = self
                    .coordinator
                    .report_error(&attempt, &e.to_string())
                    .await
                {
                    // The primary failure is already being reported; a
                    // secondary reporting failure must not mask it.
                    warn!(%attempt, error = %report, "failure report did not reach coordinator");
                }
                Err(EngineError::task_failed(
                    format!("attempt {attempt} failed"),
                    e,
                ))
            }
        }
    }

    async fn execute(&mut self) -> Result<()> {
        let input = self
            .input
            .take()
            .ok_or_else(|| EngineError::invalid_operation("task input already consumed"))?;
        let mut output = self
            .output
            .take()
            .ok_or_else(|| EngineError::invalid_operation("task output already consumed"))?;

        match input {
            TaskInput::Reader(reader) => {
                self.run_single(reader, &mut output)?;
            }
            TaskInput::Files { paths, store } => {
                let reader = crate::channels::FileSetReader::<I>::new(
                    Arc::clone(&self.fs),
                    paths,
                    store,
                );
                self.run_single(Box::new(reader), &mut output)?;
            }
            TaskInput::Channel(mut channel) => {
                if let Some((name, source)) = channel.progress_source() {
                    self.progress.add_source(name, source);
                }
                self.run_partitioned(&mut channel, &mut output).await?;
                self.metrics.merge_from(&channel.metrics());
            }
        }

        output.finish()?;
        self.metrics.records_written = output.writer().records_written();
        self.metrics.bytes_written = output.writer().bytes_written();
        output.commit()?;
        Ok(())
    }

    fn run_single(
        &mut self,
        reader: Box<dyn RecordReader<I>>,
        output: &mut TaskOutput<O>,
    ) -> Result<()> {
        let mut reader = TrackedReader::new(reader, Arc::clone(&self.progress));
        let mut runner = (self.runner_factory)()?;
        runner.run(&self.context, &mut reader, output.writer())?;
        self.metrics.records_read += reader.records_read();
        self.metrics.bytes_read += reader.bytes_read();
        Ok(())
    }

    /// Drive the partitioned-input protocol: confirm each partition before
    /// processing, skip and shrink the total on reassignment, ask for more
    /// when the assigned set is exhausted.
    async fn run_partitioned(
        &mut self,
        channel: &mut Box<dyn InputChannel<I>>,
        output: &mut TaskOutput<O>,
    ) -> Result<()> {
        let attempt = self.context.attempt_id().clone();
        let mut pending: VecDeque<usize> = channel.assigned_partitions().into();
        let mut total = pending.len() as u32;
        let mut finished = 0u32;
        self.progress.set_partitions(finished, total);

        let all_partitions = (self.runner_factory)()?.process_all_partitions();
        let mut shared_runner = if all_partitions {
            Some((self.runner_factory)()?)
        } else {
            None
        };

        loop {
            if all_partitions {
                // Confirm the whole pending set, then feed it through one
                // reader and one runner instance.
                let mut approved = Vec::new();
                while let Some(partition) = pending.pop_front() {
                    if self.confirm_partition(&attempt, partition, &mut total).await? {
                        approved.push(partition);
                    }
                }
                self.progress.set_partitions(finished, total);
                if !approved.is_empty() {
                    let mut segments = Vec::with_capacity(approved.len());
                    for partition in &approved {
                        segments.push((*partition, channel.open_partition(*partition)?));
                    }
                    let mut reader = MultiPartitionReader::new(segments);
                    if let Some(cell) = &self.source_partition {
                        reader = reader.with_partition_cell(Arc::clone(cell));
                    }
                    let mut reader =
                        TrackedReader::new(Box::new(reader), Arc::clone(&self.progress));
                    let runner = shared_runner.as_mut().expect("all-partitions runner");
                    runner.run(&self.context, &mut reader, output.writer())?;
                    self.metrics.records_read += reader.records_read();
                    self.metrics.bytes_read += reader.bytes_read();
                    finished += approved.len() as u32;
                    self.progress.set_partitions(finished, total);
                }
            } else {
                while let Some(partition) = pending.pop_front() {
                    if !self.confirm_partition(&attempt, partition, &mut total).await? {
                        self.progress.set_partitions(finished, total);
                        continue;
                    }
                    self.context
                        .set_status(format!("partition {partition}"));
                    if let Some(cell) = &self.source_partition {
                        cell.set(partition);
                    }
                    let reader = channel.open_partition(partition)?;
                    let mut reader =
                        TrackedReader::new(reader, Arc::clone(&self.progress));
                    // A fresh runner per partition; a runner wanting state
                    // across partitions opts into all-partitions mode.
                    let mut runner = (self.runner_factory)()?;
                    runner.run(&self.context, &mut reader, output.writer())?;
                    self.metrics.records_read += reader.records_read();
                    self.metrics.bytes_read += reader.bytes_read();
                    finished += 1;
                    self.progress.set_partitions(finished, total);
                }
            }

            let more = self.coordinator.get_additional_partitions(&attempt).await?;
            if more.is_empty() {
                break;
            }
            info!(%attempt, count = more.len(), "received additional partitions");
            self.metrics.dynamically_assigned_partitions += more.len() as u32;
            total += more.len() as u32;
            self.progress.set_partitions(finished, total);
            pending.extend(more);
        }
        Ok(())
    }

    async fn confirm_partition(
        &mut self,
        attempt: &crate::jobs::TaskAttemptId,
        partition: usize,
        total: &mut u32,
    ) -> Result<bool> {
        if self
            .coordinator
            .notify_start_partition_processing(attempt, partition)
            .await?
        {
            return Ok(true);
        }
        info!(%attempt, partition, "partition reassigned, skipping");
        *total = total.saturating_sub(1);
        self.metrics.discarded_partitions += 1;
        Ok(false)
    }

    /// The metrics accumulated so far (complete once [`Self::run`] returned).
    pub fn metrics(&self) -> &TaskMetrics {
        &self.metrics
    }
}
