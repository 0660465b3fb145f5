//! The task-logic contract and runner composition.

use std::marker::PhantomData;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;

use crate::error::{EngineError, Result};
use crate::records::{Record, RecordReader, RecordWriter};
use crate::task::context::TaskContext;

/// User-supplied task logic: pull records from `input`, push records to
/// `output`.
///
/// By default a fresh runner instance is created for every input partition;
/// a runner that wants to see all of its partitions through one reader opts
/// in via [`TaskRunner::process_all_partitions`].
pub trait TaskRunner<I: Record, O: Record>: Send {
    fn run(
        &mut self,
        context: &TaskContext,
        input: &mut dyn RecordReader<I>,
        output: &mut dyn RecordWriter<O>,
    ) -> Result<()>;

    fn process_all_partitions(&self) -> bool {
        false
    }
}

/// Runner that copies its input to its output unchanged.
#[derive(Default)]
pub struct IdentityTask<T: Record> {
    _phantom: PhantomData<fn(&T)>,
}

impl<T: Record> IdentityTask<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: Record> TaskRunner<T, T> for IdentityTask<T> {
    fn run(
        &mut self,
        _context: &TaskContext,
        input: &mut dyn RecordReader<T>,
        output: &mut dyn RecordWriter<T>,
    ) -> Result<()> {
        while let Some(record) = input.read_record()? {
            output.write_record(&record)?;
        }
        Ok(())
    }
}

/// Records buffered between the two halves of a [`ChainedRunner`] before the
/// producing side blocks.
const PIPELINE_BUFFER_RECORDS: usize = 256;

/// Sending half of the in-process pipeline between a fused parent and child.
struct PipelineSender<M> {
    sender: Option<SyncSender<M>>,
    written: u64,
}

impl<M: Record + Clone> RecordWriter<M> for PipelineSender<M> {
    fn write_record(&mut self, record: &M) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| EngineError::invalid_operation("write after finish"))?;
        sender
            .send(record.clone())
            .map_err(|_| EngineError::channel("pipeline reader closed"))?;
        self.written += 1;
        Ok(())
    }

    fn records_written(&self) -> u64 {
        self.written
    }

    fn bytes_written(&self) -> u64 {
        0
    }

    fn finish(&mut self) -> Result<()> {
        self.sender = None;
        Ok(())
    }
}

/// Receiving half: end of stream when the sender is dropped.
struct PipelineReceiver<M> {
    receiver: Receiver<M>,
    read: u64,
    closed: bool,
}

impl<M: Record> RecordReader<M> for PipelineReceiver<M> {
    fn read_record(&mut self) -> Result<Option<M>> {
        match self.receiver.recv() {
            Ok(record) => {
                self.read += 1;
                Ok(Some(record))
            }
            Err(_) => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    fn progress(&self) -> f32 {
        if self.closed { 1.0 } else { 0.0 }
    }

    fn records_read(&self) -> u64 {
        self.read
    }

    fn bytes_read(&self) -> u64 {
        0
    }
}

/// Two runners fused into one process: the parent streams records to the
/// child through a bounded in-memory channel, so the child consumes records
/// as the parent produces them and at most [`PIPELINE_BUFFER_RECORDS`] are
/// ever held between the two. No records are serialized.
pub struct ChainedRunner<I: Record, M: Record + Clone, O: Record> {
    parent: Box<dyn TaskRunner<I, M>>,
    child: Box<dyn TaskRunner<M, O>>,
}

impl<I: Record, M: Record + Clone, O: Record> ChainedRunner<I, M, O> {
    pub fn new(parent: Box<dyn TaskRunner<I, M>>, child: Box<dyn TaskRunner<M, O>>) -> Self {
        Self { parent, child }
    }
}

impl<I: Record, M: Record + Clone, O: Record> TaskRunner<I, O> for ChainedRunner<I, M, O> {
    fn run(
        &mut self,
        context: &TaskContext,
        input: &mut dyn RecordReader<I>,
        output: &mut dyn RecordWriter<O>,
    ) -> Result<()> {
        let Self { parent, child } = self;
        let (sender, receiver) = sync_channel(PIPELINE_BUFFER_RECORDS);

        let (parent_result, child_result) = thread::scope(|scope| {
            let producer = scope.spawn(move || {
                let mut writer = PipelineSender {
                    sender: Some(sender),
                    written: 0,
                };
                // Dropping the writer closes the channel and ends the
                // child's input stream.
                parent.run(context, input, &mut writer)
            });

            let mut reader = PipelineReceiver {
                receiver,
                read: 0,
                closed: false,
            };
            let child_result = child.run(context, &mut reader, output);
            // The receiver must be gone before joining, or a parent blocked
            // on a full channel would never finish.
            drop(reader);
            let parent_result = producer
                .join()
                .unwrap_or_else(|_| Err(EngineError::channel("pipeline producer panicked")));
            (parent_result, child_result)
        });

        match (parent_result, child_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(parent), Ok(())) => Err(parent),
            (Ok(()), Err(child)) => Err(child),
            (Err(parent), Err(child)) => {
                // A closed-pipe error on the sending side is a symptom of
                // the child's failure, not a cause.
                if matches!(parent, EngineError::Channel { .. }) {
                    Err(child)
                } else {
                    Err(parent)
                }
            }
        }
    }

    fn process_all_partitions(&self) -> bool {
        self.parent.process_all_partitions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{VecRecordReader, VecRecordWriter};

    struct DoubleTask;
    impl TaskRunner<i64, i64> for DoubleTask {
        fn run(
            &mut self,
            _context: &TaskContext,
            input: &mut dyn RecordReader<i64>,
            output: &mut dyn RecordWriter<i64>,
        ) -> Result<()> {
            while let Some(value) = input.read_record()? {
                output.write_record(&(value * 2))?;
            }
            Ok(())
        }
    }

    struct FailAfter(u64);
    impl TaskRunner<i64, i64> for FailAfter {
        fn run(
            &mut self,
            _context: &TaskContext,
            input: &mut dyn RecordReader<i64>,
            output: &mut dyn RecordWriter<i64>,
        ) -> Result<()> {
            while let Some(value) = input.read_record()? {
                if output.records_written() == self.0 {
                    return Err(EngineError::io("no space left"));
                }
                output.write_record(&value)?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_chained_runner_pipes_parent_into_child() {
        let mut chained =
            ChainedRunner::new(Box::new(DoubleTask), Box::new(DoubleTask));
        let context = TaskContext::for_tests();
        let mut input = VecRecordReader::new(vec![1i64, 2, 3]);
        let mut output = VecRecordWriter::new();
        chained.run(&context, &mut input, &mut output).unwrap();
        assert_eq!(output.records, vec![4, 8, 12]);
    }

    #[test]
    fn test_chained_runner_streams_past_the_buffer_bound() {
        let total = PIPELINE_BUFFER_RECORDS as i64 * 8;
        let mut chained = ChainedRunner::new(
            Box::new(IdentityTask::<i64>::new()),
            Box::new(DoubleTask),
        );
        let context = TaskContext::for_tests();
        let mut input = VecRecordReader::new((0..total).collect());
        let mut output = VecRecordWriter::new();
        chained.run(&context, &mut input, &mut output).unwrap();
        assert_eq!(output.records.len(), total as usize);
        assert_eq!(output.records[0], 0);
        assert_eq!(output.records[output.records.len() - 1], (total - 1) * 2);
    }

    #[test]
    fn test_parent_failure_fails_the_chain() {
        let mut chained = ChainedRunner::new(
            Box::new(FailAfter(3)),
            Box::new(IdentityTask::<i64>::new()),
        );
        let context = TaskContext::for_tests();
        let mut input = VecRecordReader::new((0..100i64).collect());
        let mut output = VecRecordWriter::new();
        let err = chained.run(&context, &mut input, &mut output).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }

    #[test]
    fn test_child_failure_fails_the_chain() {
        // The parent produces far more than the buffer holds, so its sends
        // start failing once the child gives up; the child's error must win.
        let total = PIPELINE_BUFFER_RECORDS as i64 * 8;
        let mut chained = ChainedRunner::new(
            Box::new(IdentityTask::<i64>::new()),
            Box::new(FailAfter(1)),
        );
        let context = TaskContext::for_tests();
        let mut input = VecRecordReader::new((0..total).collect());
        let mut output = VecRecordWriter::new();
        let err = chained.run(&context, &mut input, &mut output).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }
}
