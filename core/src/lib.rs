//! Quern core: the stage/task execution and shuffle-merge engine.
//!
//! A job is a directed graph of stages, each split into parallel tasks, with
//! records flowing between stages over channels that partition, sort and
//! merge. This crate covers the stage dependency graph and its scheduling
//! order, the per-task execution lifecycle with dynamic partition
//! reassignment, and the external k-way merge engine behind sorted shuffles.
//! The distributed file system, RPC transport and process bootstrapping are
//! external collaborators reached through narrow traits.

pub mod channels;
pub mod error;
pub mod heap;
pub mod jobs;
pub mod merge;
pub mod partitioner;
pub mod records;
pub mod task;

pub use error::{EngineError, Result};
pub use heap::{Comparer, FnComparer, NaturalOrder, PriorityQueue};
pub use jobs::{JobConfiguration, StageConfiguration, TaskAttemptId, TaskId, TaskRegistry};
pub use merge::{MergeHelper, MergeInput, MergeOptions, MergeResult};
pub use partitioner::{HashPartitioner, Partitioner, PrepartitionedPartitioner};
pub use records::{RawRecord, Record, RecordReader, RecordWriter};
pub use task::{TaskContext, TaskExecution, TaskMetrics, TaskRunner};
