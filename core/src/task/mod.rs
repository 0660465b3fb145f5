//! The task execution engine: runs one task attempt end to end, including
//! pipeline-fused children, the partitioned-input protocol and progress
//! reporting.

pub mod context;
pub mod coordinator;
pub mod execution;
pub mod metrics;
pub mod progress;
pub mod runner;

pub use context::TaskContext;
pub use coordinator::{CoordinatorClient, HeartbeatData, LocalCoordinator, TaskCommand};
pub use execution::{RunnerFactory, TaskExecution, TaskInput, TaskOutput};
pub use metrics::TaskMetrics;
pub use progress::{ProgressSource, ProgressState, StatusBuffer, StatusHandle, TaskProgress};
pub use runner::{ChainedRunner, IdentityTask, TaskRunner};
