//! The stage graph model: job and stage configuration, task identifiers,
//! settings, and the task-type registry.

pub mod ids;
pub mod job;
pub mod registry;
pub mod settings;
pub mod stage;

pub use ids::{TaskAttemptId, TaskId};
pub use job::{InputStageInfo, JobConfiguration, SchedulerOptions, total_task_count};
pub use registry::TaskRegistry;
pub use settings::{SettingsMap, stage_or_job_setting};
pub use stage::{ChannelConfiguration, ChannelType, DataInput, DataOutput, StageConfiguration};
