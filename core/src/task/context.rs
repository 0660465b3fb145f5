//! Per-attempt execution state.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use uuid::Uuid;

use crate::error::Result;
use crate::jobs::{JobConfiguration, StageConfiguration, TaskAttemptId, stage_or_job_setting};
#[cfg(test)]
use crate::task::progress::StatusBuffer;
use crate::task::progress::StatusHandle;

/// Everything a running task attempt knows about itself: identifiers,
/// configuration, and the job directories. Created once per attempt by the
/// worker and dropped when the attempt finishes.
pub struct TaskContext {
    job_id: Uuid,
    job: JobConfiguration,
    stage: StageConfiguration,
    attempt_id: TaskAttemptId,
    /// Scratch directory on the worker's local disk.
    local_job_directory: PathBuf,
    /// Job directory on the distributed file system.
    dfs_job_directory: PathBuf,
    status: StatusHandle,
}

impl TaskContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: Uuid,
        job: JobConfiguration,
        stage: StageConfiguration,
        attempt_id: TaskAttemptId,
        local_job_directory: impl Into<PathBuf>,
        dfs_job_directory: impl Into<PathBuf>,
        status: StatusHandle,
    ) -> Self {
        Self {
            job_id,
            job,
            stage,
            attempt_id,
            local_job_directory: local_job_directory.into(),
            dfs_job_directory: dfs_job_directory.into(),
            status,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn job(&self) -> &JobConfiguration {
        &self.job
    }

    pub fn stage(&self) -> &StageConfiguration {
        &self.stage
    }

    pub fn attempt_id(&self) -> &TaskAttemptId {
        &self.attempt_id
    }

    pub fn local_job_directory(&self) -> &Path {
        &self.local_job_directory
    }

    pub fn dfs_job_directory(&self) -> &Path {
        &self.dfs_job_directory
    }

    /// Resolve a setting stage-first, then job-wide.
    pub fn setting<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        stage_or_job_setting(&self.stage.settings, &self.job.job_settings, key)
    }

    /// Publish this task's status message for the next progress report.
    pub fn set_status(&self, message: impl Into<String>) {
        self.status.set_status(message);
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use crate::jobs::TaskId;

        let status = StatusBuffer::new().handle();
        Self::new(
            Uuid::new_v4(),
            JobConfiguration::new("test"),
            StageConfiguration::new("TestStage", "Identity", 1),
            TaskAttemptId::new(TaskId::new("TestStage", 1), 1),
            std::env::temp_dir(),
            std::env::temp_dir(),
            status,
        )
    }
}
