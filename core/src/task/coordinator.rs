//! The coordinator-facing surface of a task attempt.
//!
//! The core only needs a handful of calls: confirm a partition before
//! processing it, ask for more partitions, and report progress, completion
//! or an unrecoverable error. Partition reassignment and partition
//! exhaustion are protocol answers (`false`, empty vec), never errors.
//! The transport behind this trait is out of scope; tests use
//! [`LocalCoordinator`].

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::TaskAttemptId;
use crate::task::metrics::TaskMetrics;
use crate::task::progress::TaskProgress;

/// Commands a coordinator sends back on the heartbeat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TaskCommand {
    RunTask {
        job_id: Uuid,
        attempt: TaskAttemptId,
    },
    KillTask {
        attempt: TaskAttemptId,
    },
    CleanupJob {
        job_id: Uuid,
    },
    None,
}

/// Payloads a worker sends on the heartbeat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeartbeatData {
    Progress {
        attempt: TaskAttemptId,
        progress: TaskProgress,
    },
    Completion {
        attempt: TaskAttemptId,
        metrics: TaskMetrics,
    },
    Error {
        attempt: TaskAttemptId,
        message: String,
    },
}

/// Calls the task engine makes against the coordinator.
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    /// Confirm that `partition` is still owned by `attempt`. `false` means
    /// the partition was reassigned and must be skipped.
    async fn notify_start_partition_processing(
        &self,
        attempt: &TaskAttemptId,
        partition: usize,
    ) -> Result<bool>;

    /// Ask for more partitions once the assigned ones are exhausted. An
    /// empty answer means the task is done.
    async fn get_additional_partitions(&self, attempt: &TaskAttemptId) -> Result<Vec<usize>>;

    async fn report_progress(&self, attempt: &TaskAttemptId, progress: &TaskProgress)
    -> Result<()>;

    async fn report_completion(&self, attempt: &TaskAttemptId, metrics: &TaskMetrics)
    -> Result<()>;

    async fn report_error(&self, attempt: &TaskAttemptId, message: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct LocalCoordinatorState {
    revoked: HashSet<usize>,
    additional: VecDeque<Vec<usize>>,
    progress_reports: Vec<TaskProgress>,
    completions: Vec<TaskMetrics>,
    errors: Vec<String>,
}

/// In-memory coordinator double for tests and single-host runs.
#[derive(Debug, Default)]
pub struct LocalCoordinator {
    state: Mutex<LocalCoordinatorState>,
}

impl LocalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a partition as reassigned away from whoever asks next.
    pub fn revoke_partition(&self, partition: usize) {
        self.lock().revoked.insert(partition);
    }

    /// Queue one batch of extra partitions to hand out.
    pub fn queue_additional_partitions(&self, partitions: Vec<usize>) {
        self.lock().additional.push_back(partitions);
    }

    pub fn progress_reports(&self) -> Vec<TaskProgress> {
        self.lock().progress_reports.clone()
    }

    pub fn completions(&self) -> Vec<TaskMetrics> {
        self.lock().completions.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock().errors.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalCoordinatorState> {
        self.state.lock().expect("local coordinator poisoned")
    }
}

#[async_trait]
impl CoordinatorClient for LocalCoordinator {
    async fn notify_start_partition_processing(
        &self,
        _attempt: &TaskAttemptId,
        partition: usize,
    ) -> Result<bool> {
        Ok(!self.lock().revoked.contains(&partition))
    }

    async fn get_additional_partitions(&self, _attempt: &TaskAttemptId) -> Result<Vec<usize>> {
        Ok(self.lock().additional.pop_front().unwrap_or_default())
    }

    async fn report_progress(
        &self,
        _attempt: &TaskAttemptId,
        progress: &TaskProgress,
    ) -> Result<()> {
        self.lock().progress_reports.push(progress.clone());
        Ok(())
    }

    async fn report_completion(
        &self,
        _attempt: &TaskAttemptId,
        metrics: &TaskMetrics,
    ) -> Result<()> {
        self.lock().completions.push(*metrics);
        Ok(())
    }

    async fn report_error(&self, _attempt: &TaskAttemptId, message: &str) -> Result<()> {
        self.lock().errors.push(message.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::TaskId;

    fn attempt() -> TaskAttemptId {
        TaskAttemptId::new(TaskId::new("Map", 1), 1)
    }

    #[tokio::test]
    async fn test_revoked_partition_answers_false() {
        let coordinator = LocalCoordinator::new();
        coordinator.revoke_partition(1);
        assert!(
            coordinator
                .notify_start_partition_processing(&attempt(), 0)
                .await
                .unwrap()
        );
        assert!(
            !coordinator
                .notify_start_partition_processing(&attempt(), 1)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_additional_partitions_drain_in_order() {
        let coordinator = LocalCoordinator::new();
        coordinator.queue_additional_partitions(vec![3, 4]);
        assert_eq!(
            coordinator.get_additional_partitions(&attempt()).await.unwrap(),
            vec![3, 4]
        );
        assert!(
            coordinator
                .get_additional_partitions(&attempt())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_command_round_trips_by_tag() {
        let command = TaskCommand::KillTask { attempt: attempt() };
        let json = serde_json::to_string(&command).unwrap();
        assert!(json.contains("\"command\":\"kill_task\""));
        let parsed: TaskCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, command);
    }
}
