//! Progress accounting and the background report loop.
//!
//! The task thread updates a small set of atomics and a locked status
//! buffer; the progress loop snapshots them on a fixed interval and reports
//! to the coordinator only when the snapshot changed or a forced report was
//! requested. A forced report guarantees the next tick sends something even
//! if nothing observable moved, which keeps a long monotonic operation from
//! tripping the coordinator's stall detection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::jobs::TaskAttemptId;
use crate::merge::MergeCounters;
use crate::records::{Record, RecordReader};
use crate::task::coordinator::CoordinatorClient;

/// One progress report as sent to the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Composite status message, most specific part last.
    pub status: String,
    /// Input-consumption fraction, partition-aware.
    pub base_progress: f32,
    /// Extra progress sources (merges, channels) keyed by source name.
    pub additional: BTreeMap<String, f32>,
}

impl TaskProgress {
    /// Mean of the base fraction and every additional source.
    pub fn overall(&self) -> f32 {
        let sum: f32 = self.base_progress + self.additional.values().sum::<f32>();
        sum / (1 + self.additional.len()) as f32
    }
}

/// A source of supplementary progress, polled by the report loop.
pub trait ProgressSource: Send + Sync {
    fn fraction(&self) -> f32;
}

impl ProgressSource for MergeCounters {
    fn fraction(&self) -> f32 {
        self.progress()
    }
}

/// Status messages of the fused tasks of one attempt, one slot per task.
#[derive(Debug, Default)]
pub struct StatusBuffer {
    messages: Mutex<Vec<String>>,
    changed: AtomicBool,
}

impl StatusBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim a slot for one task's status messages.
    pub fn handle(self: &Arc<Self>) -> StatusHandle {
        let mut messages = self.messages.lock().expect("status buffer poisoned");
        messages.push(String::new());
        StatusHandle {
            buffer: Arc::clone(self),
            slot: messages.len() - 1,
        }
    }

    /// The concatenated status message, most specific part last.
    pub fn composite(&self) -> String {
        self.messages
            .lock()
            .expect("status buffer poisoned")
            .iter()
            .filter(|message| !message.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" > ")
    }

    fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::Relaxed)
    }
}

/// Writes one task's status into its [`StatusBuffer`] slot.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    buffer: Arc<StatusBuffer>,
    slot: usize,
}

impl StatusHandle {
    pub fn set_status(&self, message: impl Into<String>) {
        let mut messages = self.buffer.messages.lock().expect("status buffer poisoned");
        let message = message.into();
        if messages[self.slot] != message {
            messages[self.slot] = message;
            self.buffer.changed.store(true, Ordering::Relaxed);
        }
    }
}

/// Shared progress state between the task thread and the report loop.
pub struct ProgressState {
    status: Arc<StatusBuffer>,
    /// Reader fraction of the partition currently being processed.
    current_permille: AtomicU32,
    partitions_finished: AtomicU32,
    total_partitions: AtomicU32,
    forced: AtomicBool,
    finished: AtomicBool,
    additional: Mutex<Vec<(String, Arc<dyn ProgressSource>)>>,
}

impl ProgressState {
    pub fn new(status: Arc<StatusBuffer>) -> Arc<Self> {
        Arc::new(Self {
            status,
            current_permille: AtomicU32::new(0),
            partitions_finished: AtomicU32::new(0),
            total_partitions: AtomicU32::new(1),
            forced: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            additional: Mutex::new(Vec::new()),
        })
    }

    pub fn status(&self) -> &Arc<StatusBuffer> {
        &self.status
    }

    pub fn set_current_fraction(&self, fraction: f32) {
        let permille = (fraction.clamp(0.0, 1.0) * 1000.0) as u32;
        self.current_permille.store(permille, Ordering::Relaxed);
    }

    pub fn set_partitions(&self, finished: u32, total: u32) {
        self.partitions_finished.store(finished, Ordering::Relaxed);
        self.total_partitions.store(total.max(1), Ordering::Relaxed);
        self.current_permille.store(0, Ordering::Relaxed);
    }

    /// Register a supplementary progress source under `name`.
    pub fn add_source(&self, name: impl Into<String>, source: Arc<dyn ProgressSource>) {
        self.additional
            .lock()
            .expect("progress sources poisoned")
            .push((name.into(), source));
    }

    /// Make the next tick report even if nothing changed.
    pub fn force_report(&self) {
        self.forced.store(true, Ordering::Relaxed);
    }

    /// Stop the report loop after its next tick.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TaskProgress {
        let finished = self.partitions_finished.load(Ordering::Relaxed) as f32;
        let total = self.total_partitions.load(Ordering::Relaxed).max(1) as f32;
        let current = self.current_permille.load(Ordering::Relaxed) as f32 / 1000.0;
        let base = ((finished + current) / total).clamp(0.0, 1.0);

        let mut additional = BTreeMap::new();
        for (name, source) in self.additional.lock().expect("progress sources poisoned").iter() {
            additional.insert(name.clone(), source.fraction());
        }
        TaskProgress {
            status: self.status.composite(),
            base_progress: base,
            additional,
        }
    }
}

/// Reader wrapper mirroring its progress fraction into a [`ProgressState`].
pub struct TrackedReader<T: Record> {
    inner: Box<dyn RecordReader<T>>,
    progress: Arc<ProgressState>,
}

impl<T: Record> TrackedReader<T> {
    pub fn new(inner: Box<dyn RecordReader<T>>, progress: Arc<ProgressState>) -> Self {
        Self { inner, progress }
    }

    pub fn into_inner(self) -> Box<dyn RecordReader<T>> {
        self.inner
    }
}

impl<T: Record> RecordReader<T> for TrackedReader<T> {
    fn read_record(&mut self) -> crate::error::Result<Option<T>> {
        let record = self.inner.read_record()?;
        self.progress.set_current_fraction(self.inner.progress());
        Ok(record)
    }

    fn progress(&self) -> f32 {
        self.inner.progress()
    }

    fn records_read(&self) -> u64 {
        self.inner.records_read()
    }

    fn bytes_read(&self) -> u64 {
        self.inner.bytes_read()
    }
}

/// Drive the report loop until [`ProgressState::mark_finished`] is observed.
pub async fn run_progress_loop(
    state: Arc<ProgressState>,
    attempt: TaskAttemptId,
    coordinator: Arc<dyn CoordinatorClient>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last: Option<TaskProgress> = None;
    loop {
        ticker.tick().await;
        let done = state.finished.load(Ordering::Relaxed);
        let snapshot = state.snapshot();
        let forced = state.forced.swap(false, Ordering::Relaxed);
        let status_changed = state.status.take_changed();
        if forced || status_changed || last.as_ref() != Some(&snapshot) {
            debug!(%attempt, progress = snapshot.base_progress, "reporting progress");
            if let Err(e) = coordinator.report_progress(&attempt, &snapshot).await {
                warn!(%attempt, error = %e, "progress report failed");
            }
            last = Some(snapshot);
        }
        if done {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_status_is_most_specific_last() {
        let buffer = StatusBuffer::new();
        let outer = buffer.handle();
        let inner = buffer.handle();
        outer.set_status("merging");
        inner.set_status("pass 2 of 3");
        assert_eq!(buffer.composite(), "merging > pass 2 of 3");
    }

    #[test]
    fn test_partition_aware_base_progress() {
        let state = ProgressState::new(StatusBuffer::new());
        state.set_partitions(1, 3);
        state.set_current_fraction(0.5);
        let snapshot = state.snapshot();
        assert!((snapshot.base_progress - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_overall_averages_additional_sources() {
        let mut progress = TaskProgress {
            status: String::new(),
            base_progress: 0.4,
            additional: BTreeMap::new(),
        };
        assert!((progress.overall() - 0.4).abs() < f32::EPSILON);
        progress.additional.insert("merge".to_string(), 0.8);
        assert!((progress.overall() - 0.6).abs() < 0.001);
    }
}
