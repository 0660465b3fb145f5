//! Stage and channel configuration.
//!
//! These types form the serialized job document: they are constructed
//! client-side through [`crate::jobs::JobConfiguration`], validated, and
//! become immutable once the job is submitted.

use serde::{Deserialize, Serialize};

use crate::jobs::settings::SettingsMap;

/// Transport used between an upstream stage's output and a downstream
/// stage's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    /// The sender writes per-partition files; the receiver pulls them after
    /// the sender finishes. Durable, restart-friendly.
    File,
    /// Live push from sender to receiver. The receiver's task slots must
    /// exist before the sender starts.
    Tcp,
    /// In-process fusion: the downstream stage becomes a child of the
    /// upstream stage and records are handed over without serialization.
    Pipeline,
}

/// Configuration of the channel on a stage's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfiguration {
    pub channel_type: ChannelType,
    /// Type name of the partitioner routing records to output partitions.
    pub partitioner_type: String,
    /// The stage consuming this channel.
    pub output_stage: String,
    /// Fan-out multiplier: number of partitions assigned to each receiving
    /// task, enabling dynamic load distribution. Must be at least 1; pipeline
    /// channels require exactly 1.
    pub partitions_per_task: usize,
    /// Disables reassignment of partitions between tasks at run time.
    pub disable_dynamic_partition_assignment: bool,
}

impl ChannelConfiguration {
    pub fn new(
        channel_type: ChannelType,
        partitioner_type: impl Into<String>,
        output_stage: impl Into<String>,
    ) -> Self {
        Self {
            channel_type,
            partitioner_type: partitioner_type.into(),
            output_stage: output_stage.into(),
            partitions_per_task: 1,
            disable_dynamic_partition_assignment: false,
        }
    }

    pub fn with_partitions_per_task(mut self, partitions_per_task: usize) -> Self {
        self.partitions_per_task = partitions_per_task;
        self
    }

    pub fn without_dynamic_partition_assignment(mut self) -> Self {
        self.disable_dynamic_partition_assignment = true;
        self
    }
}

/// A direct file-system input for a stage, split into one fixed piece per
/// task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInput {
    /// Type name of the input reader (registry key).
    pub input_type: String,
    /// Paths to read; split across the stage's tasks by task number.
    pub paths: Vec<String>,
}

/// A direct file-system output for a stage: one file per partition under the
/// job output directory, committed on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataOutput {
    /// Type name of the output writer (registry key).
    pub output_type: String,
    /// Directory receiving one output file per partition.
    pub path: String,
}

/// Configuration of a single stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfiguration {
    pub stage_id: String,
    /// Registry key of the task type instantiated for each task.
    pub task_type: String,
    /// Number of parallel tasks, or, for an internally-partitioned pipeline
    /// child, the internal partition count.
    pub task_count: usize,
    /// Pipeline-fused child stage, at most one level deep.
    pub child_stage: Option<Box<StageConfiguration>>,
    /// Channel feeding another stage, when this stage has a downstream
    /// consumer.
    pub output_channel: Option<ChannelConfiguration>,
    pub data_input: Option<DataInput>,
    pub data_output: Option<DataOutput>,
    /// Record reader combining several input channels; required only when
    /// more than one input stage feeds this stage.
    pub multi_input_record_reader_type: Option<String>,
    /// Stages that must be scheduled after this stage even without a channel
    /// between them.
    pub dependent_stages: Vec<String>,
    /// Stage-level overrides of job-level settings.
    pub settings: SettingsMap,
}

impl StageConfiguration {
    pub fn new(stage_id: impl Into<String>, task_type: impl Into<String>, task_count: usize) -> Self {
        Self {
            stage_id: stage_id.into(),
            task_type: task_type.into(),
            task_count,
            child_stage: None,
            output_channel: None,
            data_input: None,
            data_output: None,
            multi_input_record_reader_type: None,
            dependent_stages: Vec::new(),
            settings: SettingsMap::new(),
        }
    }

    /// Whether this stage's output is already claimed, making it invalid as
    /// a new channel input.
    pub fn has_output(&self) -> bool {
        self.child_stage.is_some() || self.output_channel.is_some() || self.data_output.is_some()
    }

    /// The named direct child, if any.
    pub fn child(&self, stage_id: &str) -> Option<&StageConfiguration> {
        self.child_stage
            .as_deref()
            .filter(|child| child.stage_id == stage_id)
    }
}
