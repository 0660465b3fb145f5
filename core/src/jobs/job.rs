//! Job configuration and the stage dependency graph.
//!
//! A job is an ordered set of root stages connected by channels; pipeline
//! children hang off their parent stage and are reached through
//! [`StageConfiguration::child_stage`], not stored at the top level. The
//! graph is built and mutated only during job construction (single-threaded,
//! client side) and treated as immutable once the job is submitted.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::jobs::registry::TaskRegistry;
use crate::jobs::settings::SettingsMap;
use crate::jobs::stage::{
    ChannelConfiguration, ChannelType, DataInput, StageConfiguration,
};

/// Scheduler-facing options carried in the job document. Interpreted by the
/// external scheduler, not by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerOptions {
    /// Maximum attempts per task before the job is failed.
    pub max_task_attempts: u32,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_task_attempts: 5,
        }
    }
}

/// Describes one input stage wired into a new stage by
/// [`JobConfiguration::add_stage`].
#[derive(Debug, Clone)]
pub struct InputStageInfo {
    pub stage_id: String,
    pub channel_type: ChannelType,
    pub partitioner_type: String,
    pub partitions_per_task: usize,
    pub disable_dynamic_partition_assignment: bool,
}

impl InputStageInfo {
    pub fn new(stage_id: impl Into<String>, channel_type: ChannelType) -> Self {
        Self {
            stage_id: stage_id.into(),
            channel_type,
            partitioner_type: "HashPartitioner".to_string(),
            partitions_per_task: 1,
            disable_dynamic_partition_assignment: false,
        }
    }

    pub fn with_partitioner(mut self, partitioner_type: impl Into<String>) -> Self {
        self.partitioner_type = partitioner_type.into();
        self
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

/// The serialized description of a complete job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfiguration {
    pub job_name: String,
    stages: Vec<StageConfiguration>,
    pub job_settings: SettingsMap,
    pub scheduler_options: SchedulerOptions,
}

impl JobConfiguration {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            stages: Vec::new(),
            job_settings: SettingsMap::new(),
            scheduler_options: SchedulerOptions::default(),
        }
    }

    /// The root stages in insertion order.
    pub fn stages(&self) -> &[StageConfiguration] {
        &self.stages
    }

    /// Add a stage fed by zero or more existing stages.
    ///
    /// With a single `Pipeline` input the stage is fused as a child of the
    /// input stage; otherwise it becomes a root stage and every input stage
    /// receives an output channel pointing at it.
    pub fn add_stage(
        &mut self,
        registry: &TaskRegistry,
        stage: StageConfiguration,
        inputs: &[InputStageInfo],
    ) -> Result<()> {
        self.validate_new_stage(registry, &stage)?;

        if stage.data_input.is_some() && !inputs.is_empty() {
            return Err(EngineError::configuration(format!(
                "stage {:?} cannot both read the file system and receive channel input",
                stage.stage_id
            )));
        }

        if inputs.len() > 1 && stage.multi_input_record_reader_type.is_none() {
            return Err(EngineError::configuration(format!(
                "stage {:?} has {} input stages but no multi-input record reader type",
                stage.stage_id,
                inputs.len()
            )));
        }

        let pipeline_inputs = inputs
            .iter()
            .filter(|input| input.channel_type == ChannelType::Pipeline)
            .count();
        if pipeline_inputs > 0 && inputs.len() != 1 {
            return Err(EngineError::configuration(
                "a pipeline channel permits only a single input stage",
            ));
        }

        for input in inputs {
            let input_stage = self.get_stage(&input.stage_id).ok_or_else(|| {
                EngineError::configuration(format!(
                    "input stage {:?} does not exist",
                    input.stage_id
                ))
            })?;
            if input_stage.has_output() {
                return Err(EngineError::configuration(format!(
                    "stage {:?} already has a child stage, output channel or data output \
                     and cannot be used as an input",
                    input.stage_id
                )));
            }
            if input.partitions_per_task == 0 {
                return Err(EngineError::configuration(
                    "partitions per task must be at least 1",
                ));
            }
            registry.check_types(&input_stage.task_type, &stage.task_type)?;
        }

        if pipeline_inputs == 1 {
            let input = &inputs[0];
            if input.partitions_per_task != 1 {
                return Err(EngineError::configuration(
                    "a pipeline channel requires exactly one partition per task",
                ));
            }
            debug!(parent = %input.stage_id, child = %stage.stage_id, "fusing pipeline child");
            let parent = self
                .stage_mut(&input.stage_id)
                .expect("input stage resolved above");
            parent.child_stage = Some(Box::new(stage));
        } else {
            for input in inputs {
                let channel = ChannelConfiguration {
                    channel_type: input.channel_type,
                    partitioner_type: input.partitioner_type.clone(),
                    output_stage: stage.stage_id.clone(),
                    partitions_per_task: input.partitions_per_task,
                    disable_dynamic_partition_assignment: input
                        .disable_dynamic_partition_assignment,
                };
                let input_stage = self
                    .stage_mut(&input.stage_id)
                    .expect("input stage resolved above");
                input_stage.output_channel = Some(channel);
            }
            self.stages.push(stage);
        }
        Ok(())
    }

    /// Add a stage that reads the file system directly.
    pub fn add_data_input_stage(
        &mut self,
        registry: &TaskRegistry,
        mut stage: StageConfiguration,
        data_input: DataInput,
    ) -> Result<()> {
        stage.data_input = Some(data_input);
        self.add_stage(registry, stage, &[])
    }

    fn validate_new_stage(
        &self,
        registry: &TaskRegistry,
        stage: &StageConfiguration,
    ) -> Result<()> {
        if stage.stage_id.is_empty() || stage.stage_id.contains('.') || stage.stage_id.contains('-')
        {
            return Err(EngineError::configuration(format!(
                "invalid stage id {:?}",
                stage.stage_id
            )));
        }
        if self.get_stage(&stage.stage_id).is_some() {
            return Err(EngineError::configuration(format!(
                "duplicate stage id {:?}",
                stage.stage_id
            )));
        }
        if stage.task_count == 0 {
            return Err(EngineError::configuration(format!(
                "stage {:?} must have at least one task",
                stage.stage_id
            )));
        }
        if !registry.contains(&stage.task_type) {
            return Err(EngineError::configuration(format!(
                "stage {:?} uses unregistered task type {:?}",
                stage.stage_id, stage.task_type
            )));
        }
        Ok(())
    }

    /// Look up a root stage by id.
    pub fn get_stage(&self, stage_id: &str) -> Option<&StageConfiguration> {
        self.stages.iter().find(|stage| stage.stage_id == stage_id)
    }

    fn stage_mut(&mut self, stage_id: &str) -> Option<&mut StageConfiguration> {
        self.stages
            .iter_mut()
            .find(|stage| stage.stage_id == stage_id)
    }

    /// Resolve a dot-separated chain of stage ids by walking child links.
    /// Returns `None` if any segment is missing.
    pub fn get_stage_with_compound_id(&self, compound_id: &str) -> Option<&StageConfiguration> {
        let mut segments = compound_id.split('.');
        let mut current = self.get_stage(segments.next()?)?;
        for segment in segments {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// Rename a root stage, rewriting every channel and dependency reference
    /// that pointed at the old name. The rewrite covers all stages in one
    /// pass so the graph is never observed half-renamed.
    pub fn rename_stage(&mut self, old_id: &str, new_id: &str) -> Result<()> {
        if self.get_stage(new_id).is_some() {
            return Err(EngineError::configuration(format!(
                "cannot rename stage {old_id:?}: {new_id:?} already exists"
            )));
        }
        let stage = self.stage_mut(old_id).ok_or_else(|| {
            EngineError::configuration(format!("cannot rename unknown stage {old_id:?}"))
        })?;
        stage.stage_id = new_id.to_string();

        fn rewrite(stage: &mut StageConfiguration, old_id: &str, new_id: &str) {
            if let Some(channel) = &mut stage.output_channel {
                if channel.output_stage == old_id {
                    channel.output_stage = new_id.to_string();
                }
            }
            for dependent in &mut stage.dependent_stages {
                if dependent == old_id {
                    *dependent = new_id.to_string();
                }
            }
            if let Some(child) = &mut stage.child_stage {
                rewrite(child, old_id, new_id);
            }
        }
        for stage in &mut self.stages {
            rewrite(stage, old_id, new_id);
        }
        Ok(())
    }

    /// Compute a linear ordering in which every stage appears after all of
    /// its channel inputs and explicit dependencies.
    ///
    /// Exception: a stage receiving input over a TCP channel is placed
    /// *before* the earliest already-placed stage that feeds it via TCP. A
    /// TCP channel is a live push, so the receiver's task slots must exist
    /// when the sender starts; a file channel's receiver pulls durable files
    /// after the sender finished, so normal ordering applies.
    pub fn dependency_ordered_stages(&self) -> Vec<&StageConfiguration> {
        let index_of: HashMap<&str, usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| (stage.stage_id.as_str(), index))
            .collect();

        // stage index -> indexes of stages feeding it via TCP.
        let mut tcp_senders: HashMap<usize, Vec<usize>> = HashMap::new();
        // Stages receiving any channel input or named as a dependent.
        let mut has_predecessor: HashSet<usize> = HashSet::new();
        for (sender, stage) in self.stages.iter().enumerate() {
            if let Some(channel) = &stage.output_channel {
                if let Some(&receiver) = index_of.get(channel.output_stage.as_str()) {
                    has_predecessor.insert(receiver);
                    if channel.channel_type == ChannelType::Tcp {
                        tcp_senders.entry(receiver).or_default().push(sender);
                    }
                }
            }
            for dependent in &stage.dependent_stages {
                if let Some(&receiver) = index_of.get(dependent.as_str()) {
                    has_predecessor.insert(receiver);
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..self.stages.len())
            .filter(|index| !has_predecessor.contains(index))
            .collect();
        let mut order: Vec<usize> = Vec::with_capacity(self.stages.len());

        // A cyclic graph (rejected by validate, but reachable through a
        // hand-edited job document) would spin this worklist forever; cap
        // the pop count for those instead of hanging. Acyclic graphs always
        // terminate and run without the cap.
        let cyclic = self.check_acyclic().is_err();
        let mut budget = self.stages.len() * (self.stages.len() + 1);

        while let Some(index) = queue.pop_front() {
            if cyclic {
                if budget == 0 {
                    tracing::warn!(
                        job = %self.job_name,
                        "stage graph contains a dependency cycle; order is partial"
                    );
                    break;
                }
                budget -= 1;
            }
            if let Some(position) = order.iter().position(|&placed| placed == index) {
                order.remove(position);
            }
            let insert_at = tcp_senders
                .get(&index)
                .and_then(|senders| {
                    order
                        .iter()
                        .position(|placed| senders.contains(placed))
                })
                .unwrap_or(order.len());
            order.insert(insert_at, index);

            let stage = &self.stages[index];
            if let Some(channel) = &stage.output_channel {
                if let Some(&receiver) = index_of.get(channel.output_stage.as_str()) {
                    queue.push_back(receiver);
                }
            }
            for dependent in &stage.dependent_stages {
                if let Some(&receiver) = index_of.get(dependent.as_str()) {
                    queue.push_back(receiver);
                }
            }
        }

        order.into_iter().map(|index| &self.stages[index]).collect()
    }

    /// Validate the whole graph. This is a pre-submission gate; any failure
    /// aborts submission with no partial job state created.
    pub fn validate(&self, registry: &TaskRegistry) -> Result<()> {
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.stage_id.as_str()) {
                return Err(EngineError::configuration(format!(
                    "duplicate stage id {:?}",
                    stage.stage_id
                )));
            }
        }

        for stage in &self.stages {
            self.validate_stage(registry, stage)?;
        }
        self.check_acyclic()
    }

    /// Reject dependency cycles across channels and explicit dependencies.
    /// `add_stage` cannot create one, but a job document loaded through
    /// [`Self::from_json`] carries whatever its author wrote.
    fn check_acyclic(&self) -> Result<()> {
        let index_of: HashMap<&str, usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| (stage.stage_id.as_str(), index))
            .collect();

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.stages.len()];
        let mut in_degree = vec![0usize; self.stages.len()];
        for (sender, stage) in self.stages.iter().enumerate() {
            let targets = stage
                .output_channel
                .iter()
                .map(|channel| channel.output_stage.as_str())
                .chain(stage.dependent_stages.iter().map(String::as_str));
            for target in targets {
                if let Some(&receiver) = index_of.get(target) {
                    successors[sender].push(receiver);
                    in_degree[receiver] += 1;
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..self.stages.len())
            .filter(|&index| in_degree[index] == 0)
            .collect();
        let mut placed = 0;
        while let Some(index) = queue.pop_front() {
            placed += 1;
            for &successor in &successors[index] {
                in_degree[successor] -= 1;
                if in_degree[successor] == 0 {
                    queue.push_back(successor);
                }
            }
        }
        if placed < self.stages.len() {
            let cyclic: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, &degree)| degree > 0)
                .map(|(index, _)| self.stages[index].stage_id.as_str())
                .collect();
            return Err(EngineError::configuration(format!(
                "stage dependency cycle involving {cyclic:?}"
            )));
        }
        Ok(())
    }

    fn validate_stage(&self, registry: &TaskRegistry, stage: &StageConfiguration) -> Result<()> {
        if !registry.contains(&stage.task_type) {
            return Err(EngineError::configuration(format!(
                "stage {:?} uses unregistered task type {:?}",
                stage.stage_id, stage.task_type
            )));
        }
        if stage.task_count == 0 {
            return Err(EngineError::configuration(format!(
                "stage {:?} must have at least one task",
                stage.stage_id
            )));
        }

        if let Some(child) = &stage.child_stage {
            if stage.output_channel.is_some() || stage.data_output.is_some() {
                return Err(EngineError::configuration(format!(
                    "stage {:?} has a pipeline child and cannot also have an output channel \
                     or data output",
                    stage.stage_id
                )));
            }
            if !stage.dependent_stages.is_empty() {
                return Err(EngineError::configuration(format!(
                    "stage {:?} has a pipeline child and cannot have dependent stages",
                    stage.stage_id
                )));
            }
            registry.check_types(&stage.task_type, &child.task_type)?;
            self.validate_stage(registry, child)?;
        }

        if let Some(channel) = &stage.output_channel {
            let receiver = self.get_stage(&channel.output_stage).ok_or_else(|| {
                EngineError::configuration(format!(
                    "stage {:?} sends its channel to unknown stage {:?}",
                    stage.stage_id, channel.output_stage
                ))
            })?;
            if channel.partitions_per_task == 0 {
                return Err(EngineError::configuration(format!(
                    "channel from {:?} must have at least one partition per task",
                    stage.stage_id
                )));
            }
            // The producing type of a fused stage is its deepest child's.
            registry.check_types(self.effective_producer(stage), &receiver.task_type)?;
        }

        for dependent in &stage.dependent_stages {
            if self.get_stage(dependent).is_none() {
                return Err(EngineError::configuration(format!(
                    "stage {:?} lists unknown dependent stage {dependent:?}",
                    stage.stage_id
                )));
            }
        }
        Ok(())
    }

    fn effective_producer<'a>(&self, stage: &'a StageConfiguration) -> &'a str {
        let mut current = stage;
        while let Some(child) = &current.child_stage {
            current = child;
        }
        &current.task_type
    }

    /// Serialize the job document for the job scratch directory.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            EngineError::configuration(format!("cannot serialize job configuration: {e}"))
        })
    }

    /// Load a job document written by [`Self::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            EngineError::configuration(format!("cannot deserialize job configuration: {e}"))
        })
    }
}

/// Total number of tasks in a compound stage list, counting from `index`.
/// Each stage contributes its own task count to the product.
pub fn total_task_count(stages: &[StageConfiguration], index: usize) -> usize {
    stages[index..].iter().map(|stage| stage.task_count).product()
}
