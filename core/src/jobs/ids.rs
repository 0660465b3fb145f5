//! Task and task-attempt identifiers.
//!
//! A task is identified by `(stage id, task number)`, optionally nested under
//! a parent task id when the stage is a pipeline-fused child. The canonical
//! string form is `Stage-007` for a root task, `Parent-001.Child-007` for a
//! fused child, and `Parent-001_2` for the second attempt of a task. Ordering
//! is lexicographic on the canonical form; equality is structural.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Separator between a parent task id and a fused child stage.
pub const CHILD_STAGE_SEPARATOR: char = '.';

/// Separator between a task id and its attempt number.
pub const ATTEMPT_SEPARATOR: char = '_';

/// Identifier of one parallel task of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    stage_id: String,
    task_number: usize,
    parent: Option<Box<TaskId>>,
}

impl TaskId {
    /// Create a task id for a root stage task. Task numbers are 1-based.
    pub fn new(stage_id: impl Into<String>, task_number: usize) -> Self {
        Self {
            stage_id: stage_id.into(),
            task_number,
            parent: None,
        }
    }

    /// Create a task id for a pipeline-fused child task.
    pub fn with_parent(parent: TaskId, stage_id: impl Into<String>, task_number: usize) -> Self {
        Self {
            stage_id: stage_id.into(),
            task_number,
            parent: Some(Box::new(parent)),
        }
    }

    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    pub fn task_number(&self) -> usize {
        self.task_number
    }

    pub fn parent(&self) -> Option<&TaskId> {
        self.parent.as_deref()
    }

    /// The dotted stage id chain locating this task's stage, e.g.
    /// `Parent.Child` for a fused child task.
    pub fn compound_stage_id(&self) -> String {
        match &self.parent {
            Some(parent) => format!(
                "{}{}{}",
                parent.compound_stage_id(),
                CHILD_STAGE_SEPARATOR,
                self.stage_id
            ),
            None => self.stage_id.clone(),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent}{CHILD_STAGE_SEPARATOR}")?;
        }
        write!(f, "{}-{:03}", self.stage_id, self.task_number)
    }
}

impl FromStr for TaskId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parent: Option<TaskId> = None;
        for segment in s.split(CHILD_STAGE_SEPARATOR) {
            let (stage_id, number) = segment.rsplit_once('-').ok_or_else(|| {
                EngineError::invalid_operation(format!("malformed task id segment: {segment}"))
            })?;
            if stage_id.is_empty() {
                return Err(EngineError::invalid_operation(format!(
                    "malformed task id segment: {segment}"
                )));
            }
            let task_number: usize = number.parse().map_err(|_| {
                EngineError::invalid_operation(format!("malformed task number: {segment}"))
            })?;
            parent = Some(match parent {
                Some(p) => TaskId::with_parent(p, stage_id, task_number),
                None => TaskId::new(stage_id, task_number),
            });
        }
        parent.ok_or_else(|| EngineError::invalid_operation("empty task id"))
    }
}

impl PartialOrd for TaskId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

/// One execution try of a task. Attempt numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskAttemptId {
    task_id: TaskId,
    attempt: u32,
}

impl TaskAttemptId {
    pub fn new(task_id: TaskId, attempt: u32) -> Self {
        debug_assert!(attempt >= 1, "attempt numbers are 1-based");
        Self { task_id, attempt }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl fmt::Display for TaskAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.task_id, ATTEMPT_SEPARATOR, self.attempt)
    }
}

impl PartialOrd for TaskAttemptId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskAttemptId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_form() {
        let task = TaskId::new("Map", 3);
        assert_eq!(task.to_string(), "Map-003");

        let child = TaskId::with_parent(task, "Aggregate", 12);
        assert_eq!(child.to_string(), "Map-003.Aggregate-012");
        assert_eq!(child.compound_stage_id(), "Map.Aggregate");

        let attempt = TaskAttemptId::new(child, 2);
        assert_eq!(attempt.to_string(), "Map-003.Aggregate-012_2");
    }

    #[test]
    fn test_parse_round_trip() {
        let parsed: TaskId = "Map-003.Aggregate-012".parse().unwrap();
        assert_eq!(parsed.stage_id(), "Aggregate");
        assert_eq!(parsed.task_number(), 12);
        assert_eq!(parsed.parent().unwrap().stage_id(), "Map");
        assert_eq!(parsed.to_string(), "Map-003.Aggregate-012");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<TaskId>().is_err());
        assert!("Map".parse::<TaskId>().is_err());
        assert!("Map-x".parse::<TaskId>().is_err());
        assert!("-3".parse::<TaskId>().is_err());
    }

    #[test]
    fn test_ordering_is_lexicographic_on_canonical_form() {
        let a = TaskId::new("Map", 2);
        let b = TaskId::new("Map", 10);
        // "Map-002" < "Map-010" thanks to zero padding.
        assert!(a < b);

        let c = TaskId::new("Aggregate", 1);
        assert!(c < a);
    }

    #[test]
    fn test_structural_equality() {
        let a = TaskId::with_parent(TaskId::new("Map", 1), "Agg", 2);
        let b: TaskId = "Map-001.Agg-002".parse().unwrap();
        assert_eq!(a, b);
    }
}
