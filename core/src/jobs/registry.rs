//! Explicit task-type registry.
//!
//! Stages declare their task type by name; the registry maps that name to a
//! factory resolved once at job-load time. Record-type compatibility is a
//! static capability check on the factory (the consumed and produced
//! `TypeId`s recorded at registration), so the stage-graph validation needs
//! no runtime inspection of the task instance itself.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::records::Record;
use crate::task::runner::TaskRunner;

struct RegisteredTask {
    consumes: TypeId,
    consumes_name: &'static str,
    produces: TypeId,
    produces_name: &'static str,
    all_partitions: bool,
    factory: Box<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>,
}

/// Registry of task-type factories, keyed by the name stages declare.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, RegisteredTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task type under `name`. The factory is called once per
    /// partition unless the runner opts into all-partitions processing.
    pub fn register<I, O, R, F>(&mut self, name: impl Into<String>, factory: F)
    where
        I: Record,
        O: Record,
        R: TaskRunner<I, O> + 'static,
        F: Fn() -> R + Send + Sync + 'static,
    {
        let all_partitions = factory().process_all_partitions();
        let erased = move || -> Box<dyn Any + Send> {
            Box::new(Box::new(factory()) as Box<dyn TaskRunner<I, O>>)
        };
        self.tasks.insert(
            name.into(),
            RegisteredTask {
                consumes: TypeId::of::<I>(),
                consumes_name: type_name::<I>(),
                produces: TypeId::of::<O>(),
                produces_name: type_name::<O>(),
                all_partitions,
                factory: Box::new(erased),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    fn get(&self, name: &str) -> Result<&RegisteredTask> {
        self.tasks.get(name).ok_or_else(|| {
            EngineError::configuration(format!("task type {name:?} is not registered"))
        })
    }

    /// The record type name a task type consumes.
    pub fn consumes(&self, name: &str) -> Result<&'static str> {
        Ok(self.get(name)?.consumes_name)
    }

    /// The record type name a task type produces.
    pub fn produces(&self, name: &str) -> Result<&'static str> {
        Ok(self.get(name)?.produces_name)
    }

    /// Whether the task type elects to see all its partitions in one call.
    pub fn processes_all_partitions(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.all_partitions)
    }

    /// Check that `producer`'s output record type matches `consumer`'s input
    /// record type. Terminal configuration error on mismatch.
    pub fn check_types(&self, producer: &str, consumer: &str) -> Result<()> {
        let from = self.get(producer)?;
        let to = self.get(consumer)?;
        if from.produces != to.consumes {
            return Err(EngineError::configuration(format!(
                "task type {producer:?} produces {} but {consumer:?} consumes {}",
                from.produces_name, to.consumes_name
            )));
        }
        Ok(())
    }

    /// Check that a task type consumes records of type `I`.
    pub fn check_consumes<I: Record>(&self, name: &str) -> Result<()> {
        let task = self.get(name)?;
        if task.consumes != TypeId::of::<I>() {
            return Err(EngineError::configuration(format!(
                "task type {name:?} consumes {} but {} was supplied",
                task.consumes_name,
                type_name::<I>()
            )));
        }
        Ok(())
    }

    /// Check that a task type produces records of type `O`.
    pub fn check_produces<O: Record>(&self, name: &str) -> Result<()> {
        let task = self.get(name)?;
        if task.produces != TypeId::of::<O>() {
            return Err(EngineError::configuration(format!(
                "task type {name:?} produces {} but {} was expected",
                task.produces_name,
                type_name::<O>()
            )));
        }
        Ok(())
    }

    /// Instantiate a runner for `name` with the record types the caller
    /// expects. Fails if the registered types differ.
    pub fn create<I: Record, O: Record>(&self, name: &str) -> Result<Box<dyn TaskRunner<I, O>>> {
        self.check_consumes::<I>(name)?;
        self.check_produces::<O>(name)?;
        let erased = (self.get(name)?.factory)();
        erased
            .downcast::<Box<dyn TaskRunner<I, O>>>()
            .map(|runner| *runner)
            .map_err(|_| {
                EngineError::configuration(format!(
                    "task type {name:?} does not run over ({}, {})",
                    type_name::<I>(),
                    type_name::<O>()
                ))
            })
    }
}
