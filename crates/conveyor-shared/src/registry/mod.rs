//! # Job Registry
//!
//! Process-wide, initialize-once / read-mostly. Job definitions and task
//! handlers are registered explicitly at startup by composition — an
//! explicit table, no discovery, no reflection. An unknown `job_type` or
//! `task_type` at message-processing time is fatal for that message, not
//! retryable.
//!
//! A job definition is pure data plus two pure behavior hooks:
//!
//! - `create_tasks_for_stage` — fan a stage out into task specs
//! - `finalize_job` — aggregate all stage results into the job's result
//!
//! Handlers are async (`TaskHandler`) because real task work is I/O; the
//! behavior hooks are sync because they are pure functions over data the
//! kernel already holds.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{ConveyorError, ConveyorResult};
use crate::models::StageResults;
use crate::schema::ParameterSchema;

/// How a stage's task count is determined.
///
/// These are declarations checked against what the fan-out hook actually
/// produced — the semantics are pinned here, not left to kernel heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    /// Exactly one task
    Single,
    /// Whatever the fan-out hook returns
    Dynamic,
    /// Exactly as many tasks as the previous stage produced results
    MatchPrevious,
}

/// Static description of one stage
#[derive(Debug, Clone)]
pub struct StageDefinition {
    /// 1-indexed position in the chain
    pub number: u32,
    pub name: String,
    /// Handler key for every task in this stage
    pub task_type: String,
    pub parallelism: Parallelism,
    /// Whether a zero-task fan-out is legal (stage auto-advances with
    /// empty results) or a definition error (job fails)
    pub allow_empty: bool,
}

impl StageDefinition {
    pub fn new(
        number: u32,
        name: impl Into<String>,
        task_type: impl Into<String>,
        parallelism: Parallelism,
    ) -> Self {
        Self {
            number,
            name: name.into(),
            task_type: task_type.into(),
            parallelism,
            allow_empty: false,
        }
    }

    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }
}

/// One task to create, as produced by the fan-out hook
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub task_type: String,
    pub parameters: Value,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
        }
    }
}

/// Everything `finalize_job` gets to aggregate from
#[derive(Debug, Clone)]
pub struct FinalizeContext<'a> {
    pub job_id: &'a str,
    pub parameters: &'a Map<String, Value>,
    /// Results of every stage, final stage included
    pub stage_results: &'a StageResults,
}

/// The pure behavior hooks of a job type
pub trait JobBehavior: Send + Sync {
    /// Fan stage `stage` out into task specs.
    ///
    /// `previous_results` is the ordered result list of stage `stage - 1`
    /// (`None` for stage 1). Returning an empty vec is only legal when the
    /// stage definition allows it.
    fn create_tasks_for_stage(
        &self,
        stage: u32,
        parameters: &Map<String, Value>,
        job_id: &str,
        previous_results: Option<&[Value]>,
    ) -> ConveyorResult<Vec<TaskSpec>>;

    /// Aggregate all stage results into the job's final `result_data`
    fn finalize_job(&self, context: &FinalizeContext<'_>) -> ConveyorResult<Value>;
}

/// The structured result every handler returns (or has synthesized for it
/// by the invoker when it panics or times out)
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResult {
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
}

impl HandlerResult {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// One unit of task business logic.
///
/// Handlers must be idempotent on their side-effects (content-addressed
/// outputs, upsert semantics): at-least-once delivery means re-execution
/// after a crash is part of the contract, not an anomaly.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, parameters: &Value) -> HandlerResult;
}

impl std::fmt::Debug for dyn TaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandler").finish_non_exhaustive()
    }
}

/// Static description of a job type
pub struct JobDefinition {
    pub job_type: String,
    pub description: String,
    /// Linear chain, 1-indexed, contiguous
    pub stages: Vec<StageDefinition>,
    pub parameters_schema: ParameterSchema,
    /// Extension point: when true, failed tasks are dropped from stage
    /// results and the job proceeds. Default is fail-stage-fails-job.
    pub continue_on_task_failure: bool,
    pub behavior: Arc<dyn JobBehavior>,
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("job_type", &self.job_type)
            .field("stages", &self.stages.len())
            .field("continue_on_task_failure", &self.continue_on_task_failure)
            .finish()
    }
}

impl JobDefinition {
    pub fn total_stages(&self) -> u32 {
        self.stages.len() as u32
    }

    pub fn stage(&self, number: u32) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.number == number)
    }
}

/// The explicit registry table, built once at startup
pub struct JobRegistry {
    job_defs: HashMap<String, Arc<JobDefinition>>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.job_defs.keys().collect::<Vec<_>>())
            .field("task_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobRegistry {
    pub fn builder() -> JobRegistryBuilder {
        JobRegistryBuilder::default()
    }

    pub fn job_definition(&self, job_type: &str) -> ConveyorResult<Arc<JobDefinition>> {
        self.job_defs
            .get(job_type)
            .cloned()
            .ok_or_else(|| ConveyorError::UnknownJobType(job_type.to_string()))
    }

    pub fn handler(&self, task_type: &str) -> ConveyorResult<Arc<dyn TaskHandler>> {
        self.handlers
            .get(task_type)
            .cloned()
            .ok_or_else(|| ConveyorError::UnknownTaskType(task_type.to_string()))
    }

    pub fn job_types(&self) -> Vec<&str> {
        self.job_defs.keys().map(String::as_str).collect()
    }

    pub fn has_job_type(&self, job_type: &str) -> bool {
        self.job_defs.contains_key(job_type)
    }
}

/// Builder validating definitions as they are registered
#[derive(Default)]
pub struct JobRegistryBuilder {
    job_defs: HashMap<String, Arc<JobDefinition>>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl fmt::Debug for JobRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistryBuilder")
            .field("job_defs", &self.job_defs.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl JobRegistryBuilder {
    pub fn register_job(mut self, definition: JobDefinition) -> ConveyorResult<Self> {
        if definition.stages.is_empty() {
            return Err(ConveyorError::Definition(format!(
                "job type '{}' declares no stages",
                definition.job_type
            )));
        }
        for (i, stage) in definition.stages.iter().enumerate() {
            let expected = (i + 1) as u32;
            if stage.number != expected {
                return Err(ConveyorError::Definition(format!(
                    "job type '{}': stage numbers must be contiguous from 1, found {} at position {}",
                    definition.job_type, stage.number, expected
                )));
            }
        }
        if definition.stages[0].parallelism == Parallelism::MatchPrevious {
            return Err(ConveyorError::Definition(format!(
                "job type '{}': stage 1 cannot match a previous stage",
                definition.job_type
            )));
        }
        if self.job_defs.contains_key(&definition.job_type) {
            return Err(ConveyorError::Definition(format!(
                "job type '{}' registered twice",
                definition.job_type
            )));
        }
        self.job_defs
            .insert(definition.job_type.clone(), Arc::new(definition));
        Ok(self)
    }

    pub fn register_handler(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    /// Finish construction, verifying every declared `task_type` resolves
    pub fn build(self) -> ConveyorResult<JobRegistry> {
        for definition in self.job_defs.values() {
            for stage in &definition.stages {
                if !self.handlers.contains_key(&stage.task_type) {
                    return Err(ConveyorError::Definition(format!(
                        "job type '{}' stage {} references unregistered task type '{}'",
                        definition.job_type, stage.number, stage.task_type
                    )));
                }
            }
        }
        Ok(JobRegistry {
            job_defs: self.job_defs,
            handlers: self.handlers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopBehavior;

    impl JobBehavior for NoopBehavior {
        fn create_tasks_for_stage(
            &self,
            _stage: u32,
            _parameters: &Map<String, Value>,
            _job_id: &str,
            _previous_results: Option<&[Value]>,
        ) -> ConveyorResult<Vec<TaskSpec>> {
            Ok(vec![TaskSpec::new("noop", json!({}))])
        }

        fn finalize_job(&self, _context: &FinalizeContext<'_>) -> ConveyorResult<Value> {
            Ok(json!({}))
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl TaskHandler for NoopHandler {
        async fn handle(&self, _parameters: &Value) -> HandlerResult {
            HandlerResult::ok(json!(null))
        }
    }

    fn definition(job_type: &str, stages: Vec<StageDefinition>) -> JobDefinition {
        JobDefinition {
            job_type: job_type.into(),
            description: "test".into(),
            stages,
            parameters_schema: ParameterSchema::new(),
            continue_on_task_failure: false,
            behavior: Arc::new(NoopBehavior),
        }
    }

    #[test]
    fn test_registry_resolves_registered_types() {
        let registry = JobRegistry::builder()
            .register_handler("noop", Arc::new(NoopHandler))
            .register_job(definition(
                "simple",
                vec![StageDefinition::new(1, "only", "noop", Parallelism::Single)],
            ))
            .unwrap()
            .build()
            .unwrap();

        assert!(registry.has_job_type("simple"));
        assert_eq!(registry.job_definition("simple").unwrap().total_stages(), 1);
        assert!(registry.handler("noop").is_ok());
    }

    #[test]
    fn test_unknown_types_are_errors() {
        let registry = JobRegistry::builder().build().unwrap();
        assert!(matches!(
            registry.job_definition("ghost").unwrap_err(),
            ConveyorError::UnknownJobType(_)
        ));
        assert!(matches!(
            registry.handler("ghost").unwrap_err(),
            ConveyorError::UnknownTaskType(_)
        ));
    }

    #[test]
    fn test_stage_numbers_must_be_contiguous() {
        let result = JobRegistry::builder().register_job(definition(
            "gappy",
            vec![
                StageDefinition::new(1, "a", "noop", Parallelism::Single),
                StageDefinition::new(3, "b", "noop", Parallelism::Single),
            ],
        ));
        assert!(matches!(result.unwrap_err(), ConveyorError::Definition(_)));
    }

    #[test]
    fn test_empty_stage_list_rejected() {
        let result = JobRegistry::builder().register_job(definition("hollow", vec![]));
        assert!(matches!(result.unwrap_err(), ConveyorError::Definition(_)));
    }

    #[test]
    fn test_first_stage_cannot_match_previous() {
        let result = JobRegistry::builder().register_job(definition(
            "backwards",
            vec![StageDefinition::new(1, "a", "noop", Parallelism::MatchPrevious)],
        ));
        assert!(matches!(result.unwrap_err(), ConveyorError::Definition(_)));
    }

    #[test]
    fn test_build_rejects_unresolvable_task_type() {
        let result = JobRegistry::builder()
            .register_job(definition(
                "dangling",
                vec![StageDefinition::new(1, "a", "missing", Parallelism::Single)],
            ))
            .unwrap()
            .build();
        assert!(matches!(result.unwrap_err(), ConveyorError::Definition(_)));
    }

    #[test]
    fn test_duplicate_job_type_rejected() {
        let result = JobRegistry::builder()
            .register_job(definition(
                "dup",
                vec![StageDefinition::new(1, "a", "noop", Parallelism::Single)],
            ))
            .unwrap()
            .register_job(definition(
                "dup",
                vec![StageDefinition::new(1, "a", "noop", Parallelism::Single)],
            ));
        assert!(matches!(result.unwrap_err(), ConveyorError::Definition(_)));
    }
}
