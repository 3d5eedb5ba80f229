//! # Built-in Jobs
//!
//! One tiny job ships with the server so a fresh deployment can be smoke
//! tested end to end before any real job types are registered: `echo` fans
//! a single stage out into `n` copies of its payload and aggregates them.
//!
//! Real deployments compose their own registry at startup and pass it to
//! [`crate::bootstrap::OrchestrationBootstrap::bootstrap`]; this module is
//! the reference for what that composition looks like.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use conveyor_shared::registry::{
    FinalizeContext, HandlerResult, JobBehavior, JobDefinition, JobRegistry, Parallelism,
    StageDefinition, TaskHandler, TaskSpec,
};
use conveyor_shared::schema::{FieldSpec, ParameterSchema};
use conveyor_shared::{ConveyorError, ConveyorResult};

/// Fan-out/aggregate behavior of the `echo` job
struct EchoBehavior;

impl JobBehavior for EchoBehavior {
    fn create_tasks_for_stage(
        &self,
        _stage: u32,
        parameters: &Map<String, Value>,
        _job_id: &str,
        _previous_results: Option<&[Value]>,
    ) -> ConveyorResult<Vec<TaskSpec>> {
        let n = parameters
            .get("n")
            .and_then(Value::as_u64)
            .ok_or_else(|| ConveyorError::Definition("echo requires 'n'".into()))?;
        let payload = parameters.get("payload").cloned().unwrap_or(Value::Null);
        Ok((0..n)
            .map(|i| TaskSpec::new("echo", json!({"index": i, "payload": payload})))
            .collect())
    }

    fn finalize_job(&self, context: &FinalizeContext<'_>) -> ConveyorResult<Value> {
        let echoes = context.stage_results.stage(1).unwrap_or(&[]);
        Ok(json!({
            "tasks_completed": echoes.len(),
            "echoes": echoes,
        }))
    }
}

/// Returns its parameters untouched
struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, parameters: &Value) -> HandlerResult {
        HandlerResult::ok(parameters.clone())
    }
}

/// The registry the stock server binary boots with
pub fn builtin_registry() -> ConveyorResult<JobRegistry> {
    JobRegistry::builder()
        .register_handler("echo", Arc::new(EchoHandler))
        .register_job(JobDefinition {
            job_type: "echo".into(),
            description: "fan a payload out n ways and collect the echoes".into(),
            stages: vec![StageDefinition::new(1, "echo", "echo", Parallelism::Dynamic)],
            parameters_schema: ParameterSchema::new()
                .field(
                    "n",
                    FieldSpec::integer().required().with_min(1.0).with_max(10_000.0),
                )
                .field("payload", FieldSpec::string().with_default(json!("ping"))),
            continue_on_task_failure: false,
            behavior: Arc::new(EchoBehavior),
        })?
        .build()
}
