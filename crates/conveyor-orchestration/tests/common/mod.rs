//! Shared fixtures: job definitions, handlers and a deterministic message
//! pump over the in-memory providers.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conveyor_orchestration::consumers::{JobQueueConsumer, TaskQueueConsumer};
use conveyor_orchestration::{Kernel, SubmissionService, SystemCore};
use conveyor_shared::config::ConveyorConfig;
use conveyor_shared::models::{JobRecord, JobStatus};
use conveyor_shared::registry::{
    FinalizeContext, HandlerResult, JobBehavior, JobDefinition, JobRegistry, JobRegistryBuilder,
    Parallelism, StageDefinition, TaskHandler, TaskSpec,
};
use conveyor_shared::schema::{FieldSpec, ParameterSchema};
use conveyor_shared::state::StateStore;
use conveyor_shared::{ConveyorError, ConveyorResult};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// The two-stage greeting job: n greet tasks, then one reply per greeting
// ---------------------------------------------------------------------------

pub struct GreetingBehavior;

impl JobBehavior for GreetingBehavior {
    fn create_tasks_for_stage(
        &self,
        stage: u32,
        parameters: &Map<String, Value>,
        _job_id: &str,
        previous_results: Option<&[Value]>,
    ) -> ConveyorResult<Vec<TaskSpec>> {
        match stage {
            1 => {
                let n = parameters
                    .get("n")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| ConveyorError::Definition("greeting requires 'n'".into()))?;
                let fail_index = parameters.get("fail_index").and_then(Value::as_u64);
                Ok((0..n)
                    .map(|i| {
                        TaskSpec::new(
                            "greet",
                            json!({"index": i, "fail": fail_index == Some(i)}),
                        )
                    })
                    .collect())
            }
            2 => {
                let greetings = previous_results.unwrap_or(&[]);
                Ok(greetings
                    .iter()
                    .enumerate()
                    .map(|(i, greeting)| {
                        TaskSpec::new("reply", json!({"index": i, "to": greeting}))
                    })
                    .collect())
            }
            other => Err(ConveyorError::Definition(format!("no stage {other}"))),
        }
    }

    fn finalize_job(&self, context: &FinalizeContext<'_>) -> ConveyorResult<Value> {
        Ok(json!({
            "tasks_completed": context.stage_results.total_results(),
        }))
    }
}

pub struct GreetHandler;

#[async_trait]
impl TaskHandler for GreetHandler {
    async fn handle(&self, parameters: &Value) -> HandlerResult {
        if parameters["fail"] == json!(true) {
            return HandlerResult::failure("greet refused deterministically");
        }
        HandlerResult::ok(json!(format!("hello-{}", parameters["index"])))
    }
}

pub struct ReplyHandler;

#[async_trait]
impl TaskHandler for ReplyHandler {
    async fn handle(&self, parameters: &Value) -> HandlerResult {
        HandlerResult::ok(json!(format!("re: {}", parameters["to"].as_str().unwrap_or("?"))))
    }
}

/// Succeeds only after `fail_times` failed attempts (retry testing)
pub struct FlakyHandler {
    fail_times: u32,
    calls: AtomicU32,
}

impl FlakyHandler {
    pub fn new(fail_times: u32) -> Self {
        Self {
            fail_times,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(&self, parameters: &Value) -> HandlerResult {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_times {
            HandlerResult::failure(format!("flaky attempt {attempt}"))
        } else {
            HandlerResult::ok(json!({"recovered_on": attempt, "echo": parameters.clone()}))
        }
    }
}

pub fn greeting_definition() -> JobDefinition {
    JobDefinition {
        job_type: "greeting".into(),
        description: "greet n times, then reply to every greeting".into(),
        stages: vec![
            StageDefinition::new(1, "greet", "greet", Parallelism::Dynamic),
            StageDefinition::new(2, "reply", "reply", Parallelism::MatchPrevious).allow_empty(),
        ],
        parameters_schema: ParameterSchema::new()
            .field(
                "n",
                FieldSpec::integer().required().with_min(0.0).with_max(1000.0),
            )
            .field("fail_index", FieldSpec::integer().with_min(0.0)),
        continue_on_task_failure: false,
        behavior: Arc::new(GreetingBehavior),
    }
}

/// Single-stage job whose stage 1 legally fans out to zero tasks when n=0
pub struct SparseBehavior;

impl JobBehavior for SparseBehavior {
    fn create_tasks_for_stage(
        &self,
        _stage: u32,
        parameters: &Map<String, Value>,
        _job_id: &str,
        _previous_results: Option<&[Value]>,
    ) -> ConveyorResult<Vec<TaskSpec>> {
        let n = parameters.get("n").and_then(Value::as_u64).unwrap_or(0);
        Ok((0..n).map(|i| TaskSpec::new("greet", json!({"index": i, "fail": false}))).collect())
    }

    fn finalize_job(&self, context: &FinalizeContext<'_>) -> ConveyorResult<Value> {
        Ok(json!({"tasks_completed": context.stage_results.total_results()}))
    }
}

pub fn sparse_definition(allow_empty: bool) -> JobDefinition {
    let mut stage = StageDefinition::new(1, "maybe", "greet", Parallelism::Dynamic);
    if allow_empty {
        stage = stage.allow_empty();
    }
    JobDefinition {
        job_type: if allow_empty { "sparse" } else { "strict" }.into(),
        description: "conditional fan-out".into(),
        stages: vec![stage],
        parameters_schema: ParameterSchema::new()
            .field("n", FieldSpec::integer().required().with_min(0.0)),
        continue_on_task_failure: false,
        behavior: Arc::new(SparseBehavior),
    }
}

/// Single-stage behavior producing exactly one task of a fixed type
pub struct SingleTaskBehavior {
    task_type: &'static str,
}

impl SingleTaskBehavior {
    pub fn new(task_type: &'static str) -> Self {
        Self { task_type }
    }
}

impl JobBehavior for SingleTaskBehavior {
    fn create_tasks_for_stage(
        &self,
        _stage: u32,
        _parameters: &Map<String, Value>,
        _job_id: &str,
        _previous_results: Option<&[Value]>,
    ) -> ConveyorResult<Vec<TaskSpec>> {
        Ok(vec![TaskSpec::new(self.task_type, json!({}))])
    }

    fn finalize_job(&self, context: &FinalizeContext<'_>) -> ConveyorResult<Value> {
        Ok(json!({"tasks_completed": context.stage_results.total_results()}))
    }
}

/// Fan-out that names a task type no handler was registered for
pub struct MismatchedBehavior;

impl JobBehavior for MismatchedBehavior {
    fn create_tasks_for_stage(
        &self,
        _stage: u32,
        _parameters: &Map<String, Value>,
        _job_id: &str,
        _previous_results: Option<&[Value]>,
    ) -> ConveyorResult<Vec<TaskSpec>> {
        Ok(vec![TaskSpec::new("nonexistent", json!({}))])
    }

    fn finalize_job(&self, _context: &FinalizeContext<'_>) -> ConveyorResult<Value> {
        Ok(json!({}))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Everything a pipeline test needs
pub struct Harness {
    pub core: SystemCore,
    pub kernel: Arc<Kernel>,
    pub submission: SubmissionService,
    pub job_consumer: JobQueueConsumer,
    pub task_consumer: TaskQueueConsumer,
}

pub fn test_config() -> ConveyorConfig {
    let mut config = ConveyorConfig::default();
    config.queues.visibility_timeout = Duration::from_secs(30);
    config.queues.poll_interval = Duration::from_millis(5);
    config.queues.batch_size = 32;
    config.execution.default_handler_timeout = Duration::from_secs(5);
    config.retry.backoff_base = Duration::from_millis(1);
    config.retry.backoff_cap = Duration::from_millis(2);
    config
}

pub async fn harness_with(build: impl FnOnce(JobRegistryBuilder) -> JobRegistryBuilder) -> Harness {
    let builder = JobRegistry::builder()
        .register_handler("greet", Arc::new(GreetHandler))
        .register_handler("reply", Arc::new(ReplyHandler));
    let registry = Arc::new(
        build(builder)
            .register_job(greeting_definition())
            .unwrap()
            .build()
            .unwrap(),
    );

    let core = SystemCore::in_memory(registry, test_config());
    core.messaging().initialize_queues().await.unwrap();

    let kernel = Arc::new(Kernel::new(core.clone()));
    let shutdown = CancellationToken::new();
    Harness {
        submission: SubmissionService::new(core.clone()),
        job_consumer: JobQueueConsumer::new(kernel.clone(), shutdown.clone()),
        task_consumer: TaskQueueConsumer::new(kernel.clone(), shutdown),
        kernel,
        core,
    }
}

pub async fn harness() -> Harness {
    harness_with(|builder| builder).await
}

impl Harness {
    /// Drain both queues until the job is terminal (or the pump stalls).
    ///
    /// Deterministic: each round processes whatever is currently visible;
    /// no sleeps, no background tasks.
    pub async fn run_to_terminal(&self, job_id: &str) -> JobRecord {
        for _ in 0..500 {
            let jobs = self.job_consumer.process_batch().await.expect("job batch");
            let tasks = self.task_consumer.process_batch().await.expect("task batch");

            let job = self.core.state().get_job(job_id).await.expect("job exists");
            if job.is_terminal() {
                return job;
            }
            if jobs == 0 && tasks == 0 {
                // Nothing visible and nothing terminal: give retries a tick
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
        panic!("job {job_id} did not reach a terminal state");
    }

    pub async fn submit(&self, job_type: &str, body: Value) -> (String, JobStatus, bool) {
        let outcome = self.submission.submit(job_type, &body).await.expect("submit");
        (outcome.job_id, outcome.status, outcome.created)
    }
}
