//! # Submission Service
//!
//! The write half of the control plane: validate → deterministic id →
//! idempotent insert → enqueue the stage-1 job message.
//!
//! Because the job id is a content hash of `(job_type, validated params)`,
//! resubmission is natural dedup: the second submit finds the existing row
//! and enqueues nothing, returning the job's current status instead.

use serde_json::Value;

use conveyor_shared::checkpoints::{Checkpoint, CheckpointCode};
use conveyor_shared::identity;
use conveyor_shared::messaging::JobMessage;
use conveyor_shared::models::{JobRecord, JobStatus};
use conveyor_shared::state::{CreateJobOutcome, StateStore};
use conveyor_shared::ConveyorResult;
use tracing::{debug, info};

use crate::core::SystemCore;

/// What a submission produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub job_id: String,
    pub status: JobStatus,
    /// False when the submission deduplicated onto an existing job
    pub created: bool,
}

/// Validates and admits jobs into the system
#[derive(Debug, Clone)]
pub struct SubmissionService {
    core: SystemCore,
}

impl SubmissionService {
    pub fn new(core: SystemCore) -> Self {
        Self { core }
    }

    /// Submit a job of `job_type` with the raw request `body`.
    ///
    /// Validation failures are terminal for the request — no job row is
    /// created and nothing is enqueued.
    pub async fn submit(&self, job_type: &str, body: &Value) -> ConveyorResult<SubmissionOutcome> {
        let def = self.core.registry().job_definition(job_type)?;
        let parameters = def.parameters_schema.validate(body)?;
        let job_id = identity::job_id(job_type, &parameters);

        let checkpoint = Checkpoint::start(CheckpointCode::JobSubmit).job(&job_id);
        let record = JobRecord::new(
            job_id.clone(),
            job_type.to_string(),
            parameters.clone(),
            def.total_stages(),
        );

        match self.core.state().create_job(&record).await? {
            CreateJobOutcome::Created => {
                // Exactly one initial message per job: only the submission
                // that actually inserted the row enqueues.
                let correlation = identity::correlation_token();
                let message = JobMessage::initial(
                    job_id.clone(),
                    job_type.to_string(),
                    parameters,
                    correlation,
                );
                self.core.messaging().send_job_message(&message).await?;

                info!(job_id = %job_id, job_type = %job_type, "job submitted");
                checkpoint.ok();
                Ok(SubmissionOutcome {
                    job_id,
                    status: JobStatus::Queued,
                    created: true,
                })
            }
            CreateJobOutcome::AlreadyExists => {
                let existing = self.core.state().get_job(&job_id).await?;
                debug!(
                    job_id = %job_id,
                    status = %existing.status,
                    "duplicate submission deduplicated onto existing job"
                );
                checkpoint.ok();
                Ok(SubmissionOutcome {
                    job_id,
                    status: existing.status,
                    created: false,
                })
            }
        }
    }
}
