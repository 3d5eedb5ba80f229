//! # Queue Consumers
//!
//! Poll-loop consumers for the two queues. Many worker processes run these
//! concurrently; within one process the task consumer caps concurrent
//! handler executions (default 4) while job messages — cheap fan-out
//! bookkeeping — are processed sequentially per batch.
//!
//! Every in-flight message gets a [`renewal::RenewalGuard`]: a background
//! task that re-extends the transport lock at ~80% of the lock period (and
//! refreshes the task heartbeat, for task messages) until the work settles
//! or the renewal ceiling is reached.

pub mod job_consumer;
pub mod renewal;
pub mod task_consumer;

pub use job_consumer::JobQueueConsumer;
pub use renewal::RenewalGuard;
pub use task_consumer::TaskQueueConsumer;
