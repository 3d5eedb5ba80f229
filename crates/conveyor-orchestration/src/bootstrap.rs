//! # Bootstrap
//!
//! Builds the whole system from configuration and starts its moving
//! parts: queue consumers, the janitor, and the HTTP API. Returns a handle
//! whose `stop()` cancels everything and waits for the loops to drain.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use conveyor_shared::config::ConveyorConfig;
use conveyor_shared::registry::JobRegistry;
use conveyor_shared::state::StateStore;
use conveyor_shared::{ConveyorError, ConveyorResult};

use crate::api;
use crate::consumers::{JobQueueConsumer, TaskQueueConsumer};
use crate::core::SystemCore;
use crate::janitor::Janitor;
use crate::kernel::Kernel;

/// Handle to a running orchestration process
#[derive(Debug)]
pub struct OrchestrationHandle {
    pub core: SystemCore,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl OrchestrationHandle {
    /// Cancel every component and wait for the loops to exit
    pub async fn stop(&mut self) -> ConveyorResult<()> {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "component task join failed during shutdown");
            }
        }
        Ok(())
    }
}

/// Builds and starts the orchestration system
#[derive(Debug)]
pub struct OrchestrationBootstrap;

impl OrchestrationBootstrap {
    /// Bootstrap from the environment with the given registry.
    ///
    /// Connects the database, runs migrations, ensures queues, then spawns
    /// the job consumer, task consumer, janitor and API server.
    pub async fn bootstrap(registry: Arc<JobRegistry>) -> ConveyorResult<OrchestrationHandle> {
        let config = ConveyorConfig::from_env()?;
        let core = SystemCore::connect(registry, config).await?;
        Self::start(core).await
    }

    /// Start every component over an already-built core (any provider)
    pub async fn start(core: SystemCore) -> ConveyorResult<OrchestrationHandle> {
        core.messaging().initialize_queues().await?;

        let kernel = Arc::new(Kernel::new(core.clone()));
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(
            JobQueueConsumer::new(kernel.clone(), shutdown.clone()).run(),
        ));
        tasks.push(tokio::spawn(
            TaskQueueConsumer::new(kernel.clone(), shutdown.clone()).run(),
        ));
        tasks.push(tokio::spawn(
            Janitor::new(
                kernel.clone(),
                core.config().janitor.clone(),
                shutdown.clone(),
            )
            .run(),
        ));

        let bind_addr = core.config().bind_addr.clone();
        let router = api::router(core.clone());
        let api_shutdown = shutdown.clone();
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| {
                ConveyorError::Configuration(format!("cannot bind API to {bind_addr}: {e}"))
            })?;
        info!(bind_addr = %bind_addr, "control-plane API listening");
        tasks.push(tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { api_shutdown.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "API server exited with error");
            }
        }));

        info!(
            provider = core.state().provider_name(),
            queues = ?core.messaging().router().all_queues(),
            "orchestration system started"
        );

        Ok(OrchestrationHandle {
            core,
            shutdown,
            tasks,
        })
    }
}
