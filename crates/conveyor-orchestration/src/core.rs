//! # System Core
//!
//! The dependency-injected bundle every component receives at construction
//! time: state store, message client, job registry, configuration. Built
//! once at startup, immutable thereafter — there are no process-wide
//! singletons anywhere in the workspace.

use std::sync::Arc;

use conveyor_shared::config::ConveyorConfig;
use conveyor_shared::database;
use conveyor_shared::messaging::service::PgmqQueueService;
use conveyor_shared::messaging::{MessageClient, QueueProvider};
use conveyor_shared::registry::JobRegistry;
use conveyor_shared::state::{PostgresStateStore, StateStoreProvider};
use conveyor_shared::ConveyorResult;

/// Shared, immutable system dependencies
#[derive(Debug, Clone)]
pub struct SystemCore {
    state: Arc<StateStoreProvider>,
    messaging: MessageClient,
    registry: Arc<JobRegistry>,
    config: ConveyorConfig,
}

impl SystemCore {
    pub fn new(
        state: Arc<StateStoreProvider>,
        messaging: MessageClient,
        registry: Arc<JobRegistry>,
        config: ConveyorConfig,
    ) -> Self {
        Self {
            state,
            messaging,
            registry,
            config,
        }
    }

    /// All-in-memory core for tests and single-process demo runs
    pub fn in_memory(registry: Arc<JobRegistry>, config: ConveyorConfig) -> Self {
        let state = Arc::new(StateStoreProvider::new_in_memory());
        let provider = Arc::new(QueueProvider::new_in_memory());
        let messaging = MessageClient::new(provider, config.queues.router());
        Self::new(state, messaging, registry, config)
    }

    /// Production core: one Postgres pool backing both the catalog and the
    /// PGMQ queues. Runs the embedded migrations.
    pub async fn connect(
        registry: Arc<JobRegistry>,
        config: ConveyorConfig,
    ) -> ConveyorResult<Self> {
        let pool = database::connect_pool(&config.database_url, config.db_max_connections).await?;
        database::run_migrations(&pool).await?;

        let state = Arc::new(StateStoreProvider::Postgres(PostgresStateStore::new(
            pool.clone(),
        )));
        let provider = Arc::new(QueueProvider::Pgmq(PgmqQueueService::new_with_pool(pool)));
        let messaging = MessageClient::new(provider, config.queues.router());
        Ok(Self::new(state, messaging, registry, config))
    }

    pub fn state(&self) -> &Arc<StateStoreProvider> {
        &self.state
    }

    pub fn messaging(&self) -> &MessageClient {
        &self.messaging
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ConveyorConfig {
        &self.config
    }
}
