//! Assembly of the delivery service: use cases, workers and HTTP surface.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use waybill_core::{storage::Storage, Clock};
use waybill_engine::{DrainTask, WebhookClient, WorkerPool};

use crate::{
    collaborators::{
        CoreNotifier, HttpCoreNotifier, HttpThirdPartyLogistics, LoggingCoreNotifier,
        ThirdPartyLogistics,
    },
    config::Config,
    http,
    service::DeliveryService,
    storage::{PostgresShipmentStore, ShipmentStore},
    workers::{DispatchWorker, PendingWorker},
};

/// Collaborators the delivery service is built over.
pub struct Dependencies {
    /// Shipment persistence.
    pub store: Arc<dyn ShipmentStore>,
    /// Outbound 3PL.
    pub courier: Arc<dyn ThirdPartyLogistics>,
    /// Outbound core webhook.
    pub core: Arc<dyn CoreNotifier>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl Dependencies {
    /// Production collaborators: PostgreSQL store and HTTP peers.
    ///
    /// # Errors
    ///
    /// Returns an error if the outbound HTTP client cannot be built.
    pub fn production(config: &Config, pool: PgPool, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = WebhookClient::new(config.client_config(), clock.clone())
            .context("failed to build outbound client")?;

        let core: Arc<dyn CoreNotifier> = match &config.core_webhook_url {
            Some(url) => Arc::new(HttpCoreNotifier::new(client.clone(), url.clone())),
            None => {
                info!("no core webhook configured, core notifications are logged only");
                Arc::new(LoggingCoreNotifier)
            },
        };

        Ok(Self {
            store: Arc::new(PostgresShipmentStore::new(Arc::new(Storage::new(pool)))),
            courier: Arc::new(HttpThirdPartyLogistics::new(client, &config.courier_url)),
            core,
            clock,
        })
    }
}

/// A wired delivery service.
pub struct DeliveryApp {
    config: Config,
    clock: Arc<dyn Clock>,
    service: Arc<DeliveryService>,
    pending: Arc<PendingWorker>,
    dispatch: Arc<DispatchWorker>,
}

impl DeliveryApp {
    /// Wires the service and its workers over `deps`.
    pub fn new(config: Config, deps: Dependencies) -> Self {
        let service = Arc::new(DeliveryService::new(
            deps.store.clone(),
            deps.courier.clone(),
            deps.core.clone(),
            deps.clock.clone(),
            config.redispatch_policy(),
        ));
        let pending = Arc::new(PendingWorker::new(
            deps.store.clone(),
            deps.clock.clone(),
            Duration::from_secs(config.pending_lookahead_secs),
            config.pending_batch_size,
        ));
        let dispatch = Arc::new(DispatchWorker::new(
            deps.store,
            deps.courier,
            deps.core,
            config.dispatch_batch_size,
            config.max_concurrent_calls,
        ));

        Self { config, clock: deps.clock, service, pending, dispatch }
    }

    /// The use cases behind the HTTP surface.
    pub fn service(&self) -> Arc<DeliveryService> {
        self.service.clone()
    }

    /// Worker moving queued shipments to pending.
    pub fn pending_worker(&self) -> Arc<dyn DrainTask> {
        self.pending.clone()
    }

    /// Worker requesting couriers for pending shipments.
    pub fn dispatch_worker(&self) -> Arc<dyn DrainTask> {
        self.dispatch.clone()
    }

    /// HTTP router.
    pub fn router(&self) -> Router {
        http::create_router(self.service(), Duration::from_secs(self.config.request_timeout_secs))
    }

    /// Pool running both workers under `token`.
    pub fn worker_pool(&self, token: CancellationToken) -> WorkerPool {
        let mut pool = WorkerPool::new(self.clock.clone(), token);
        pool.add(self.pending_worker(), self.config.drain_config())
            .add(self.dispatch_worker(), self.config.drain_config());
        pool
    }

    /// Serves HTTP on `listener` and runs the workers until `shutdown`
    /// resolves, then stops both.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails or workers do not stop within
    /// the shutdown timeout.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let mut workers = self.worker_pool(token.clone());
        workers.spawn_workers();

        let addr = listener.local_addr()?;
        info!(%addr, "delivery service listening");

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                token.cancel();
            })
            .await;
        if let Err(ref e) = served {
            error!(error = %e, "delivery server failed");
        }

        workers
            .shutdown_graceful(Duration::from_secs(self.config.shutdown_timeout_secs))
            .await
            .context("delivery workers did not stop cleanly")?;
        served.context("delivery server failed")?;

        info!("delivery service stopped");
        Ok(())
    }
}
