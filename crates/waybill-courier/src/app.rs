//! Assembly of the courier simulator: intake, search workers and HTTP
//! surface.

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
    config::Config,
    http,
    intake::IntakeService,
    notifier::{DeliveryNotifier, HttpDeliveryNotifier},
    policy::OutcomePolicy,
    storage::{CourierStore, PostgresCourierStore},
    workers::{FindingWorker, SearchingWorker, ShippingWorker},
};

/// Collaborators the simulator is built over.
pub struct Dependencies {
    /// Tracking row persistence.
    pub store: Arc<dyn CourierStore>,
    /// Outbound delivery webhook.
    pub notifier: Arc<dyn DeliveryNotifier>,
    /// Search outcome decision.
    pub policy: Arc<dyn OutcomePolicy>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl Dependencies {
    /// Production collaborators: PostgreSQL store, HTTP webhook and the
    /// configured outcome policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the outbound HTTP client cannot be built.
    pub fn production(config: &Config, pool: PgPool, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = WebhookClient::new(config.client_config(), clock.clone())
            .context("failed to build outbound client")?;

        Ok(Self {
            store: Arc::new(PostgresCourierStore::new(Arc::new(Storage::new(pool)))),
            notifier: Arc::new(HttpDeliveryNotifier::new(
                client,
                config.delivery_webhook_url.clone(),
            )),
            policy: config.outcome_policy(),
            clock,
        })
    }
}

/// A wired courier simulator.
pub struct CourierApp {
    config: Config,
    clock: Arc<dyn Clock>,
    intake: Arc<IntakeService>,
    searching: Arc<SearchingWorker>,
    finding: Arc<FindingWorker>,
    shipping: Arc<ShippingWorker>,
}

impl CourierApp {
    /// Wires intake and the three workers over `deps`.
    pub fn new(config: Config, deps: Dependencies) -> Self {
        let settings = config.search_settings();
        let intake = Arc::new(IntakeService::new(
            deps.store.clone(),
            deps.clock.clone(),
            config.search_delay(),
        ));
        let searching = Arc::new(SearchingWorker::new(
            deps.store.clone(),
            deps.notifier.clone(),
            deps.clock.clone(),
            settings,
        ));
        let finding = Arc::new(FindingWorker::new(
            deps.store.clone(),
            deps.notifier.clone(),
            deps.clock.clone(),
            deps.policy,
            settings,
        ));
        let shipping = Arc::new(ShippingWorker::new(
            deps.store,
            deps.notifier,
            deps.clock.clone(),
            settings,
        ));

        Self { config, clock: deps.clock, intake, searching, finding, shipping }
    }

    /// Intake behind `POST /request`.
    pub fn intake(&self) -> Arc<IntakeService> {
        self.intake.clone()
    }

    /// The three workers in pipeline order: searching, finding, shipping.
    pub fn workers(&self) -> [Arc<dyn DrainTask>; 3] {
        let searching: Arc<dyn DrainTask> = self.searching.clone();
        let finding: Arc<dyn DrainTask> = self.finding.clone();
        let shipping: Arc<dyn DrainTask> = self.shipping.clone();
        [searching, finding, shipping]
    }

    /// HTTP router.
    pub fn router(&self) -> Router {
        http::create_router(self.intake(), Duration::from_secs(self.config.request_timeout_secs))
    }

    /// Pool running the three workers under `token`.
    pub fn worker_pool(&self, token: CancellationToken) -> WorkerPool {
        let mut pool = WorkerPool::new(self.clock.clone(), token);
        for worker in self.workers() {
            pool.add(worker, self.config.drain_config());
        }
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
        info!(%addr, "courier simulator listening");

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                token.cancel();
            })
            .await;
        if let Err(ref e) = served {
            error!(error = %e, "courier server failed");
        }

        workers
            .shutdown_graceful(Duration::from_secs(self.config.shutdown_timeout_secs))
            .await
            .context("courier workers did not stop cleanly")?;
        served.context("courier server failed")?;

        info!("courier simulator stopped");
        Ok(())
    }
}
