//! Supervised set of drain loops with graceful shutdown.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use waybill_core::Clock;

use crate::{
    drain::{DrainConfig, DrainLoop, DrainTask},
    error::{EngineError, Result},
};

/// Owns every background worker of a service.
///
/// Workers share one cancellation token. Cancelling stops them from
/// starting new cycles; in-flight cycles run to completion.
pub struct WorkerPool {
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    pending: Vec<DrainLoop>,
    worker_handles: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl WorkerPool {
    /// Creates an empty pool.
    pub fn new(clock: Arc<dyn Clock>, cancellation_token: CancellationToken) -> Self {
        Self { clock, cancellation_token, pending: Vec::new(), worker_handles: Vec::new() }
    }

    /// Registers a task to run under its own drain loop.
    pub fn add(&mut self, task: Arc<dyn DrainTask>, config: DrainConfig) -> &mut Self {
        self.pending.push(DrainLoop::new(
            task,
            config,
            self.clock.clone(),
            self.cancellation_token.clone(),
        ));
        self
    }

    /// Token shared by every worker in the pool.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Spawns every registered worker.
    pub fn spawn_workers(&mut self) {
        info!(worker_count = self.pending.len(), "spawning workers");

        for drain in std::mem::take(&mut self.pending) {
            let name = drain.name();
            let handle = tokio::spawn(async move {
                let result = drain.run().await;
                if let Err(ref error) = result {
                    error!(worker = name, error = %error, "worker terminated with error");
                } else {
                    info!(worker = name, "worker stopped gracefully");
                }
                result
            });
            self.worker_handles.push((name, handle));
        }
    }

    /// Number of spawned workers.
    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }

    /// Returns true while any spawned worker is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|(_, h)| !h.is_finished())
    }

    /// Cancels every worker and waits for in-flight cycles to finish.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers are still running after
    /// `timeout`, or `WorkerPanic` for the first worker that panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();
        let handles = std::mem::take(&mut self.worker_handles);

        let shutdown = async {
            let mut first_panic = None;
            for (name, handle) in handles {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(worker = name, error = %error, "worker completed with error");
                    },
                    Err(join_error) => {
                        error!(worker = name, error = %join_error, "worker task panicked");
                        first_panic.get_or_insert(EngineError::WorkerPanic {
                            worker: name.to_string(),
                            error: join_error.to_string(),
                        });
                    },
                }
            }
            first_panic
        };

        match tokio::time::timeout(timeout, shutdown).await {
            Ok(None) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => Err(panic),
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(EngineError::ShutdownTimeout { timeout })
            },
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.worker_handles.iter().filter(|(_, h)| !h.is_finished()).count();
        if active > 0 && !self.cancellation_token.is_cancelled() {
            error!(active_workers = active, "worker pool dropped with active workers, cancelling");
            self.cancellation_token.cancel();
        }
    }
}
