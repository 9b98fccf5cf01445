//! Drain loop: claim-and-process cycles back to back until the backlog is
//! empty, then sleep until the next tick.
//!
//! A cycle is one [`DrainTask::run_cycle`] call. A cycle that reports zero
//! claimed rows ends the drain. A failed cycle is logged, the loop backs
//! off for `error_backoff` and the next tick starts a fresh drain. Nothing
//! a cycle does can stop the process.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use waybill_core::Clock;

use crate::error::{ErrorCategory, Result};

/// One unit of periodic work, such as promoting queued shipments.
#[async_trait]
pub trait DrainTask: Send + Sync {
    /// Stable name used in logs and worker handles.
    fn name(&self) -> &'static str;

    /// Claims one batch and processes it.
    ///
    /// Returns the number of rows claimed. Zero means the backlog is
    /// exhausted for this tick.
    async fn run_cycle(&self) -> Result<usize>;
}

/// Timing of a drain loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainConfig {
    /// Sleep between drains.
    pub tick_interval: Duration,
    /// Sleep after a failed cycle.
    pub error_backoff: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(10), error_backoff: Duration::from_secs(5) }
    }
}

/// Counters for one drain loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Completed drains (ticks that ran to an empty cycle).
    pub drains: u64,
    /// Cycles run, including the final empty one.
    pub cycles: u64,
    /// Rows claimed across all cycles.
    pub claimed: u64,
    /// Cycles that failed.
    pub failures: u64,
}

/// Runs a [`DrainTask`] on a fixed tick until cancelled.
pub struct DrainLoop {
    task: Arc<dyn DrainTask>,
    config: DrainConfig,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    stats: Arc<RwLock<DrainStats>>,
}

impl DrainLoop {
    /// Creates a loop for `task`.
    pub fn new(
        task: Arc<dyn DrainTask>,
        config: DrainConfig,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            task,
            config,
            clock,
            cancellation_token,
            stats: Arc::new(RwLock::new(DrainStats::default())),
        }
    }

    /// Name of the wrapped task.
    pub fn name(&self) -> &'static str {
        self.task.name()
    }

    /// Shared handle to this loop's counters.
    pub fn stats(&self) -> Arc<RwLock<DrainStats>> {
        self.stats.clone()
    }

    /// Runs cycles back to back until one claims nothing.
    ///
    /// Stops early, without starting another cycle, once cancellation is
    /// requested. Returns the number of rows claimed.
    ///
    /// # Errors
    ///
    /// Returns the first cycle error; rows claimed before it stay claimed.
    pub async fn drain_once(&self) -> Result<usize> {
        let worker = self.task.name();
        let mut total = 0;

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let span = info_span!("drain_cycle", worker);
            let claimed = self.task.run_cycle().instrument(span).await;

            let mut stats = self.stats.write().await;
            stats.cycles += 1;
            match claimed {
                Ok(0) => {
                    stats.drains += 1;
                    break;
                },
                Ok(claimed) => {
                    stats.claimed += claimed as u64;
                    total += claimed;
                    info!(worker, batch_len = claimed, "cycle processed batch");
                },
                Err(error) => {
                    stats.failures += 1;
                    return Err(error);
                },
            }
        }

        if total == 0 {
            debug!(worker, "nothing to drain");
        }
        Ok(total)
    }

    /// Drains on every tick until cancelled.
    ///
    /// # Errors
    ///
    /// Currently never returns an error; cycle failures are contained.
    pub async fn run(&self) -> Result<()> {
        let worker = self.task.name();
        info!(worker, tick_ms = self.config.tick_interval.as_millis() as u64, "drain loop starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let pause = match self.drain_once().await {
                Ok(_) => self.config.tick_interval,
                Err(error) => {
                    error!(
                        worker,
                        category = %ErrorCategory::from(&error),
                        error = %error,
                        "drain cycle failed"
                    );
                    self.config.error_backoff
                },
            };

            tokio::select! {
                () = self.clock.sleep(pause) => {}
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!(worker, "drain loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex;

    use waybill_core::TestClock;

    use super::*;
    use crate::error::EngineError;

    /// Serves a scripted sequence of cycle results, then zeros.
    struct Scripted {
        results: Mutex<Vec<Result<usize>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(mut results: Vec<Result<usize>>) -> Arc<Self> {
            results.reverse();
            Arc::new(Self { results: Mutex::new(results), calls: Mutex::new(0) })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl DrainTask for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run_cycle(&self) -> Result<usize> {
            *self.calls.lock().unwrap() += 1;
            self.results.lock().unwrap().pop().unwrap_or(Ok(0))
        }
    }

    fn drain_loop(task: Arc<Scripted>, token: CancellationToken) -> DrainLoop {
        DrainLoop::new(task, DrainConfig::default(), Arc::new(TestClock::new()), token)
    }

    #[tokio::test]
    async fn drains_back_to_back_until_empty_cycle() {
        let task = Scripted::new(vec![Ok(100), Ok(100), Ok(30)]);
        let drain = drain_loop(task.clone(), CancellationToken::new());

        let total = drain.drain_once().await.unwrap();

        assert_eq!(total, 230);
        assert_eq!(task.calls(), 4);
        let stats = drain.stats().read().await.clone();
        assert_eq!(stats, DrainStats { drains: 1, cycles: 4, claimed: 230, failures: 0 });
    }

    #[tokio::test]
    async fn failed_cycle_aborts_drain_not_loop() {
        let task = Scripted::new(vec![Ok(5), Err(EngineError::store("begin failed")), Ok(7)]);
        let drain = drain_loop(task.clone(), CancellationToken::new());

        assert!(drain.drain_once().await.is_err());
        assert_eq!(drain.drain_once().await.unwrap(), 7);
        assert_eq!(drain.stats().read().await.failures, 1);
    }

    #[tokio::test]
    async fn cancelled_loop_starts_no_cycle() {
        let task = Scripted::new(vec![Ok(1)]);
        let token = CancellationToken::new();
        token.cancel();

        drain_loop(task.clone(), token).run().await.unwrap();

        assert_eq!(task.calls(), 0);
    }

    #[tokio::test]
    async fn run_keeps_ticking_after_failures() {
        let task = Scripted::new(vec![Err(EngineError::store("down")), Ok(3)]);
        let token = CancellationToken::new();
        let drain = Arc::new(drain_loop(task.clone(), token.clone()));

        let runner = tokio::spawn({
            let drain = drain.clone();
            async move { drain.run().await }
        });

        for _ in 0..100 {
            if drain.stats().read().await.claimed == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        token.cancel();
        runner.await.unwrap().unwrap();

        let stats = drain.stats().read().await.clone();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.claimed, 3);
    }
}
