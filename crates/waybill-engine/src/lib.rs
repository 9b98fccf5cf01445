//! Worker machinery shared by the delivery service and the courier simulator.
//!
//! # Architecture
//!
//! Each background worker is a [`DrainTask`]: one call claims a batch from the
//! store, performs its side effects and reports how many rows it claimed. A
//! [`DrainLoop`] runs cycles back to back until a cycle claims nothing, then
//! sleeps until the next tick, so a backlog of any size is cleared every tick
//! while idle polling stays bounded.
//!
//! Side effects on a batch go through [`fan_out`], which caps in-flight calls
//! independently of batch size, and outbound HTTP goes through
//! [`WebhookClient`], which treats anything but HTTP 200 as failure and
//! retries transient failures with backoff.
//!
//! A [`WorkerPool`] owns the loops of one service and shuts them down
//! together.

pub mod client;
pub mod drain;
pub mod error;
pub mod fanout;
pub mod retry;
pub mod worker_pool;

pub use client::{ClientConfig, WebhookClient};
pub use drain::{DrainConfig, DrainLoop, DrainStats, DrainTask};
pub use error::{EngineError, ErrorCategory, Result};
pub use fanout::fan_out;
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy};
pub use worker_pool::WorkerPool;

/// Default tick between drains.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 10;

/// Default cap on concurrent outbound calls per cycle.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 16;
