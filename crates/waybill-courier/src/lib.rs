//! Third-party logistics simulator.
//!
//! Accepts courier requests from the delivery service, models courier search
//! latency with three background workers and reports every step back to the
//! delivery service's webhook.
//!
//! ```text
//! POST /request ─▶ IntakeService ─▶ upsert (requested | re-armed | found)
//!   SearchingWorker requested ─▶ searching   ─▶ webhook "searching"
//!   FindingWorker   searching ─▶ found       ─▶ webhook "found"
//!                   searching ─▶ requested   ─▶ webhook "not_found"
//!   ShippingWorker  found     ─▶ shipped     ─▶ webhook "shipped"
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod intake;
pub mod notifier;
pub mod policy;
pub mod storage;
pub mod workers;

pub use app::{CourierApp, Dependencies};
pub use config::Config;
pub use error::{IntakeError, Result};
pub use http::create_router;
pub use intake::{IntakeInput, IntakeService};
pub use notifier::{DeliveryNotifier, HttpDeliveryNotifier};
pub use policy::{AlwaysFound, AlwaysNotFound, OutcomePolicy, Probabilistic, Scripted, SearchOutcome};
pub use storage::{CourierStore, PostgresCourierStore};
pub use workers::{FindingWorker, SearchSettings, SearchingWorker, ShippingWorker};
