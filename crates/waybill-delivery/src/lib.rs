//! Delivery service.
//!
//! Accepts shipments over HTTP, promotes them through
//! `queued → pending → requested` with two background workers, requests
//! couriers from the 3PL and reacts to the 3PL's webhook notifications.
//!
//! ```text
//! POST /request ─▶ DeliveryService::request ─▶ store (queued | requested)
//!                                               │
//!        PendingWorker  queued ─▶ pending ◀──────┘
//!        DispatchWorker pending ─▶ requested ─▶ 3PL /request, core
//! POST /webhook ─▶ DeliveryService::webhook ─▶ re-dispatch | complete, core
//! ```

pub mod app;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod http;
pub mod service;
pub mod storage;
pub mod validation;
pub mod workers;

pub use app::{DeliveryApp, Dependencies};
pub use config::Config;
pub use error::{Result, ServiceError};
pub use http::create_router;
pub use service::{DeliveryService, RedispatchPolicy};
pub use storage::{DispatchOutcome, PostgresShipmentStore, ShipmentDispatcher, ShipmentStore};
pub use validation::{RequestInput, WebhookInput};
