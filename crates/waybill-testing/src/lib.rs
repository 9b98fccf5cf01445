//! Test infrastructure shared by the waybill crates.
//!
//! Provides fixture builders for shipments and request bodies, a wiremock
//! backed HTTP peer that records what it receives, and an isolated
//! PostgreSQL schema per test. Time is controlled through [`TestClock`].

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod database;
pub mod fixtures;
pub mod http;

pub use database::TestDatabase;
pub use fixtures::{request_body, ShipmentBuilder};
pub use http::MockPeer;
pub use waybill_core::{Clock, TestClock};
