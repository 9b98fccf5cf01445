//! Core domain models, claim engine and persistence for waybill.
//!
//! Both services (delivery and the courier simulator) build on the types in
//! this crate. The store is the only shared mutable state between them, and
//! every state transition flows through the batch claim engine in [`claim`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod claim;
pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use claim::{ClaimOutcome, ClaimTable, Transition};
pub use error::{CoreError, Result};
pub use models::{
    CourierRequest, CourierStatus, DeliveryWindow, Location, NotificationStatus, RoutingInfo,
    Shipment, ShipmentId, ShipmentStatus, StatusNotification, UserInfo,
};
pub use time::{Clock, RealClock, TestClock};
