//! Builders for shipments and HTTP request bodies.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{json, Value};
use waybill_core::{DeliveryWindow, Location, RoutingInfo, Shipment, ShipmentId, ShipmentStatus};

/// Builder for test shipments with valid defaults.
#[derive(Debug, Clone)]
pub struct ShipmentBuilder {
    uid: ShipmentId,
    start: DateTime<Utc>,
    status: ShipmentStatus,
    origin: Location,
    destination: Location,
}

impl ShipmentBuilder {
    /// Starts a queued shipment whose window opens in three hours.
    pub fn new(uid: impl Into<ShipmentId>) -> Self {
        Self {
            uid: uid.into(),
            start: Utc::now() + TimeDelta::hours(3),
            status: ShipmentStatus::Queued,
            origin: Location { lat: 52.37, long: 4.89 },
            destination: Location { lat: 52.09, long: 5.12 },
        }
    }

    /// Sets the window start.
    #[must_use]
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn status(mut self, status: ShipmentStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the pickup point.
    #[must_use]
    pub fn origin(mut self, lat: f64, long: f64) -> Self {
        self.origin = Location { lat, long };
        self
    }

    /// Builds the shipment.
    pub fn build(self) -> Shipment {
        Shipment {
            uid: self.uid,
            user_uid: "user-1".to_string(),
            user_address: "Damrak 1, Amsterdam".to_string(),
            routing: RoutingInfo { origin: self.origin, destination: self.destination },
            window: DeliveryWindow::starting_at(self.start),
            status: self.status,
        }
    }
}

/// JSON body for the delivery `POST /request` with a two-hour window
/// starting at `start`.
pub fn request_body(uid: &str, start: DateTime<Utc>) -> Value {
    let window = DeliveryWindow::starting_at(start);
    json!({
        "shipment_uid": uid,
        "user_info": { "user_uid": "user-1", "address": "Damrak 1, Amsterdam" },
        "routing_info": {
            "origin": { "lat": 52.37, "long": 4.89 },
            "destination": { "lat": 52.09, "long": 5.12 }
        },
        "scheduled_delivery_window": {
            "start_time": window.start_time,
            "end_time": window.end_time
        }
    })
}
