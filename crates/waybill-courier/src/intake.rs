//! Idempotent courier intake.
//!
//! Every `POST /request` lands here. The call is safe to repeat: it either
//! creates the tracking row or re-arms the existing one, and the fourth call
//! for the same shipment short-circuits the search by forcing `found`.

use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use serde::Deserialize;
use tracing::{debug, error, info, instrument};
use waybill_core::{Clock, CourierRequest, DeliveryWindow, RoutingInfo, ShipmentId};

use crate::{
    error::{IntakeError, Result},
    storage::CourierStore,
};

/// Body of `POST /request`.
///
/// Routing and window are accepted for logging; the simulator does not use
/// them to pick a courier.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IntakeInput {
    /// Shipment to find a courier for.
    pub shipment_uid: ShipmentId,
    /// Pickup and drop-off points.
    pub routing_info: Option<RoutingInfo>,
    /// Delivery window.
    pub scheduled_delivery_window: Option<DeliveryWindow>,
}

/// Intake use case.
pub struct IntakeService {
    store: Arc<dyn CourierStore>,
    clock: Arc<dyn Clock>,
    search_delay: Duration,
}

impl IntakeService {
    /// Creates the service. `search_delay` is how long after an intake the
    /// row is next checked.
    pub fn new(store: Arc<dyn CourierStore>, clock: Arc<dyn Clock>, search_delay: Duration) -> Self {
        Self { store, clock, search_delay }
    }

    /// Records an intake call.
    ///
    /// # Errors
    ///
    /// - `Malformed` when `shipment_uid` is empty
    /// - `Store` when the upsert fails
    #[instrument(name = "intake", skip_all, fields(shipment_uid = %input.shipment_uid))]
    pub async fn intake(&self, input: IntakeInput) -> Result<CourierRequest> {
        if input.shipment_uid.is_empty() {
            return Err(IntakeError::Malformed("shipment_uid is required".into()));
        }
        if let Some(window) = &input.scheduled_delivery_window {
            debug!(window_start = %window.start_time, "courier requested for window");
        }

        let delay = TimeDelta::from_std(self.search_delay).unwrap_or(TimeDelta::MAX);
        let now = self.clock.now_utc();
        let next_check_at = now.checked_add_signed(delay).unwrap_or(now);

        let request = self.store.intake(input.shipment_uid, next_check_at).await.inspect_err(|e| {
            error!(error = %e, "intake upsert failed");
        })?;

        info!(retries = request.retries, status = %request.status, "courier request recorded");
        Ok(request)
    }

    /// Checks store connectivity.
    ///
    /// # Errors
    ///
    /// Returns `Store` when the store is unreachable.
    pub async fn health_check(&self) -> Result<()> {
        Ok(self.store.health_check().await?)
    }
}
