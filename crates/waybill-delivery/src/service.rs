//! Request and webhook use cases of the delivery service.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use tracing::{debug, error, info, instrument, warn};
use waybill_core::{
    Clock, NotificationStatus, Shipment, ShipmentId, ShipmentStatus, StatusNotification,
};

use crate::{
    collaborators::{CoreNotifier, ThirdPartyLogistics},
    error::{Result, ServiceError},
    storage::ShipmentStore,
    validation::{RequestInput, WebhookInput},
};

/// Decides whether a `not_found` report still triggers a new courier
/// request today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedispatchPolicy {
    /// First wall-clock hour at which no re-dispatch happens.
    pub cutoff_hour: u32,
    /// Offset used to read the wall-clock hour.
    pub utc_offset: FixedOffset,
}

impl RedispatchPolicy {
    /// Returns true while the local hour at `now` is before the cutoff.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        now.with_timezone(&self.utc_offset).hour() < self.cutoff_hour
    }
}

impl Default for RedispatchPolicy {
    fn default() -> Self {
        Self { cutoff_hour: 23, utc_offset: Utc.fix() }
    }
}

/// Delivery service use cases.
pub struct DeliveryService {
    store: Arc<dyn ShipmentStore>,
    courier: Arc<dyn ThirdPartyLogistics>,
    core: Arc<dyn CoreNotifier>,
    clock: Arc<dyn Clock>,
    redispatch: RedispatchPolicy,
}

impl DeliveryService {
    /// Creates the service over its collaborators.
    pub fn new(
        store: Arc<dyn ShipmentStore>,
        courier: Arc<dyn ThirdPartyLogistics>,
        core: Arc<dyn CoreNotifier>,
        clock: Arc<dyn Clock>,
        redispatch: RedispatchPolicy,
    ) -> Self {
        Self { store, courier, core, clock, redispatch }
    }

    /// Store backing the service.
    pub fn store(&self) -> Arc<dyn ShipmentStore> {
        self.store.clone()
    }

    /// Creates a shipment.
    ///
    /// A shipment whose window has already opened is created in `requested`
    /// and its courier is requested before this call returns.
    ///
    /// # Errors
    ///
    /// - `Validation` when the input breaks a rule
    /// - `Store` when the insert fails, including a duplicate identifier
    /// - `Collaborator` when the immediate courier request fails
    #[instrument(name = "request", skip_all, fields(shipment_uid = %input.shipment_uid))]
    pub async fn request(&self, input: RequestInput) -> Result<Shipment> {
        let now = self.clock.now_utc();
        input.validate(now).inspect_err(|e| debug!(error = %e, "input validation failed"))?;

        let shipment = input.into_shipment(now);
        self.store.insert(shipment.clone()).await.inspect_err(|e| {
            error!(error = %e, "failed to insert shipment");
        })?;
        info!(status = %shipment.status, "shipment created");

        if shipment.status == ShipmentStatus::Requested {
            info!("window already open, requesting courier now");
            self.courier.request_courier(&shipment).await.inspect_err(|e| {
                error!(error = %e, "failed to request courier");
            })?;
        }

        Ok(shipment)
    }

    /// Handles a status notification from the 3PL.
    ///
    /// `not_found` before the cutoff hour re-requests a courier with the
    /// stored routing and window. `shipped` completes the shipment. Every
    /// valid status is forwarded to the core collaborator, whatever happened
    /// before. The forward is fire-and-forget: its failure is logged and
    /// never fails the webhook, so the 3PL does not redeliver and repeat the
    /// re-dispatch.
    ///
    /// # Errors
    ///
    /// - `Validation` for a missing field or unknown status
    /// - `NotFound` when a re-dispatch targets an unknown shipment
    /// - `Store` or `Collaborator` when the re-dispatch or completion fails
    #[instrument(
        name = "webhook",
        skip_all,
        fields(shipment_uid = %input.shipment_uid, status = %input.status)
    )]
    pub async fn webhook(&self, input: WebhookInput) -> Result<()> {
        let status = input.validate()?;
        let uid = input.shipment_uid;

        let outcome = match status {
            NotificationStatus::NotFound => self.request_again(&uid).await,
            NotificationStatus::Shipped => self.complete(&uid).await,
            _ => Ok(()),
        };

        if let Err(e) = self.core.notify(&StatusNotification::new(uid, status)).await {
            warn!(error = %e, "core notification dropped");
        }

        outcome
    }

    async fn request_again(&self, uid: &ShipmentId) -> Result<()> {
        info!("3PL found no courier");
        if !self.redispatch.allows(self.clock.now_utc()) {
            info!(cutoff_hour = self.redispatch.cutoff_hour, "past cutoff, not re-requesting");
            return Ok(());
        }

        let shipment = self
            .store
            .find(uid.clone())
            .await?
            .ok_or_else(|| ServiceError::NotFound(uid.to_string()))?;
        info!("before cutoff, requesting another courier");
        self.courier.request_courier(&shipment).await.inspect_err(|e| {
            error!(error = %e, "failed to request courier");
        })?;
        Ok(())
    }

    async fn complete(&self, uid: &ShipmentId) -> Result<()> {
        if !self.store.mark_shipped(uid.clone()).await? {
            debug!("shipment was not in requested, status left unchanged");
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::{TimeDelta, TimeZone};
    use waybill_core::{
        DeliveryWindow, Location, RoutingInfo, ShipmentId, TestClock, UserInfo,
    };

    use super::*;
    use crate::{
        collaborators::mock::{RecordingCoreNotifier, RecordingThirdPartyLogistics},
        storage::mock::MockShipmentStore,
    };

    struct Fixture {
        service: DeliveryService,
        store: MockShipmentStore,
        courier: RecordingThirdPartyLogistics,
        core: RecordingCoreNotifier,
        clock: TestClock,
    }

    fn fixture_at(now: DateTime<Utc>) -> Fixture {
        let store = MockShipmentStore::new();
        let courier = RecordingThirdPartyLogistics::new();
        let core = RecordingCoreNotifier::new();
        let clock = TestClock::at(now);
        let service = DeliveryService::new(
            Arc::new(store.clone()),
            Arc::new(courier.clone()),
            Arc::new(core.clone()),
            Arc::new(clock.clone()),
            RedispatchPolicy::default(),
        );
        Fixture { service, store, courier, core, clock }
    }

    fn input(uid: &str, start: DateTime<Utc>) -> RequestInput {
        RequestInput {
            shipment_uid: ShipmentId::new(uid),
            user_info: UserInfo { user_uid: "u-1".into(), address: "1 Main St".into() },
            routing_info: RoutingInfo {
                origin: Location { lat: 10.0, long: 20.0 },
                destination: Location { lat: 11.0, long: 21.0 },
            },
            scheduled_delivery_window: DeliveryWindow::starting_at(start),
        }
    }

    fn webhook(uid: &str, status: &str) -> WebhookInput {
        WebhookInput { shipment_uid: ShipmentId::new(uid), status: status.into() }
    }

    fn ten_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn open_window_is_requested_immediately() {
        let f = fixture_at(ten_am());

        let shipment = f.service.request(input("s-1", ten_am() - TimeDelta::hours(1))).await.unwrap();

        assert_eq!(shipment.status, ShipmentStatus::Requested);
        assert_eq!(f.store.status_of(&"s-1".into()).await, Some(ShipmentStatus::Requested));
        assert_eq!(f.courier.requests().await, vec![ShipmentId::new("s-1")]);
    }

    #[tokio::test]
    async fn future_window_is_queued_without_courier_call() {
        let f = fixture_at(ten_am());

        let shipment = f.service.request(input("s-1", ten_am() + TimeDelta::hours(4))).await.unwrap();

        assert_eq!(shipment.status, ShipmentStatus::Queued);
        assert!(f.courier.requests().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_request_creates_nothing() {
        let f = fixture_at(ten_am());
        let mut bad = input("s-1", ten_am() + TimeDelta::hours(4));
        bad.routing_info.origin.lat = 91.0;

        let err = f.service.request(bad).await.unwrap_err();

        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(f.store.len().await, 0);
    }

    #[tokio::test]
    async fn failed_immediate_dispatch_is_an_internal_error() {
        let f = fixture_at(ten_am());
        f.courier.fail_for("s-1").await;

        let err = f.service.request(input("s-1", ten_am() - TimeDelta::hours(1))).await.unwrap_err();

        assert!(matches!(err, ServiceError::Collaborator(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn not_found_before_cutoff_redispatches() {
        let f = fixture_at(ten_am());
        f.service.request(input("s-1", ten_am() + TimeDelta::hours(4))).await.unwrap();

        f.service.webhook(webhook("s-1", "not_found")).await.unwrap();

        assert_eq!(f.courier.requests().await, vec![ShipmentId::new("s-1")]);
        let forwarded = f.core.notifications().await;
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].status, NotificationStatus::NotFound);
    }

    #[tokio::test]
    async fn not_found_at_cutoff_hour_is_only_forwarded() {
        let f = fixture_at(ten_am());
        f.service.request(input("s-1", ten_am() + TimeDelta::hours(4))).await.unwrap();
        f.clock.jump_to(Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap());

        f.service.webhook(webhook("s-1", "not_found")).await.unwrap();

        assert!(f.courier.requests().await.is_empty());
        assert_eq!(f.core.notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn not_found_for_unknown_shipment_fails() {
        let f = fixture_at(ten_am());

        let err = f.service.webhook(webhook("ghost", "not_found")).await.unwrap_err();

        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn shipped_completes_requested_shipment() {
        let f = fixture_at(ten_am());
        f.service.request(input("s-1", ten_am() - TimeDelta::hours(1))).await.unwrap();

        f.service.webhook(webhook("s-1", "shipped")).await.unwrap();

        assert_eq!(f.store.status_of(&"s-1".into()).await, Some(ShipmentStatus::Shipped));
    }

    #[tokio::test]
    async fn core_failure_does_not_fail_the_webhook() {
        let f = fixture_at(ten_am());
        f.service.request(input("s-1", ten_am() + TimeDelta::hours(4))).await.unwrap();
        f.core.inject_error("core down").await;

        f.service.webhook(webhook("s-1", "not_found")).await.unwrap();

        assert_eq!(f.courier.requests().await, vec![ShipmentId::new("s-1")]);
        assert!(f.core.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn failed_redispatch_is_still_forwarded_to_core() {
        let f = fixture_at(ten_am());
        f.service.request(input("s-1", ten_am() + TimeDelta::hours(4))).await.unwrap();
        f.courier.fail_for("s-1").await;

        let err = f.service.webhook(webhook("s-1", "not_found")).await.unwrap_err();

        assert!(matches!(err, ServiceError::Collaborator(_)));
        let forwarded = f.core.notifications().await;
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].status, NotificationStatus::NotFound);
    }

    #[tokio::test]
    async fn unknown_shipment_not_found_is_still_forwarded() {
        let f = fixture_at(ten_am());

        f.service.webhook(webhook("ghost", "not_found")).await.unwrap_err();

        assert_eq!(f.core.notifications().await.len(), 1);
    }

    #[test]
    fn cutoff_uses_configured_offset() {
        let policy = RedispatchPolicy {
            cutoff_hour: 23,
            utc_offset: FixedOffset::east_opt(2 * 3600).unwrap(),
        };

        // 21:30 UTC is 23:30 at +02:00.
        assert!(!policy.allows(Utc.with_ymd_and_hms(2026, 3, 2, 21, 30, 0).unwrap()));
        assert!(policy.allows(Utc.with_ymd_and_hms(2026, 3, 2, 20, 59, 0).unwrap()));
    }
}
