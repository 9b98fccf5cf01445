//! Outbound collaborators of the delivery service: the 3PL courier intake
//! and the core consumer of status notifications.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument};
use waybill_core::{DeliveryWindow, RoutingInfo, Shipment, ShipmentId, StatusNotification};
use waybill_engine::{Result, WebhookClient};

/// Courier intake of the third-party logistics provider.
///
/// Intake is idempotent per shipment, so a request may be repeated after a
/// failure or a `not_found` report.
#[async_trait]
pub trait ThirdPartyLogistics: Send + Sync {
    /// Asks the 3PL to find a courier for `shipment`.
    async fn request_courier(&self, shipment: &Shipment) -> Result<()>;
}

/// Consumer of every status change the delivery service learns about.
#[async_trait]
pub trait CoreNotifier: Send + Sync {
    /// Forwards one status notification.
    async fn notify(&self, notification: &StatusNotification) -> Result<()>;
}

/// Body of the 3PL intake call.
#[derive(Debug, Serialize)]
struct CourierRequestBody<'a> {
    shipment_uid: &'a ShipmentId,
    routing_info: &'a RoutingInfo,
    scheduled_delivery_window: &'a DeliveryWindow,
}

/// 3PL client posting to `{base_url}/request`.
///
/// Calls are made once; a failed dispatch leaves the shipment pending and
/// the next tick retries it.
#[derive(Debug, Clone)]
pub struct HttpThirdPartyLogistics {
    client: WebhookClient,
    request_url: String,
}

impl HttpThirdPartyLogistics {
    /// Creates a client for the 3PL at `base_url`.
    pub fn new(client: WebhookClient, base_url: &str) -> Self {
        Self { client, request_url: format!("{}/request", base_url.trim_end_matches('/')) }
    }
}

#[async_trait]
impl ThirdPartyLogistics for HttpThirdPartyLogistics {
    #[instrument(name = "request_courier", skip_all, fields(shipment_uid = %shipment.uid))]
    async fn request_courier(&self, shipment: &Shipment) -> Result<()> {
        let body = CourierRequestBody {
            shipment_uid: &shipment.uid,
            routing_info: &shipment.routing,
            scheduled_delivery_window: &shipment.window,
        };
        self.client.post_json(&self.request_url, &body).await
    }
}

/// Core notifier posting `{shipment_uid, status}` with bounded retries.
#[derive(Debug, Clone)]
pub struct HttpCoreNotifier {
    client: WebhookClient,
    url: String,
}

impl HttpCoreNotifier {
    /// Creates a notifier posting to `url`.
    pub fn new(client: WebhookClient, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl CoreNotifier for HttpCoreNotifier {
    #[instrument(
        name = "notify_core",
        skip_all,
        fields(shipment_uid = %notification.shipment_uid, status = %notification.status)
    )]
    async fn notify(&self, notification: &StatusNotification) -> Result<()> {
        self.client.post_json_with_retry(&self.url, notification).await.map(|_| ())
    }
}

/// Core notifier used when no core endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCoreNotifier;

#[async_trait]
impl CoreNotifier for LoggingCoreNotifier {
    async fn notify(&self, notification: &StatusNotification) -> Result<()> {
        info!(
            shipment_uid = %notification.shipment_uid,
            status = %notification.status,
            "core notified"
        );
        Ok(())
    }
}

pub mod mock {
    //! Recording collaborators for tests.

    use std::{collections::HashSet, sync::Arc};

    use async_trait::async_trait;
    use tokio::sync::RwLock;
    use waybill_core::{Shipment, ShipmentId, StatusNotification};
    use waybill_engine::{EngineError, Result};

    use super::{CoreNotifier, ThirdPartyLogistics};

    /// 3PL double that records every courier request.
    ///
    /// Requests for identifiers registered with
    /// [`RecordingThirdPartyLogistics::fail_for`] fail with a 503.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingThirdPartyLogistics {
        requests: Arc<RwLock<Vec<ShipmentId>>>,
        failing: Arc<RwLock<HashSet<ShipmentId>>>,
    }

    impl RecordingThirdPartyLogistics {
        /// Creates a double accepting every request.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes requests for `uid` fail until [`Self::recover`] is called.
        pub async fn fail_for(&self, uid: impl Into<ShipmentId>) {
            self.failing.write().await.insert(uid.into());
        }

        /// Accepts requests for every identifier again.
        pub async fn recover(&self) {
            self.failing.write().await.clear();
        }

        /// Identifiers of successful requests, in arrival order.
        pub async fn requests(&self) -> Vec<ShipmentId> {
            self.requests.read().await.clone()
        }
    }

    #[async_trait]
    impl ThirdPartyLogistics for RecordingThirdPartyLogistics {
        async fn request_courier(&self, shipment: &Shipment) -> Result<()> {
            if self.failing.read().await.contains(&shipment.uid) {
                return Err(EngineError::unexpected_status(503, "unavailable"));
            }
            self.requests.write().await.push(shipment.uid.clone());
            Ok(())
        }
    }

    /// Core double that records every notification.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingCoreNotifier {
        notifications: Arc<RwLock<Vec<StatusNotification>>>,
        error: Arc<RwLock<Option<String>>>,
    }

    impl RecordingCoreNotifier {
        /// Creates a double accepting every notification.
        pub fn new() -> Self {
            Self::default()
        }

        /// Fails the next notification with a network error.
        pub async fn inject_error(&self, message: impl Into<String>) {
            *self.error.write().await = Some(message.into());
        }

        /// Notifications received, in arrival order.
        pub async fn notifications(&self) -> Vec<StatusNotification> {
            self.notifications.read().await.clone()
        }
    }

    #[async_trait]
    impl CoreNotifier for RecordingCoreNotifier {
        async fn notify(&self, notification: &StatusNotification) -> Result<()> {
            if let Some(message) = self.error.write().await.take() {
                return Err(EngineError::network(message));
            }
            self.notifications.write().await.push(notification.clone());
            Ok(())
        }
    }
}
