//! Status webhooks from the simulator back to the delivery service.

use async_trait::async_trait;
use tracing::instrument;
use waybill_core::StatusNotification;
use waybill_engine::{Result, WebhookClient};

/// Receiver of courier status changes.
#[async_trait]
pub trait DeliveryNotifier: Send + Sync {
    /// Sends one `{shipment_uid, status}` notification.
    async fn notify(&self, notification: &StatusNotification) -> Result<()>;
}

/// Notifier posting to the delivery `/webhook` endpoint with bounded
/// retries.
#[derive(Debug, Clone)]
pub struct HttpDeliveryNotifier {
    client: WebhookClient,
    url: String,
}

impl HttpDeliveryNotifier {
    /// Creates a notifier posting to `url`.
    pub fn new(client: WebhookClient, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl DeliveryNotifier for HttpDeliveryNotifier {
    #[instrument(
        name = "notify_delivery",
        skip_all,
        fields(shipment_uid = %notification.shipment_uid, status = %notification.status)
    )]
    async fn notify(&self, notification: &StatusNotification) -> Result<()> {
        self.client.post_json_with_retry(&self.url, notification).await.map(|_| ())
    }
}

pub mod mock {
    //! Recording notifier for tests.

    use std::{collections::HashSet, sync::Arc};

    use async_trait::async_trait;
    use tokio::sync::RwLock;
    use waybill_core::{NotificationStatus, ShipmentId, StatusNotification};
    use waybill_engine::{EngineError, Result};

    use super::DeliveryNotifier;

    /// Delivery double that records every notification it accepts.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingDeliveryNotifier {
        received: Arc<RwLock<Vec<StatusNotification>>>,
        rejecting: Arc<RwLock<HashSet<ShipmentId>>>,
    }

    impl RecordingDeliveryNotifier {
        /// Creates a double accepting every notification.
        pub fn new() -> Self {
            Self::default()
        }

        /// Rejects notifications for `uid` with a 500.
        pub async fn reject_for(&self, uid: impl Into<ShipmentId>) {
            self.rejecting.write().await.insert(uid.into());
        }

        /// Accepted notifications, in arrival order.
        pub async fn received(&self) -> Vec<StatusNotification> {
            self.received.read().await.clone()
        }

        /// Statuses accepted for `uid`, in arrival order.
        pub async fn statuses_for(&self, uid: &str) -> Vec<NotificationStatus> {
            self.received
                .read()
                .await
                .iter()
                .filter(|n| n.shipment_uid.as_str() == uid)
                .map(|n| n.status)
                .collect()
        }
    }

    #[async_trait]
    impl DeliveryNotifier for RecordingDeliveryNotifier {
        async fn notify(&self, notification: &StatusNotification) -> Result<()> {
            if self.rejecting.read().await.contains(&notification.shipment_uid) {
                return Err(EngineError::unexpected_status(500, "rejected"));
            }
            self.received.write().await.push(notification.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use serde_json::json;
    use waybill_core::{NotificationStatus, ShipmentId, TestClock};
    use waybill_engine::{ClientConfig, EngineError, RetryPolicy};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(max_attempts: u32) -> WebhookClient {
        let retry = RetryPolicy { max_attempts, ..RetryPolicy::default() };
        WebhookClient::new(ClientConfig { retry, ..ClientConfig::default() }, Arc::new(TestClock::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn posts_snake_case_status() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/webhook"))
            .and(matchers::body_json(json!({"shipment_uid": "s-1", "status": "not_found"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = HttpDeliveryNotifier::new(client(3), format!("{}/webhook", server.uri()));
        let notification = StatusNotification::new(ShipmentId::new("s-1"), NotificationStatus::NotFound);

        notifier.notify(&notification).await.unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let notifier = HttpDeliveryNotifier::new(client(2), server.uri());
        let notification = StatusNotification::new(ShipmentId::new("s-1"), NotificationStatus::Found);

        let err = notifier.notify(&notification).await.unwrap_err();
        assert!(matches!(err, EngineError::UnexpectedStatus { status_code: 503, .. }));
    }
}
