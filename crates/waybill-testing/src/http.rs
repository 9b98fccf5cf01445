//! Recording HTTP peer built on wiremock.
//!
//! Stands in for the 3PL, the delivery webhook or the core collaborator and
//! exposes the JSON bodies it received.

use serde_json::Value;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

/// HTTP peer answering every POST with a fixed status.
pub struct MockPeer {
    server: MockServer,
}

impl MockPeer {
    /// Starts a peer answering 200 to every POST.
    pub async fn accepting() -> Self {
        Self::responding_with(200).await
    }

    /// Starts a peer answering `status` to every POST.
    pub async fn responding_with(status: u16) -> Self {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        Self { server }
    }

    /// Base URL of the peer.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Replaces the response status for subsequent requests.
    pub async fn respond_with(&self, status: u16) {
        self.server.reset().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// JSON bodies received on `path`, in arrival order.
    ///
    /// Bodies that are not valid JSON are skipped.
    pub async fn received_json(&self, path: &str) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == path)
            .filter_map(|request| serde_json::from_slice(&request.body).ok())
            .collect()
    }

    /// Number of requests received on any path.
    pub async fn request_count(&self) -> usize {
        self.server.received_requests().await.map_or(0, |requests| requests.len())
    }
}
