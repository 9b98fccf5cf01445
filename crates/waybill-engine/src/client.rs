//! Outbound JSON client used for webhooks and collaborator calls.
//!
//! A call succeeds only when the peer answers with exactly HTTP 200. Any
//! other status, a timeout or a connection failure is an error. Notification
//! senders wrap calls in [`WebhookClient::post_json_with_retry`], which
//! applies the configured [`RetryPolicy`] and sleeps on the injected clock.

use std::{sync::Arc, time::Duration};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};
use waybill_core::Clock;

use crate::{
    error::{EngineError, Result},
    retry::{RetryDecision, RetryPolicy},
};

const MAX_ERROR_BODY: usize = 1024;

/// Configuration for the outbound client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-request timeout. Bounds how long a worker cycle waits on a peer.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Retry policy for [`WebhookClient::post_json_with_retry`].
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: concat!("waybill/", env!("CARGO_PKG_VERSION")).to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Pooled HTTP client posting JSON payloads.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl WebhookClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| EngineError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config, clock })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Posts `body` as JSON to `url` once.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the request exceeds the configured timeout
    /// - `Network` for connection failures
    /// - `UnexpectedStatus` for any response other than 200
    pub async fn post_json<T>(&self, url: &str, body: &T) -> Result<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        let response = match self.client.post(url).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "request failed");
                if e.is_timeout() {
                    return Err(EngineError::timeout(self.config.timeout.as_secs()));
                }
                if e.is_connect() {
                    return Err(EngineError::network(format!("connection failed: {e}")));
                }
                return Err(EngineError::network(e.to_string()));
            },
        };

        let status = response.status();
        if status == StatusCode::OK {
            debug!(url, "peer accepted request");
            return Ok(());
        }

        let body = match response.text().await {
            Ok(text) => truncate(text),
            Err(e) => format!("[failed to read response body: {e}]"),
        };
        warn!(url, status = status.as_u16(), "peer rejected request");
        Err(EngineError::unexpected_status(status.as_u16(), body))
    }

    /// Posts `body` with bounded retries.
    ///
    /// Returns the number of attempts made on success.
    ///
    /// # Errors
    ///
    /// Returns the last error once the policy gives up.
    pub async fn post_json_with_retry<T>(&self, url: &str, body: &T) -> Result<u32>
    where
        T: Serialize + ?Sized + Sync,
    {
        let span = info_span!("outbound_call", url);

        async move {
            let mut attempt = 1;
            loop {
                let error = match self.post_json(url, body).await {
                    Ok(()) => return Ok(attempt),
                    Err(error) => error,
                };

                match self.config.retry.decide(attempt, &error) {
                    RetryDecision::Retry { delay } => {
                        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying");
                        self.clock.sleep(delay).await;
                        attempt += 1;
                    },
                    RetryDecision::GiveUp { reason } => {
                        warn!(attempt, %reason, error = %error, "giving up on outbound call");
                        return Err(error);
                    },
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("... (truncated)");
    }
    text
}
