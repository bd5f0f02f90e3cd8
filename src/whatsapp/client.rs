//! HTTP client for the WhatsApp protocol sidecar.
//!
//! Every outbound action goes through [`BridgeClient`]; [`BridgeTransport`]
//! opens sessions and attaches the long-poll event listener.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::spawn_event_listener;
use crate::config::BridgeConfig;
use crate::credentials::Credentials;
use crate::transport::{Connection, Outbound, Transport, TransportError};
use crate::types::{ConversationId, MessageKey};

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Buffered events between the listener and the supervisor.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Response envelope from the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[allow(dead_code)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Client for the sidecar's HTTP API.
pub struct BridgeClient {
    client: reqwest::Client,
    base_url: String,
}

impl BridgeClient {
    /// Create a client for `base_url` with the given request timeout.
    pub fn new(base_url: String, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self { client, base_url }
    }

    /// Returns the base URL of the sidecar.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body and unwrap the response envelope.
    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<Option<T>, TransportError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: BridgeResponse<T> = resp.json().await?;
        if let Some(error) = envelope.error {
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body: error,
            });
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl Outbound for BridgeClient {
    async fn send_text(&self, conversation: &ConversationId, text: &str) -> Result<(), TransportError> {
        let body = serde_json::json!({ "jid": conversation, "text": text });
        self.post::<serde_json::Value>("/send", body).await?;
        debug!(conversation = %conversation, "message sent via bridge");
        Ok(())
    }

    async fn delete(&self, key: &MessageKey) -> Result<(), TransportError> {
        let body = serde_json::json!({ "key": key });
        self.post::<serde_json::Value>("/delete", body).await?;
        debug!(conversation = %key.remote_jid, id = %key.id, "message deleted via bridge");
        Ok(())
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, TransportError> {
        let body = serde_json::json!({ "phone_number": phone_number });
        self.post::<String>("/pairing-code", body)
            .await?
            .ok_or(TransportError::EmptyResponse("pairing-code"))
    }
}

/// [`Transport`] backed by the HTTP sidecar.
pub struct BridgeTransport {
    client: Arc<BridgeClient>,
    poll_timeout: Duration,
}

impl BridgeTransport {
    /// Build a transport from bridge configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            client: Arc::new(BridgeClient::new(
                config.base_url.clone(),
                Duration::from_secs(config.request_timeout_secs),
            )),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(&self, credentials: Option<Credentials>) -> Result<Connection, TransportError> {
        let fresh = credentials.is_none();
        let body = serde_json::json!({ "credentials": credentials });
        self.client.post::<serde_json::Value>("/connect", body).await?;
        info!(base_url = %self.client.base_url(), fresh, "bridge session requested");

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let listener = spawn_event_listener(
            self.client.base_url().to_owned(),
            self.poll_timeout,
            event_tx,
        );

        let outbound: Arc<dyn Outbound> = self.client.clone();
        Ok(Connection::new(event_rx, outbound).with_task(listener))
    }
}
