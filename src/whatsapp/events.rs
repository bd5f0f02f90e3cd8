//! Event listener for the sidecar's `/events/poll` long-polling endpoint.
//!
//! Decodes bridge events into [`ConnectionEvent`]s and forwards them, in
//! order, over an mpsc channel. The listener does not reconnect on its own:
//! a broken stream is reported as a transient closure and the supervisor
//! decides what happens next.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::credentials::Credentials;
use crate::transport::ConnectionEvent;
use crate::types::{
    ConnectionState, ConversationId, DisconnectReason, InboundEvent, MessageKey, Payload,
};

/// Delay after a non-200 poll response before polling again.
const NON_OK_RETRY_SECS: u64 = 5;

/// Connection phase as the bridge names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Authenticated and online.
    Open,
    /// Connection ended.
    Close,
}

/// A raw event from the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Connection lifecycle update.
    Connection {
        /// New phase.
        state: BridgeConnectionState,
        /// Own account id, sent with `open`.
        #[serde(default)]
        me: Option<ConversationId>,
        /// Close status code, sent with `close`.
        #[serde(default)]
        status_code: Option<u16>,
        /// Close reason, sent with `close`.
        #[serde(default)]
        reason: Option<String>,
    },
    /// A QR code for device linking.
    Qr {
        /// QR payload.
        code: String,
    },
    /// Updated credentials to persist.
    Creds {
        /// Full credential record.
        credentials: Credentials,
    },
    /// A message upsert.
    Message {
        /// Message key.
        key: MessageKey,
        /// Sender display name.
        #[serde(default)]
        push_name: Option<String>,
        /// Raw message object.
        #[serde(default)]
        message: Option<Value>,
    },
}

impl From<BridgeEvent> for ConnectionEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Connection {
                state,
                me,
                status_code,
                reason,
            } => ConnectionEvent::State(match state {
                BridgeConnectionState::Connecting => ConnectionState::Connecting,
                BridgeConnectionState::Open => ConnectionState::Open { me },
                BridgeConnectionState::Close => ConnectionState::Closed(
                    DisconnectReason::from_close(status_code, reason.as_deref()),
                ),
            }),
            BridgeEvent::Qr { code } => ConnectionEvent::Qr(code),
            BridgeEvent::Creds { credentials } => ConnectionEvent::CredentialsUpdated(credentials),
            BridgeEvent::Message {
                key,
                push_name,
                message,
            } => {
                let sender = key
                    .participant
                    .clone()
                    .unwrap_or_else(|| key.remote_jid.clone());
                ConnectionEvent::Message(InboundEvent {
                    payload: decode_payload(message.as_ref()),
                    key,
                    sender,
                    push_name,
                })
            }
        }
    }
}

/// Decode a raw message object into a [`Payload`].
///
/// An `ephemeralMessage` wrapper is unwrapped first.
pub fn decode_payload(message: Option<&Value>) -> Payload {
    let Some(mut msg) = message else {
        return Payload::Empty;
    };
    if let Some(inner) = msg.pointer("/ephemeralMessage/message") {
        msg = inner;
    }

    match msg.as_object() {
        Some(fields) if !fields.is_empty() => {}
        _ => return Payload::Empty,
    }

    if let Some(text) = msg.get("conversation").and_then(Value::as_str) {
        return Payload::Text(text.to_owned());
    }
    if let Some(text) = msg.pointer("/extendedTextMessage/text").and_then(Value::as_str) {
        return Payload::Text(text.to_owned());
    }
    if msg.get("protocolMessage").is_some() {
        return Payload::Protocol;
    }
    if let Some(target) = msg
        .pointer("/reactionMessage/key/remoteJid")
        .and_then(Value::as_str)
    {
        return Payload::Reaction {
            target: ConversationId::new(target),
        };
    }
    Payload::Other
}

/// Decode one poll response, element by element.
///
/// An element that does not decode is logged and skipped; the rest of the
/// batch is still delivered, in order.
pub fn decode_batch(batch: Vec<Value>) -> Vec<ConnectionEvent> {
    batch
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<BridgeEvent>(raw) {
            Ok(event) => {
                debug!(?event, "received bridge event");
                Some(event.into())
            }
            Err(e) => {
                warn!(error = %e, "skipping undecodable bridge event");
                None
            }
        })
        .collect()
}

/// Spawn the long-poll listener for one connection.
///
/// Returns immediately. The task ends when the receiver is dropped or the
/// stream fails; on failure it emits a transient `Closed` state first.
pub fn spawn_event_listener(
    base_url: String,
    poll_timeout: Duration,
    event_tx: mpsc::Sender<ConnectionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_url = format!("{base_url}/events/poll");
        info!(url = %poll_url, "connecting to bridge event stream");

        match poll_events(&poll_url, poll_timeout, &event_tx).await {
            Ok(()) => info!("bridge event stream closed"),
            Err(e) => {
                warn!(error = %e, "bridge event stream failed");
                let closed = ConnectionEvent::State(ConnectionState::Closed(
                    DisconnectReason::Transient {
                        status_code: None,
                        message: format!("event stream error: {e}"),
                    },
                ));
                let _ = event_tx.send(closed).await;
            }
        }
    })
}

/// Poll the sidecar in a loop. Returns `Err` on non-timeout network errors.
async fn poll_events(
    poll_url: &str,
    poll_timeout: Duration,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<(), reqwest::Error> {
    let client = reqwest::Client::builder().timeout(poll_timeout).build()?;

    loop {
        match client.get(poll_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let batch = match resp.json::<Vec<Value>>().await {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!(error = %e, "dropping bridge response that is not an event array");
                        continue;
                    }
                };
                for event in decode_batch(batch) {
                    if event_tx.send(event).await.is_err() {
                        // Receiver dropped: connection is over.
                        return Ok(());
                    }
                }
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(Duration::from_secs(NON_OK_RETRY_SECS)).await;
            }
            Err(e) if e.is_timeout() => {
                // Long-poll window expired with nothing to report.
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}
