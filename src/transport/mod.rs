//! Transport capability consumed by the supervisor and router.
//!
//! The messaging protocol itself lives outside this crate. A [`Transport`]
//! turns credentials into a [`Connection`]: one ordered stream of
//! [`ConnectionEvent`]s plus an [`Outbound`] handle for actions.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::credentials::Credentials;
use crate::types::{ConnectionState, ConversationId, InboundEvent, MessageKey};

/// Errors from the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// HTTP request to the bridge failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge answered with a non-success status.
    #[error("bridge rejected request ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body or envelope error.
        body: String,
    },

    /// The bridge reported success but returned no data.
    #[error("bridge returned no data for {0}")]
    EmptyResponse(&'static str),

    /// The connection is gone.
    #[error("not connected")]
    NotConnected,
}

/// One item on a connection's event stream.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Lifecycle change.
    State(ConnectionState),
    /// A QR code the operator can scan to link the device.
    Qr(String),
    /// The transport mutated its credentials; persist before relying on them.
    CredentialsUpdated(Credentials),
    /// An inbound message.
    Message(InboundEvent),
}

/// Outbound actions available while a connection is alive.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Send a text message to a conversation.
    async fn send_text(&self, conversation: &ConversationId, text: &str) -> Result<(), TransportError>;

    /// Delete a message for everyone.
    async fn delete(&self, key: &MessageKey) -> Result<(), TransportError>;

    /// Request a pairing code for linking by phone number.
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, TransportError>;
}

/// Turns credentials into a live connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection. `None` asks the transport to start a fresh link.
    async fn connect(&self, credentials: Option<Credentials>) -> Result<Connection, TransportError>;
}

/// A live connection: ordered events plus outbound actions.
///
/// Background tasks registered with [`Connection::with_task`] are aborted
/// when the connection is dropped.
pub struct Connection {
    /// Ordered event stream. Ends when the transport goes away.
    pub events: mpsc::Receiver<ConnectionEvent>,
    /// Outbound action handle.
    pub outbound: Arc<dyn Outbound>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap an event receiver and outbound handle.
    pub fn new(events: mpsc::Receiver<ConnectionEvent>, outbound: Arc<dyn Outbound>) -> Self {
        Self {
            events,
            outbound,
            tasks: Vec::new(),
        }
    }

    /// Tie a background task's lifetime to this connection.
    pub fn with_task(mut self, handle: JoinHandle<()>) -> Self {
        self.tasks.push(handle);
        self
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
