//! WhatsApp transport: HTTP bridge client and event listener.
//!
//! Talks to a baileys-based sidecar over HTTP (default port 3001) and
//! long-polls for connection, credential and message events. The sidecar
//! owns the wire protocol and encryption.

pub mod client;
pub mod events;

pub use client::{BridgeClient, BridgeTransport};
pub use events::{decode_batch, decode_payload, BridgeEvent};
