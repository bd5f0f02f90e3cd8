//! Warden: a moderation agent for a WhatsApp bridge.
//!
//! Keeps one transport session alive across failures, persists its
//! credentials atomically, and routes inbound events to per-conversation
//! moderation handlers. The wire protocol lives in an external sidecar.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod logging;
pub mod types;

pub mod moderation;
pub mod router;
pub mod transport;
pub mod whatsapp;

pub mod monitor;
pub mod supervisor;
