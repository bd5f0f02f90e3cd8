//! Core domain types shared by the supervisor, router and transport.
//!
//! Conversation identifiers follow WhatsApp JID conventions: groups end in
//! `@g.us`, direct chats in `@s.whatsapp.net`, and status updates arrive on
//! the `status@broadcast` pseudo-conversation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// JID of the status broadcast pseudo-conversation.
pub const STATUS_BROADCAST_JID: &str = "status@broadcast";

/// Suffix carried by group conversation ids.
const GROUP_SUFFIX: &str = "@g.us";

/// Suffix carried by one-to-one conversation ids.
const DIRECT_SUFFIX: &str = "@s.whatsapp.net";

/// Opaque conversation identifier (a WhatsApp JID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

/// Coarse conversation category derived from the id suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    /// One-to-one chat.
    Direct,
    /// Group chat.
    Group,
    /// The status broadcast pseudo-conversation.
    StatusBroadcast,
    /// Anything else (broadcast lists, newsletters, unknown servers).
    Other,
}

impl ConversationId {
    /// Wrap a raw JID.
    pub fn new(jid: impl Into<String>) -> Self {
        Self(jid.into())
    }

    /// The status broadcast pseudo-conversation.
    pub fn status_broadcast() -> Self {
        Self(STATUS_BROADCAST_JID.to_owned())
    }

    /// Raw JID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classify the conversation by its id.
    pub fn kind(&self) -> ConversationKind {
        if self.0 == STATUS_BROADCAST_JID {
            ConversationKind::StatusBroadcast
        } else if self.0.ends_with(GROUP_SUFFIX) {
            ConversationKind::Group
        } else if self.0.ends_with(DIRECT_SUFFIX) {
            ConversationKind::Direct
        } else {
            ConversationKind::Other
        }
    }

    /// Returns `true` for group conversations.
    pub fn is_group(&self) -> bool {
        self.kind() == ConversationKind::Group
    }

    /// Returns `true` for the status broadcast pseudo-conversation.
    pub fn is_status_broadcast(&self) -> bool {
        self.kind() == ConversationKind::StatusBroadcast
    }

    /// The user part of the JID with any `:device` suffix removed.
    ///
    /// `"1234:7@s.whatsapp.net"` and `"1234@s.whatsapp.net"` both yield `"1234"`.
    pub fn user(&self) -> &str {
        let local = self.0.split('@').next().unwrap_or_default();
        local.split(':').next().unwrap_or_default()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifying key of a single message, as the transport reports it.
///
/// Passed back verbatim to the transport for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKey {
    /// Conversation the message belongs to.
    #[serde(rename = "remoteJid")]
    pub remote_jid: ConversationId,
    /// Transport-assigned message id.
    pub id: String,
    /// Whether the agent's own account sent the message.
    #[serde(rename = "fromMe", default)]
    pub from_me: bool,
    /// Sender inside a group conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<ConversationId>,
}

/// Decoded message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Plain or extended text.
    Text(String),
    /// Transport-level protocol/system message (revokes, ephemeral settings, ...).
    Protocol,
    /// A reaction to another message.
    Reaction {
        /// Conversation that holds the message reacted to.
        target: ConversationId,
    },
    /// Media or any other content type the router does not inspect.
    Other,
    /// The event carried no message content at all.
    Empty,
}

/// A single inbound message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Key identifying the message; `key.remote_jid` is the origin conversation.
    pub key: MessageKey,
    /// Sender identity (participant in groups, the chat itself otherwise).
    pub sender: ConversationId,
    /// Display name the sender advertised, if any.
    pub push_name: Option<String>,
    /// Decoded content.
    pub payload: Payload,
}

impl InboundEvent {
    /// Origin conversation.
    pub fn conversation(&self) -> &ConversationId {
        &self.key.remote_jid
    }

    /// Text content, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The linked device was logged out from the phone.
    LoggedOut,
    /// The server rejected the credentials.
    Unauthorized,
    /// Any other closure; retryable.
    Transient {
        /// Transport status code, if reported.
        status_code: Option<u16>,
        /// Human-readable detail.
        message: String,
    },
}

/// Status code the transport reports when the session was logged out.
pub const LOGGED_OUT_STATUS: u16 = 401;

impl DisconnectReason {
    /// Map a transport close report onto a reason.
    ///
    /// Status 401 and the reasons `logged_out` / `unauthorized` are terminal.
    pub fn from_close(status_code: Option<u16>, reason: Option<&str>) -> Self {
        match (status_code, reason) {
            (_, Some("logged_out")) => Self::LoggedOut,
            (_, Some("unauthorized")) => Self::Unauthorized,
            (Some(LOGGED_OUT_STATUS), _) => Self::LoggedOut,
            (status_code, reason) => Self::Transient {
                status_code,
                message: reason.unwrap_or("connection closed").to_owned(),
            },
        }
    }

    /// Returns `true` when reconnecting with the same credentials is pointless.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::Unauthorized)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::Transient {
                status_code: Some(code),
                message,
            } => write!(f, "{message} (status {code})"),
            Self::Transient {
                status_code: None,
                message,
            } => f.write_str(message),
        }
    }
}

/// Connection lifecycle as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Connected and authenticated.
    Open {
        /// The agent's own account id, when the transport reports it.
        me: Option<ConversationId>,
    },
    /// Connection ended.
    Closed(DisconnectReason),
}
