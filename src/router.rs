//! Event router: classifies inbound messages and reacts to them.
//!
//! For each event, in order:
//! 1. Drop self-originated events and events without content
//! 2. Hand status broadcasts to their own handler; drop everything but groups
//! 3. Apply exact-match moderation commands and acknowledge them
//! 4. Stop if the conversation has anti-status-mention disabled
//! 5. Delete status mentions
//!
//! The router owns its [`ModerationState`]; nothing else mutates it.

use tracing::{debug, error, info, warn};

use crate::moderation::{Feature, ModerationState};
use crate::transport::Outbound;
use crate::types::{ConversationId, ConversationKind, InboundEvent, Payload};

/// A recognised moderation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Feature being toggled.
    pub feature: Feature,
    /// Requested state.
    pub enabled: bool,
}

/// Match `text` against the command surface.
///
/// Only an exact, case-sensitive `<prefix><feature> on|off` is a command.
/// Anything else, including `.antistatus ON` or trailing whitespace, is not.
pub fn parse_command(text: &str, prefix: &str) -> Option<Command> {
    let rest = text.strip_prefix(prefix)?;
    Feature::all().iter().find_map(|&feature| {
        let arg = rest.strip_prefix(feature.as_str())?.strip_prefix(' ')?;
        match arg {
            "on" => Some(Command {
                feature,
                enabled: true,
            }),
            "off" => Some(Command {
                feature,
                enabled: false,
            }),
            _ => None,
        }
    })
}

/// Confirmation text sent after a toggle.
pub fn acknowledgment(command: Command) -> String {
    let label = match command.feature {
        Feature::AntiStatusMention => "Anti-status mention",
    };
    let state = if command.enabled { "enabled" } else { "disabled" };
    format!("{label} {state} for this chat.")
}

/// What the router did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Sent by the agent itself; ignored.
    SelfOrigin,
    /// No message content; ignored.
    Empty,
    /// Conversation type the agent does not act on.
    Unsupported,
    /// Handled by the status broadcast handler.
    StatusBroadcast,
    /// A moderation command was applied.
    Toggled {
        /// The applied command.
        command: Command,
        /// Whether the stored flag changed.
        changed: bool,
        /// Whether the acknowledgment was delivered.
        acknowledged: bool,
    },
    /// Moderation is off for the conversation, or the event is not a mention.
    Passed,
    /// A status mention was deleted.
    Deleted,
    /// A status mention was found but the delete failed.
    DeleteFailed,
}

/// Routes inbound events against per-conversation moderation state.
#[derive(Debug)]
pub struct EventRouter {
    command_prefix: String,
    state: ModerationState,
    self_id: Option<ConversationId>,
}

impl EventRouter {
    /// Create a router with the given command prefix and state.
    pub fn new(command_prefix: impl Into<String>, state: ModerationState) -> Self {
        Self {
            command_prefix: command_prefix.into(),
            state,
            self_id: None,
        }
    }

    /// Record the agent's own account id, learnt when a connection opens.
    pub fn set_self_id(&mut self, me: Option<ConversationId>) {
        self.self_id = me;
    }

    /// Current moderation state.
    pub fn state(&self) -> &ModerationState {
        &self.state
    }

    fn is_self_origin(&self, event: &InboundEvent) -> bool {
        if event.key.from_me {
            return true;
        }
        self.self_id
            .as_ref()
            .is_some_and(|me| me.user() == event.sender.user())
    }

    /// Handle one event to completion, including any outbound action.
    ///
    /// Outbound failures are logged and reported in the outcome; they never
    /// propagate.
    pub async fn handle(&mut self, event: &InboundEvent, outbound: &dyn Outbound) -> RouteOutcome {
        if self.is_self_origin(event) {
            return RouteOutcome::SelfOrigin;
        }
        if event.payload == Payload::Empty {
            return RouteOutcome::Empty;
        }

        let conversation = event.conversation();
        match conversation.kind() {
            ConversationKind::StatusBroadcast => return self.handle_status(event),
            ConversationKind::Group => {}
            ConversationKind::Direct | ConversationKind::Other => {
                debug!(conversation = %conversation, "ignoring unsupported conversation");
                return RouteOutcome::Unsupported;
            }
        }

        if let Some(command) = event
            .text()
            .and_then(|text| parse_command(text, &self.command_prefix))
        {
            return self.apply_command(conversation, command, outbound).await;
        }

        if !self
            .state
            .is_enabled(conversation, Feature::AntiStatusMention)
        {
            return RouteOutcome::Passed;
        }

        if !is_status_mention(&event.payload) {
            return RouteOutcome::Passed;
        }

        match outbound.delete(&event.key).await {
            Ok(()) => {
                info!(
                    conversation = %conversation,
                    sender = %event.sender,
                    id = %event.key.id,
                    "status mention deleted"
                );
                RouteOutcome::Deleted
            }
            Err(e) => {
                warn!(conversation = %conversation, id = %event.key.id, error = %e, "failed to delete status mention");
                RouteOutcome::DeleteFailed
            }
        }
    }

    fn handle_status(&self, event: &InboundEvent) -> RouteOutcome {
        debug!(
            sender = %event.sender,
            name = event.push_name.as_deref().unwrap_or_default(),
            "status update observed"
        );
        RouteOutcome::StatusBroadcast
    }

    async fn apply_command(
        &mut self,
        conversation: &ConversationId,
        command: Command,
        outbound: &dyn Outbound,
    ) -> RouteOutcome {
        let changed = self
            .state
            .set_flag(conversation, command.feature, command.enabled);
        info!(
            conversation = %conversation,
            feature = %command.feature,
            enabled = command.enabled,
            changed,
            "moderation flag set"
        );

        if changed {
            if let Err(e) = self.state.persist().await {
                error!(error = %e, "failed to persist moderation flags");
            }
        }

        let acknowledged = match outbound
            .send_text(conversation, &acknowledgment(command))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "failed to send acknowledgment");
                false
            }
        };

        RouteOutcome::Toggled {
            command,
            changed,
            acknowledged,
        }
    }
}

/// Whether a payload counts as a status mention.
///
/// Any protocol message qualifies, as does a reaction aimed at the status
/// broadcast. This is a transport heuristic and also matches protocol
/// messages that are not status mentions.
pub fn is_status_mention(payload: &Payload) -> bool {
    match payload {
        Payload::Protocol => true,
        Payload::Reaction { target } => target.is_status_broadcast(),
        _ => false,
    }
}
