//! Shared fakes for integration tests: a recording outbound handle and a
//! scripted transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use warden::credentials::{CredentialError, CredentialStore, Credentials};
use warden::transport::{Connection, ConnectionEvent, Outbound, Transport, TransportError};
use warden::types::{
    ConnectionState, ConversationId, DisconnectReason, InboundEvent, MessageKey, Payload,
};

// ── Outbound ──

/// Records every outbound call. Individual actions can be made to fail.
#[derive(Default)]
pub struct FakeOutbound {
    sent: Mutex<Vec<(ConversationId, String)>>,
    deleted: Mutex<Vec<MessageKey>>,
    pairing_requests: Mutex<Vec<String>>,
    fail_sends: bool,
    fail_deletes: bool,
}

impl FakeOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_sends() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(ConversationId, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn deleted(&self) -> Vec<MessageKey> {
        self.deleted.lock().expect("deleted lock").clone()
    }

    pub fn pairing_requests(&self) -> Vec<String> {
        self.pairing_requests.lock().expect("pairing lock").clone()
    }

    pub fn action_count(&self) -> usize {
        self.sent().len() + self.deleted().len()
    }
}

fn rejected() -> TransportError {
    TransportError::Rejected {
        status: 500,
        body: "simulated failure".to_owned(),
    }
}

#[async_trait]
impl Outbound for FakeOutbound {
    async fn send_text(&self, conversation: &ConversationId, text: &str) -> Result<(), TransportError> {
        self.sent
            .lock()
            .expect("sent lock")
            .push((conversation.clone(), text.to_owned()));
        if self.fail_sends {
            return Err(rejected());
        }
        Ok(())
    }

    async fn delete(&self, key: &MessageKey) -> Result<(), TransportError> {
        self.deleted.lock().expect("deleted lock").push(key.clone());
        if self.fail_deletes {
            return Err(rejected());
        }
        Ok(())
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, TransportError> {
        self.pairing_requests
            .lock()
            .expect("pairing lock")
            .push(phone_number.to_owned());
        Ok("ABCD-EFGH".to_owned())
    }
}

// ── Transport ──

/// One scripted step on a fake connection.
pub enum Step {
    Emit(ConnectionEvent),
    Wait(Duration),
}

/// Scripted behaviour of one `connect` call.
pub enum Session {
    /// `connect` fails.
    Refuse,
    /// `connect` succeeds and the connection plays these steps, then ends.
    Run(Vec<Step>),
}

impl Session {
    /// A session that opens and then closes with `reason`.
    pub fn closing(reason: DisconnectReason) -> Self {
        Self::Run(vec![
            Step::Emit(ConnectionEvent::State(ConnectionState::Open { me: None })),
            Step::Emit(closed(reason)),
        ])
    }
}

/// Transport that plays back scripted sessions in order.
///
/// Once the script runs out every further connection is logged out, so a
/// misbehaving supervisor cannot loop forever.
pub struct FakeTransport {
    script: Mutex<VecDeque<Session>>,
    presented: Mutex<Vec<Option<Credentials>>>,
    outbound: Arc<FakeOutbound>,
}

impl FakeTransport {
    pub fn new(script: Vec<Session>) -> Self {
        Self::with_outbound(script, Arc::new(FakeOutbound::new()))
    }

    pub fn with_outbound(script: Vec<Session>, outbound: Arc<FakeOutbound>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            presented: Mutex::new(Vec::new()),
            outbound,
        }
    }

    /// Number of `connect` calls so far.
    pub fn connects(&self) -> usize {
        self.presented.lock().expect("presented lock").len()
    }

    /// Credentials handed to each `connect` call, in order.
    pub fn presented(&self) -> Vec<Option<Credentials>> {
        self.presented.lock().expect("presented lock").clone()
    }

    pub fn outbound(&self) -> Arc<FakeOutbound> {
        Arc::clone(&self.outbound)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, credentials: Option<Credentials>) -> Result<Connection, TransportError> {
        self.presented
            .lock()
            .expect("presented lock")
            .push(credentials);
        let session = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Session::closing(DisconnectReason::LoggedOut));

        let steps = match session {
            Session::Refuse => return Err(TransportError::NotConnected),
            Session::Run(steps) => steps,
        };

        let (tx, rx) = mpsc::channel(64);
        let player = tokio::spawn(async move {
            for step in steps {
                match step {
                    Step::Emit(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Step::Wait(delay) => tokio::time::sleep(delay).await,
                }
            }
        });

        let outbound: Arc<dyn Outbound> = self.outbound.clone();
        Ok(Connection::new(rx, outbound).with_task(player))
    }
}

// ── Credential store ──

/// Store that loads a fixed record and rejects every save.
pub struct ReadOnlyStore {
    record: Mutex<Option<Credentials>>,
    failed_saves: Mutex<usize>,
}

impl ReadOnlyStore {
    pub fn new(record: Credentials) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            failed_saves: Mutex::new(0),
        }
    }

    pub fn failed_saves(&self) -> usize {
        *self.failed_saves.lock().expect("saves lock")
    }
}

#[async_trait]
impl CredentialStore for ReadOnlyStore {
    async fn load(&self) -> Result<Credentials, CredentialError> {
        self.record
            .lock()
            .expect("record lock")
            .clone()
            .ok_or_else(|| CredentialError::NotFound("memory".into()))
    }

    async fn save(&self, _credentials: &Credentials) -> Result<(), CredentialError> {
        *self.failed_saves.lock().expect("saves lock") += 1;
        Err(CredentialError::Io {
            path: "memory/creds.json".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        *self.record.lock().expect("record lock") = None;
        Ok(())
    }
}

// ── Event builders ──

pub fn closed(reason: DisconnectReason) -> ConnectionEvent {
    ConnectionEvent::State(ConnectionState::Closed(reason))
}

pub fn transient(message: &str) -> DisconnectReason {
    DisconnectReason::Transient {
        status_code: Some(428),
        message: message.to_owned(),
    }
}

pub fn event(conversation: &str, sender: &str, id: &str, payload: Payload) -> InboundEvent {
    let remote_jid = ConversationId::new(conversation);
    let sender = ConversationId::new(sender);
    let participant = remote_jid.is_group().then(|| sender.clone());
    InboundEvent {
        key: MessageKey {
            remote_jid,
            id: id.to_owned(),
            from_me: false,
            participant,
        },
        sender,
        push_name: Some("Tester".to_owned()),
        payload,
    }
}

pub fn text(conversation: &str, sender: &str, id: &str, body: &str) -> InboundEvent {
    event(conversation, sender, id, Payload::Text(body.to_owned()))
}

pub fn protocol(conversation: &str, sender: &str, id: &str) -> InboundEvent {
    event(conversation, sender, id, Payload::Protocol)
}

pub fn status_reaction(conversation: &str, sender: &str, id: &str) -> InboundEvent {
    event(
        conversation,
        sender,
        id,
        Payload::Reaction {
            target: ConversationId::status_broadcast(),
        },
    )
}
