//! Behaviour inside one connection: logins, credential updates and routing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use warden::credentials::{Credentials, FileCredentialStore};
use warden::moderation::{Feature, ModerationState};
use warden::router::EventRouter;
use warden::supervisor::{LoginMethod, SessionSupervisor};
use warden::transport::ConnectionEvent;
use warden::types::{ConnectionState, ConversationId, DisconnectReason};

use crate::reconnect_test::{seeded_store, settings, supervisor};
use crate::support::{
    closed, protocol, text, transient, FakeTransport, ReadOnlyStore, Session, Step,
};

const G1: &str = "120363001@g.us";
const ALICE: &str = "4479001@s.whatsapp.net";
const ME: &str = "4479999@s.whatsapp.net";

fn phone_login() -> LoginMethod {
    LoginMethod::phone("+91 98765 43210", "91", true)
}

fn rotated() -> Credentials {
    let mut material = BTreeMap::new();
    material.insert("me".to_owned(), json!({ "id": ME }));
    material.insert("registered".to_owned(), json!(true));
    Credentials {
        session_id: None,
        material,
    }
}

#[tokio::test(start_paused = true)]
async fn credential_updates_are_presented_on_reconnect() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileCredentialStore::new(tmp.path().join("session")));
    let transport = Arc::new(FakeTransport::new(vec![
        Session::Run(vec![
            Step::Emit(ConnectionEvent::Qr("2@abc".to_owned())),
            Step::Emit(ConnectionEvent::CredentialsUpdated(rotated())),
            Step::Emit(closed(transient("restart required"))),
        ]),
        Session::closing(DisconnectReason::LoggedOut),
    ]));
    let mut supervisor = supervisor(&transport, &store, LoginMethod::phone("9876543210", "91", false));

    supervisor.run().await;

    assert_eq!(transport.presented(), vec![None, Some(rotated())]);
}

#[tokio::test(start_paused = true)]
async fn pairing_code_is_requested_for_fresh_phone_login() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileCredentialStore::new(tmp.path().join("session")));
    let transport = Arc::new(FakeTransport::new(vec![Session::Run(vec![
        Step::Emit(ConnectionEvent::State(ConnectionState::Connecting)),
        Step::Wait(Duration::from_secs(4)),
        Step::Emit(closed(DisconnectReason::LoggedOut)),
    ])]));
    let mut supervisor = supervisor(&transport, &store, phone_login());

    supervisor.run().await;

    assert_eq!(
        transport.outbound().pairing_requests(),
        vec!["919876543210".to_owned()]
    );
}

#[tokio::test(start_paused = true)]
async fn pairing_code_is_skipped_when_already_linked() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = seeded_store(&tmp).await;
    let transport = Arc::new(FakeTransport::new(vec![Session::Run(vec![
        Step::Wait(Duration::from_secs(4)),
        Step::Emit(closed(DisconnectReason::LoggedOut)),
    ])]));
    let mut supervisor = supervisor(&transport, &store, phone_login());

    supervisor.run().await;

    assert!(transport.outbound().pairing_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pairing_request_dies_with_its_connection() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileCredentialStore::new(tmp.path().join("session")));
    let transport = Arc::new(FakeTransport::new(vec![Session::Run(vec![Step::Emit(
        closed(DisconnectReason::LoggedOut),
    )])]));
    let mut supervisor = supervisor(&transport, &store, phone_login());

    supervisor.run().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(transport.outbound().pairing_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn session_id_login_seeds_the_store() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileCredentialStore::new(tmp.path().join("session")));
    let transport = Arc::new(FakeTransport::new(vec![Session::closing(
        DisconnectReason::Unauthorized,
    )]));
    let mut supervisor = supervisor(&transport, &store, LoginMethod::SessionId("abc".to_owned()));

    supervisor.run().await;

    assert_eq!(
        transport.presented(),
        vec![Some(Credentials::from_session_id("WARDEN:~abc".to_owned()))]
    );
}

#[tokio::test(start_paused = true)]
async fn messages_flow_through_the_router() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = seeded_store(&tmp).await;
    let transport = Arc::new(FakeTransport::new(vec![Session::Run(vec![
        Step::Emit(ConnectionEvent::State(ConnectionState::Open {
            me: Some(ConversationId::new(ME)),
        })),
        Step::Emit(ConnectionEvent::Message(text(G1, ALICE, "m1", ".antistatus on"))),
        Step::Emit(ConnectionEvent::Message(protocol(G1, ALICE, "m2"))),
        Step::Emit(ConnectionEvent::Message(protocol(G1, ME, "m3"))),
        Step::Emit(closed(DisconnectReason::LoggedOut)),
    ])]));
    let mut supervisor = supervisor(&transport, &store, LoginMethod::Existing);

    supervisor.run().await;

    let outbound = transport.outbound();
    assert_eq!(outbound.sent().len(), 1);
    let deleted: Vec<_> = outbound.deleted().into_iter().map(|key| key.id).collect();
    assert_eq!(deleted, vec!["m2".to_owned()]);
    assert!(supervisor
        .router()
        .state()
        .is_enabled(&ConversationId::new(G1), Feature::AntiStatusMention));
}

#[tokio::test(start_paused = true)]
async fn moderation_state_survives_reconnects() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = seeded_store(&tmp).await;
    let transport = Arc::new(FakeTransport::new(vec![
        Session::Run(vec![
            Step::Emit(ConnectionEvent::Message(text(G1, ALICE, "m1", ".antistatus on"))),
            Step::Emit(closed(transient("connection lost"))),
        ]),
        Session::Run(vec![
            Step::Emit(ConnectionEvent::Message(protocol(G1, ALICE, "m2"))),
            Step::Emit(closed(DisconnectReason::LoggedOut)),
        ]),
    ]));
    let mut supervisor = supervisor(&transport, &store, LoginMethod::Existing);

    supervisor.run().await;

    assert_eq!(transport.outbound().deleted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_credential_save_keeps_the_session_running() {
    let seed = Credentials::from_session_id("WARDEN:~seed".to_owned());
    let store = Arc::new(ReadOnlyStore::new(seed.clone()));
    let transport = Arc::new(FakeTransport::new(vec![
        Session::Run(vec![
            Step::Emit(ConnectionEvent::CredentialsUpdated(rotated())),
            Step::Emit(ConnectionEvent::Message(text(G1, ALICE, "m1", ".antistatus on"))),
            Step::Emit(closed(transient("restart required"))),
        ]),
        Session::closing(DisconnectReason::LoggedOut),
    ]));
    let mut supervisor = SessionSupervisor::new(
        transport.clone(),
        store.clone(),
        EventRouter::new(".", ModerationState::new()),
        LoginMethod::Existing,
        settings(),
    );

    supervisor.run().await;

    assert_eq!(store.failed_saves(), 1);
    assert_eq!(
        transport.outbound().sent().len(),
        1,
        "command after the failed save is acknowledged"
    );
    assert_eq!(transport.connects(), 2);
    assert_eq!(transport.presented()[1], Some(seed), "reconnect uses the last stored record");
}
