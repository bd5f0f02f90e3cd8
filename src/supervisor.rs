//! Session supervisor: bootstrap, run, and reconnect the transport session.
//!
//! ```text
//! Bootstrapping ──connect ok──▶ Connected ──Closed(transient)──▶ Reconnecting
//!      ▲                            │                                 │
//!      └──────── fixed backoff ─────┼─────────────────────────────────┘
//!                                   └──Closed(terminal)──▶ Terminated
//! ```
//!
//! Retries are an explicit loop with no attempt limit. Each attempt starts
//! from the persisted credentials and nothing else.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::credentials::{seed_session_id, CredentialError, CredentialStore, Credentials};
use crate::router::EventRouter;
use crate::transport::{ConnectionEvent, Outbound, Transport, TransportError};
use crate::types::{ConnectionState, DisconnectReason};

/// How the operator chose to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginMethod {
    /// Link a new device for a phone number.
    Phone {
        /// Digits only, including country code.
        number: String,
        /// Request a pairing code instead of waiting for a QR scan.
        pairing_code: bool,
    },
    /// Seed the store from a session id.
    SessionId(String),
    /// Use whatever the store already holds.
    Existing,
}

impl LoginMethod {
    /// Phone login with the number normalised by [`normalize_phone`].
    pub fn phone(raw: &str, default_country_code: &str, pairing_code: bool) -> Self {
        Self::Phone {
            number: normalize_phone(raw, default_country_code),
            pairing_code,
        }
    }
}

/// Strip a phone number to digits and add the country code to bare 10-digit numbers.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 10 && !digits.starts_with(default_country_code) {
        format!("{default_country_code}{digits}")
    } else {
        digits
    }
}

/// Timing and naming knobs for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Name used in log lines.
    pub bot_name: String,
    /// Delay before each reconnect.
    pub reconnect_backoff: Duration,
    /// Delay before giving up on an irrecoverable setup error.
    pub setup_failure_delay: Duration,
    /// Delay between connecting and requesting a pairing code.
    pub pairing_code_delay: Duration,
    /// Prefix applied to seeded session ids.
    pub session_id_prefix: String,
}

impl SupervisorSettings {
    /// Build settings from config.
    pub fn from_config(bot_name: &str, session: &SessionConfig) -> Self {
        Self {
            bot_name: bot_name.to_owned(),
            reconnect_backoff: session.reconnect_backoff(),
            setup_failure_delay: session.setup_failure_delay(),
            pairing_code_delay: session.pairing_code_delay(),
            session_id_prefix: session.session_id_prefix.clone(),
        }
    }
}

/// Why the supervisor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The server ended the session; credentials were purged.
    ReauthRequired(DisconnectReason),
    /// Setup could not proceed.
    SetupFailed(String),
}

/// Errors inside one connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The credential store failed.
    #[error("credential store: {0}")]
    Credentials(#[from] CredentialError),

    /// The transport refused the connection.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// Nothing to connect with and no way to link a new device.
    #[error("no stored session; log in by phone number or session id")]
    NoCredentials,
}

/// Drives the session state machine and feeds events to the router.
pub struct SessionSupervisor {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    router: EventRouter,
    login: LoginMethod,
    settings: SupervisorSettings,
    attempts: u64,
}

impl SessionSupervisor {
    /// Wire a supervisor from its collaborators.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        router: EventRouter,
        login: LoginMethod,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            transport,
            store,
            router,
            login,
            settings,
            attempts: 0,
        }
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// The router, with its moderation state.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Run until the session is terminated.
    ///
    /// Transient failures of any kind are retried after the fixed backoff.
    pub async fn run(&mut self) -> SupervisorExit {
        if let LoginMethod::SessionId(raw) = &self.login {
            if let Err(e) =
                seed_session_id(self.store.as_ref(), raw, &self.settings.session_id_prefix).await
            {
                error!(error = %e, "failed to seed session id");
                return self.fail_setup(e.to_string()).await;
            }
            info!("session id stored");
        }

        loop {
            self.attempts = self.attempts.saturating_add(1);
            info!(attempt = self.attempts, "bootstrapping session");

            match self.run_session().await {
                Ok(reason) if reason.is_terminal() => {
                    warn!(%reason, "session rejected by server, clearing credentials");
                    if let Err(e) = self.store.clear().await {
                        error!(error = %e, "failed to clear credentials");
                    }
                    error!("session cleared; re-authenticate to continue");
                    return SupervisorExit::ReauthRequired(reason);
                }
                Ok(reason) => {
                    warn!(
                        %reason,
                        backoff_secs = self.settings.reconnect_backoff.as_secs(),
                        "connection closed, reconnecting"
                    );
                }
                Err(SupervisorError::NoCredentials) => {
                    error!("no stored session and no login method to create one");
                    return self
                        .fail_setup(SupervisorError::NoCredentials.to_string())
                        .await;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs = self.settings.reconnect_backoff.as_secs(),
                        "failed to establish connection, retrying"
                    );
                }
            }

            tokio::time::sleep(self.settings.reconnect_backoff).await;
        }
    }

    async fn fail_setup(&self, message: String) -> SupervisorExit {
        tokio::time::sleep(self.settings.setup_failure_delay).await;
        SupervisorExit::SetupFailed(message)
    }

    async fn bootstrap_credentials(&self) -> Result<Option<Credentials>, SupervisorError> {
        match self.store.load().await {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) if e.is_not_found() => match self.login {
                LoginMethod::Existing => Err(SupervisorError::NoCredentials),
                _ => Ok(None),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// One connection attempt, from bootstrap to closure.
    async fn run_session(&mut self) -> Result<DisconnectReason, SupervisorError> {
        let credentials = self.bootstrap_credentials().await?;
        let fresh = credentials.is_none();

        let mut connection = self.transport.connect(credentials).await?;
        let outbound = Arc::clone(&connection.outbound);
        if let Some(task) = self.schedule_pairing(fresh, &outbound) {
            connection = connection.with_task(task);
        }

        while let Some(event) = connection.events.recv().await {
            match event {
                ConnectionEvent::State(ConnectionState::Connecting) => {
                    info!("connecting");
                }
                ConnectionEvent::State(ConnectionState::Open { me }) => {
                    info!(bot = %self.settings.bot_name, me = ?me, "connected");
                    self.router.set_self_id(me);
                }
                ConnectionEvent::State(ConnectionState::Closed(reason)) => return Ok(reason),
                ConnectionEvent::Qr(_) => {
                    info!("scan the QR code with WhatsApp to link this device");
                }
                ConnectionEvent::CredentialsUpdated(credentials) => {
                    self.persist(&credentials).await;
                }
                ConnectionEvent::Message(event) => {
                    let outcome = self.router.handle(&event, outbound.as_ref()).await;
                    debug!(
                        conversation = %event.conversation(),
                        id = %event.key.id,
                        ?outcome,
                        "event routed"
                    );
                }
            }
        }

        Ok(DisconnectReason::Transient {
            status_code: None,
            message: "event stream ended".to_owned(),
        })
    }

    async fn persist(&self, credentials: &Credentials) {
        match self.store.save(credentials).await {
            Ok(()) => debug!("credential update committed"),
            Err(e) => error!(
                error = %e,
                "failed to persist credential update; session may not survive a restart"
            ),
        }
    }

    /// Request a pairing code shortly after connecting a fresh phone login.
    fn schedule_pairing(&self, fresh: bool, outbound: &Arc<dyn Outbound>) -> Option<JoinHandle<()>> {
        let LoginMethod::Phone {
            number,
            pairing_code: true,
        } = &self.login
        else {
            return None;
        };
        if !fresh {
            return None;
        }

        let number = number.clone();
        let outbound = Arc::clone(outbound);
        let delay = self.settings.pairing_code_delay;
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match outbound.request_pairing_code(&number).await {
                Ok(code) => info!(%code, "pairing code issued; enter it under Linked Devices"),
                Err(e) => warn!(error = %e, "failed to request pairing code"),
            }
        }))
    }
}
