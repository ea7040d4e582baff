//! Realtime connection state machine.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::apply::EventApplier;
use super::backoff::Backoff;
use super::event;
use super::transport::{Connection, Transport};
use crate::auth::CredentialProvider;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::state::SyncSignals;

const COMMAND_CAPACITY: usize = 64;

/// Why the channel is not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    NotStarted,
    Unauthenticated,
    Closed,
    MaxReconnectExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected(DisconnectReason),
    Connecting,
    Connected,
    /// Waiting `delay` before reconnect attempt number `attempt`
    Reconnecting { attempt: u32, delay: Duration },
}

impl ChannelState {
    /// No further connection attempts will be made without `initialize`.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

/// Connection and retry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub url: String,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl ChannelOptions {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let url = config
            .resolved_realtime_url()
            .ok_or_else(|| Error::Config("realtime_url is not configured".to_string()))?;
        Ok(Self {
            url,
            reconnect_base_delay: config.reconnect_base_delay(),
            max_reconnect_attempts: config.max_reconnect_attempts,
        })
    }
}

enum Command {
    Send(String),
    Close,
}

struct Session {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Persistent push connection that applies server events locally.
pub struct RealtimeChannel {
    options: ChannelOptions,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    applier: EventApplier,
    signals: SyncSignals,
    state: Arc<watch::Sender<ChannelState>>,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("url", &self.options.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RealtimeChannel {
    pub fn new(
        options: ChannelOptions,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        applier: EventApplier,
        signals: SyncSignals,
    ) -> Self {
        Self {
            options,
            transport,
            credentials,
            applier,
            signals,
            state: Arc::new(watch::channel(ChannelState::Disconnected(DisconnectReason::NotStarted)).0),
            session: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Start (or restart) the session.
    ///
    /// Fails immediately with `NotAuthenticated` when no credential is
    /// available; that failure is not retried.
    pub async fn initialize(&self) -> Result<()> {
        let Some(token) = self.credentials.access_token() else {
            self.stop_session().await;
            tracing::warn!("Realtime channel not started: no credential available");
            self.state
                .send_replace(ChannelState::Disconnected(DisconnectReason::Unauthenticated));
            return Err(Error::NotAuthenticated);
        };

        self.stop_session().await;
        self.state.send_replace(ChannelState::Connecting);

        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let runner = SessionRunner {
            url: self.options.url.clone(),
            transport: Arc::clone(&self.transport),
            credentials: Arc::clone(&self.credentials),
            applier: self.applier.clone(),
            signals: self.signals.clone(),
            state: Arc::clone(&self.state),
            backoff: Backoff::new(
                self.options.reconnect_base_delay,
                self.options.max_reconnect_attempts,
            ),
        };
        let task = tokio::spawn(runner.run(token, receiver));
        *self.session.lock().await = Some(Session { commands, task });
        Ok(())
    }

    /// Send an event to the server. Dropped with a logged error unless
    /// connected.
    pub async fn send(&self, event_type: &str, data: &Value) {
        if self.state() != ChannelState::Connected {
            tracing::error!("Realtime channel not connected; dropping {}", event_type);
            return;
        }
        let text = match event::encode(event_type, data) {
            Ok(text) => text,
            Err(error) => {
                tracing::error!("Could not encode {}: {}", event_type, error);
                return;
            }
        };
        let session = self.session.lock().await;
        let Some(session) = session.as_ref() else {
            tracing::error!("Realtime channel has no session; dropping {}", event_type);
            return;
        };
        if session.commands.send(Command::Send(text)).await.is_err() {
            tracing::error!("Realtime session ended; dropping {}", event_type);
        }
    }

    /// Stop the session; the channel ends `Disconnected(Closed)`.
    pub async fn close(&self) {
        self.stop_session().await;
        self.state
            .send_replace(ChannelState::Disconnected(DisconnectReason::Closed));
        tracing::info!("Realtime channel closed");
    }

    async fn stop_session(&self) {
        let session = self.session.lock().await.take();
        let Some(session) = session else {
            return;
        };
        // The runner may already have stopped on its own.
        let _ = session.commands.send(Command::Close).await;
        if let Err(error) = session.task.await {
            tracing::warn!("Realtime session task failed: {}", error);
        }
    }
}

enum SessionEnd {
    Lost,
    Closed,
}

enum Step {
    Inbound(Option<Result<String>>),
    Command(Option<Command>),
}

struct SessionRunner {
    url: String,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    applier: EventApplier,
    signals: SyncSignals,
    state: Arc<watch::Sender<ChannelState>>,
    backoff: Backoff,
}

impl SessionRunner {
    fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    async fn run(mut self, mut token: String, mut commands: mpsc::Receiver<Command>) {
        loop {
            self.set_state(ChannelState::Connecting);
            let end = match self.transport.connect(&self.url, &token).await {
                Ok(connection) => {
                    self.backoff.reset();
                    self.set_state(ChannelState::Connected);
                    self.signals.touch_last_sync();
                    tracing::info!("Realtime channel connected");
                    self.session(connection, &mut commands).await
                }
                Err(error) => {
                    tracing::warn!("Realtime connect failed: {}", error);
                    SessionEnd::Lost
                }
            };
            if matches!(end, SessionEnd::Closed) {
                self.set_state(ChannelState::Disconnected(DisconnectReason::Closed));
                return;
            }

            let Some(delay) = self.backoff.next_delay() else {
                tracing::error!(
                    "{}",
                    Error::MaxReconnectExceeded {
                        attempts: self.backoff.max_attempts()
                    }
                );
                self.set_state(ChannelState::Disconnected(
                    DisconnectReason::MaxReconnectExceeded,
                ));
                return;
            };
            let attempt = self.backoff.attempts();
            tracing::info!(
                "Reconnecting realtime channel in {:?} (attempt {}/{})",
                delay,
                attempt,
                self.backoff.max_attempts()
            );
            self.set_state(ChannelState::Reconnecting { attempt, delay });
            if !wait_unless_closed(delay, &mut commands).await {
                self.set_state(ChannelState::Disconnected(DisconnectReason::Closed));
                return;
            }

            match self.credentials.access_token() {
                Some(fresh) => token = fresh,
                None => {
                    tracing::warn!("Realtime credential revoked; not reconnecting");
                    self.set_state(ChannelState::Disconnected(
                        DisconnectReason::Unauthenticated,
                    ));
                    return;
                }
            }
        }
    }

    async fn session(
        &self,
        mut connection: Box<dyn Connection>,
        commands: &mut mpsc::Receiver<Command>,
    ) -> SessionEnd {
        loop {
            let step = tokio::select! {
                inbound = connection.recv() => Step::Inbound(inbound),
                command = commands.recv() => Step::Command(command),
            };
            match step {
                Step::Inbound(Some(Ok(text))) => self.applier.handle_message(&text).await,
                Step::Inbound(Some(Err(error))) => {
                    tracing::warn!("Realtime transport error: {}", error);
                    return SessionEnd::Lost;
                }
                Step::Inbound(None) => {
                    tracing::info!("Realtime server closed the connection");
                    return SessionEnd::Lost;
                }
                Step::Command(Some(Command::Send(text))) => {
                    if let Err(error) = connection.send(text).await {
                        tracing::warn!("Realtime send failed: {}", error);
                        return SessionEnd::Lost;
                    }
                }
                Step::Command(Some(Command::Close) | None) => {
                    connection.close().await;
                    return SessionEnd::Closed;
                }
            }
        }
    }
}

/// Sleep for `delay`; returns `false` if a close arrived first.
async fn wait_unless_closed(delay: Duration, commands: &mut mpsc::Receiver<Command>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            command = commands.recv() => match command {
                Some(Command::Send(_)) => {
                    tracing::error!("Realtime channel not connected; dropping outbound event");
                }
                Some(Command::Close) | None => return false,
            },
        }
    }
}
