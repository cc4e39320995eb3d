//! Push feed connection with exponential-backoff reconnect
//!
//! The reconnect rules live in [`ReconnectMachine`], a plain value with no IO.
//! [`ConnectionManager`] drives it from a spawned socket task and reports every
//! transition as a [`ConnectionEvent`].

use chat_common::sanitizer::redact;
use futures_util::StreamExt;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

/// Connectivity as seen by the rest of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    BackingOff,
}

/// `delay = min(base_delay * 2^attempt, max_delay)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// What to do after the connection is lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Wait `delay`, then reconnect
    Retry { attempt: u32, delay: Duration },
    /// Retry budget exhausted
    GiveUp { attempts: u32 },
    /// `disconnect()` was requested; do nothing
    Stopped,
}

/// Reconnect state machine
///
/// ```text
/// disconnected --connect--> connecting --open--> connected
/// connected|connecting --lost--> backing-off --timer--> connecting
/// any --disconnect--> disconnected (no further retries)
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: BackoffPolicy,
    state: ConnectionState,
    attempt: u32,
    stopped: bool,
}

impl ReconnectMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempt: 0,
            stopped: true,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Failed attempts since the last successful open
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Explicit `connect()`: clears a previous stop and the attempt counter
    pub fn start(&mut self) -> ConnectionState {
        self.stopped = false;
        self.attempt = 0;
        self.state = ConnectionState::Connecting;
        self.state
    }

    /// Backoff timer elapsed
    pub fn timer_elapsed(&mut self) -> ConnectionState {
        if !self.stopped && self.state == ConnectionState::BackingOff {
            self.state = ConnectionState::Connecting;
        }
        self.state
    }

    /// Socket opened
    pub fn opened(&mut self) -> ConnectionState {
        if !self.stopped {
            self.state = ConnectionState::Connected;
            self.attempt = 0;
        }
        self.state
    }

    /// Socket closed, errored, or a connect attempt failed
    pub fn lost(&mut self) -> Transition {
        if self.stopped {
            self.state = ConnectionState::Disconnected;
            return Transition::Stopped;
        }

        if self.attempt >= self.policy.max_attempts {
            self.state = ConnectionState::Disconnected;
            self.stopped = true;
            return Transition::GiveUp {
                attempts: self.attempt,
            };
        }

        let attempt = self.attempt;
        let delay = self.policy.delay_for(attempt);
        self.attempt += 1;
        self.state = ConnectionState::BackingOff;
        Transition::Retry { attempt, delay }
    }

    /// Handshake rejected the credential; never retried
    pub fn auth_rejected(&mut self) -> ConnectionState {
        self.stopped = true;
        self.state = ConnectionState::Disconnected;
        self.state
    }

    /// Explicit `disconnect()`. Returns false if already disconnected.
    pub fn disconnect(&mut self) -> bool {
        let changed = self.state != ConnectionState::Disconnected;
        self.stopped = true;
        self.state = ConnectionState::Disconnected;
        changed
    }
}

/// Emitted by the connection task
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// One raw push payload
    Message(String),
    Status(ConnectionState),
    /// Reconnect budget exhausted; the manager is now disconnected
    GaveUp { attempts: u32 },
    /// Credential refused during the handshake
    AuthRejected(String),
}

/// Owns the single push connection
pub struct ConnectionManager {
    ws_url: String,
    machine: Arc<Mutex<ReconnectMachine>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create a manager and the receiving end of its event stream
    pub fn new(
        ws_url: impl Into<String>,
        policy: BackoffPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            ws_url: ws_url.into(),
            machine: Arc::new(Mutex::new(ReconnectMachine::new(policy))),
            events,
            task: None,
        };
        (manager, rx)
    }

    pub fn status(&self) -> ConnectionState {
        lock(&self.machine).state()
    }

    /// Open the connection. Replaces any existing connection.
    pub fn connect(&mut self, credential: &str) -> crate::Result<()> {
        let url = push_url(&self.ws_url, credential)?;

        if let Some(task) = self.task.take() {
            task.abort();
        }

        let state = lock(&self.machine).start();
        let _ = self.events.send(ConnectionEvent::Status(state));

        tracing::info!("Connecting to push feed: {}", redact(url.as_str()));

        let task = tokio::spawn(run_connection(
            url,
            credential.to_string(),
            Arc::clone(&self.machine),
            self.events.clone(),
        ));
        self.task = Some(task);
        Ok(())
    }

    /// Close the connection and cancel any pending backoff timer. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        if lock(&self.machine).disconnect() {
            tracing::info!("Push feed disconnected");
            let _ = self
                .events
                .send(ConnectionEvent::Status(ConnectionState::Disconnected));
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn lock(machine: &Mutex<ReconnectMachine>) -> std::sync::MutexGuard<'_, ReconnectMachine> {
    // the machine has no invariants a panicking holder could break
    machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Push feed URL with the credential as the `token` query parameter
pub fn push_url(ws_url: &str, credential: &str) -> crate::Result<Url> {
    let mut url = Url::parse(ws_url)
        .map_err(|e| crate::SyncError::ConfigError(anyhow::anyhow!("invalid ws_url: {}", e)))?;
    url.query_pairs_mut().append_pair("token", credential);
    Ok(url)
}

async fn run_connection(
    url: Url,
    credential: String,
    machine: Arc<Mutex<ReconnectMachine>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    loop {
        let request = match url.as_str().into_client_request() {
            Ok(mut request) => {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", credential)) {
                    request.headers_mut().insert(AUTHORIZATION, value);
                }
                request
            }
            Err(e) => {
                tracing::error!("Invalid push feed request: {}", redact(&e.to_string()));
                lock(&machine).disconnect();
                let _ = events.send(ConnectionEvent::Status(ConnectionState::Disconnected));
                return;
            }
        };

        match connect_async(request).await {
            Ok((mut stream, _)) => {
                let state = lock(&machine).opened();
                tracing::info!("Push feed connected");
                if events.send(ConnectionEvent::Status(state)).is_err() {
                    return;
                }

                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(WsMessage::Text(text)) => {
                            if events.send(ConnectionEvent::Message(text)).is_err() {
                                return;
                            }
                        }
                        Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                            Ok(text) => {
                                if events.send(ConnectionEvent::Message(text)).is_err() {
                                    return;
                                }
                            }
                            Err(_) => tracing::warn!("Dropping non-UTF-8 push frame"),
                        },
                        Ok(WsMessage::Close(frame)) => {
                            tracing::info!("Push feed closed by server: {:?}", frame);
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("Push feed error: {}", e);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                if let Some(status) = rejected_status(&e) {
                    tracing::error!("Push feed rejected credential (HTTP {})", status);
                    lock(&machine).auth_rejected();
                    let _ = events.send(ConnectionEvent::AuthRejected(format!("HTTP {}", status)));
                    let _ = events.send(ConnectionEvent::Status(ConnectionState::Disconnected));
                    return;
                }
                tracing::warn!("Push feed connect failed: {}", redact(&e.to_string()));
            }
        }

        let transition = lock(&machine).lost();
        match transition {
            Transition::Retry { attempt, delay } => {
                tracing::info!("Reconnecting in {:?} (attempt {})", delay, attempt + 1);
                if events
                    .send(ConnectionEvent::Status(ConnectionState::BackingOff))
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(delay).await;
                let state = lock(&machine).timer_elapsed();
                if state != ConnectionState::Connecting {
                    return;
                }
                let _ = events.send(ConnectionEvent::Status(state));
            }
            Transition::GiveUp { attempts } => {
                tracing::error!("Max reconnect attempts reached ({})", attempts);
                let _ = events.send(ConnectionEvent::Status(ConnectionState::Disconnected));
                let _ = events.send(ConnectionEvent::GaveUp { attempts });
                return;
            }
            Transition::Stopped => return,
        }
    }
}

fn rejected_status(error: &WsError) -> Option<StatusCode> {
    match error {
        WsError::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            Some(response.status())
        }
        _ => None,
    }
}
