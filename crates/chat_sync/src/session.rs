//! Per-login driver
//!
//! A [`Session`] owns one [`ConnectionManager`] and one [`SyncEngine`] and is
//! the only task that mutates engine state. Push events, timer ticks and user
//! commands are serialized through a single `tokio::select!` loop.

use crate::api::ChatApi;
use crate::config::SyncConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::engine::SyncEngine;
use crate::{Result, SyncError};
use chat_common::{ConversationId, ConversationKind};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// User actions delivered to a running session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Select(Option<ConversationId>),
    MarkRead(ConversationId),
    Send {
        conversation: ConversationId,
        content: String,
    },
    Open {
        kind: ConversationKind,
        peer_id: String,
        display_name: Option<String>,
    },
    SetPinned {
        conversation: ConversationId,
        pinned: bool,
    },
    Delete(ConversationId),
    /// Catch-up pull outside the timer
    Pull,
    Logout,
}

/// Why [`Session::run_until`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The shutdown future completed
    Shutdown,
    LoggedOut,
    /// Credential refused; re-authentication required
    AuthRejected(String),
    /// The push feed exhausted its reconnect budget
    GaveUp { attempts: u32 },
    ChannelClosed,
}

/// Cloneable sender for [`SessionCommand`]s
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Queue a command. Returns false once the session is gone.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn logout(&self) -> bool {
        self.send(SessionCommand::Logout)
    }
}

pub struct Session<A: ChatApi> {
    config: SyncConfig,
    engine: SyncEngine<A>,
    connection: ConnectionManager,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    commands_tx: mpsc::UnboundedSender<SessionCommand>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl<A: ChatApi> Session<A> {
    /// Validate `config` and build the engine and connection manager
    pub fn new(config: SyncConfig, api: A) -> Result<Self> {
        config.validate()?;

        let engine = SyncEngine::new(&config, api);
        let (connection, events) =
            ConnectionManager::new(config.ws_url.clone(), config.reconnect.clone());
        let (commands_tx, commands) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            engine,
            connection,
            events,
            commands_tx,
            commands,
        })
    }

    pub fn engine(&self) -> &SyncEngine<A> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SyncEngine<A> {
        &mut self.engine
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands: self.commands_tx.clone(),
        }
    }

    /// Restore durable state and open the push connection
    pub fn start(&mut self, credential: &str) -> Result<()> {
        self.engine.restore();
        self.connection.connect(credential)
    }

    /// Run the event loop until `shutdown` completes or a terminal condition
    /// ends the session
    pub async fn run_until<F>(&mut self, shutdown: F) -> SessionEnd
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut pull_timer = interval_at(
            Instant::now() + self.config.pull_interval,
            self.config.pull_interval,
        );
        pull_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut save_timer = interval_at(
            Instant::now() + self.config.snapshot_interval,
            self.config.snapshot_interval,
        );
        save_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                _ = &mut shutdown => break SessionEnd::Shutdown,

                event = self.events.recv() => match event {
                    Some(event) => {
                        if let Some(end) = self.on_event(event).await {
                            break end;
                        }
                    }
                    None => break SessionEnd::ChannelClosed,
                },

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(end) = self.on_command(command).await {
                            break end;
                        }
                    }
                    None => break SessionEnd::ChannelClosed,
                },

                _ = pull_timer.tick() => {
                    if let Some(end) = self.pull_now().await {
                        break end;
                    }
                }

                _ = save_timer.tick() => self.persist(),
            }
        };

        match &end {
            SessionEnd::LoggedOut => {}
            SessionEnd::AuthRejected(reason) => {
                tracing::error!("Session ended: credential rejected ({})", reason);
                self.connection.disconnect();
                self.engine.abort_reports().await;
                self.persist();
            }
            SessionEnd::GaveUp { attempts } => {
                tracing::error!("Session ended: push feed gave up after {} attempts", attempts);
                self.connection.disconnect();
                self.engine.abort_reports().await;
                self.persist();
            }
            SessionEnd::Shutdown | SessionEnd::ChannelClosed => {
                tracing::info!("Session shutting down");
                self.connection.disconnect();
                self.engine.flush_reports().await;
                self.persist();
            }
        }
        end
    }

    /// Disconnect without reconnection and drop in-memory state
    pub fn logout(&mut self) {
        self.connection.disconnect();
        self.engine.logout();
        while self.events.try_recv().is_ok() {}
    }

    fn persist(&mut self) {
        if let Err(e) = self.engine.persist() {
            tracing::warn!("Failed to persist sync state: {}", e);
        }
    }

    async fn pull_now(&mut self) -> Option<SessionEnd> {
        match self.engine.pull(self.config.pull_limit).await {
            Ok(_) => None,
            Err(e) => terminal(e, "Pull"),
        }
    }

    async fn on_event(&mut self, event: ConnectionEvent) -> Option<SessionEnd> {
        match event {
            ConnectionEvent::Message(payload) => {
                if let Err(e) = self.engine.handle_push(&payload) {
                    tracing::warn!("Dropping push event: {}", e);
                }
                None
            }
            ConnectionEvent::Status(state) => {
                self.engine.observe_status(state);
                if state == ConnectionState::Connected {
                    return self.pull_now().await;
                }
                None
            }
            ConnectionEvent::GaveUp { attempts } => Some(SessionEnd::GaveUp { attempts }),
            ConnectionEvent::AuthRejected(reason) => Some(SessionEnd::AuthRejected(reason)),
        }
    }

    async fn on_command(&mut self, command: SessionCommand) -> Option<SessionEnd> {
        let result = match command {
            SessionCommand::Select(id) => {
                self.engine.select_conversation(id);
                Ok(())
            }
            SessionCommand::MarkRead(id) => self.engine.mark_read(&id).await.map(|_| ()),
            SessionCommand::Send {
                conversation,
                content,
            } => self
                .engine
                .send_message(&conversation, &content)
                .await
                .map(|_| ()),
            SessionCommand::Open {
                kind,
                peer_id,
                display_name,
            } => self
                .engine
                .open_conversation(kind, &peer_id, display_name.as_deref(), None)
                .await
                .map(|_| ()),
            SessionCommand::SetPinned {
                conversation,
                pinned,
            } => self.engine.set_pinned(&conversation, pinned).await,
            SessionCommand::Delete(id) => self.engine.delete_conversation(&id).await,
            SessionCommand::Pull => return self.pull_now().await,
            SessionCommand::Logout => {
                self.logout();
                return Some(SessionEnd::LoggedOut);
            }
        };

        result.err().and_then(|e| terminal(e, "Command"))
    }
}

/// Auth failures end the session; everything else is logged and the state
/// stays as it was
fn terminal(error: SyncError, what: &str) -> Option<SessionEnd> {
    if error.is_auth() {
        Some(SessionEnd::AuthRejected(error.to_string()))
    } else {
        tracing::warn!("{} failed: {}", what, error);
        None
    }
}
