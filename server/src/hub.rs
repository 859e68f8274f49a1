use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pixel_system::{ServerEvent, SessionId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::session_registry::{SessionRegistry, SessionTx};

#[derive(Debug)]
pub enum HubCommand {
    Register { session_id: SessionId, tx: SessionTx },
    Unregister { session_id: SessionId },
    Broadcast { frame: String },
    Query { tx: oneshot::Sender<Vec<SessionId>> },
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub control loop has stopped")]
    Stopped,
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Message-passing handle to the control loop. The registry itself is only
/// ever touched by the loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    session_id_source: Arc<AtomicU64>,
}

impl HubHandle {
    pub fn next_session_id(&self) -> SessionId {
        self.session_id_source.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.tx.send(command).map_err(|_| HubError::Stopped)
    }

    pub fn register(&self, session_id: SessionId, tx: SessionTx) -> Result<(), HubError> {
        self.send(HubCommand::Register { session_id, tx })
    }

    pub fn unregister(&self, session_id: SessionId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister { session_id })
    }

    pub fn broadcast(&self, event: &ServerEvent) -> Result<(), HubError> {
        let frame = event.encode()?;
        self.send(HubCommand::Broadcast { frame })
    }

    /// Ids of the sessions registered once every earlier command has been processed.
    pub async fn sessions(&self) -> Result<Vec<SessionId>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Query { tx })?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    pub async fn online_count(&self) -> Result<usize, HubError> {
        self.sessions().await.map(|ids| ids.len())
    }
}

struct Hub {
    sessions: SessionRegistry,
}

impl Hub {
    fn new() -> Self {
        Self {
            sessions: SessionRegistry::new(),
        }
    }

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { session_id, tx } => self.register(session_id, tx),
            HubCommand::Unregister { session_id } => {
                if self.sessions.remove(&session_id).is_some() {
                    log::info!(
                        "Session {} disconnected. Total sessions: {}",
                        session_id,
                        self.sessions.len()
                    );
                    self.broadcast_online_count();
                }
            }
            HubCommand::Broadcast { frame } => self.broadcast(&frame),
            HubCommand::Query { tx } => {
                let _ = tx.send(self.sessions.ids());
            }
        }
    }

    fn register(&mut self, session_id: SessionId, tx: SessionTx) {
        if !self.sessions.insert(session_id, tx) {
            log::warn!("Session {} is already registered", session_id);
            return;
        }
        log::info!(
            "Session {} connected. Total sessions: {}",
            session_id,
            self.sessions.len()
        );

        match ServerEvent::welcome().encode() {
            Ok(frame) => {
                if let Err(err) = self.sessions.try_send_to(&session_id, frame) {
                    log::warn!("Could not welcome session {}: {}", session_id, err);
                }
            }
            Err(err) => log::error!("Failed to encode welcome: {}", err),
        }

        self.broadcast_online_count();
    }

    fn broadcast(&mut self, frame: &str) {
        let evicted = self.sessions.broadcast(frame);
        for session_id in &evicted {
            log::warn!(
                "Session {} is not keeping up, dropped it. Total sessions: {}",
                session_id,
                self.sessions.len()
            );
        }
        // each round evicts at least one session, so this terminates
        if !evicted.is_empty() {
            self.broadcast_online_count();
        }
    }

    fn broadcast_online_count(&mut self) {
        let event = ServerEvent::OnlineCount {
            count: self.sessions.len(),
        };
        match event.encode() {
            Ok(frame) => self.broadcast(&frame),
            Err(err) => log::error!("Failed to encode online count: {}", err),
        }
    }
}

/// Starts the control loop on the current runtime. It stops once every
/// handle has been dropped.
pub fn spawn_hub() -> HubHandle {
    let (hub_tx, mut hub_rx) = mpsc::unbounded_channel::<HubCommand>();

    tokio::spawn(async move {
        log::info!("hub started");
        let mut hub = Hub::new();
        while let Some(command) = hub_rx.recv().await {
            hub.handle_command(command);
        }
        log::info!("hub stopped");
    });

    HubHandle {
        tx: hub_tx,
        session_id_source: Arc::new(AtomicU64::new(0)),
    }
}
