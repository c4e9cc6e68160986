use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use super::{ConnectionStatus, SessionId, StreamHandle, StreamOptions};

/// Process-wide table of open streaming connections, keyed by session id.
///
/// Holds at most one connection per session.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<HashMap<SessionId, StreamHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a new session and registers it.
    pub async fn open(&self, options: StreamOptions) -> anyhow::Result<StreamHandle> {
        let handle = StreamHandle::connect(options).await?;
        self.register(handle.clone())?;
        Ok(handle)
    }

    /// Registers an existing connection.
    ///
    /// Fails if a live connection is already registered for the same session.
    pub fn register(&self, handle: StreamHandle) -> anyhow::Result<()> {
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(&handle.id()) {
            if !existing.is_closed() {
                anyhow::bail!("session {} already has a connection", handle.id());
            }
        }
        log::debug!("registered connection for session {}", handle.id());
        connections.insert(handle.id(), handle);
        Ok(())
    }

    pub fn get(&self, id: SessionId) -> Option<StreamHandle> {
        self.connections.lock().get(&id).cloned()
    }

    /// Closes and unregisters the connection of session `id`.
    ///
    /// Returns whether a connection was registered.
    pub async fn close(&self, id: SessionId) -> bool {
        let handle = self.connections.lock().remove(&id);
        match handle {
            Some(handle) => {
                handle.close().await;
                true
            }
            None => false,
        }
    }

    /// Unregisters every disconnected session. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|_, handle| {
            !handle.is_closed()
                && !matches!(handle.state().connection, ConnectionStatus::Disconnected(_))
        });
        before - connections.len()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}
