use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::channel::{ChannelHandle, ConnectionId};
use crate::peer_state::PeerState;

/// Owns the [`PeerState`] of every live control channel.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, Arc<PeerState>>>>,
    auth_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(auth_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            auth_timeout,
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        self.auth_timeout
    }

    /// Registers a channel and arms its authentication deadline. Registering a
    /// channel twice keeps the existing entry.
    pub async fn register(&self, channel: ChannelHandle) -> Arc<PeerState> {
        let mut peers = self.inner.write().await;
        if let Some(existing) = peers.get(&channel.id()) {
            warn!(connection_id = %channel.id(), "channel already registered; reusing entry");
            return existing.clone();
        }
        let id = channel.id();
        let state = PeerState::new(channel, self.auth_timeout);
        peers.insert(id, state.clone());
        debug!(connection_id = %id, live = peers.len(), "registered control channel");
        state
    }

    pub async fn lookup(&self, id: ConnectionId) -> Option<Arc<PeerState>> {
        self.inner.read().await.get(&id).cloned()
    }

    /// Removes the entry and releases its timer and peer connection.
    pub async fn unregister(&self, id: ConnectionId) {
        let removed = self.inner.write().await.remove(&id);
        match removed {
            Some(state) => {
                state.shutdown().await;
                debug!(connection_id = %id, "unregistered control channel");
            }
            None => debug!(connection_id = %id, "unregister for unknown channel ignored"),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Tears down every live connection; used on server shutdown.
    pub async fn clear(&self) {
        let drained: Vec<_> = self.inner.write().await.drain().collect();
        for (_, state) in drained {
            state.shutdown().await;
        }
    }
}
