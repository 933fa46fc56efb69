use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use tmux_bridge::{Geometry, PtyHandle};

pub type ConnectionId = Uuid;

/// The live PTY a connection is streaming.
pub struct Binding {
    pub handle: Arc<PtyHandle>,
    pub session: String,
    /// Geometry the PTY was opened with
    pub geometry: Geometry,
}

/// Connection id → binding, at most one entry per connection.
///
/// Entries are added once attach succeeds and removed when the PTY exits or
/// the socket closes, so every handle here belongs to a running process.
#[derive(Default)]
pub struct ConnectionRegistry {
    bindings: Mutex<HashMap<ConnectionId, Binding>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `id`, returning any binding it replaced.
    pub async fn insert(&self, id: ConnectionId, binding: Binding) -> Option<Binding> {
        self.bindings.lock().await.insert(id, binding)
    }

    pub async fn remove(&self, id: &ConnectionId) -> Option<Binding> {
        self.bindings.lock().await.remove(id)
    }

    /// Handle for routing an inbound frame; `None` once the binding is gone.
    pub async fn handle(&self, id: &ConnectionId) -> Option<Arc<PtyHandle>> {
        self.bindings
            .lock()
            .await
            .get(id)
            .map(|binding| binding.handle.clone())
    }

    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.bindings.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.bindings.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bindings.lock().await.is_empty()
    }

    /// Remove every binding, for shutdown.
    pub async fn drain(&self) -> Vec<Binding> {
        self.bindings
            .lock()
            .await
            .drain()
            .map(|(_, binding)| binding)
            .collect()
    }

    /// Number of live connections streaming `session`.
    pub async fn viewers(&self, session: &str) -> usize {
        self.bindings
            .lock()
            .await
            .values()
            .filter(|binding| binding.session == session)
            .count()
    }
}
