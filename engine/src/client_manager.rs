use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fedlink_types::NodeId;
use tokio::sync::watch;

use crate::proxy::ClientProxy;

/// Registry of reachable participants.
pub struct ClientManager {
    clients: Mutex<BTreeMap<NodeId, Arc<dyn ClientProxy>>>,
    available: watch::Sender<usize>,
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(BTreeMap::new()),
            available: watch::Sender::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<NodeId, Arc<dyn ClientProxy>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` if a proxy for the same node is already registered.
    pub fn register(&self, proxy: Arc<dyn ClientProxy>) -> bool {
        let mut clients = self.lock();
        let node_id = proxy.node_id();
        if clients.contains_key(&node_id) {
            return false;
        }
        clients.insert(node_id, proxy);
        self.available.send_replace(clients.len());
        tracing::debug!(node_id = %node_id, "client registered");
        true
    }

    pub fn unregister(&self, node_id: NodeId) -> bool {
        let mut clients = self.lock();
        let removed = clients.remove(&node_id).is_some();
        if removed {
            self.available.send_replace(clients.len());
            tracing::debug!(node_id = %node_id, "client unregistered");
        }
        removed
    }

    #[must_use]
    pub fn num_available(&self) -> usize {
        self.lock().len()
    }

    /// Registered proxies ordered by node id.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn ClientProxy>> {
        self.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.lock().keys().copied().collect()
    }

    /// Wait until at least `num_clients` are registered. Returns `false` if
    /// `timeout` elapses first.
    pub async fn wait_for(&self, num_clients: usize, timeout: Duration) -> bool {
        let mut available = self.available.subscribe();
        let reached = available.wait_for(|count| *count >= num_clients);
        matches!(tokio::time::timeout(timeout, reached).await, Ok(Ok(_)))
    }
}
