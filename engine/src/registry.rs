//! Background task keeping a [`ClientManager`] in sync with the nodes the
//! driver can reach.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fedlink_types::NodeId;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client_manager::ClientManager;
use crate::driver::{Driver, DriverError};
use crate::proxy::DriverClientProxy;

pub struct RegistryUpdater {
    stop: watch::Sender<bool>,
    ready: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl RegistryUpdater {
    /// Start refreshing `manager` from `driver.get_node_ids()` every
    /// `refresh`. Must be called inside a tokio runtime.
    pub fn spawn(driver: Arc<dyn Driver>, manager: Arc<ClientManager>, refresh: Duration) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let (ready_tx, ready) = watch::channel(false);
        let task = tokio::spawn(refresh_loop(driver, manager, refresh, stop_rx, ready_tx));
        Self { stop, ready, task }
    }

    /// Whether a refresh pass has succeeded yet.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait for the first successful refresh pass. Returns `false` if the
    /// task ended before getting there. Keeps waiting while the driver fails.
    pub async fn ready(&self) -> bool {
        let mut ready = self.ready.clone();
        ready.wait_for(|ready| *ready).await.is_ok()
    }

    /// Stop the task and wait for it. Registered clients are removed.
    pub async fn shutdown(self) -> Result<(), DriverError> {
        self.stop.send_replace(true);
        self.task.await?;
        Ok(())
    }
}

async fn refresh_loop(
    driver: Arc<dyn Driver>,
    manager: Arc<ClientManager>,
    refresh: Duration,
    mut stop: watch::Receiver<bool>,
    ready: watch::Sender<bool>,
) {
    let mut registered: HashSet<NodeId> = HashSet::new();
    loop {
        if *stop.borrow() {
            break;
        }
        match driver.get_node_ids().await {
            Ok(node_ids) => {
                let current: HashSet<NodeId> = node_ids.into_iter().collect();
                for node_id in current.difference(&registered) {
                    let proxy = DriverClientProxy::new(Arc::clone(&driver), *node_id);
                    manager.register(Arc::new(proxy));
                }
                for node_id in registered.difference(&current) {
                    manager.unregister(*node_id);
                }
                registered = current;
                ready.send_if_modified(|ready| !std::mem::replace(ready, true));
            }
            Err(err) => tracing::warn!("failed to refresh node ids: {err}"),
        }

        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            () = tokio::time::sleep(refresh) => {}
        }
    }

    for node_id in registered {
        manager.unregister(node_id);
    }
    tracing::debug!("registry updater stopped");
}

#[cfg(test)]
mod tests {
    use fedlink_types::UserConfig;

    use super::*;
    use crate::link::LinkState;
    use crate::memory::InMemoryDriver;

    #[tokio::test]
    async fn tracks_nodes_and_cleans_up_on_shutdown() {
        let state = LinkState::new();
        let run_id = state.create_run("app", "1.0.0", "", UserConfig::new());
        let first = state.create_node();
        let mut driver = InMemoryDriver::new(state.clone());
        driver.set_run(run_id).await.unwrap();

        let manager = Arc::new(ClientManager::new());
        let updater = RegistryUpdater::spawn(
            Arc::new(driver),
            Arc::clone(&manager),
            Duration::from_millis(5),
        );
        assert!(updater.ready().await);
        assert!(updater.is_ready());
        assert_eq!(manager.node_ids(), vec![first]);

        let second = state.create_node();
        assert!(manager.wait_for(2, Duration::from_secs(5)).await);

        state.delete_node(first).unwrap();
        for _ in 0..200 {
            if manager.node_ids() == vec![second] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.node_ids(), vec![second]);

        updater.shutdown().await.unwrap();
        assert_eq!(manager.num_available(), 0);
    }

    #[tokio::test]
    async fn failing_driver_is_not_ready() {
        // Unbound driver: every `get_node_ids` fails.
        let driver = InMemoryDriver::new(LinkState::new());
        let manager = Arc::new(ClientManager::new());
        let updater = RegistryUpdater::spawn(
            Arc::new(driver),
            Arc::clone(&manager),
            Duration::from_millis(5),
        );
        let waited = tokio::time::timeout(Duration::from_millis(50), updater.ready()).await;
        assert!(waited.is_err());
        assert!(!updater.is_ready());
        assert_eq!(manager.num_available(), 0);
        updater.shutdown().await.unwrap();
    }
}
