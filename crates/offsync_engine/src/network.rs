//! Network reachability observation.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked with the new reachability state on every transition.
pub type NetworkListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned by [`NetworkObserver::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Reports whether the remote endpoint is reachable.
///
/// Platform integrations implement this trait and are injected into the
/// coordinator. The coordinator reads [`is_online`](Self::is_online) before
/// every cycle and subscribes to transitions while its background runner is
/// active.
pub trait NetworkObserver: Send + Sync {
    /// Current reachability.
    fn is_online(&self) -> bool;

    /// Registers a listener for reachability transitions.
    fn subscribe(&self, listener: NetworkListener) -> SubscriptionId;

    /// Removes a listener. Returns false if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// A network observer driven by explicit [`set_online`](Self::set_online)
/// calls.
///
/// Listeners are notified only on transitions, outside the internal lock,
/// so a listener may call back into the monitor.
pub struct NetworkMonitor {
    online: AtomicBool,
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, NetworkListener)>>,
}

impl NetworkMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Updates reachability. Returns true if the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        tracing::info!(online, "network reachability changed");
        let listeners: Vec<NetworkListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(online);
        }
        true
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("online", &self.online.load(Ordering::SeqCst))
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl NetworkObserver for NetworkMonitor {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: NetworkListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}
