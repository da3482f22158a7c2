//! Connectivity tracking.
//!
//! The monitor is fed by the runtime's online/offline signal through
//! [`ConnectivityMonitor::set_online`]; it never probes the remote store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;

/// An edge in the online signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

impl Transition {
    pub const fn is_online(self) -> bool {
        matches!(self, Self::WentOnline)
    }
}

type Callback = Arc<dyn Fn(Transition) + Send + Sync>;

struct Inner {
    state: watch::Sender<bool>,
    callbacks: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl Inner {
    fn detach(&self, id: u64) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }
}

/// Single source of truth for "is the remote store reachable".
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            inner: Arc::new(Inner {
                state,
                callbacks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn current(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Feed the runtime signal. Returns the transition, if the value changed.
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return None;
        }

        let transition = if online {
            Transition::WentOnline
        } else {
            Transition::WentOffline
        };
        tracing::info!("Connectivity changed: {transition:?}");

        let callbacks: Vec<Callback> = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(transition);
        }
        Some(transition)
    }

    /// Watch receiver for async consumers
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    /// Register a transition callback; it stays attached while the returned
    /// [`Subscription`] is alive.
    pub fn on_change(&self, callback: impl Fn(Transition) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }
}

/// Handle returned by [`ConnectivityMonitor::on_change`]
#[must_use = "dropping the subscription detaches the callback"]
pub struct Subscription {
    id: u64,
    monitor: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner.detach(self.id);
        }
    }
}
