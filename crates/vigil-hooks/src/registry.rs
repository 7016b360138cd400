//! Observer registry: manages subscriptions and dispatches events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use vigil_types::{AgentLifecycleEvent, SessionLoaded, TranscriptUpdate};

use crate::events::{HookEvent, JobEvent};

/// Synchronous listener invoked for every published event.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Listener<E>)>>,
}

impl<E> Registry<E> {
    fn remove(&self, id: u64) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|(lid, _)| *lid != id);
    }
}

/// Fire-and-forget fan-out to every current subscriber, in registration order.
///
/// Publishing never blocks on a listener beyond the listener's own body; a
/// listener that needs to do async work spawns it.
pub struct EventBus<E> {
    inner: Arc<Registry<E>>,
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is unsubscribed or dropped.
    #[must_use = "dropping the subscription removes the listener"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));

        let registry: Weak<Registry<E>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(id);
                }
            })),
        }
    }

    /// Deliver an event to all current listeners.
    pub fn publish(&self, event: &E) {
        // Snapshot so listeners may (un)subscribe while being called.
        let listeners: Vec<Listener<E>> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventBus::subscribe`]; removes the listener when
/// unsubscribed or dropped.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// The process's event buses, constructed once and injected everywhere.
#[derive(Default)]
pub struct EventHub {
    pub transcripts: EventBus<TranscriptUpdate>,
    pub lifecycle: EventBus<AgentLifecycleEvent>,
    pub sessions: EventBus<SessionLoaded>,
    pub jobs: EventBus<JobEvent>,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Route an inbound event to its bus.
    pub fn dispatch(&self, event: &HookEvent) {
        match event {
            HookEvent::Transcript(update) => self.transcripts.publish(update),
            HookEvent::Lifecycle(evt) => self.lifecycle.publish(evt),
            HookEvent::SessionLoaded(evt) => self.sessions.publish(evt),
        }
        tracing::trace!(?event, "hook event dispatched");
    }
}
