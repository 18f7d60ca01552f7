//! Listener registry keyed by application id and event type.
//!
//! At most one listener exists per `(app-id, type)` pair; registering again
//! replaces it. The registry is shared between the application threads that
//! register listeners and the event-stream thread that dispatches to them.
//!
//! # Dispatch
//!
//! The listener is cloned out under the lock and invoked after the lock is
//! released, so a listener may itself register or remove listeners without
//! deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::protocol::Event;

/// Callback invoked for each matching event.
pub type Listener = Arc<dyn Fn(Event) + Send + Sync>;

/// Routing key: application id plus event type.
///
/// Kept as a pair rather than a joined string so `("a_b", "c")` and
/// `("a", "b_c")` stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerKey {
    app_id: String,
    event_type: String,
}

impl ListenerKey {
    /// Build a key.
    pub fn new(app_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            event_type: event_type.into(),
        }
    }

    /// Application id.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Event type.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl std::fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app_id, self.event_type)
    }
}

/// Thread-safe map from [`ListenerKey`] to [`Listener`].
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<ListenerKey, Listener>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self
            .listeners
            .try_lock()
            .map(|map| map.keys().map(ToString::to_string).collect())
            .unwrap_or_default();
        f.debug_struct("ListenerRegistry")
            .field("keys", &keys)
            .finish()
    }
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `(app_id, event_type)`.
    ///
    /// Returns true if an existing listener was replaced.
    pub fn register<F>(&self, app_id: &str, event_type: &str, listener: F) -> bool
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let key = ListenerKey::new(app_id, event_type);
        let replaced = self
            .lock()
            .insert(key.clone(), Arc::new(listener))
            .is_some();
        if replaced {
            log::debug!("[Registry] Replaced listener for {key}");
        } else {
            log::debug!("[Registry] Registered listener for {key}");
        }
        replaced
    }

    /// Remove the listener for `(app_id, event_type)`.
    ///
    /// Returns true if one was registered.
    pub fn remove(&self, app_id: &str, event_type: &str) -> bool {
        let key = ListenerKey::new(app_id, event_type);
        let removed = self.lock().remove(&key).is_some();
        if removed {
            log::debug!("[Registry] Removed listener for {key}");
        }
        removed
    }

    /// Current listener for `(app_id, event_type)`, if any.
    pub fn lookup(&self, app_id: &str, event_type: &str) -> Option<Listener> {
        self.lock()
            .get(&ListenerKey::new(app_id, event_type))
            .cloned()
    }

    /// Deliver `event` to its listener.
    ///
    /// Returns false if no listener matched.
    pub fn dispatch(&self, event: Event) -> bool {
        let Some(listener) = self.lookup(event.app_id(), event.event_type()) else {
            return false;
        };
        listener(event);
        true
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<ListenerKey> {
        let mut keys: Vec<ListenerKey> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ListenerKey, Listener>> {
        self.listeners.lock().expect("listener registry mutex poisoned")
    }
}
