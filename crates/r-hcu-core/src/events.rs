//! ---
//! hcu_section: "02-messaging-ipc-data-model"
//! hcu_subsection: "module"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Synchronous multi-listener lifecycle event dispatch."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Event dispatched when both startup phases have joined successfully.
pub const READY: &str = "ready";

/// Event dispatched when a startup phase fails.
pub const ERROR: &str = "error";

/// Envelope handed to every listener of a dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Unique identifier for deduplication and tracing.
    pub id: Uuid,
    /// Timestamp when the event was dispatched.
    pub timestamp: DateTime<Utc>,
    /// Event name the dispatch was keyed by.
    pub name: String,
    /// Arbitrary payload attached by the dispatcher.
    pub payload: Value,
}

impl Event {
    /// Construct an envelope around the supplied payload.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            name: name.into(),
            payload,
        }
    }
}

/// Callback registered for one event name.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Synchronous multi-listener dispatch keyed by event name.
///
/// Listeners registered before or after construction all receive subsequent
/// dispatches; past events are never replayed to late subscribers.
pub struct EventBus {
    declared: Vec<String>,
    listeners: Mutex<IndexMap<String, Vec<Listener>>>,
}

impl EventBus {
    /// Create a bus carrying the declared event names for serialization.
    pub fn new(declared: Vec<String>) -> Self {
        Self {
            declared,
            listeners: Mutex::new(IndexMap::new()),
        }
    }

    /// Event names declared at construction, in declaration order.
    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    /// Register a listener for the named event.
    pub fn on(&self, event: impl Into<String>, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .entry(event.into())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Number of listeners currently registered for the named event.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Dispatch synchronously to every current listener of the named event.
    ///
    /// Returns the number of listeners invoked. The listener table lock is
    /// released before dispatch so listeners may register further listeners.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .get(event)
            .cloned()
            .unwrap_or_default();
        let envelope = Event::new(event, payload);
        for listener in &listeners {
            listener(&envelope);
        }
        listeners.len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        f.debug_struct("EventBus")
            .field("declared", &self.declared)
            .field("subscribed", &listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}
