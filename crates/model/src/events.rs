//! Model lifecycle events
//!
//! Every model owns an [`EventBus`]; the service owns a global one. Lifecycle
//! events are emitted on both, in that order. Listeners run synchronously
//! after the emitting operation released its locks, so they may freely read
//! or modify the model.

use crate::error::Operation;
use crate::model::Model;
use parking_lot::Mutex;
use quarry_core::JsonValue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifecycle event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Before a create or update
    Saving,
    /// After a create or update
    Saved,
    /// Before a create
    Creating,
    /// After a create
    Created,
    /// Before an update
    Updating,
    /// After an update
    Updated,
    /// Before a delete
    Deleting,
    /// After a delete
    Deleted,
    /// Before a restore
    Restoring,
    /// After a restore
    Restored,
    /// After a force delete
    ForceDeleted,
    /// After a refresh
    Refreshed,
    /// Hydrated from a query result
    Fetched,
    /// Attributes written locally
    Changed,
    /// A remote operation failed
    Failed {
        /// Operation that failed
        operation: Operation,
    },
}

impl EventKind {
    /// Lowercase name, e.g. `saving`
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Saving => "saving",
            EventKind::Saved => "saved",
            EventKind::Creating => "creating",
            EventKind::Created => "created",
            EventKind::Updating => "updating",
            EventKind::Updated => "updated",
            EventKind::Deleting => "deleting",
            EventKind::Deleted => "deleted",
            EventKind::Restoring => "restoring",
            EventKind::Restored => "restored",
            EventKind::ForceDeleted => "forceDeleted",
            EventKind::Refreshed => "refreshed",
            EventKind::Fetched => "fetch",
            EventKind::Changed => "change",
            EventKind::Failed { .. } => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Failed { operation } => write!(f, "error({})", operation),
            other => f.write_str(other.name()),
        }
    }
}

/// One emitted event
#[derive(Debug, Clone)]
pub struct ModelEvent {
    /// What happened
    pub kind: EventKind,
    /// Model it happened to
    pub model: Model,
    /// Written fragment for `Changed`, error text for `Failed`
    pub detail: Option<JsonValue>,
}

impl ModelEvent {
    /// Event without detail
    pub fn new(kind: EventKind, model: Model) -> Self {
        Self {
            kind,
            model,
            detail: None,
        }
    }

    /// Attach extra data, e.g. the changed attributes
    pub fn with_detail(mut self, detail: JsonValue) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Handle returned by [`EventBus::listen`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ModelEvent) + Send + Sync>;

/// Synchronous fan-out of model events
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, Option<&'static str>, Listener)>>,
    next: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl EventBus {
    /// Bus with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event
    pub fn listen(&self, listener: impl Fn(&ModelEvent) + Send + Sync + 'static) -> ListenerId {
        self.add(None, Arc::new(listener))
    }

    /// Receive events whose [`EventKind::name`] equals `name`
    pub fn on(&self, name: &'static str, listener: impl Fn(&ModelEvent) + Send + Sync + 'static) -> ListenerId {
        self.add(Some(name), Arc::new(listener))
    }

    fn add(&self, filter: Option<&'static str>, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, filter, listener));
        id
    }

    /// Remove a listener; returns whether it was registered
    pub fn forget(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener in registration order
    pub fn emit(&self, event: &ModelEvent) {
        let name = event.kind.name();
        let matching: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, filter, _)| filter.map_or(true, |f| f == name))
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in matching {
            listener(event);
        }
    }
}
