//! AttributeStore: copy-on-write JSON container
//!
//! ## Design
//!
//! The store holds an `Arc<Snapshot>`. A snapshot maps each top-level key to
//! an `Arc<serde_json::Value>`. A write clones the top-level map (pointer
//! copies only), deep-copies the single subtree it touches, and swaps the new
//! snapshot in. Anything still holding the previous snapshot keeps seeing it
//! unchanged, so a read never observes a torn write.
//!
//! ## Locks
//!
//! `lock(path)` freezes a path for the remainder of the store's life. Any
//! `set`/`merge`/`delete` whose path overlaps a locked path (equal, ancestor
//! or descendant) fails with [`StoreError::LockedPath`]. Replacing the root
//! fails as soon as any path is locked.
//!
//! ## Change notification
//!
//! Every successful mutation emits one [`ChangeEvent`] to subscribers.
//! Callbacks run after the internal lock is released, so they may read from
//! (or write to) the store.

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::json::{
    deep_merge, delete_at_path, get_at_path, set_at_path, value_type_name, JsonPath,
    JsonPathError, PathParseError,
};

/// Errors raised by store mutations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The write touches a locked path
    #[error("path '{path}' is locked by '{locked}'")]
    LockedPath {
        /// Path of the attempted write
        path: String,
        /// The lock it collided with
        locked: String,
    },

    /// Lock requested on a path with no value
    #[error("cannot lock '{0}': path does not exist")]
    PathNotFound(String),

    /// Root replacement with a non-object value
    #[error("root value must be an object, found {0}")]
    RootNotObject(&'static str),

    /// Merge onto a present, non-object value
    #[error("cannot merge into '{path}': existing value is {found}")]
    MergeTarget {
        /// Merge path
        path: String,
        /// Type found at the path
        found: &'static str,
    },

    /// Merge with a non-object patch
    #[error("merge patch must be an object, found {0}")]
    MergePatch(&'static str),

    /// Traversal failure
    #[error(transparent)]
    Path(#[from] JsonPathError),

    /// Unparseable path string
    #[error(transparent)]
    Parse(#[from] PathParseError),
}

/// Kind of mutation that produced a [`ChangeEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Value written at a path
    Set,
    /// Object merged at a path
    Merge,
    /// Value removed at a path
    Delete,
    /// Whole root replaced
    Replace,
}

/// Notification emitted after every successful mutation
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Path that was written
    pub path: JsonPath,
    /// New value at the path (`None` for deletes)
    pub value: Option<JsonValue>,
    /// Mutation kind
    pub kind: ChangeKind,
}

/// Handle returned by [`AttributeStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable view of a store at one point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: BTreeMap<String, Arc<JsonValue>>,
}

impl Snapshot {
    /// Build a snapshot from a JSON object
    pub fn from_object(object: Map<String, JsonValue>) -> Self {
        Snapshot {
            entries: object.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        }
    }

    /// Value at a path (the root is not addressable here, use [`Snapshot::to_json`])
    pub fn get(&self, path: &JsonPath) -> Option<&JsonValue> {
        let key = path.first_key()?;
        let top = self.entries.get(key)?;
        get_at_path(top, &path.tail())
    }

    /// Value of a top-level key
    pub fn get_key(&self, key: &str) -> Option<&JsonValue> {
        self.entries.get(key).map(Arc::as_ref)
    }

    /// Whether a top-level key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Top-level keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of top-level keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Materialize the snapshot as a JSON object
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.to_map())
    }

    /// Materialize the snapshot as a JSON map
    pub fn to_map(&self) -> Map<String, JsonValue> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::clone(v)))
            .collect()
    }

    /// Whether two snapshots share the same allocation for a key
    pub fn shares_key_with(&self, other: &Snapshot, key: &str) -> bool {
        match (self.entries.get(key), other.entries.get(key)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn with_write(
        &self,
        path: &JsonPath,
        write: impl FnOnce(&mut JsonValue) -> Result<(), StoreError>,
    ) -> Result<Snapshot, StoreError> {
        let key = path
            .first_key()
            .ok_or(StoreError::Path(JsonPathError::TypeMismatch {
                expected: "object",
                found: "array",
            }))?
            .to_string();

        // Only the touched top-level subtree is deep-copied.
        let mut holder = Map::new();
        if let Some(existing) = self.entries.get(&key) {
            holder.insert(key.clone(), JsonValue::clone(existing));
        }
        let mut holder = JsonValue::Object(holder);
        write(&mut holder)?;

        let mut next = self.clone();
        match holder.as_object_mut().and_then(|obj| obj.remove(&key)) {
            Some(value) => next.entries.insert(key, Arc::new(value)),
            None => next.entries.remove(&key),
        };
        Ok(next)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

// =============================================================================
// AttributeStore
// =============================================================================

/// Dot-path addressable JSON container with locking and change events
///
/// # Example
///
/// ```
/// use quarry_core::AttributeStore;
/// use serde_json::json;
///
/// let store = AttributeStore::from_json(json!({"name": "A"})).unwrap();
/// let before = store.snapshot();
/// store.set("name", json!("B")).unwrap();
///
/// assert_eq!(store.get("name"), Some(json!("B")));
/// assert_eq!(before.get_key("name"), Some(&json!("A")));
/// ```
pub struct AttributeStore {
    current: RwLock<Arc<Snapshot>>,
    locked: RwLock<Vec<JsonPath>>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_listener: AtomicU64,
}

impl Default for AttributeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeStore")
            .field("current", &self.current.read())
            .field("locked", &self.locked.read())
            .finish()
    }
}

impl AttributeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    /// Create a store seeded from a snapshot
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        AttributeStore {
            current: RwLock::new(Arc::new(snapshot)),
            locked: RwLock::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Create a store from a JSON object
    pub fn from_json(value: JsonValue) -> Result<Self, StoreError> {
        match value {
            JsonValue::Object(obj) => Ok(Self::from_snapshot(Snapshot::from_object(obj))),
            other => Err(StoreError::RootNotObject(value_type_name(&other))),
        }
    }

    /// Current snapshot (cheap pointer copy)
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Value at `path`, cloned out of the current snapshot
    ///
    /// Invalid path strings read as absent.
    pub fn get(&self, path: &str) -> Option<JsonValue> {
        let path: JsonPath = path.parse().ok()?;
        self.get_path(&path)
    }

    /// Value at `path`, or `default` when absent
    pub fn get_or(&self, path: &str, default: JsonValue) -> JsonValue {
        self.get(path).unwrap_or(default)
    }

    /// Value at a pre-parsed path
    pub fn get_path(&self, path: &JsonPath) -> Option<JsonValue> {
        let snapshot = self.snapshot();
        if path.is_root() {
            return Some(snapshot.to_json());
        }
        snapshot.get(path).cloned()
    }

    /// Whether a value exists at `path`
    pub fn has(&self, path: &str) -> bool {
        match path.parse::<JsonPath>() {
            Ok(path) => self.has_path(&path),
            Err(_) => false,
        }
    }

    /// Whether a value exists at a pre-parsed path
    pub fn has_path(&self, path: &JsonPath) -> bool {
        path.is_root() || self.snapshot().get(path).is_some()
    }

    /// Whole document as a JSON object
    pub fn all(&self) -> JsonValue {
        self.snapshot().to_json()
    }

    /// Top-level keys
    pub fn keys(&self) -> Vec<String> {
        self.snapshot().keys().map(str::to_string).collect()
    }

    /// Write `value` at `path`; `"."` replaces the root
    pub fn set(&self, path: &str, value: JsonValue) -> Result<(), StoreError> {
        self.set_path(&path.parse()?, value)
    }

    /// Write `value` at a pre-parsed path
    pub fn set_path(&self, path: &JsonPath, value: JsonValue) -> Result<(), StoreError> {
        {
            let mut current = self.current.write();
            self.check_unlocked(path)?;
            let next = if path.is_root() {
                match &value {
                    JsonValue::Object(obj) => Snapshot::from_object(obj.clone()),
                    other => return Err(StoreError::RootNotObject(value_type_name(other))),
                }
            } else {
                current.with_write(path, |holder| {
                    set_at_path(holder, path, value.clone()).map_err(StoreError::from)
                })?
            };
            *current = Arc::new(next);
        }
        self.notify(ChangeEvent {
            path: path.clone(),
            value: Some(value),
            kind: if path.is_root() {
                ChangeKind::Replace
            } else {
                ChangeKind::Set
            },
        });
        Ok(())
    }

    /// Merge an object into the value at `path`
    ///
    /// The current value must be absent or an object.
    pub fn merge(&self, path: &str, patch: JsonValue) -> Result<(), StoreError> {
        self.merge_path(&path.parse()?, patch)
    }

    /// Merge an object into the value at a pre-parsed path
    pub fn merge_path(&self, path: &JsonPath, patch: JsonValue) -> Result<(), StoreError> {
        if !patch.is_object() {
            return Err(StoreError::MergePatch(value_type_name(&patch)));
        }
        let merged = {
            let mut current = self.current.write();
            if path.is_root() {
                // Root merges only touch the patch's own keys.
                if let JsonValue::Object(obj) = &patch {
                    for key in obj.keys() {
                        self.check_unlocked(&JsonPath::root().key(key.clone()))?;
                    }
                }
                let mut doc = current.to_json();
                deep_merge(&mut doc, &patch);
                let merged = doc.clone();
                match doc {
                    JsonValue::Object(obj) => *current = Arc::new(Snapshot::from_object(obj)),
                    other => return Err(StoreError::RootNotObject(value_type_name(&other))),
                }
                merged
            } else {
                self.check_unlocked(path)?;
                let existing = current.get(path).cloned();
                let mut target = match existing {
                    None | Some(JsonValue::Null) => JsonValue::Object(Map::new()),
                    Some(obj @ JsonValue::Object(_)) => obj,
                    Some(other) => {
                        return Err(StoreError::MergeTarget {
                            path: path.to_string(),
                            found: value_type_name(&other),
                        })
                    }
                };
                deep_merge(&mut target, &patch);
                let merged = target.clone();
                let next = current.with_write(path, |holder| {
                    set_at_path(holder, path, target).map_err(StoreError::from)
                })?;
                *current = Arc::new(next);
                merged
            }
        };
        self.notify(ChangeEvent {
            path: path.clone(),
            value: Some(merged),
            kind: ChangeKind::Merge,
        });
        Ok(())
    }

    /// Write several top-level keys in one snapshot
    ///
    /// Each entry replaces its key wholesale (no deep merge). Emits a single
    /// `Merge` event at the root carrying the written entries.
    pub fn assign(&self, entries: Map<String, JsonValue>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        {
            let mut current = self.current.write();
            for key in entries.keys() {
                self.check_unlocked(&JsonPath::root().key(key.clone()))?;
            }
            let mut next = Snapshot::clone(&current);
            for (key, value) in &entries {
                next.entries.insert(key.clone(), Arc::new(value.clone()));
            }
            *current = Arc::new(next);
        }
        self.notify(ChangeEvent {
            path: JsonPath::root(),
            value: Some(JsonValue::Object(entries)),
            kind: ChangeKind::Merge,
        });
        Ok(())
    }

    /// Remove the value at `path`
    ///
    /// Returns the removed value. Deleting an absent path succeeds without
    /// emitting an event.
    pub fn delete(&self, path: &str) -> Result<Option<JsonValue>, StoreError> {
        self.delete_path(&path.parse()?)
    }

    /// Remove the value at a pre-parsed path
    pub fn delete_path(&self, path: &JsonPath) -> Result<Option<JsonValue>, StoreError> {
        let removed = {
            let mut current = self.current.write();
            self.check_unlocked(path)?;
            if path.is_root() {
                let old = current.to_json();
                *current = Arc::new(Snapshot::default());
                Some(old)
            } else {
                let mut removed = None;
                let next = current.with_write(path, |holder| {
                    removed = delete_at_path(holder, path)?;
                    Ok(())
                })?;
                if removed.is_some() {
                    *current = Arc::new(next);
                }
                removed
            }
        };
        if removed.is_some() {
            self.notify(ChangeEvent {
                path: path.clone(),
                value: None,
                kind: ChangeKind::Delete,
            });
        }
        Ok(removed)
    }

    /// Replace the whole document with an existing snapshot
    ///
    /// Subject to the same lock rule as `set(".", ..)`.
    pub fn replace(&self, snapshot: Arc<Snapshot>) -> Result<(), StoreError> {
        let value = {
            let mut current = self.current.write();
            self.check_unlocked(&JsonPath::root())?;
            let value = snapshot.to_json();
            *current = snapshot;
            value
        };
        self.notify(ChangeEvent {
            path: JsonPath::root(),
            value: Some(value),
            kind: ChangeKind::Replace,
        });
        Ok(())
    }

    /// Lock a path against further writes
    pub fn lock(&self, path: &str) -> Result<(), StoreError> {
        self.lock_path(&path.parse()?)
    }

    /// Lock a pre-parsed path
    pub fn lock_path(&self, path: &JsonPath) -> Result<(), StoreError> {
        if !self.has_path(path) {
            return Err(StoreError::PathNotFound(path.to_string()));
        }
        let mut locked = self.locked.write();
        if !locked.contains(path) {
            locked.push(path.clone());
        }
        Ok(())
    }

    /// Whether a write at `path` would be refused
    pub fn is_locked(&self, path: &JsonPath) -> bool {
        self.locked.read().iter().any(|l| l.overlaps(path))
    }

    /// All locked paths in lock order
    pub fn locked_paths(&self) -> Vec<JsonPath> {
        self.locked.read().clone()
    }

    /// Independent copy with the same content and locks but no subscribers
    pub fn clone_store(&self) -> AttributeStore {
        AttributeStore {
            current: RwLock::new(self.snapshot()),
            locked: RwLock::new(self.locked_paths()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Register a change callback
    pub fn subscribe(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a change callback; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn check_unlocked(&self, path: &JsonPath) -> Result<(), StoreError> {
        match self.locked.read().iter().find(|l| l.overlaps(path)) {
            Some(locked) => Err(StoreError::LockedPath {
                path: path.to_string(),
                locked: locked.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn notify(&self, event: ChangeEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }
}

impl Clone for AttributeStore {
    fn clone(&self) -> Self {
        self.clone_store()
    }
}
