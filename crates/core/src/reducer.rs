//! ReducerRegistry: named, priority-ordered transform chains
//!
//! A reducer is a function `(value, &args) -> value`. Reducers registered
//! under the same name form a chain; [`ReducerRegistry::reduce`] threads a
//! value through the chain in ascending priority order (equal priorities
//! keep registration order).
//!
//! Chains are typed. The value and argument types are fixed by the first
//! registration and checked on every later registration and reduction, so
//! a chain declared for `Value` cannot be reduced with a `String`.
//!
//! An unregistered name is a configuration error, never an implicit
//! identity: callers that want a pass-through must register one.
//!
//! # Example
//!
//! ```
//! use quarry_core::ReducerRegistry;
//!
//! let registry = ReducerRegistry::new();
//! registry.register("title", 20, |v: String, _: &()| format!("{}!", v)).unwrap();
//! registry.register("title", 5, |v: String, _: &()| v.to_uppercase()).unwrap();
//!
//! let out: String = registry.reduce("title", "hi".to_string(), &()).unwrap();
//! assert_eq!(out, "HI!");
//! ```

use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Priority used when callers have no ordering preference
pub const DEFAULT_PRIORITY: i32 = 10;

/// Errors raised by reducer registration and reduction
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReducerError {
    /// Name collides with a property of the owning object
    #[error("'{0}' is a reserved name and cannot be registered as a reducer")]
    ReservedName(String),

    /// No chain registered under the name
    #[error("no reducer registered for '{0}'")]
    MissingReducer(String),

    /// Chain exists with different value/argument types
    #[error("reducer '{name}' expects ({expected}) but was used with ({actual})")]
    TypeMismatch {
        /// Chain name
        name: String,
        /// Types declared by the chain
        expected: String,
        /// Types used by the caller
        actual: String,
    },
}

type Erased = Arc<dyn Any + Send + Sync>;
type Reducer<T, A> = dyn Fn(T, &A) -> T + Send + Sync;

struct Entry {
    priority: i32,
    sequence: u64,
    callback: Erased,
}

struct Chain {
    signature: TypeId,
    signature_name: String,
    entries: Vec<Entry>,
}

/// Registry of named reducer chains
#[derive(Default)]
pub struct ReducerRegistry {
    chains: RwLock<HashMap<String, Chain>>,
    reserved: RwLock<BTreeSet<String>>,
    sequence: AtomicU64,
}

impl fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chains = self.chains.read();
        let mut names: Vec<(&String, usize)> =
            chains.iter().map(|(k, c)| (k, c.entries.len())).collect();
        names.sort();
        f.debug_struct("ReducerRegistry")
            .field("chains", &names)
            .field("reserved", &self.reserved.read().len())
            .finish()
    }
}

fn signature<T: 'static, A: 'static>() -> (TypeId, String) {
    (
        TypeId::of::<(T, A)>(),
        format!("{}, &{}", type_name::<T>(), type_name::<A>()),
    )
}

impl ReducerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare names owned by the host object
    pub fn reserve<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved
            .write()
            .extend(names.into_iter().map(Into::into));
    }

    /// Whether a name is reserved
    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.read().contains(name)
    }

    /// Add a reducer to the chain `name`
    pub fn register<T, A, F>(&self, name: &str, priority: i32, reducer: F) -> Result<(), ReducerError>
    where
        T: 'static,
        A: 'static,
        F: Fn(T, &A) -> T + Send + Sync + 'static,
    {
        if self.is_reserved(name) {
            return Err(ReducerError::ReservedName(name.to_string()));
        }
        let (sig, sig_name) = signature::<T, A>();
        let callback: Arc<Reducer<T, A>> = Arc::new(reducer);
        let erased: Erased = Arc::new(callback);

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        let mut chains = self.chains.write();
        let chain = chains.entry(name.to_string()).or_insert_with(|| Chain {
            signature: sig,
            signature_name: sig_name.clone(),
            entries: Vec::new(),
        });
        if chain.signature != sig {
            return Err(ReducerError::TypeMismatch {
                name: name.to_string(),
                expected: chain.signature_name.clone(),
                actual: sig_name,
            });
        }
        chain.entries.push(Entry {
            priority,
            sequence,
            callback: erased,
        });
        chain
            .entries
            .sort_by(|a, b| a.priority.cmp(&b.priority).then(a.sequence.cmp(&b.sequence)));
        Ok(())
    }

    /// Whether a chain exists for `name`
    pub fn has(&self, name: &str) -> bool {
        self.chains
            .read()
            .get(name)
            .is_some_and(|c| !c.entries.is_empty())
    }

    /// Number of reducers in the chain `name`
    pub fn count(&self, name: &str) -> usize {
        self.chains.read().get(name).map_or(0, |c| c.entries.len())
    }

    /// Drop the chain `name`; returns whether it existed
    pub fn forget(&self, name: &str) -> bool {
        self.chains.write().remove(name).is_some()
    }

    /// Thread `value` through the chain `name`
    pub fn reduce<T, A>(&self, name: &str, value: T, args: &A) -> Result<T, ReducerError>
    where
        T: 'static,
        A: 'static,
    {
        let callbacks = self.chain::<T, A>(name)?;
        Ok(callbacks.iter().fold(value, |acc, reducer| reducer(acc, args)))
    }

    /// Snapshot the typed callbacks so none run under the registry lock
    fn chain<T: 'static, A: 'static>(&self, name: &str) -> Result<Vec<Arc<Reducer<T, A>>>, ReducerError> {
        let chains = self.chains.read();
        let chain = chains
            .get(name)
            .filter(|c| !c.entries.is_empty())
            .ok_or_else(|| ReducerError::MissingReducer(name.to_string()))?;
        let (sig, sig_name) = signature::<T, A>();
        if chain.signature != sig {
            return Err(ReducerError::TypeMismatch {
                name: name.to_string(),
                expected: chain.signature_name.clone(),
                actual: sig_name,
            });
        }
        chain
            .entries
            .iter()
            .map(|entry| {
                entry
                    .callback
                    .downcast_ref::<Arc<Reducer<T, A>>>()
                    .cloned()
                    .ok_or_else(|| ReducerError::TypeMismatch {
                        name: name.to_string(),
                        expected: chain.signature_name.clone(),
                        actual: type_name::<T>().to_string(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let registry = ReducerRegistry::new();
        registry
            .register("n", 20, |v: i64, _: &()| v * 10)
            .unwrap();
        registry
            .register("n", DEFAULT_PRIORITY, |v: i64, _: &()| v + 1)
            .unwrap();
        assert_eq!(registry.reduce("n", 1i64, &()).unwrap(), 20);
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        let registry = ReducerRegistry::new();
        registry
            .register("s", 10, |v: String, _: &()| v + "a")
            .unwrap();
        registry
            .register("s", 10, |v: String, _: &()| v + "b")
            .unwrap();
        registry
            .register("s", 10, |v: String, _: &()| v + "c")
            .unwrap();
        assert_eq!(registry.reduce("s", String::new(), &()).unwrap(), "abc");
    }

    #[test]
    fn test_args_are_passed_to_every_reducer() {
        let registry = ReducerRegistry::new();
        registry
            .register("scale", 10, |v: i64, factor: &i64| v * factor)
            .unwrap();
        registry
            .register("scale", 11, |v: i64, factor: &i64| v + factor)
            .unwrap();
        assert_eq!(registry.reduce("scale", 2i64, &3i64).unwrap(), 9);
    }

    #[test]
    fn test_missing_chain_is_an_error() {
        let registry = ReducerRegistry::new();
        assert_eq!(
            registry.reduce("absent", 1i64, &()),
            Err(ReducerError::MissingReducer("absent".to_string()))
        );
        assert!(!registry.has("absent"));
    }

    #[test]
    fn test_reserved_name_is_rejected() {
        let registry = ReducerRegistry::new();
        registry.reserve(["save", "delete"]);
        assert_eq!(
            registry.register("save", 10, |v: i64, _: &()| v),
            Err(ReducerError::ReservedName("save".to_string()))
        );
        assert!(registry.register("saved", 10, |v: i64, _: &()| v).is_ok());
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let registry = ReducerRegistry::new();
        registry.register("x", 10, |v: i64, _: &()| v).unwrap();

        assert!(matches!(
            registry.register("x", 10, |v: String, _: &()| v),
            Err(ReducerError::TypeMismatch { .. })
        ));
        assert!(matches!(
            registry.reduce("x", "a".to_string(), &()),
            Err(ReducerError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_reducer_may_use_registry_reentrantly() {
        let registry = Arc::new(ReducerRegistry::new());
        registry.register("inner", 10, |v: i64, _: &()| v + 1).unwrap();
        let weak = Arc::downgrade(&registry);
        registry
            .register("outer", 10, move |v: i64, _: &()| {
                let registry = weak.upgrade().unwrap();
                registry.reduce("inner", v, &()).unwrap() * 2
            })
            .unwrap();
        assert_eq!(registry.reduce("outer", 1i64, &()).unwrap(), 4);
    }

    #[test]
    fn test_count_and_forget() {
        let registry = ReducerRegistry::new();
        registry.register("a", 10, |v: i64, _: &()| v).unwrap();
        registry.register("a", 10, |v: i64, _: &()| v).unwrap();
        assert_eq!(registry.count("a"), 2);
        assert!(registry.forget("a"));
        assert!(!registry.forget("a"));
        assert_eq!(registry.count("a"), 0);
    }
}
