//! Application state bag: "an arbitrary key/value store owned by the
//! application; handlers access it read-write; concurrency discipline is the
//! application's responsibility" (§5).
//!
//! Design:
//! - Keyed by `(type_name::<T>(), scope)`, so `T` can be a concrete type or a
//!   trait object like `dyn my::Api`.
//! - Value = `Arc<T>` stored as `Box<dyn Any + Send + Sync>`, downcast on read.
//! - `get`/`register` are non-async and hold the lock only for the duration
//!   of the map access — handlers never block each other across unrelated keys.
//! - Re-registering overwrites the previous value; `Arc`s already handed out
//!   to in-flight handlers remain valid.

use parking_lot::RwLock;
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

pub const GLOBAL_SCOPE: &str = "global";

#[derive(Clone, Eq, PartialEq, Hash)]
struct TypeKey(&'static str);

impl TypeKey {
    #[inline]
    fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(std::any::type_name::<T>())
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Clone, Eq, PartialEq, Hash)]
struct ScopeKey(Arc<str>);

impl ScopeKey {
    #[inline]
    fn named(s: impl Into<Arc<str>>) -> Self {
        ScopeKey(s.into())
    }
}

impl fmt::Debug for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateBagError {
    #[error("no value registered for type={type_key:?}, scope={scope:?}")]
    NotFound { type_key: TypeKey, scope: ScopeKey },

    #[error("type mismatch reading state bag for type={type_key:?}, scope={scope:?}")]
    TypeMismatch { type_key: TypeKey, scope: ScopeKey },
}

type Boxed = Box<dyn Any + Send + Sync>;

/// Type-keyed, optionally-scoped store of arbitrary application values.
/// Instances of this are what handlers receive as their `app` argument.
pub struct StateBag {
    map: RwLock<HashMap<(TypeKey, ScopeKey), Boxed>>,
}

impl StateBag {
    #[inline]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for StateBag {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBag {
    /// Register a value in the *global* scope under type `T`. `T` can be a
    /// trait object like `dyn my_module::Api`.
    pub fn register<T>(&self, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register_scoped::<T>(GLOBAL_SCOPE, value);
    }

    /// Register a value in a named scope under type `T`.
    pub fn register_scoped<T>(&self, scope: impl Into<Arc<str>>, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();
        let scope_key = ScopeKey::named(scope);
        self.map.write().insert((type_key, scope_key), Box::new(value));
    }

    /// Fetch a value from the *global* scope by type `T`.
    pub fn get<T>(&self) -> Result<Arc<T>, StateBagError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_scoped::<T>(GLOBAL_SCOPE)
    }

    /// Fetch a value from a named scope by type `T`.
    pub fn get_scoped<T>(&self, scope: impl Into<Arc<str>>) -> Result<Arc<T>, StateBagError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();
        let scope_key = ScopeKey::named(scope);
        let map = self.map.read();

        let boxed = map
            .get(&(type_key.clone(), scope_key.clone()))
            .ok_or_else(|| StateBagError::NotFound {
                type_key: type_key.clone(),
                scope: scope_key.clone(),
            })?;

        if let Some(arc_t) = boxed.downcast_ref::<Arc<T>>() {
            return Ok(arc_t.clone());
        }
        Err(StateBagError::TypeMismatch {
            type_key,
            scope: scope_key,
        })
    }

    /// Remove a value; returns it if it was present.
    pub fn remove<T>(&self, scope: impl Into<Arc<str>>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();
        let scope_key = ScopeKey::named(scope);
        let boxed = self.map.write().remove(&(type_key, scope_key))?;
        boxed.downcast::<Arc<T>>().ok().map(|b| *b)
    }

    pub fn clear(&self) {
        self.map.write().clear();
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
