//! Shared run context
//!
//! A [`Context`] is the mutable mapping threaded through every phase of a flow
//! run. Values are JSON values so any serializable type can be stored; shared
//! objects that cannot be serialized (clients, indexes) go into a separate
//! resource map keyed by name.
//!
//! Keys are not namespaced. Nodes that share a context must agree on key names;
//! declaring them as [`Key`] constants documents which keys a node reads and
//! writes.
//!
//! # Example
//!
//! ```ignore
//! const QUESTION: Key<String> = Key::new("question");
//! const ANSWER: Key<String> = Key::new("answer");
//!
//! let mut ctx = Context::new();
//! ctx.write(&QUESTION, &"what is a flow?".to_string())?;
//! let q = ctx.read(&QUESTION)?;
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{FlowError, Result};

/// Per-traversal parameters handed to each node by its flow
pub type Params = Map<String, Value>;

/// Merge `overlay` on top of `base`, overlay winning on conflicts.
pub fn merge_params(base: &Params, overlay: &Params) -> Params {
    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

type Resource = Arc<dyn Any + Send + Sync>;

/// Shared mutable state for one flow run
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    values: Map<String, Value>,
    #[serde(skip)]
    resources: HashMap<String, Resource>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value for `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Mutable raw value for `key`
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.values.get_mut(key)
    }

    /// Deserialize the value for `key`, `None` if absent
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.values.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| FlowError::ContextType {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Deserialize the value for `key`, failing if absent
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_as(key)?.ok_or_else(|| FlowError::missing_key(key))
    }

    /// Serialize `value` and store it under `key`, returning the previous value
    pub fn set<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Option<Value>> {
        let value = serde_json::to_value(value)?;
        Ok(self.values.insert(key.into(), value))
    }

    /// Store a raw value, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    /// Remove a key
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow all JSON values
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Consume the context, keeping only its JSON values
    pub fn into_values(self) -> Map<String, Value> {
        self.values
    }

    /// Read a typed key, failing if absent
    pub fn read<T: DeserializeOwned>(&self, key: &Key<T>) -> Result<T> {
        self.require(key.name())
    }

    /// Read a typed key, `None` if absent
    pub fn read_opt<T: DeserializeOwned>(&self, key: &Key<T>) -> Result<Option<T>> {
        self.get_as(key.name())
    }

    /// Write a typed key
    pub fn write<T: Serialize>(&mut self, key: &Key<T>, value: &T) -> Result<()> {
        self.set(key.name(), value)?;
        Ok(())
    }

    /// Store a shared, non-serializable object
    pub fn insert_resource<R: Any + Send + Sync>(&mut self, key: impl Into<String>, resource: R) {
        self.resources.insert(key.into(), Arc::new(resource));
    }

    /// Fetch a shared object by key and type
    pub fn resource<R: Any + Send + Sync>(&self, key: &str) -> Option<Arc<R>> {
        self.resources
            .get(key)
            .cloned()
            .and_then(|r| r.downcast::<R>().ok())
    }

    /// Fetch a shared object, failing if absent or of another type
    pub fn require_resource<R: Any + Send + Sync>(&self, key: &str) -> Result<Arc<R>> {
        self.resource(key)
            .ok_or_else(|| FlowError::MissingResource(key.to_string()))
    }

    pub fn remove_resource(&mut self, key: &str) -> bool {
        self.resources.remove(key).is_some()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut resources: Vec<_> = self.resources.keys().collect();
        resources.sort();
        f.debug_struct("Context")
            .field("values", &self.values)
            .field("resources", &resources)
            .finish()
    }
}

impl From<Map<String, Value>> for Context {
    fn from(values: Map<String, Value>) -> Self {
        Self {
            values,
            resources: HashMap::new(),
        }
    }
}

impl TryFrom<Value> for Context {
    type Error = FlowError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(map.into()),
            other => Err(FlowError::node(format!(
                "context must be a JSON object, got {}",
                other
            ))),
        }
    }
}

/// Typed name of a context entry
pub struct Key<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.name)
    }
}
