//! Parent-chained service scopes.
//!
//! A process builds one base `Environment`; every executed task gets a child
//! scope that can add task-local services without touching the base.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::collections::{IterableSource, ListSink, ResultList};
use crate::error::{DataflowError, DataflowResult};
use crate::spill::SpillStorage;

type Shared = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct Environment {
    parent: Option<Arc<Environment>>,
    values: HashMap<String, Shared>,
    instances: HashMap<TypeId, Shared>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child scope whose lookups fall back to `parent`.
    pub fn extend(parent: Arc<Environment>) -> Self {
        Self {
            parent: Some(parent),
            values: HashMap::new(),
            instances: HashMap::new(),
        }
    }

    pub fn with<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_instance<T: Any + Send + Sync>(mut self, instance: T) -> Self {
        self.set_instance(instance);
        self
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Arc::new(value));
    }

    pub fn set_instance<T: Any + Send + Sync>(&mut self, instance: T) {
        self.instances.insert(TypeId::of::<T>(), Arc::new(instance));
    }

    /// Store an already shared instance.
    pub fn set_shared_instance<T: Any + Send + Sync>(&mut self, instance: Arc<T>) {
        self.instances.insert(TypeId::of::<T>(), instance);
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        match self.values.get(key) {
            Some(value) => value.clone().downcast::<T>().ok(),
            None => self.parent.as_ref()?.get(key),
        }
    }

    pub fn instance<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self.instances.get(&TypeId::of::<T>()) {
            Some(instance) => instance.clone().downcast::<T>().ok(),
            None => self.parent.as_ref()?.instance::<T>(),
        }
    }

    pub fn has_instance<T: Any + Send + Sync>(&self) -> bool {
        self.instance::<T>().is_some()
    }

    pub fn require<T: Any + Send + Sync>(&self, key: &str) -> DataflowResult<Arc<T>> {
        self.get::<T>(key).ok_or_else(|| {
            DataflowError::MissingResource(format!("{} under key '{}'", std::any::type_name::<T>(), key))
        })
    }

    pub fn require_instance<T: Any + Send + Sync>(&self) -> DataflowResult<Arc<T>> {
        self.instance::<T>()
            .ok_or_else(|| DataflowError::MissingResource(std::any::type_name::<T>().to_string()))
    }

    /// Register a driver-local collection read by `SupplierOfIterable`.
    pub fn with_iterable<T>(self, key: impl Into<String>, items: Vec<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.with(key, IterableSource::new(items))
    }

    /// Register a result list appended to by `ConsumerToList`.
    pub fn with_result_list<T: Send + 'static>(self, key: impl Into<String>, list: &ResultList<T>) -> Self {
        self.with(key, list.sink())
    }

    /// Storage used by Sort when its input exceeds the memory limit.
    pub fn with_spill_storage(self, storage: Arc<dyn SpillStorage>) -> Self {
        self.with_instance(storage)
    }

    pub fn spill_storage(&self) -> Option<Arc<dyn SpillStorage>> {
        self.instance::<Arc<dyn SpillStorage>>().map(|storage| (*storage).clone())
    }

    pub(crate) fn list_sink(&self, key: &str) -> DataflowResult<Arc<ListSink>> {
        self.require::<ListSink>(key)
    }
}
