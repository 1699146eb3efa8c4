//! Named operator functions.
//!
//! Node descriptors reference functions by name only. Every process that
//! executes nodes builds an equivalent `Registry`, usually through
//! [`Registry::with_builtins`] plus its own registrations.

pub mod builtins;
pub mod codec;
pub mod functions;
pub mod key;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DataflowError, DataflowResult};
use crate::stream::{downcast, downcast_ref, Item};

pub use builtins::BuiltinRegistration;
pub use codec::{CodecRegistry, ItemCodec, PostcardCodec};
pub use functions::{
    AccumulatorToAccumulator, AccumulatorToOutput, ComparatorFn, InnerJoiner, InputToAccumulator, InputToOutput,
    ItemJoiner, ItemReducer, Joiner, KeyFn, LeftOuterJoiner, MapperFn, MergeDistinctReducer, MergeSortReducer,
    PredicateFn, Reducer, ReducerToResult,
};
pub use key::{shard_index, Key, KeyValue, PartitionHash};

use functions::{key_ref, TypedJoiner, TypedReducer};

/// Reference to a reducer inside a node descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReducerRef {
    MergeSort,
    MergeDistinct,
    InputToAccumulator { reducer: String },
    InputToOutput { reducer: String },
    AccumulatorToAccumulator { reducer: String },
    AccumulatorToOutput { reducer: String },
    Custom { name: String },
}

impl ReducerRef {
    pub fn merge(dedupe: bool) -> Self {
        if dedupe {
            Self::MergeDistinct
        } else {
            Self::MergeSort
        }
    }
}

struct ReducerAdapters {
    input_to_accumulator: Arc<dyn ItemReducer>,
    input_to_output: Arc<dyn ItemReducer>,
    accumulator_to_accumulator: Arc<dyn ItemReducer>,
    accumulator_to_output: Arc<dyn ItemReducer>,
}

#[derive(Default)]
pub struct Registry {
    mappers: HashMap<String, MapperFn>,
    predicates: HashMap<String, PredicateFn>,
    key_functions: HashMap<String, KeyFn>,
    comparators: HashMap<String, ComparatorFn>,
    reducers: HashMap<String, Arc<dyn ItemReducer>>,
    reducers_to_result: HashMap<String, ReducerAdapters>,
    joiners: HashMap<String, Arc<dyn ItemJoiner>>,
    codecs: CodecRegistry,
}

fn missing(kind: &str, name: &str) -> DataflowError {
    DataflowError::MissingResource(format!("{} '{}'", kind, name))
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in codec, comparator, key function and reducer.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<BuiltinRegistration> {
            (registration.0)(&mut registry);
        }
        registry
    }

    pub fn register_mapper<I, O, F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        let mapper: MapperFn = Arc::new(move |item| Ok(Box::new(f(downcast::<I>(item)?)) as Item));
        self.mappers.insert(name.into(), mapper);
        self
    }

    pub fn register_fallible_mapper<I, O, F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        let name = name.into();
        let operator = name.clone();
        let mapper: MapperFn = Arc::new(move |item| {
            let value = f(downcast::<I>(item)?).map_err(|e| DataflowError::operator(&operator, e))?;
            Ok(Box::new(value) as Item)
        });
        self.mappers.insert(name, mapper);
        self
    }

    pub fn register_predicate<T, F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        T: 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate: PredicateFn = Arc::new(move |item| Ok(f(downcast_ref::<T>(item)?)));
        self.predicates.insert(name.into(), predicate);
        self
    }

    pub fn register_key_function<T, K, F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        T: 'static,
        K: KeyValue,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let key_function: KeyFn = Arc::new(move |item| Ok(Arc::new(f(downcast_ref::<T>(item)?)) as Key));
        self.key_functions.insert(name.into(), key_function);
        self
    }

    pub fn register_comparator<K, F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        K: KeyValue,
        F: Fn(&K, &K) -> Ordering + Send + Sync + 'static,
    {
        let comparator: ComparatorFn = Arc::new(move |a, b| Ok(f(key_ref::<K>(a)?, key_ref::<K>(b)?)));
        self.comparators.insert(name.into(), comparator);
        self
    }

    pub fn register_natural_order<K: KeyValue + Ord>(&mut self, name: impl Into<String>) -> &mut Self {
        self.register_comparator::<K, _>(name, |a, b| a.cmp(b))
    }

    pub fn register_reducer<K, I, O, A, R>(&mut self, name: impl Into<String>, reducer: R) -> &mut Self
    where
        K: KeyValue,
        I: Send + 'static,
        O: Send + 'static,
        A: Send + 'static,
        R: Reducer<K, I, O, A>,
    {
        let name = name.into();
        let reducer: Arc<dyn ItemReducer> = Arc::new(TypedReducer::<R, K, I, O, A>::new(name.clone(), reducer));
        self.reducers.insert(name, reducer);
        self
    }

    /// Register all four reducer shapes derived from one accumulator reducer.
    pub fn register_reducer_to_result<K, I, O, A, R>(&mut self, name: impl Into<String>, reducer: R) -> &mut Self
    where
        K: KeyValue,
        I: Send + 'static,
        O: Send + 'static,
        A: Send + 'static,
        R: ReducerToResult<K, I, O, A>,
    {
        let name = name.into();
        let reducer = Arc::new(reducer);
        let adapters = ReducerAdapters {
            input_to_accumulator: Arc::new(TypedReducer::<_, K, I, A, A>::new(
                name.clone(),
                InputToAccumulator::<R, O>::new(reducer.clone()),
            )),
            input_to_output: Arc::new(TypedReducer::<_, K, I, O, A>::new(
                name.clone(),
                InputToOutput::new(reducer.clone()),
            )),
            accumulator_to_accumulator: Arc::new(TypedReducer::<_, K, A, A, A>::new(
                name.clone(),
                AccumulatorToAccumulator::<R, I, O>::new(reducer.clone()),
            )),
            accumulator_to_output: Arc::new(TypedReducer::<_, K, A, O, A>::new(
                name.clone(),
                AccumulatorToOutput::<R, I>::new(reducer),
            )),
        };
        self.reducers_to_result.insert(name, adapters);
        self
    }

    pub fn register_joiner<K, L, R, V, J>(&mut self, name: impl Into<String>, joiner: J) -> &mut Self
    where
        K: KeyValue,
        L: Send + 'static,
        R: Send + 'static,
        V: Send + 'static,
        J: Joiner<K, L, R, V>,
    {
        let name = name.into();
        let joiner: Arc<dyn ItemJoiner> = Arc::new(TypedJoiner::<J, K, L, R, V>::new(name.clone(), joiner));
        self.joiners.insert(name, joiner);
        self
    }

    pub fn register_codec<T>(&mut self, type_name: impl Into<String>) -> &mut Self
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.codecs.register::<T>(type_name);
        self
    }

    pub fn mapper(&self, name: &str) -> DataflowResult<MapperFn> {
        self.mappers.get(name).cloned().ok_or_else(|| missing("mapper", name))
    }

    pub fn predicate(&self, name: &str) -> DataflowResult<PredicateFn> {
        self.predicates.get(name).cloned().ok_or_else(|| missing("predicate", name))
    }

    pub fn key_function(&self, name: &str) -> DataflowResult<KeyFn> {
        self.key_functions
            .get(name)
            .cloned()
            .ok_or_else(|| missing("key function", name))
    }

    pub fn comparator(&self, name: &str) -> DataflowResult<ComparatorFn> {
        self.comparators
            .get(name)
            .cloned()
            .ok_or_else(|| missing("comparator", name))
    }

    pub fn reducer(&self, reducer: &ReducerRef) -> DataflowResult<Arc<dyn ItemReducer>> {
        let adapters = |name: &str| {
            self.reducers_to_result
                .get(name)
                .ok_or_else(|| missing("reducer", name))
        };
        match reducer {
            ReducerRef::MergeSort => Ok(Arc::new(MergeSortReducer)),
            ReducerRef::MergeDistinct => Ok(Arc::new(MergeDistinctReducer)),
            ReducerRef::InputToAccumulator { reducer } => Ok(adapters(reducer)?.input_to_accumulator.clone()),
            ReducerRef::InputToOutput { reducer } => Ok(adapters(reducer)?.input_to_output.clone()),
            ReducerRef::AccumulatorToAccumulator { reducer } => {
                Ok(adapters(reducer)?.accumulator_to_accumulator.clone())
            }
            ReducerRef::AccumulatorToOutput { reducer } => Ok(adapters(reducer)?.accumulator_to_output.clone()),
            ReducerRef::Custom { name } => self.reducers.get(name).cloned().ok_or_else(|| missing("reducer", name)),
        }
    }

    pub fn joiner(&self, name: &str) -> DataflowResult<Arc<dyn ItemJoiner>> {
        self.joiners.get(name).cloned().ok_or_else(|| missing("joiner", name))
    }

    pub fn codec(&self, type_name: &str) -> DataflowResult<Arc<dyn ItemCodec>> {
        self.codecs.get(type_name)
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }
}
