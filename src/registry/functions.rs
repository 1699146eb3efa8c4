//! Typed user-function traits and their type-erased forms.
//!
//! Operators only see the erased forms. The typed adapters downcast at the
//! boundary and report a `TypeMismatch` instead of panicking.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{DataflowError, DataflowResult};
use crate::registry::key::{Key, KeyValue};
use crate::stream::{downcast, Item};

pub type MapperFn = Arc<dyn Fn(Item) -> DataflowResult<Item> + Send + Sync>;
pub type PredicateFn = Arc<dyn Fn(&Item) -> DataflowResult<bool> + Send + Sync>;
pub type KeyFn = Arc<dyn Fn(&Item) -> DataflowResult<Key> + Send + Sync>;
pub type ComparatorFn = Arc<dyn Fn(&Key, &Key) -> DataflowResult<Ordering> + Send + Sync>;

pub(crate) fn key_ref<K: KeyValue>(key: &Key) -> DataflowResult<&K> {
    (**key)
        .as_any()
        .downcast_ref::<K>()
        .ok_or(DataflowError::TypeMismatch {
            expected: std::any::type_name::<K>(),
        })
}

fn box_all<O: Send + 'static>(values: Vec<O>, out: &mut Vec<Item>) {
    out.extend(values.into_iter().map(|v| Box::new(v) as Item));
}

/// Folds a key group: first item opens an accumulator, later items update it,
/// and completion emits whatever the group produced.
pub trait Reducer<K, I, O, A>: Send + Sync + 'static {
    fn on_first_item(&self, out: &mut Vec<O>, key: &K, item: I) -> anyhow::Result<A>;

    fn on_next_item(&self, out: &mut Vec<O>, key: &K, item: I, accumulator: A) -> anyhow::Result<A>;

    fn on_complete(&self, out: &mut Vec<O>, key: &K, accumulator: A) -> anyhow::Result<()>;
}

/// Reducer expressed as an accumulator with a final result.
pub trait ReducerToResult<K, I, O, A>: Send + Sync + 'static {
    fn create_accumulator(&self, key: &K) -> A;

    fn accumulate(&self, accumulator: A, value: I) -> A;

    /// Merge two partial accumulators. Only needed for accumulator inputs.
    fn combine(&self, _accumulator: A, _other: A) -> anyhow::Result<A> {
        anyhow::bail!("combine is not supported by this reducer")
    }

    fn produce_result(&self, accumulator: A) -> O;
}

/// Visits key groups of a sort-merge join.
pub trait Joiner<K, L, R, V>: Send + Sync + 'static {
    fn on_inner_join(&self, key: &K, lefts: Vec<L>, rights: Vec<R>, out: &mut Vec<V>) -> anyhow::Result<()>;

    fn on_left_join(&self, key: &K, left: L, out: &mut Vec<V>) -> anyhow::Result<()>;

    fn on_right_join(&self, key: &K, right: R, out: &mut Vec<V>) -> anyhow::Result<()>;
}

/// Erased reducer used by Merge, Sort and Reduce.
pub trait ItemReducer: Send + Sync {
    fn on_first_item(&self, out: &mut Vec<Item>, key: &Key, item: Item) -> DataflowResult<Item>;

    fn on_next_item(&self, out: &mut Vec<Item>, key: &Key, item: Item, accumulator: Item) -> DataflowResult<Item>;

    fn on_complete(&self, out: &mut Vec<Item>, key: &Key, accumulator: Item) -> DataflowResult<()>;
}

/// Erased joiner used by Join.
pub trait ItemJoiner: Send + Sync {
    fn on_inner_join(&self, out: &mut Vec<Item>, key: &Key, lefts: Vec<Item>, rights: Vec<Item>) -> DataflowResult<()>;

    fn on_left_join(&self, out: &mut Vec<Item>, key: &Key, left: Item) -> DataflowResult<()>;

    fn on_right_join(&self, out: &mut Vec<Item>, key: &Key, right: Item) -> DataflowResult<()>;
}

/// Emits every item of a key group.
pub struct MergeSortReducer;

impl ItemReducer for MergeSortReducer {
    fn on_first_item(&self, out: &mut Vec<Item>, _key: &Key, item: Item) -> DataflowResult<Item> {
        out.push(item);
        Ok(Box::new(()))
    }

    fn on_next_item(&self, out: &mut Vec<Item>, _key: &Key, item: Item, accumulator: Item) -> DataflowResult<Item> {
        out.push(item);
        Ok(accumulator)
    }

    fn on_complete(&self, _out: &mut Vec<Item>, _key: &Key, _accumulator: Item) -> DataflowResult<()> {
        Ok(())
    }
}

/// Emits the first item of a key group and discards the rest.
pub struct MergeDistinctReducer;

impl ItemReducer for MergeDistinctReducer {
    fn on_first_item(&self, out: &mut Vec<Item>, _key: &Key, item: Item) -> DataflowResult<Item> {
        out.push(item);
        Ok(Box::new(()))
    }

    fn on_next_item(&self, _out: &mut Vec<Item>, _key: &Key, _item: Item, accumulator: Item) -> DataflowResult<Item> {
        Ok(accumulator)
    }

    fn on_complete(&self, _out: &mut Vec<Item>, _key: &Key, _accumulator: Item) -> DataflowResult<()> {
        Ok(())
    }
}

pub(crate) struct TypedReducer<R, K, I, O, A> {
    name: String,
    reducer: R,
    _marker: PhantomData<fn(K, I) -> (O, A)>,
}

impl<R, K, I, O, A> TypedReducer<R, K, I, O, A> {
    pub(crate) fn new(name: impl Into<String>, reducer: R) -> Self {
        Self {
            name: name.into(),
            reducer,
            _marker: PhantomData,
        }
    }

    fn failed(&self, e: anyhow::Error) -> DataflowError {
        DataflowError::operator(&self.name, e)
    }
}

impl<R, K, I, O, A> ItemReducer for TypedReducer<R, K, I, O, A>
where
    R: Reducer<K, I, O, A>,
    K: KeyValue,
    I: Send + 'static,
    O: Send + 'static,
    A: Send + 'static,
{
    fn on_first_item(&self, out: &mut Vec<Item>, key: &Key, item: Item) -> DataflowResult<Item> {
        let mut values = Vec::new();
        let accumulator = self
            .reducer
            .on_first_item(&mut values, key_ref::<K>(key)?, downcast::<I>(item)?)
            .map_err(|e| self.failed(e))?;
        box_all(values, out);
        Ok(Box::new(accumulator))
    }

    fn on_next_item(&self, out: &mut Vec<Item>, key: &Key, item: Item, accumulator: Item) -> DataflowResult<Item> {
        let mut values = Vec::new();
        let accumulator = self
            .reducer
            .on_next_item(
                &mut values,
                key_ref::<K>(key)?,
                downcast::<I>(item)?,
                downcast::<A>(accumulator)?,
            )
            .map_err(|e| self.failed(e))?;
        box_all(values, out);
        Ok(Box::new(accumulator))
    }

    fn on_complete(&self, out: &mut Vec<Item>, key: &Key, accumulator: Item) -> DataflowResult<()> {
        let mut values = Vec::new();
        self.reducer
            .on_complete(&mut values, key_ref::<K>(key)?, downcast::<A>(accumulator)?)
            .map_err(|e| self.failed(e))?;
        box_all(values, out);
        Ok(())
    }
}

/// Folds raw inputs and emits the accumulator itself.
pub struct InputToAccumulator<R, O> {
    reducer: Arc<R>,
    _marker: PhantomData<fn() -> O>,
}

/// Folds raw inputs and emits the produced result.
pub struct InputToOutput<R> {
    reducer: Arc<R>,
}

/// Combines partial accumulators and emits the combined accumulator.
pub struct AccumulatorToAccumulator<R, I, O> {
    reducer: Arc<R>,
    _marker: PhantomData<fn(I) -> O>,
}

/// Combines partial accumulators and emits the produced result.
pub struct AccumulatorToOutput<R, I> {
    reducer: Arc<R>,
    _marker: PhantomData<fn(I)>,
}

impl<R, O> InputToAccumulator<R, O> {
    pub fn new(reducer: Arc<R>) -> Self {
        Self { reducer, _marker: PhantomData }
    }
}

impl<R> InputToOutput<R> {
    pub fn new(reducer: Arc<R>) -> Self {
        Self { reducer }
    }
}

impl<R, I, O> AccumulatorToAccumulator<R, I, O> {
    pub fn new(reducer: Arc<R>) -> Self {
        Self { reducer, _marker: PhantomData }
    }
}

impl<R, I> AccumulatorToOutput<R, I> {
    pub fn new(reducer: Arc<R>) -> Self {
        Self { reducer, _marker: PhantomData }
    }
}

impl<K, I, O, A, R> Reducer<K, I, A, A> for InputToAccumulator<R, O>
where
    R: ReducerToResult<K, I, O, A>,
    O: 'static,
{
    fn on_first_item(&self, _out: &mut Vec<A>, key: &K, item: I) -> anyhow::Result<A> {
        Ok(self.reducer.accumulate(self.reducer.create_accumulator(key), item))
    }

    fn on_next_item(&self, _out: &mut Vec<A>, _key: &K, item: I, accumulator: A) -> anyhow::Result<A> {
        Ok(self.reducer.accumulate(accumulator, item))
    }

    fn on_complete(&self, out: &mut Vec<A>, _key: &K, accumulator: A) -> anyhow::Result<()> {
        out.push(accumulator);
        Ok(())
    }
}

impl<K, I, O, A, R> Reducer<K, I, O, A> for InputToOutput<R>
where
    R: ReducerToResult<K, I, O, A>,
{
    fn on_first_item(&self, _out: &mut Vec<O>, key: &K, item: I) -> anyhow::Result<A> {
        Ok(self.reducer.accumulate(self.reducer.create_accumulator(key), item))
    }

    fn on_next_item(&self, _out: &mut Vec<O>, _key: &K, item: I, accumulator: A) -> anyhow::Result<A> {
        Ok(self.reducer.accumulate(accumulator, item))
    }

    fn on_complete(&self, out: &mut Vec<O>, _key: &K, accumulator: A) -> anyhow::Result<()> {
        out.push(self.reducer.produce_result(accumulator));
        Ok(())
    }
}

impl<K, I, O, A, R> Reducer<K, A, A, A> for AccumulatorToAccumulator<R, I, O>
where
    R: ReducerToResult<K, I, O, A>,
    I: 'static,
    O: 'static,
{
    fn on_first_item(&self, _out: &mut Vec<A>, _key: &K, item: A) -> anyhow::Result<A> {
        Ok(item)
    }

    fn on_next_item(&self, _out: &mut Vec<A>, _key: &K, item: A, accumulator: A) -> anyhow::Result<A> {
        self.reducer.combine(accumulator, item)
    }

    fn on_complete(&self, out: &mut Vec<A>, _key: &K, accumulator: A) -> anyhow::Result<()> {
        out.push(accumulator);
        Ok(())
    }
}

impl<K, I, O, A, R> Reducer<K, A, O, A> for AccumulatorToOutput<R, I>
where
    R: ReducerToResult<K, I, O, A>,
    I: 'static,
{
    fn on_first_item(&self, _out: &mut Vec<O>, _key: &K, item: A) -> anyhow::Result<A> {
        Ok(item)
    }

    fn on_next_item(&self, _out: &mut Vec<O>, _key: &K, item: A, accumulator: A) -> anyhow::Result<A> {
        self.reducer.combine(accumulator, item)
    }

    fn on_complete(&self, out: &mut Vec<O>, _key: &K, accumulator: A) -> anyhow::Result<()> {
        out.push(self.reducer.produce_result(accumulator));
        Ok(())
    }
}

/// Emits `f(key, left, right)` for every matched pair; unmatched items vanish.
pub struct InnerJoiner<F> {
    f: F,
}

impl<F> InnerJoiner<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<K, L, R, V, F> Joiner<K, L, R, V> for InnerJoiner<F>
where
    F: Fn(&K, &L, &R) -> V + Send + Sync + 'static,
{
    fn on_inner_join(&self, key: &K, lefts: Vec<L>, rights: Vec<R>, out: &mut Vec<V>) -> anyhow::Result<()> {
        for left in &lefts {
            for right in &rights {
                out.push((self.f)(key, left, right));
            }
        }
        Ok(())
    }

    fn on_left_join(&self, _key: &K, _left: L, _out: &mut Vec<V>) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_right_join(&self, _key: &K, _right: R, _out: &mut Vec<V>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Like [`InnerJoiner`], but unmatched left items are emitted with `None`.
pub struct LeftOuterJoiner<F> {
    f: F,
}

impl<F> LeftOuterJoiner<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<K, L, R, V, F> Joiner<K, L, R, V> for LeftOuterJoiner<F>
where
    F: Fn(&K, &L, Option<&R>) -> V + Send + Sync + 'static,
{
    fn on_inner_join(&self, key: &K, lefts: Vec<L>, rights: Vec<R>, out: &mut Vec<V>) -> anyhow::Result<()> {
        for left in &lefts {
            for right in &rights {
                out.push((self.f)(key, left, Some(right)));
            }
        }
        Ok(())
    }

    fn on_left_join(&self, key: &K, left: L, out: &mut Vec<V>) -> anyhow::Result<()> {
        out.push((self.f)(key, &left, None));
        Ok(())
    }

    fn on_right_join(&self, _key: &K, _right: R, _out: &mut Vec<V>) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) struct TypedJoiner<J, K, L, R, V> {
    name: String,
    joiner: J,
    _marker: PhantomData<fn(K, L, R) -> V>,
}

impl<J, K, L, R, V> TypedJoiner<J, K, L, R, V> {
    pub(crate) fn new(name: impl Into<String>, joiner: J) -> Self {
        Self {
            name: name.into(),
            joiner,
            _marker: PhantomData,
        }
    }
}

impl<J, K, L, R, V> ItemJoiner for TypedJoiner<J, K, L, R, V>
where
    J: Joiner<K, L, R, V>,
    K: KeyValue,
    L: Send + 'static,
    R: Send + 'static,
    V: Send + 'static,
{
    fn on_inner_join(&self, out: &mut Vec<Item>, key: &Key, lefts: Vec<Item>, rights: Vec<Item>) -> DataflowResult<()> {
        let lefts = lefts.into_iter().map(downcast::<L>).collect::<DataflowResult<Vec<_>>>()?;
        let rights = rights.into_iter().map(downcast::<R>).collect::<DataflowResult<Vec<_>>>()?;
        let mut values = Vec::new();
        self.joiner
            .on_inner_join(key_ref::<K>(key)?, lefts, rights, &mut values)
            .map_err(|e| DataflowError::operator(&self.name, e))?;
        box_all(values, out);
        Ok(())
    }

    fn on_left_join(&self, out: &mut Vec<Item>, key: &Key, left: Item) -> DataflowResult<()> {
        let mut values = Vec::new();
        self.joiner
            .on_left_join(key_ref::<K>(key)?, downcast::<L>(left)?, &mut values)
            .map_err(|e| DataflowError::operator(&self.name, e))?;
        box_all(values, out);
        Ok(())
    }

    fn on_right_join(&self, out: &mut Vec<Item>, key: &Key, right: Item) -> DataflowResult<()> {
        let mut values = Vec::new();
        self.joiner
            .on_right_join(key_ref::<K>(key)?, downcast::<R>(right)?, &mut values)
            .map_err(|e| DataflowError::operator(&self.name, e))?;
        box_all(values, out);
        Ok(())
    }
}
