use std::cmp::Ordering;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use streamgrid_macros::NodeEndpoints;

use super::{bind_input, bind_output, merge_reduce, BindNode, MergeSource, NodeEndpoints};
use crate::error::{DataflowError, DataflowResult};
use crate::registry::{ComparatorFn, ItemCodec, ItemReducer, Key, KeyFn, Registry, ReducerRef};
use crate::spill::{RunId, SpillStorage};
use crate::stream::{Item, StreamReceiver, StreamSender};
use crate::stream_id::StreamId;
use crate::task::TaskContext;

pub const DEFAULT_SORT_MEMORY_LIMIT: usize = 1_000_000;

/// External sort: sorted runs of `memory_limit` items are spilled to the
/// environment's [`SpillStorage`] and merged at the end of input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "Sort")]
pub struct NodeSort {
    pub key_function: String,
    pub key_comparator: String,
    pub dedupe: bool,
    pub memory_limit: usize,
    /// Codec used for spilled items.
    pub item_type: String,
    #[input]
    pub input: StreamId,
    #[output]
    pub output: StreamId,
}

impl NodeSort {
    pub fn new(
        item_type: impl Into<String>,
        key_function: impl Into<String>,
        key_comparator: impl Into<String>,
        input: StreamId,
    ) -> Self {
        Self {
            key_function: key_function.into(),
            key_comparator: key_comparator.into(),
            dedupe: false,
            memory_limit: DEFAULT_SORT_MEMORY_LIMIT,
            item_type: item_type.into(),
            input,
            output: StreamId::new(),
        }
    }

    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.memory_limit = memory_limit.max(1);
        self
    }
}

fn sort_run(run: &mut [(Key, Item)], comparator: &ComparatorFn) -> DataflowResult<()> {
    // Surface key type errors before sorting; sort_by itself cannot fail.
    for pair in run.windows(2) {
        comparator(&pair[0].0, &pair[1].0)?;
    }
    run.sort_by(|a, b| comparator(&a.0, &b.0).unwrap_or(Ordering::Equal));
    Ok(())
}

struct Sorter {
    key_function: KeyFn,
    comparator: ComparatorFn,
    reducer: Arc<dyn ItemReducer>,
    memory_limit: usize,
    item_type: String,
    registry: Arc<Registry>,
    storage: Option<Arc<dyn SpillStorage>>,
    runs: Vec<RunId>,
}

impl Sorter {
    fn storage(&self) -> DataflowResult<Arc<dyn SpillStorage>> {
        self.storage.clone().ok_or_else(|| {
            DataflowError::MissingResource(format!(
                "spill storage for sorting more than {} items",
                self.memory_limit
            ))
        })
    }

    async fn spill(&mut self, run: &mut Vec<(Key, Item)>) -> DataflowResult<()> {
        let storage = self.storage()?;
        let codec = self.registry.codec(&self.item_type)?;
        sort_run(run, &self.comparator)?;
        let items = run.len();
        let encoded = run
            .drain(..)
            .map(|(_, item)| codec.encode(&item))
            .collect::<DataflowResult<Vec<_>>>()?;
        let id = storage.write_run(encoded).await?;
        tracing::debug!(run = id, items, "spilled sorted run");
        self.runs.push(id);
        Ok(())
    }

    async fn sort(&mut self, input: &mut StreamReceiver, output: &StreamSender) -> DataflowResult<()> {
        let mut run = Vec::new();
        while let Some(item) = input.next().await? {
            let key = (self.key_function)(&item)?;
            run.push((key, item));
            if run.len() >= self.memory_limit {
                self.spill(&mut run).await?;
            }
        }
        sort_run(&mut run, &self.comparator)?;

        // Spilled runs hold earlier items, so they come first and win key ties.
        let mut sources = Vec::with_capacity(self.runs.len() + 1);
        if !self.runs.is_empty() {
            let storage = self.storage()?;
            let codec: Arc<dyn ItemCodec> = self.registry.codec(&self.item_type)?;
            for run in &self.runs {
                let codec = codec.clone();
                let items = storage
                    .read_run(*run)
                    .await?
                    .map(move |bytes| bytes.and_then(|bytes| codec.decode(&bytes)))
                    .boxed();
                sources.push(MergeSource {
                    items,
                    key_function: self.key_function.clone(),
                    reducer: self.reducer.clone(),
                });
            }
        }
        sources.push(MergeSource {
            items: stream::iter(run.into_iter().map(|(_, item)| Ok(item))).boxed(),
            key_function: self.key_function.clone(),
            reducer: self.reducer.clone(),
        });
        merge_reduce(sources, &self.comparator, output).await
    }

    async fn cleanup(&mut self) {
        let Some(storage) = self.storage.clone() else { return };
        for run in self.runs.drain(..) {
            if let Err(e) = storage.remove_run(run).await {
                tracing::warn!(run, error = %e, "failed to remove spill run");
            }
        }
    }
}

impl BindNode for NodeSort {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let registry = ctx.environment().require_instance::<Registry>()?;
        let mut sorter = Sorter {
            key_function: registry.key_function(&self.key_function)?,
            comparator: registry.comparator(&self.key_comparator)?,
            reducer: registry.reducer(&ReducerRef::merge(self.dedupe))?,
            memory_limit: self.memory_limit.max(1),
            item_type: self.item_type.clone(),
            storage: ctx.environment().spill_storage(),
            registry,
            runs: Vec::new(),
        };
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let mut input = bind_input(ctx, self.input, &metrics);
        let output = bind_output(ctx, self.output, &metrics);

        ctx.spawn_operator(name, metrics, async move {
            let result = sorter.sort(&mut input, &output).await;
            drop(input);
            sorter.cleanup().await;
            output.close(&result).await;
            result
        });
        Ok(())
    }
}
