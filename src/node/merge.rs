use std::cmp::Ordering;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use streamgrid_macros::NodeEndpoints;

use super::{bind_input, bind_output, BindNode, NodeEndpoints};
use crate::error::DataflowResult;
use crate::registry::{ComparatorFn, ItemReducer, Key, KeyFn, ReducerRef};
use crate::stream::{Item, ItemStream, StreamSender};
use crate::stream_id::StreamId;
use crate::task::TaskContext;

/// K-way merge of inputs that are each sorted by the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "Merge")]
pub struct NodeMerge {
    pub key_function: String,
    pub key_comparator: String,
    /// Collapse equal keys to their first item.
    pub dedupe: bool,
    #[input]
    pub inputs: Vec<StreamId>,
    #[output]
    pub output: StreamId,
}

impl NodeMerge {
    pub fn new(key_function: impl Into<String>, key_comparator: impl Into<String>, dedupe: bool) -> Self {
        Self {
            key_function: key_function.into(),
            key_comparator: key_comparator.into(),
            dedupe,
            inputs: Vec::new(),
            output: StreamId::new(),
        }
    }

    pub fn add_input(&mut self, input: StreamId) {
        self.inputs.push(input);
    }
}

impl BindNode for NodeMerge {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let key_function = ctx.registry().key_function(&self.key_function)?;
        let comparator = ctx.registry().comparator(&self.key_comparator)?;
        let reducer = ctx.registry().reducer(&ReducerRef::merge(self.dedupe))?;
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let sources = self
            .inputs
            .iter()
            .map(|id| MergeSource {
                items: bind_input(ctx, *id, &metrics).into_stream(),
                key_function: key_function.clone(),
                reducer: reducer.clone(),
            })
            .collect();
        let output = bind_output(ctx, self.output, &metrics);

        ctx.spawn_operator(name, metrics, async move {
            let result = merge_reduce(sources, &comparator, &output).await;
            output.close(&result).await;
            result
        });
        Ok(())
    }
}

/// One sorted input of a merge, with the key function and reducer for its items.
pub(crate) struct MergeSource {
    pub items: ItemStream,
    pub key_function: KeyFn,
    pub reducer: Arc<dyn ItemReducer>,
}

impl MergeSource {
    async fn pull(&mut self) -> DataflowResult<Option<(Key, Item)>> {
        match self.items.next().await {
            None => Ok(None),
            Some(item) => {
                let item = item?;
                let key = (self.key_function)(&item)?;
                Ok(Some((key, item)))
            }
        }
    }
}

struct Group {
    key: Key,
    accumulator: Item,
    /// Input that supplied the latest item; its reducer completes the group.
    source: usize,
}

/// Merge sorted sources and fold every key group with the reducers.
///
/// Holds at most one pending item per source. On equal keys the source with
/// the lower index goes first. The sources are dropped before returning, so
/// a failure also closes every input.
pub(crate) async fn merge_reduce(
    mut sources: Vec<MergeSource>,
    comparator: &ComparatorFn,
    output: &StreamSender,
) -> DataflowResult<()> {
    let mut heads = Vec::with_capacity(sources.len());
    for source in sources.iter_mut() {
        heads.push(source.pull().await?);
    }

    let mut out = Vec::new();
    let mut group: Option<Group> = None;

    loop {
        let mut next: Option<usize> = None;
        for (i, head) in heads.iter().enumerate() {
            let Some((key, _)) = head else { continue };
            next = match next {
                Some(j) => match &heads[j] {
                    Some((best, _)) if comparator(key, best)? == Ordering::Less => Some(i),
                    _ => Some(j),
                },
                None => Some(i),
            };
        }
        let Some(i) = next else { break };
        let Some((key, item)) = heads[i].take() else { break };
        heads[i] = sources[i].pull().await?;

        group = Some(match group.take() {
            Some(current) if comparator(&current.key, &key)? == Ordering::Equal => {
                let accumulator = sources[i]
                    .reducer
                    .on_next_item(&mut out, &current.key, item, current.accumulator)?;
                Group {
                    key: current.key,
                    accumulator,
                    source: i,
                }
            }
            previous => {
                if let Some(done) = previous {
                    sources[done.source]
                        .reducer
                        .on_complete(&mut out, &done.key, done.accumulator)?;
                }
                let accumulator = sources[i].reducer.on_first_item(&mut out, &key, item)?;
                Group {
                    key,
                    accumulator,
                    source: i,
                }
            }
        });
        output.send_all(out.drain(..)).await?;
    }

    if let Some(done) = group {
        sources[done.source]
            .reducer
            .on_complete(&mut out, &done.key, done.accumulator)?;
        output.send_all(out.drain(..)).await?;
    }
    Ok(())
}
