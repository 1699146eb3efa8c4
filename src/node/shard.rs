use std::collections::VecDeque;

use futures::future;
use serde::{Deserialize, Serialize};
use streamgrid_macros::NodeEndpoints;

use super::{bind_input, bind_output, BindNode, NodeEndpoints};
use crate::error::{DataflowError, DataflowResult};
use crate::registry::{shard_index, KeyFn};
use crate::stream::{close_all, Item, StreamReceiver, StreamSender};
use crate::stream_id::StreamId;
use crate::task::TaskContext;

/// Routes each item to output `hash(key) mod n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "Shard")]
pub struct NodeShard {
    pub key_function: String,
    #[input]
    pub input: StreamId,
    #[output]
    pub outputs: Vec<StreamId>,
}

impl NodeShard {
    pub fn new(key_function: impl Into<String>, input: StreamId) -> Self {
        Self {
            key_function: key_function.into(),
            input,
            outputs: Vec::new(),
        }
    }

    /// Append a new output; returns its id.
    pub fn add_output(&mut self) -> StreamId {
        let id = StreamId::new();
        self.outputs.push(id);
        id
    }
}

/// Per-output queues of items routed to an output that was full.
///
/// A full output never stops routing to the others until its queue passes
/// `limit`, so one slow consumer cannot starve its siblings of `End`.
struct ShardQueues {
    queues: Vec<VecDeque<Item>>,
    limit: usize,
}

impl ShardQueues {
    fn new(outputs: usize, limit: usize) -> Self {
        Self {
            queues: (0..outputs).map(|_| VecDeque::new()).collect(),
            limit,
        }
    }

    /// Move queued items into every output with room, keeping per-output order.
    fn flush_ready(&mut self, outputs: &[StreamSender]) -> DataflowResult<()> {
        for (queue, output) in self.queues.iter_mut().zip(outputs) {
            while let Some(item) = queue.pop_front() {
                if let Some(item) = output.try_send(item)? {
                    queue.push_front(item);
                    break;
                }
            }
        }
        Ok(())
    }

    async fn route(&mut self, outputs: &[StreamSender], index: usize, item: Item) -> DataflowResult<()> {
        self.queues[index].push_back(item);
        self.flush_ready(outputs)?;
        while self.queues[index].len() > self.limit {
            if let Some(item) = self.queues[index].pop_front() {
                outputs[index].send(item).await?;
            }
        }
        Ok(())
    }
}

async fn shard_items(
    input: &mut StreamReceiver,
    outputs: &[StreamSender],
    queues: &mut ShardQueues,
    key_function: &KeyFn,
) -> DataflowResult<()> {
    while let Some(item) = input.next().await? {
        let key = key_function(&item)?;
        queues.route(outputs, shard_index(&*key, outputs.len()), item).await?;
    }
    Ok(())
}

/// Drain every output concurrently, ending each one as soon as its queue is empty.
async fn drain_and_finish(outputs: Vec<StreamSender>, queues: ShardQueues) -> DataflowResult<()> {
    let drains = outputs.into_iter().zip(queues.queues).map(|(output, queue)| async move {
        let result = output.send_all(queue).await;
        output.close(&result).await;
        result
    });
    future::join_all(drains).await.into_iter().collect()
}

impl BindNode for NodeShard {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        if self.outputs.is_empty() {
            return Err(DataflowError::Binding(format!("shard of {} has no outputs", self.input)));
        }
        let key_function = ctx.registry().key_function(&self.key_function)?;
        let mut queues = ShardQueues::new(self.outputs.len(), ctx.config().shard_buffer_items);
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let mut input = bind_input(ctx, self.input, &metrics);
        let outputs: Vec<StreamSender> = self
            .outputs
            .iter()
            .map(|id| bind_output(ctx, *id, &metrics))
            .collect();

        ctx.spawn_operator(name, metrics, async move {
            let result = shard_items(&mut input, &outputs, &mut queues, &key_function).await;
            drop(input);
            match result {
                Ok(()) => drain_and_finish(outputs, queues).await,
                Err(e) => {
                    close_all(outputs, &Err(e.clone())).await;
                    Err(e)
                }
            }
        });
        Ok(())
    }
}
