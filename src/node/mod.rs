//! Operator descriptors.
//!
//! A [`Node`] is plain data: stream ids, function names and type tokens. It is
//! built by a planner, shipped to the owning partition inside an Execute
//! command and turned into a live operator by [`Node::create_and_bind`].

mod collection;
mod filter;
mod join;
mod map;
mod merge;
mod network;
mod reduce;
mod shard;
mod sort;
mod union;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DataflowResult;
use crate::observability::OperatorMetrics;
use crate::stream::{StreamReceiver, StreamSender};
use crate::stream_id::StreamId;
use crate::task::TaskContext;

pub use collection::{NodeConsumerToList, NodeSupplierOfIterable};
pub use filter::NodeFilter;
pub use join::NodeJoin;
pub use map::NodeMap;
pub use merge::NodeMerge;
pub use network::{NodeDownload, NodeUpload};
pub use reduce::{NodeReduce, NodeReduceSimple, ReduceInput};
pub use shard::NodeShard;
pub use sort::{NodeSort, DEFAULT_SORT_MEMORY_LIMIT};
pub use union::NodeUnion;

pub(crate) use merge::{merge_reduce, MergeSource};

/// Stream ids a node consumes and produces.
pub trait NodeEndpoints {
    /// Wire discriminator of the node type.
    const KIND: &'static str;

    fn inputs(&self) -> Vec<StreamId>;

    fn outputs(&self) -> Vec<StreamId>;
}

/// Field types that hold stream ids.
pub trait StreamIdSet {
    fn collect_ids(&self, ids: &mut Vec<StreamId>);
}

impl StreamIdSet for StreamId {
    fn collect_ids(&self, ids: &mut Vec<StreamId>) {
        ids.push(*self);
    }
}

impl StreamIdSet for Vec<StreamId> {
    fn collect_ids(&self, ids: &mut Vec<StreamId>) {
        ids.extend(self.iter().copied());
    }
}

/// Instantiates the live operator of a node inside a task.
pub trait BindNode {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Node {
    Map(NodeMap),
    Filter(NodeFilter),
    Shard(NodeShard),
    Merge(NodeMerge),
    Sort(NodeSort),
    Reduce(NodeReduce),
    ReduceSimple(NodeReduceSimple),
    Join(NodeJoin),
    Union(NodeUnion),
    Download(NodeDownload),
    Upload(NodeUpload),
    SupplierOfIterable(NodeSupplierOfIterable),
    ConsumerToList(NodeConsumerToList),
}

macro_rules! dispatch {
    ($node:expr, $inner:ident => $body:expr) => {
        match $node {
            Node::Map($inner) => $body,
            Node::Filter($inner) => $body,
            Node::Shard($inner) => $body,
            Node::Merge($inner) => $body,
            Node::Sort($inner) => $body,
            Node::Reduce($inner) => $body,
            Node::ReduceSimple($inner) => $body,
            Node::Join($inner) => $body,
            Node::Union($inner) => $body,
            Node::Download($inner) => $body,
            Node::Upload($inner) => $body,
            Node::SupplierOfIterable($inner) => $body,
            Node::ConsumerToList($inner) => $body,
        }
    };
}

fn kind_of<N: NodeEndpoints>(_node: &N) -> &'static str {
    N::KIND
}

impl Node {
    pub fn kind(&self) -> &'static str {
        dispatch!(self, node => kind_of(node))
    }

    pub fn inputs(&self) -> Vec<StreamId> {
        dispatch!(self, node => node.inputs())
    }

    pub fn outputs(&self) -> Vec<StreamId> {
        dispatch!(self, node => node.outputs())
    }

    pub fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        dispatch!(self, node => node.create_and_bind(ctx))
    }
}

macro_rules! node_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Node {
                fn from(node: $ty) -> Self {
                    Node::$variant(node)
                }
            }
        )*
    };
}

node_from!(
    Map(NodeMap),
    Filter(NodeFilter),
    Shard(NodeShard),
    Merge(NodeMerge),
    Sort(NodeSort),
    Reduce(NodeReduce),
    ReduceSimple(NodeReduceSimple),
    Join(NodeJoin),
    Union(NodeUnion),
    Download(NodeDownload),
    Upload(NodeUpload),
    SupplierOfIterable(NodeSupplierOfIterable),
    ConsumerToList(NodeConsumerToList),
);

pub(crate) fn bind_input(ctx: &mut TaskContext, id: StreamId, metrics: &Arc<OperatorMetrics>) -> StreamReceiver {
    let mut receiver = ctx.bind_channel(id);
    receiver.attach_metrics(metrics.clone());
    receiver
}

pub(crate) fn bind_output(ctx: &mut TaskContext, id: StreamId, metrics: &Arc<OperatorMetrics>) -> StreamSender {
    let mut sender = ctx.export(id);
    sender.attach_metrics(metrics.clone());
    sender
}
