use serde::{Deserialize, Serialize};
use streamgrid_macros::NodeEndpoints;

use super::{bind_input, bind_output, BindNode, NodeEndpoints};
use crate::collections::{IterableSource, ListSink};
use crate::error::DataflowResult;
use crate::stream::StreamReceiver;
use crate::stream_id::StreamId;
use crate::task::TaskContext;

/// Streams a driver-local collection stored in the environment under `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "SupplierOfIterable")]
pub struct NodeSupplierOfIterable {
    pub key: String,
    #[output]
    pub output: StreamId,
}

impl NodeSupplierOfIterable {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            output: StreamId::new(),
        }
    }
}

impl BindNode for NodeSupplierOfIterable {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let source = ctx.environment().require::<IterableSource>(&self.key)?;
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let output = bind_output(ctx, self.output, &metrics);

        ctx.spawn_operator(name, metrics, async move {
            let result = output.send_all(source.items()).await;
            output.close(&result).await;
            result
        });
        Ok(())
    }
}

/// Appends its input to the result list stored in the environment under `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "ConsumerToList")]
pub struct NodeConsumerToList {
    #[input]
    pub input: StreamId,
    pub key: String,
}

impl NodeConsumerToList {
    pub fn new(input: StreamId, key: impl Into<String>) -> Self {
        Self {
            input,
            key: key.into(),
        }
    }
}

async fn consume_items(input: &mut StreamReceiver, sink: &ListSink) -> DataflowResult<()> {
    while let Some(item) = input.next().await? {
        sink.accept(item)?;
    }
    Ok(())
}

impl BindNode for NodeConsumerToList {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let sink = ctx.environment().list_sink(&self.key)?;
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let mut input = bind_input(ctx, self.input, &metrics);

        ctx.spawn_operator(name, metrics, async move {
            let result = consume_items(&mut input, &sink).await;
            drop(input);
            sink.complete(result.clone());
            result
        });
        Ok(())
    }
}
