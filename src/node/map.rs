use serde::{Deserialize, Serialize};
use streamgrid_macros::NodeEndpoints;

use super::{bind_input, bind_output, BindNode, NodeEndpoints};
use crate::error::DataflowResult;
use crate::stream::{StreamReceiver, StreamSender};
use crate::registry::MapperFn;
use crate::stream_id::StreamId;
use crate::task::TaskContext;

/// Applies a named mapper to every item, preserving order and count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "Map")]
pub struct NodeMap {
    pub mapper: String,
    #[input]
    pub input: StreamId,
    #[output]
    pub output: StreamId,
}

impl NodeMap {
    pub fn new(mapper: impl Into<String>, input: StreamId) -> Self {
        Self {
            mapper: mapper.into(),
            input,
            output: StreamId::new(),
        }
    }
}

async fn map_items(input: &mut StreamReceiver, output: &StreamSender, mapper: &MapperFn) -> DataflowResult<()> {
    while let Some(item) = input.next().await? {
        output.send(mapper(item)?).await?;
    }
    Ok(())
}

impl BindNode for NodeMap {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let mapper = ctx.registry().mapper(&self.mapper)?;
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let mut input = bind_input(ctx, self.input, &metrics);
        let output = bind_output(ctx, self.output, &metrics);

        ctx.spawn_operator(name, metrics, async move {
            let result = map_items(&mut input, &output, &mapper).await;
            drop(input);
            output.close(&result).await;
            result
        });
        Ok(())
    }
}
