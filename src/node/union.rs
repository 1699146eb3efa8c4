use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use streamgrid_macros::NodeEndpoints;

use super::{bind_input, bind_output, BindNode, NodeEndpoints};
use crate::error::DataflowResult;
use crate::stream::{ItemStream, StreamSender};
use crate::stream_id::StreamId;
use crate::task::TaskContext;

/// Interleaves items from all inputs in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "Union")]
pub struct NodeUnion {
    #[input]
    pub inputs: Vec<StreamId>,
    #[output]
    pub output: StreamId,
}

impl NodeUnion {
    pub fn new(inputs: Vec<StreamId>) -> Self {
        Self {
            inputs,
            output: StreamId::new(),
        }
    }
}

async fn union_items(mut inputs: stream::SelectAll<ItemStream>, output: &StreamSender) -> DataflowResult<()> {
    while let Some(item) = inputs.next().await {
        output.send(item?).await?;
    }
    Ok(())
}

impl BindNode for NodeUnion {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let inputs = stream::select_all(
            self.inputs
                .iter()
                .map(|id| bind_input(ctx, *id, &metrics).into_stream())
                .collect::<Vec<_>>(),
        );
        let output = bind_output(ctx, self.output, &metrics);

        ctx.spawn_operator(name, metrics, async move {
            let result = union_items(inputs, &output).await;
            output.close(&result).await;
            result
        });
        Ok(())
    }
}
