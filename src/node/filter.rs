use serde::{Deserialize, Serialize};
use streamgrid_macros::NodeEndpoints;

use super::{bind_input, bind_output, BindNode, NodeEndpoints};
use crate::error::DataflowResult;
use crate::registry::PredicateFn;
use crate::stream::{StreamReceiver, StreamSender};
use crate::stream_id::StreamId;
use crate::task::TaskContext;

/// Keeps the items that satisfy a named predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "Filter")]
pub struct NodeFilter {
    pub predicate: String,
    #[input]
    pub input: StreamId,
    #[output]
    pub output: StreamId,
}

impl NodeFilter {
    pub fn new(predicate: impl Into<String>, input: StreamId) -> Self {
        Self {
            predicate: predicate.into(),
            input,
            output: StreamId::new(),
        }
    }
}

async fn filter_items(
    input: &mut StreamReceiver,
    output: &StreamSender,
    predicate: &PredicateFn,
) -> DataflowResult<()> {
    while let Some(item) = input.next().await? {
        if predicate(&item)? {
            output.send(item).await?;
        }
    }
    Ok(())
}

impl BindNode for NodeFilter {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let predicate = ctx.registry().predicate(&self.predicate)?;
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let mut input = bind_input(ctx, self.input, &metrics);
        let output = bind_output(ctx, self.output, &metrics);

        ctx.spawn_operator(name, metrics, async move {
            let result = filter_items(&mut input, &output, &predicate).await;
            drop(input);
            output.close(&result).await;
            result
        });
        Ok(())
    }
}
