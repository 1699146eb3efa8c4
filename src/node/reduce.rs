use serde::{Deserialize, Serialize};
use streamgrid_macros::NodeEndpoints;

use super::{bind_input, bind_output, merge_reduce, BindNode, MergeSource, NodeEndpoints, StreamIdSet};
use crate::error::DataflowResult;
use crate::registry::ReducerRef;
use crate::stream_id::StreamId;
use crate::task::TaskContext;

/// Key function and reducer for one input of a [`NodeReduce`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceInput {
    pub stream_id: StreamId,
    pub key_function: String,
    pub reducer: ReducerRef,
}

impl StreamIdSet for Vec<ReduceInput> {
    fn collect_ids(&self, ids: &mut Vec<StreamId>) {
        ids.extend(self.iter().map(|input| input.stream_id));
    }
}

/// Keyed reduce over several sorted inputs, each with its own key function
/// and reducer. Inputs are kept ordered by stream id, one entry per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "Reduce")]
pub struct NodeReduce {
    pub key_comparator: String,
    #[input]
    pub inputs: Vec<ReduceInput>,
    #[output]
    pub output: StreamId,
}

impl NodeReduce {
    pub fn new(key_comparator: impl Into<String>) -> Self {
        Self {
            key_comparator: key_comparator.into(),
            inputs: Vec::new(),
            output: StreamId::new(),
        }
    }

    pub fn add_input(&mut self, stream_id: StreamId, key_function: impl Into<String>, reducer: ReducerRef) {
        let input = ReduceInput {
            stream_id,
            key_function: key_function.into(),
            reducer,
        };
        match self.inputs.binary_search_by_key(&stream_id, |input| input.stream_id) {
            Ok(index) => self.inputs[index] = input,
            Err(index) => self.inputs.insert(index, input),
        }
    }
}

impl BindNode for NodeReduce {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let comparator = ctx.registry().comparator(&self.key_comparator)?;
        let mut resolved = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            resolved.push((
                input.stream_id,
                ctx.registry().key_function(&input.key_function)?,
                ctx.registry().reducer(&input.reducer)?,
            ));
        }
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let sources = resolved
            .into_iter()
            .map(|(id, key_function, reducer)| MergeSource {
                items: bind_input(ctx, id, &metrics).into_stream(),
                key_function,
                reducer,
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

/// Keyed reduce with one key function and reducer shared by all inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "ReduceSimple")]
pub struct NodeReduceSimple {
    pub key_function: String,
    pub key_comparator: String,
    pub reducer: ReducerRef,
    #[input]
    pub inputs: Vec<StreamId>,
    #[output]
    pub output: StreamId,
}

impl NodeReduceSimple {
    pub fn new(key_function: impl Into<String>, key_comparator: impl Into<String>, reducer: ReducerRef) -> Self {
        Self {
            key_function: key_function.into(),
            key_comparator: key_comparator.into(),
            reducer,
            inputs: Vec::new(),
            output: StreamId::new(),
        }
    }

    pub fn add_input(&mut self, input: StreamId) {
        self.inputs.push(input);
    }
}

impl BindNode for NodeReduceSimple {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let key_function = ctx.registry().key_function(&self.key_function)?;
        let comparator = ctx.registry().comparator(&self.key_comparator)?;
        let reducer = ctx.registry().reducer(&self.reducer)?;
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
