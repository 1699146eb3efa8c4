//! Streams a dataset back to the driver.

use std::sync::Arc;

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};

use crate::client::DataflowClient;
use crate::dataset::Dataset;
use crate::error::DataflowResult;
use crate::graph::DataflowGraph;
use crate::node::NodeUpload;
use crate::stream::{downcast, ItemStream};

pub struct Collector<D> {
    input: D,
    client: Arc<DataflowClient>,
}

impl<D: Dataset> Collector<D> {
    pub fn new(input: D, client: Arc<DataflowClient>) -> Self {
        Self { input, client }
    }

    /// Add an upload for every channel and return their concatenation in
    /// partition order.
    ///
    /// Downloads connect lazily, so the graph can be executed after this
    /// returns. The stream ends after the first error.
    pub fn compile(&self, graph: &mut DataflowGraph) -> DataflowResult<ItemStream> {
        let item_type = self.input.value_type();
        let mut downloads = Vec::new();
        for channel in self.input.channels(graph)? {
            let partition = graph.partition_of(channel)?;
            graph.add_node(partition, NodeUpload::new(item_type, channel));
            downloads.push(self.client.download(partition.address, channel, item_type)?);
        }

        let items = stream::iter(downloads)
            .flatten()
            .scan(false, |failed, item| {
                if *failed {
                    return future::ready(None);
                }
                *failed = item.is_err();
                future::ready(Some(item))
            });
        Ok(items.boxed())
    }

    pub fn compile_typed<T: Send + 'static>(
        &self,
        graph: &mut DataflowGraph,
    ) -> DataflowResult<BoxStream<'static, DataflowResult<T>>> {
        Ok(self.compile(graph)?.map(|item| item.and_then(downcast::<T>)).boxed())
    }
}
