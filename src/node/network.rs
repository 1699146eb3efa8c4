use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use streamgrid_macros::NodeEndpoints;

use super::{bind_input, bind_output, BindNode, NodeEndpoints};
use crate::client::DataflowClient;
use crate::error::DataflowResult;
use crate::observability::OperatorMetrics;
use crate::registry::ItemCodec;
use crate::server::ServerHandle;
use crate::stream::{ItemStream, StreamReceiver, StreamSender};
use crate::stream_id::StreamId;
use crate::task::TaskContext;
use crate::wire::Frame;

/// Pulls a stream uploaded on another partition into a local edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "Download")]
pub struct NodeDownload {
    pub item_type: String,
    pub address: SocketAddr,
    /// Stream id on the remote partition.
    pub stream_id: StreamId,
    #[output]
    pub output: StreamId,
}

impl NodeDownload {
    pub fn new(item_type: impl Into<String>, address: SocketAddr, stream_id: StreamId) -> Self {
        Self {
            item_type: item_type.into(),
            address,
            stream_id,
            output: StreamId::new(),
        }
    }
}

async fn forward(mut items: ItemStream, output: &StreamSender) -> DataflowResult<()> {
    while let Some(item) = items.next().await {
        output.send(item?).await?;
    }
    Ok(())
}

impl BindNode for NodeDownload {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let client = ctx.environment().require_instance::<DataflowClient>()?;
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let items = client.download_with_metrics(self.address, self.stream_id, &self.item_type, Some(metrics.clone()))?;
        let output = bind_output(ctx, self.output, &metrics);

        ctx.spawn_operator(name, metrics, async move {
            let result = forward(items, &output).await;
            output.close(&result).await;
            result
        });
        Ok(())
    }
}

/// Makes a local stream downloadable under its own id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, NodeEndpoints)]
#[node_meta(kind = "Upload")]
pub struct NodeUpload {
    pub item_type: String,
    #[input]
    pub stream_id: StreamId,
}

impl NodeUpload {
    pub fn new(item_type: impl Into<String>, stream_id: StreamId) -> Self {
        Self {
            item_type: item_type.into(),
            stream_id,
        }
    }
}

/// Stream the input to the downloader, ending with the end marker.
///
/// On an input failure the connection is dropped without the marker, which
/// the downloader reports as a truncated stream.
async fn upload(
    server: &ServerHandle,
    stream_id: StreamId,
    input: &mut StreamReceiver,
    codec: &Arc<dyn ItemCodec>,
    metrics: &OperatorMetrics,
) -> DataflowResult<()> {
    let mut connection = server.pending().await_downloader(stream_id).await?;
    tracing::debug!(stream = %stream_id, "upload started");
    while let Some(item) = input.next().await? {
        let payload = codec.encode(&item)?;
        metrics.record_bytes(payload.len());
        metrics.record_item_out();
        connection.feed(Frame::Data(payload)).await?;
    }
    connection.send(Frame::End).await?;
    connection.close().await?;
    Ok(())
}

impl BindNode for NodeUpload {
    fn create_and_bind(&self, ctx: &mut TaskContext) -> DataflowResult<()> {
        let server = ctx.environment().require_instance::<ServerHandle>()?;
        let codec = ctx.registry().codec(&self.item_type)?;
        let (name, metrics) = ctx.operator_metrics(Self::KIND);
        let mut input = bind_input(ctx, self.stream_id, &metrics);
        let stream_id = self.stream_id;
        let upload_metrics = metrics.clone();

        ctx.spawn_operator(name, metrics, async move {
            let result = upload(&server, stream_id, &mut input, &codec, &upload_metrics).await;
            if let Err(e) = &result {
                tracing::warn!(stream = %stream_id, error = %e, "upload failed");
            }
            result
        });
        Ok(())
    }
}
