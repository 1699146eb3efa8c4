//! Issues commands to remote partitions.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::config::DataflowConfig;
use crate::environment::Environment;
use crate::error::{DataflowError, DataflowResult};
use crate::node::Node;
use crate::observability::OperatorMetrics;
use crate::registry::Registry;
use crate::stream::{downcast, ItemStream};
use crate::stream_id::StreamId;
use crate::wire::{data_stream, decode_message, encode_message, Command, Connection, Frame, FrameCodec, Response};

#[derive(Clone)]
pub struct DataflowClient {
    registry: Arc<Registry>,
    config: DataflowConfig,
}

impl DataflowClient {
    pub fn new(registry: Arc<Registry>, config: DataflowConfig) -> Self {
        Self { registry, config }
    }

    /// Build a client from the registry and config instances of an environment.
    pub fn from_environment(environment: &Environment) -> DataflowResult<Self> {
        let registry = environment.require_instance::<Registry>()?;
        let config = environment
            .instance::<DataflowConfig>()
            .map(|config| (*config).clone())
            .unwrap_or_default();
        Ok(Self::new(registry, config))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    async fn connect(&self, address: SocketAddr) -> DataflowResult<Connection> {
        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(address))
            .await
            .map_err(|_| DataflowError::Network(format!("connecting to {} timed out", address)))?
            .map_err(|e| DataflowError::Network(format!("connecting to {}: {}", address, e)))?;
        stream.set_nodelay(true)?;
        Ok(Framed::new(
            stream,
            FrameCodec::with_max_frame_size(self.config.max_frame_size),
        ))
    }

    /// Send a node batch without waiting for the partition to accept it.
    pub async fn execute(&self, address: SocketAddr, nodes: Vec<Node>) -> Result<()> {
        let mut connection = self.connect(address).await?;
        send_command(&mut connection, &Command::Execute { nodes }).await?;
        connection.close().await?;
        Ok(())
    }

    /// Send a node batch and wait until the partition has wired it.
    ///
    /// Returns the indexes of the accepted nodes.
    pub async fn execute_acknowledged(&self, address: SocketAddr, nodes: Vec<Node>) -> Result<Vec<usize>> {
        let mut connection = self.connect(address).await?;
        send_command(&mut connection, &Command::Execute { nodes }).await?;
        match read_response(&mut connection).await? {
            Response::Execute { node_ids } => Ok(node_ids),
            Response::Disconnect => Err(anyhow!("partition {} rejected the task", address)),
            Response::Ack => Err(anyhow!("unexpected Ack from {} for Execute", address)),
        }
    }

    /// Items of a remote stream. The connection is opened on first poll.
    pub fn download(&self, address: SocketAddr, stream_id: StreamId, item_type: &str) -> DataflowResult<ItemStream> {
        self.download_with_metrics(address, stream_id, item_type, None)
    }

    pub(crate) fn download_with_metrics(
        &self,
        address: SocketAddr,
        stream_id: StreamId,
        item_type: &str,
        metrics: Option<Arc<OperatorMetrics>>,
    ) -> DataflowResult<ItemStream> {
        let codec = self.registry.codec(item_type)?;
        let client = self.clone();
        let opened = async move {
            let mut connection = client.connect(address).await?;
            send_command(&mut connection, &Command::Download { stream_id }).await?;
            match read_response(&mut connection).await? {
                Response::Ack => {
                    tracing::debug!(%address, stream = %stream_id, "download accepted");
                    Ok(data_stream(connection))
                }
                other => Err(DataflowError::Protocol(format!(
                    "unexpected response to Download: {:?}",
                    other
                ))),
            }
        };
        Ok(stream::once(opened)
            .try_flatten()
            .map(move |payload| {
                let payload = payload?;
                if let Some(metrics) = &metrics {
                    metrics.record_bytes(payload.len());
                }
                codec.decode(&payload)
            })
            .boxed())
    }

    pub fn download_typed<T: Send + 'static>(
        &self,
        address: SocketAddr,
        stream_id: StreamId,
        item_type: &str,
    ) -> DataflowResult<BoxStream<'static, DataflowResult<T>>> {
        Ok(self
            .download(address, stream_id, item_type)?
            .map(|item| item.and_then(downcast::<T>))
            .boxed())
    }
}

pub(crate) async fn send_command(connection: &mut Connection, command: &Command) -> DataflowResult<()> {
    connection.send(Frame::Data(encode_message(command)?)).await?;
    Ok(())
}

pub(crate) async fn read_response(connection: &mut Connection) -> DataflowResult<Response> {
    match connection.next().await {
        Some(Ok(Frame::Data(payload))) => decode_message(&payload),
        Some(Ok(Frame::End)) => Err(DataflowError::Protocol("end marker instead of response".into())),
        Some(Err(e)) => Err(e.into()),
        None => Err(DataflowError::Network("connection closed before response".into())),
    }
}
