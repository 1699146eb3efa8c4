//! Accepts Execute and Download commands for one partition.
//!
//! Each TCP connection carries exactly one command. Execute binds the node
//! batch in a fresh task scope and answers once it is wired. Download answers
//! `Ack` and hands the connection to the matching Upload operator, which may
//! register before or after the request arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::DataflowClient;
use crate::config::DataflowConfig;
use crate::environment::Environment;
use crate::error::{DataflowError, DataflowResult};
use crate::node::Node;
use crate::pending::PendingStreams;
use crate::stream_id::StreamId;
use crate::task::{TaskContext, TaskHandle};
use crate::wire::{decode_message, encode_message, Command, Connection, Frame, FrameCodec, Response};

/// Task-scope reference to the hosting server, used by Upload operators.
#[derive(Clone)]
pub struct ServerHandle {
    pending: Arc<PendingStreams<Connection>>,
    address: SocketAddr,
}

impl ServerHandle {
    pub fn pending(&self) -> &PendingStreams<Connection> {
        &self.pending
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

struct ServerShared {
    environment: Arc<Environment>,
    config: DataflowConfig,
    handle: ServerHandle,
}

pub struct DataflowServer {
    environment: Arc<Environment>,
    pending: Arc<PendingStreams<Connection>>,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl DataflowServer {
    /// `environment` is the process scope shared by every task; it must hold
    /// a `Registry` instance.
    pub fn new(environment: Environment) -> Self {
        Self {
            environment: Arc::new(environment),
            pending: Arc::new(PendingStreams::new()),
            local_addr: None,
            shutdown: CancellationToken::new(),
            accept_task: None,
        }
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Streams waiting for their Upload or Download counterpart.
    pub fn pending_streams(&self) -> usize {
        self.pending.len()
    }

    /// Bind `address` and start accepting connections. Port 0 picks a free port.
    pub async fn listen(&mut self, address: impl ToSocketAddrs) -> Result<SocketAddr> {
        if self.accept_task.is_some() {
            anyhow::bail!("server is already listening on {:?}", self.local_addr);
        }
        let listener = TcpListener::bind(address)
            .await
            .context("failed to bind dataflow server")?;
        let local_addr = listener.local_addr()?;
        let config = self
            .environment
            .instance::<DataflowConfig>()
            .map(|config| (*config).clone())
            .unwrap_or_default();
        let shared = Arc::new(ServerShared {
            environment: self.environment.clone(),
            config,
            handle: ServerHandle {
                pending: self.pending.clone(),
                address: local_addr,
            },
        });

        info!(address = %local_addr, "dataflow server listening");
        self.local_addr = Some(local_addr);
        self.accept_task = Some(tokio::spawn(accept_loop(listener, shared, self.shutdown.clone())));
        Ok(local_addr)
    }

    /// Stop accepting connections. Running tasks are left to finish.
    pub async fn close(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "accept loop panicked");
            }
        }
        info!(address = ?self.local_addr, "dataflow server closed");
    }
}

impl Drop for DataflowServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<ServerShared>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    tokio::spawn(handle_connection(stream, peer, shared.clone()));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
}

async fn read_command(connection: &mut Connection) -> DataflowResult<Command> {
    match connection.next().await {
        Some(Ok(Frame::Data(payload))) => decode_message(&payload),
        Some(Ok(Frame::End)) => Err(DataflowError::Protocol("end marker instead of command".into())),
        Some(Err(e)) => Err(e.into()),
        None => Err(DataflowError::Network("connection closed before command".into())),
    }
}

async fn send_response(connection: &mut Connection, response: &Response) -> DataflowResult<()> {
    connection.send(Frame::Data(encode_message(response)?)).await?;
    Ok(())
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, shared: Arc<ServerShared>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "failed to set TCP_NODELAY");
    }
    let mut connection = Framed::new(
        stream,
        FrameCodec::with_max_frame_size(shared.config.max_frame_size),
    );
    match read_command(&mut connection).await {
        Ok(Command::Execute { nodes }) => execute(&shared, connection, peer, nodes).await,
        Ok(Command::Download { stream_id }) => download(&shared, connection, peer, stream_id).await,
        Err(e) => warn!(%peer, error = %e, "invalid command"),
    }
}

/// Bind a node batch in a fresh task scope and start it.
fn start_task(shared: &ServerShared, nodes: &[Node]) -> DataflowResult<TaskHandle> {
    let mut scope = Environment::extend(shared.environment.clone());
    scope.set_instance(shared.handle.clone());
    if !shared.environment.has_instance::<DataflowClient>() {
        scope.set_instance(DataflowClient::from_environment(&shared.environment)?);
    }
    let mut ctx = TaskContext::new(Arc::new(scope))?;
    for node in nodes {
        node.create_and_bind(&mut ctx)?;
    }
    ctx.wire_all()
}

async fn execute(shared: &ServerShared, mut connection: Connection, peer: SocketAddr, nodes: Vec<Node>) {
    info!(%peer, nodes = nodes.len(), "execute command");
    let response = match start_task(shared, &nodes) {
        Ok(task) => {
            let operators = task.operator_count();
            tokio::spawn(async move {
                let metrics = task.metrics();
                match task.join().await {
                    Ok(()) => info!(operators, "task completed"),
                    Err(e) => warn!(error = %e, "task failed"),
                }
                debug!(report = %metrics.report(), "task metrics");
            });
            Response::Execute {
                node_ids: (0..nodes.len()).collect(),
            }
        }
        Err(e) => {
            warn!(%peer, error = %e, "task rejected");
            let uploads = nodes.iter().filter_map(|node| match node {
                Node::Upload(upload) => Some(upload.stream_id),
                _ => None,
            });
            let evicted = shared.handle.pending.evict_downloaders(uploads);
            if evicted > 0 {
                debug!(%peer, evicted, "dropped downloads of rejected task");
            }
            Response::Disconnect
        }
    };
    if let Err(e) = send_response(&mut connection, &response).await {
        debug!(%peer, error = %e, "execute response not delivered");
    }
}

async fn download(shared: &ServerShared, mut connection: Connection, peer: SocketAddr, stream_id: StreamId) {
    debug!(%peer, stream = %stream_id, "download command");
    if let Err(e) = send_response(&mut connection, &Response::Ack).await {
        warn!(%peer, stream = %stream_id, error = %e, "download acknowledgement failed");
        return;
    }
    if let Err(e) = shared.handle.pending.offer_downloader(stream_id, connection) {
        warn!(%peer, stream = %stream_id, error = %e, "download rejected");
    }
}
