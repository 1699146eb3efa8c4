//! Partitioned node graph built on the driver.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::DataflowClient;
use crate::error::{DataflowError, DataflowResult};
use crate::node::Node;
use crate::stream_id::StreamId;

/// A worker process, identified by its server address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Partition {
    pub address: SocketAddr,
}

impl Partition {
    pub fn new(address: SocketAddr) -> Self {
        Self { address }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[derive(Debug, Clone)]
pub struct DataflowGraph {
    partitions: Vec<Partition>,
    nodes: BTreeMap<Partition, Vec<Node>>,
    stream_partitions: HashMap<StreamId, Partition>,
}

impl DataflowGraph {
    pub fn new(partitions: Vec<Partition>) -> Self {
        Self {
            partitions,
            nodes: BTreeMap::new(),
            stream_partitions: HashMap::new(),
        }
    }

    /// Partitions in shard order: shard output `i` is consumed on `partitions()[i]`.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn nodes(&self, partition: &Partition) -> &[Node] {
        self.nodes.get(partition).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    pub fn add_node(&mut self, partition: Partition, node: impl Into<Node>) {
        let node = node.into();
        for output in node.outputs() {
            self.stream_partitions.insert(output, partition);
        }
        self.nodes.entry(partition).or_default().push(node);
    }

    /// Add a node with a single output and return that output.
    pub fn add_node_stream(&mut self, partition: Partition, node: impl Into<Node>) -> DataflowResult<StreamId> {
        let node = node.into();
        let outputs = node.outputs();
        let [output] = outputs.as_slice() else {
            return Err(DataflowError::Binding(format!(
                "{} node has {} outputs, expected one",
                node.kind(),
                outputs.len()
            )));
        };
        let output = *output;
        self.add_node(partition, node);
        Ok(output)
    }

    pub fn partition_of_stream(&self, stream: StreamId) -> Option<Partition> {
        self.stream_partitions.get(&stream).copied()
    }

    pub(crate) fn partition_of(&self, stream: StreamId) -> DataflowResult<Partition> {
        self.partition_of_stream(stream)
            .ok_or_else(|| DataflowError::Binding(format!("stream {} is not produced by any partition", stream)))
    }

    /// Ship every partition's batch and wait until all of them are wired.
    pub async fn execute(&self, client: &DataflowClient) -> Result<()> {
        let submissions = self.nodes.iter().map(|(partition, nodes)| async move {
            client
                .execute_acknowledged(partition.address, nodes.clone())
                .await
                .with_context(|| format!("executing {} nodes on {}", nodes.len(), partition))
        });
        futures::future::try_join_all(submissions).await?;
        tracing::info!(partitions = self.nodes.len(), nodes = self.node_count(), "graph executed");
        Ok(())
    }

    /// Graphviz rendering with one cluster per partition.
    pub fn to_graphviz(&self) -> String {
        let mut ids: HashMap<(Partition, usize), String> = HashMap::new();
        let mut producers: HashMap<StreamId, String> = HashMap::new();
        let mut out = String::from("digraph {\n");

        for (p, (partition, nodes)) in self.nodes.iter().enumerate() {
            out.push_str(&format!("  subgraph cluster_{} {{\n    label=\"{}\";\n", p, partition));
            for (n, node) in nodes.iter().enumerate() {
                let id = format!("n{}_{}", p, n);
                out.push_str(&format!("    {} [label=\"{}\"];\n", id, node.kind()));
                for output in node.outputs() {
                    producers.insert(output, id.clone());
                }
                ids.insert((*partition, n), id);
            }
            out.push_str("  }\n");
        }

        for (partition, nodes) in &self.nodes {
            for (n, node) in nodes.iter().enumerate() {
                let Some(id) = ids.get(&(*partition, n)) else { continue };
                for input in node.inputs() {
                    if let Some(producer) = producers.get(&input) {
                        out.push_str(&format!("  {} -> {} [label=\"{}\"];\n", producer, id, input));
                    }
                }
                if let Node::Download(download) = node {
                    if let Some(producer) = producers.get(&download.stream_id) {
                        out.push_str(&format!(
                            "  {} -> {} [style=dashed, label=\"{}\"];\n",
                            producer, id, download.stream_id
                        ));
                    }
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

impl fmt::Display for DataflowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (partition, nodes) in &self.nodes {
            let json = serde_json::to_string_pretty(nodes).map_err(|_| fmt::Error)?;
            writeln!(f, "--- {}", partition)?;
            writeln!(f, "{}", json)?;
        }
        Ok(())
    }
}
