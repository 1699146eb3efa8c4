pub mod client;
pub mod collections;
pub mod collector;
pub mod config;
pub mod dataset;
pub mod environment;
pub mod error;
pub mod graph;
pub mod node;
pub mod observability;
pub mod pending;
pub mod registry;
pub mod server;
pub mod spill;
pub mod stream;
pub mod stream_id;
pub mod task;
pub mod wire;

pub use client::DataflowClient;
pub use collections::{IterableSource, ResultList};
pub use collector::Collector;
pub use config::DataflowConfig;
pub use environment::Environment;
pub use error::{DataflowError, DataflowResult, FrameError};
pub use graph::{DataflowGraph, Partition};
pub use node::Node;
pub use registry::{Registry, ReducerRef};
pub use server::DataflowServer;
pub use spill::{FileSpillStorage, MemorySpillStorage, SpillStorage};
pub use stream::{Item, ItemStream};
pub use stream_id::StreamId;
pub use task::{TaskContext, TaskHandle};
