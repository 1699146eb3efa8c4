//! Per-task binding of stream endpoints.
//!
//! Nodes register the consumer side of their inputs with [`TaskContext::bind_channel`]
//! and the producer side of their outputs with [`TaskContext::export`], in any
//! order. The channel for an edge is created on the first registration and
//! handed to the second. Operators are queued with
//! [`TaskContext::spawn_operator`] and only start in [`TaskContext::wire_all`],
//! after every edge has been checked, so a binding error never leaves a
//! partially running task behind.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::DataflowConfig;
use crate::environment::Environment;
use crate::error::{DataflowError, DataflowResult};
use crate::observability::{MetricsCollector, OperatorMetrics};
use crate::registry::Registry;
use crate::stream::{channel, StreamReceiver, StreamSender};
use crate::stream_id::StreamId;

/// Registration state of one edge. Absence from the table means unbound.
#[derive(Debug)]
pub enum Binding {
    /// The producer took its sender; the receiver waits for the consumer.
    ProducerRegistered(StreamReceiver),
    /// The consumer took its receiver; the sender waits for the producer.
    ConsumerRegistered(StreamSender),
    Wired,
    Conflict(&'static str),
}

impl Binding {
    fn describe(&self) -> &'static str {
        match self {
            Self::ProducerRegistered(_) => "no consumer",
            Self::ConsumerRegistered(_) => "no producer",
            Self::Wired => "wired",
            Self::Conflict(reason) => reason,
        }
    }
}

/// Task lifecycle states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Binding,
    Running { operators: usize },
    Completed,
    Failed { error_msg: String },
}

impl TaskState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, target),
            (Binding, Running { .. }) | (Binding, Failed { .. }) | (Running { .. }, Completed) | (Running { .. }, Failed { .. })
        )
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Binding => "Binding",
            Self::Running { .. } => "Running",
            Self::Completed => "Completed",
            Self::Failed { .. } => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Binding
    }
}

struct PendingOperator {
    name: String,
    metrics: Arc<OperatorMetrics>,
    future: BoxFuture<'static, DataflowResult<()>>,
}

pub struct TaskContext {
    environment: Arc<Environment>,
    registry: Arc<Registry>,
    config: DataflowConfig,
    bindings: HashMap<StreamId, Binding>,
    operators: Vec<PendingOperator>,
    metrics: MetricsCollector,
    state: TaskState,
}

impl TaskContext {
    /// Requires a [`Registry`] instance in the environment. The config
    /// instance is optional and defaults otherwise.
    pub fn new(environment: Arc<Environment>) -> DataflowResult<Self> {
        let registry = environment.require_instance::<Registry>()?;
        let config = environment
            .instance::<DataflowConfig>()
            .map(|config| (*config).clone())
            .unwrap_or_default();
        Ok(Self {
            environment,
            registry,
            config,
            bindings: HashMap::new(),
            operators: Vec::new(),
            metrics: MetricsCollector::new(),
            state: TaskState::Binding,
        })
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &DataflowConfig {
        &self.config
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn binding(&self, id: StreamId) -> Option<&Binding> {
        self.bindings.get(&id)
    }

    /// Register the consumer side of `id`.
    pub fn bind_channel(&mut self, id: StreamId) -> StreamReceiver {
        match self.bindings.remove(&id) {
            None => {
                let (sender, receiver) = channel(id, self.config.channel_capacity);
                self.bindings.insert(id, Binding::ConsumerRegistered(sender));
                receiver
            }
            Some(Binding::ProducerRegistered(receiver)) => {
                tracing::trace!(stream = %id, "stream wired");
                self.bindings.insert(id, Binding::Wired);
                receiver
            }
            Some(_) => self.conflict(id, "two consumers"),
        }
    }

    /// Register the producer side of `id`.
    pub fn export(&mut self, id: StreamId) -> StreamSender {
        match self.bindings.remove(&id) {
            None => {
                let (sender, receiver) = channel(id, self.config.channel_capacity);
                self.bindings.insert(id, Binding::ProducerRegistered(receiver));
                sender
            }
            Some(Binding::ConsumerRegistered(sender)) => {
                tracing::trace!(stream = %id, "stream wired");
                self.bindings.insert(id, Binding::Wired);
                sender
            }
            Some(_) => {
                let (sender, _) = self.conflict_channel(id, "two producers");
                sender
            }
        }
    }

    fn conflict(&mut self, id: StreamId, reason: &'static str) -> StreamReceiver {
        self.conflict_channel(id, reason).1
    }

    fn conflict_channel(&mut self, id: StreamId, reason: &'static str) -> (StreamSender, StreamReceiver) {
        tracing::warn!(stream = %id, reason, "conflicting stream registration");
        self.bindings.insert(id, Binding::Conflict(reason));
        channel(id, 1)
    }

    /// Metrics for a new operator; the returned name is unique in this task.
    pub fn operator_metrics(&mut self, kind: &str) -> (String, Arc<OperatorMetrics>) {
        let name = format!("{}-{}", kind, self.metrics.len());
        let metrics = Arc::new(OperatorMetrics::new(name.clone()));
        self.metrics.register(name.clone(), metrics.clone());
        (name, metrics)
    }

    /// Queue an operator; it starts when the task is wired.
    pub fn spawn_operator<F>(&mut self, name: String, metrics: Arc<OperatorMetrics>, future: F)
    where
        F: Future<Output = DataflowResult<()>> + Send + 'static,
    {
        self.operators.push(PendingOperator {
            name,
            metrics,
            future: future.boxed(),
        });
    }

    fn transition_to(&mut self, new_state: TaskState) -> DataflowResult<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(DataflowError::Binding(format!(
                "Invalid state transition: {} -> {}",
                self.state.name(),
                new_state.name()
            )));
        }
        self.state = new_state;
        Ok(())
    }

    /// Check every edge and start all operators.
    pub fn wire_all(mut self) -> DataflowResult<TaskHandle> {
        let mut unbound: Vec<(StreamId, &'static str)> = self
            .bindings
            .iter()
            .filter(|(_, binding)| !matches!(binding, Binding::Wired))
            .map(|(id, binding)| (*id, binding.describe()))
            .collect();

        if !unbound.is_empty() {
            unbound.sort();
            let listing = unbound
                .iter()
                .map(|(id, reason)| format!("{} ({})", id, reason))
                .collect::<Vec<_>>()
                .join(", ");
            let error = DataflowError::Binding(format!("unbound streams: {}", listing));
            tracing::warn!(%error, "task binding failed");
            self.transition_to(TaskState::Failed {
                error_msg: error.to_string(),
            })?;
            return Err(error);
        }

        let operators = std::mem::take(&mut self.operators);
        self.transition_to(TaskState::Running {
            operators: operators.len(),
        })?;

        let handles = operators
            .into_iter()
            .map(|operator| {
                let PendingOperator { name, metrics, future } = operator;
                let operator_name = name.clone();
                let handle = tokio::spawn(async move {
                    let result = future.await;
                    if let Err(e) = &result {
                        metrics.record_error();
                        tracing::debug!(operator = %operator_name, error = %e, "operator failed");
                    }
                    result
                });
                (name, handle)
            })
            .collect();

        Ok(TaskHandle {
            handles,
            metrics: self.metrics,
            state: self.state,
        })
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("state", &self.state)
            .field("bindings", &self.bindings.len())
            .field("operators", &self.operators.len())
            .finish()
    }
}

/// Running operators of one task.
pub struct TaskHandle {
    handles: Vec<(String, JoinHandle<DataflowResult<()>>)>,
    metrics: MetricsCollector,
    state: TaskState,
}

impl TaskHandle {
    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn operator_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every operator and report the first failure.
    pub async fn join(mut self) -> DataflowResult<()> {
        let mut first_error = None;
        for (name, handle) in self.handles.drain(..) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(DataflowError::operator(&name, e)),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        self.state = match &first_error {
            None => TaskState::Completed,
            Some(e) => TaskState::Failed {
                error_msg: e.to_string(),
            },
        };
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
