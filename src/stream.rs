//! Channel endpoints for one dataflow edge.
//!
//! Every edge carries `Item | End | Error`. A receiver that sees the channel
//! close without `End` reports [`DataflowError::Closed`], so a producer that
//! vanishes is never mistaken for a finished one.

use std::any::Any;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{DataflowError, DataflowResult};
use crate::observability::OperatorMetrics;
use crate::stream_id::StreamId;
use std::sync::Arc;

/// A type-erased value flowing through an edge.
pub type Item = Box<dyn Any + Send>;

/// Local stream of items, ending after the last item or at the first error.
pub type ItemStream = BoxStream<'static, DataflowResult<Item>>;

#[derive(Debug)]
pub enum Message {
    Item(Item),
    End,
    Error(DataflowError),
}

/// Create the two halves of an edge.
pub fn channel(id: StreamId, capacity: usize) -> (StreamSender, StreamReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        StreamSender {
            id,
            tx,
            metrics: None,
        },
        StreamReceiver {
            id,
            rx,
            finished: false,
            metrics: None,
        },
    )
}

/// Downcast an item to the type a registered function expects.
pub fn downcast<T: 'static>(item: Item) -> DataflowResult<T> {
    item.downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| DataflowError::TypeMismatch {
            expected: std::any::type_name::<T>(),
        })
}

pub fn downcast_ref<T: 'static>(item: &Item) -> DataflowResult<&T> {
    item.downcast_ref::<T>().ok_or(DataflowError::TypeMismatch {
        expected: std::any::type_name::<T>(),
    })
}

/// Producer half of an edge.
#[derive(Debug)]
pub struct StreamSender {
    id: StreamId,
    tx: mpsc::Sender<Message>,
    metrics: Option<Arc<OperatorMetrics>>,
}

impl StreamSender {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub(crate) fn attach_metrics(&mut self, metrics: Arc<OperatorMetrics>) {
        self.metrics = Some(metrics);
    }

    /// Send one item, suspending while the consumer is not ready.
    ///
    /// Fails with `Closed` once the consumer has gone away.
    pub async fn send(&self, item: Item) -> DataflowResult<()> {
        self.tx
            .send(Message::Item(item))
            .await
            .map_err(|_| DataflowError::Closed(self.id))?;
        if let Some(metrics) = &self.metrics {
            metrics.record_item_out();
        }
        Ok(())
    }

    /// Send without waiting; a full channel hands the item back.
    pub fn try_send(&self, item: Item) -> DataflowResult<Option<Item>> {
        match self.tx.try_send(Message::Item(item)) {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_item_out();
                }
                Ok(None)
            }
            Err(mpsc::error::TrySendError::Full(Message::Item(item))) => Ok(Some(item)),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(None),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DataflowError::Closed(self.id)),
        }
    }

    pub async fn send_all(&self, items: impl IntoIterator<Item = Item>) -> DataflowResult<()> {
        for item in items {
            self.send(item).await?;
        }
        Ok(())
    }

    /// Signal end of stream.
    pub async fn finish(self) {
        let _ = self.tx.send(Message::End).await;
    }

    /// Close the stream with a failure.
    pub async fn fail(self, error: DataflowError) {
        let _ = self.tx.send(Message::Error(error)).await;
    }

    /// Finish on success, fail otherwise.
    pub async fn close(self, result: &DataflowResult<()>) {
        match result {
            Ok(()) => self.finish().await,
            Err(e) => self.fail(e.clone()).await,
        }
    }
}

/// Close every output of an operator with the operator's outcome.
pub async fn close_all(outputs: Vec<StreamSender>, result: &DataflowResult<()>) {
    for output in outputs {
        output.close(result).await;
    }
}

/// Consumer half of an edge.
#[derive(Debug)]
pub struct StreamReceiver {
    id: StreamId,
    rx: mpsc::Receiver<Message>,
    finished: bool,
    metrics: Option<Arc<OperatorMetrics>>,
}

impl StreamReceiver {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub(crate) fn attach_metrics(&mut self, metrics: Arc<OperatorMetrics>) {
        self.metrics = Some(metrics);
    }

    /// Next item, `None` at end of stream.
    pub async fn next(&mut self) -> DataflowResult<Option<Item>> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Message::Item(item)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_item_in();
                }
                Ok(Some(item))
            }
            Some(Message::End) => {
                self.finished = true;
                Ok(None)
            }
            Some(Message::Error(e)) => {
                self.finished = true;
                Err(e)
            }
            None => {
                self.finished = true;
                Err(DataflowError::Closed(self.id))
            }
        }
    }

    /// Drain the remaining items.
    pub async fn collect(mut self) -> DataflowResult<Vec<Item>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    pub fn into_stream(self) -> ItemStream {
        stream::unfold(Some(self), |state| async move {
            let mut receiver = state?;
            match receiver.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(receiver))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}

/// Pull every item of a stream, stopping at the first error.
pub async fn collect_typed<T: 'static>(mut stream: ItemStream) -> DataflowResult<Vec<T>> {
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(downcast::<T>(item?)?);
    }
    Ok(items)
}
