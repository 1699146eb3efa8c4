//! Driver-local sources and sinks for `SupplierOfIterable` and `ConsumerToList`.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use crate::error::{DataflowError, DataflowResult};
use crate::stream::{downcast, Item};

type ItemFactory = Arc<dyn Fn() -> Vec<Item> + Send + Sync>;

/// A list of values that can be streamed any number of times.
#[derive(Clone)]
pub struct IterableSource {
    items: ItemFactory,
    len: usize,
}

impl IterableSource {
    pub fn new<T>(items: Vec<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let len = items.len();
        Self {
            items: Arc::new(move || items.iter().cloned().map(|v| Box::new(v) as Item).collect()),
            len,
        }
    }

    pub fn items(&self) -> Vec<Item> {
        (self.items)()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for IterableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterableSource").field("len", &self.len).finish()
    }
}

trait ItemSink: Send + Sync {
    fn accept(&self, item: Item) -> DataflowResult<()>;

    fn complete(&self, result: DataflowResult<()>);
}

/// Erased handle to a [`ResultList`], stored in the environment.
pub struct ListSink(Arc<dyn ItemSink>);

impl ListSink {
    pub(crate) fn accept(&self, item: Item) -> DataflowResult<()> {
        self.0.accept(item)
    }

    pub(crate) fn complete(&self, result: DataflowResult<()>) {
        self.0.complete(result)
    }
}

struct ResultListInner<T> {
    items: Mutex<Vec<T>>,
    done: watch::Sender<Option<DataflowResult<()>>>,
}

impl<T: Send + 'static> ItemSink for ResultListInner<T> {
    fn accept(&self, item: Item) -> DataflowResult<()> {
        let value = downcast::<T>(item)?;
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
        Ok(())
    }

    fn complete(&self, result: DataflowResult<()>) {
        self.done.send_replace(Some(result));
    }
}

/// Collects the items of one stream on the driver.
pub struct ResultList<T> {
    inner: Arc<ResultListInner<T>>,
}

impl<T> Clone for ResultList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> ResultList<T> {
    pub fn new() -> Self {
        let (done, _) = watch::channel(None);
        Self {
            inner: Arc::new(ResultListInner {
                items: Mutex::new(Vec::new()),
                done,
            }),
        }
    }

    pub(crate) fn sink(&self) -> ListSink {
        ListSink(self.inner.clone())
    }

    pub fn is_finished(&self) -> bool {
        self.inner.done.borrow().is_some()
    }

    /// Wait for the stream to end and return its items.
    pub async fn finished(&self) -> DataflowResult<Vec<T>>
    where
        T: Clone,
    {
        let mut done = self.inner.done.subscribe();
        let result = done
            .wait_for(|state| state.is_some())
            .await
            .map_err(|_| DataflowError::Protocol("result list dropped".into()))?
            .clone();
        match result {
            Some(Err(e)) => Err(e),
            _ => Ok(self
                .inner
                .items
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()),
        }
    }
}

impl<T: Send + 'static> Default for ResultList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::downcast_ref;

    #[test]
    fn test_iterable_source_replays() {
        let source = IterableSource::new(vec![1i64, 2, 3]);
        assert_eq!(source.len(), 3);
        for _ in 0..2 {
            let values: Vec<i64> = source
                .items()
                .iter()
                .map(|item| *downcast_ref::<i64>(item).unwrap())
                .collect();
            assert_eq!(values, vec![1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn test_result_list_reports_failure() {
        let list = ResultList::<i64>::new();
        let sink = list.sink();
        sink.accept(Box::new(1i64)).unwrap();
        assert!(!list.is_finished());
        sink.complete(Err(DataflowError::Network("reset".into())));
        assert_eq!(
            list.finished().await.unwrap_err(),
            DataflowError::Network("reset".into())
        );
    }
}
