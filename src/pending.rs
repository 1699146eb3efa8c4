//! Rendezvous between Upload operators and Download requests.
//!
//! Whichever side arrives first is parked under its stream id and claimed by
//! the other, so the two may arrive in either order.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::error::{DataflowError, DataflowResult};
use crate::stream_id::StreamId;

enum Pending<C> {
    /// A download request waiting for its upload.
    Downloader(C),
    /// An upload waiting for its download request.
    Uploader(oneshot::Sender<C>),
}

pub struct PendingStreams<C> {
    streams: Mutex<HashMap<StreamId, Pending<C>>>,
}

impl<C> Default for PendingStreams<C> {
    fn default() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
        }
    }
}

impl<C: Send + 'static> PendingStreams<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of parked uploads and downloads.
    pub fn len(&self) -> usize {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand a download connection to the upload of `id`, or park it.
    ///
    /// A second download for the same id is rejected and its connection dropped.
    pub fn offer_downloader(&self, id: StreamId, connection: C) -> DataflowResult<()> {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        match streams.remove(&id) {
            None => {
                streams.insert(id, Pending::Downloader(connection));
                Ok(())
            }
            Some(Pending::Uploader(upload)) => {
                drop(streams);
                if upload.send(connection).is_err() {
                    tracing::warn!(stream = %id, "upload went away before its download arrived");
                }
                Ok(())
            }
            Some(existing @ Pending::Downloader(_)) => {
                streams.insert(id, existing);
                Err(DataflowError::Protocol(format!("stream {} is already being downloaded", id)))
            }
        }
    }

    /// Drop the parked download connections of `ids`, returning how many were
    /// dropped. Their clients see the stream end without data.
    pub fn evict_downloaders(&self, ids: impl IntoIterator<Item = StreamId>) -> usize {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let mut evicted = 0;
        for id in ids {
            if let Some(Pending::Downloader(_)) = streams.get(&id) {
                streams.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }

    /// Wait for the download connection of `id`.
    pub async fn await_downloader(&self, id: StreamId) -> DataflowResult<C> {
        let waiting = {
            let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
            match streams.remove(&id) {
                Some(Pending::Downloader(connection)) => return Ok(connection),
                Some(existing @ Pending::Uploader(_)) => {
                    streams.insert(id, existing);
                    return Err(DataflowError::Protocol(format!("stream {} is already uploaded", id)));
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    streams.insert(id, Pending::Uploader(tx));
                    rx
                }
            }
        };
        waiting
            .await
            .map_err(|_| DataflowError::Network(format!("pending stream {} abandoned", id)))
    }
}
