//! Storage for sorted runs that do not fit in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use futures::SinkExt;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{DataflowError, DataflowResult};
use crate::wire::frame::{data_stream, Frame, FrameCodec};

pub type RunId = u64;

#[async_trait]
pub trait SpillStorage: Send + Sync {
    /// Persist one run of encoded items, in order.
    async fn write_run(&self, items: Vec<Bytes>) -> DataflowResult<RunId>;

    async fn read_run(&self, run: RunId) -> DataflowResult<BoxStream<'static, DataflowResult<Bytes>>>;

    async fn remove_run(&self, run: RunId) -> DataflowResult<()>;
}

/// Keeps runs in memory. Useful for tests and small jobs.
#[derive(Debug, Default)]
pub struct MemorySpillStorage {
    next_run: AtomicU64,
    runs: Mutex<HashMap<RunId, Vec<Bytes>>>,
    runs_written: AtomicU64,
}

impl MemorySpillStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs_written(&self) -> u64 {
        self.runs_written.load(Ordering::Relaxed)
    }

    pub fn live_runs(&self) -> usize {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl SpillStorage for MemorySpillStorage {
    async fn write_run(&self, items: Vec<Bytes>) -> DataflowResult<RunId> {
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run, items);
        self.runs_written.fetch_add(1, Ordering::Relaxed);
        Ok(run)
    }

    async fn read_run(&self, run: RunId) -> DataflowResult<BoxStream<'static, DataflowResult<Bytes>>> {
        let items = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&run)
            .cloned()
            .ok_or_else(|| DataflowError::MissingResource(format!("spill run {}", run)))?;
        Ok(stream::iter(items.into_iter().map(Ok)).boxed())
    }

    async fn remove_run(&self, run: RunId) -> DataflowResult<()> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run);
        Ok(())
    }
}

/// One framed file per run under a directory.
#[derive(Debug)]
pub struct FileSpillStorage {
    dir: PathBuf,
    next_run: AtomicU64,
    _temp_dir: Option<tempfile::TempDir>,
}

impl FileSpillStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_run: AtomicU64::new(0),
            _temp_dir: None,
        }
    }

    /// Storage in a fresh temporary directory, removed on drop.
    pub fn temporary() -> DataflowResult<Self> {
        let temp_dir = tempfile::Builder::new().prefix("streamgrid-spill").tempdir().map_err(storage_error)?;
        Ok(Self {
            dir: temp_dir.path().to_path_buf(),
            next_run: AtomicU64::new(0),
            _temp_dir: Some(temp_dir),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run_path(&self, run: RunId) -> PathBuf {
        self.dir.join(format!("run-{}.bin", run))
    }
}

fn storage_error(e: impl std::fmt::Display) -> DataflowError {
    DataflowError::Storage(e.to_string())
}

#[async_trait]
impl SpillStorage for FileSpillStorage {
    async fn write_run(&self, items: Vec<Bytes>) -> DataflowResult<RunId> {
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        let path = self.run_path(run);
        let file = tokio::fs::File::create(&path).await.map_err(storage_error)?;
        let mut frames = FramedWrite::new(file, FrameCodec::new());
        for item in items {
            frames.feed(Frame::Data(item)).await?;
        }
        frames.send(Frame::End).await?;
        tracing::debug!(run, path = %path.display(), "wrote spill run");
        Ok(run)
    }

    async fn read_run(&self, run: RunId) -> DataflowResult<BoxStream<'static, DataflowResult<Bytes>>> {
        let file = tokio::fs::File::open(self.run_path(run))
            .await
            .map_err(storage_error)?;
        Ok(data_stream(FramedRead::new(file, FrameCodec::new())))
    }

    async fn remove_run(&self, run: RunId) -> DataflowResult<()> {
        tokio::fs::remove_file(self.run_path(run))
            .await
            .map_err(storage_error)
    }
}
