//! Per-type binary item codecs, built lazily and cached.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DataflowError, DataflowResult, FrameError};
use crate::stream::{downcast_ref, Item};

pub trait ItemCodec: Send + Sync {
    fn encode(&self, item: &Item) -> DataflowResult<Bytes>;

    /// Decode exactly one item; leftover bytes are an error.
    fn decode(&self, bytes: &[u8]) -> DataflowResult<Item>;
}

/// `postcard` encoding of any serde type.
pub struct PostcardCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> PostcardCodec<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for PostcardCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ItemCodec for PostcardCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn encode(&self, item: &Item) -> DataflowResult<Bytes> {
        let value = downcast_ref::<T>(item)?;
        postcard::to_allocvec(value)
            .map(Bytes::from)
            .map_err(|e| DataflowError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> DataflowResult<Item> {
        let (value, rest) =
            postcard::take_from_bytes::<T>(bytes).map_err(|e| DataflowError::Codec(e.to_string()))?;
        if !rest.is_empty() {
            return Err(FrameError::SizeMismatch {
                consumed: bytes.len() - rest.len(),
                declared: bytes.len(),
            }
            .into());
        }
        Ok(Box::new(value))
    }
}

type CodecFactory = Box<dyn Fn() -> Arc<dyn ItemCodec> + Send + Sync>;

struct CodecEntry {
    factory: CodecFactory,
    codec: OnceLock<Arc<dyn ItemCodec>>,
}

/// Codecs by type name. Each codec is created on first lookup.
#[derive(Default)]
pub struct CodecRegistry {
    entries: HashMap<String, CodecEntry>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&mut self, type_name: impl Into<String>)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.register_factory(type_name, || Arc::new(PostcardCodec::<T>::new()));
    }

    pub fn register_factory<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ItemCodec> + Send + Sync + 'static,
    {
        self.entries.insert(
            type_name.into(),
            CodecEntry {
                factory: Box::new(factory),
                codec: OnceLock::new(),
            },
        );
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn get(&self, type_name: &str) -> DataflowResult<Arc<dyn ItemCodec>> {
        let entry = self
            .entries
            .get(type_name)
            .ok_or_else(|| DataflowError::MissingResource(format!("codec for type '{}'", type_name)))?;
        let codec = entry.codec.get_or_init(|| {
            tracing::debug!(item_type = type_name, "creating item codec");
            (entry.factory)()
        });
        Ok(codec.clone())
    }
}
