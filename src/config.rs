use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::wire::frame::MAX_FRAME_SIZE;

/// Runtime knobs shared by task contexts, clients and servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataflowConfig {
    /// Capacity of every local edge; a full edge suspends its producer.
    pub channel_capacity: usize,

    /// Items a Shard may hold back per output while that output is full.
    ///
    /// A repartition stays live as long as no shard output falls behind its
    /// consumer by more than `channel_capacity + shard_buffer_items`; a Merge
    /// behind a Shard only reads once every one of its inputs has a head.
    pub shard_buffer_items: usize,

    /// Largest accepted frame payload, at most 2^21 - 1.
    pub max_frame_size: usize,

    pub connect_timeout_ms: u64,
}

impl Default for DataflowConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            shard_buffer_items: 1 << 16,
            max_frame_size: MAX_FRAME_SIZE,
            connect_timeout_ms: 5000,
        }
    }
}

impl DataflowConfig {
    pub fn from_json(config: Value) -> Result<Self> {
        let config: Self = serde_json::from_value(config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            anyhow::bail!("channel_capacity must be positive");
        }
        if self.max_frame_size == 0 || self.max_frame_size > MAX_FRAME_SIZE {
            anyhow::bail!(
                "max_frame_size must be in 1..={}, got {}",
                MAX_FRAME_SIZE,
                self.max_frame_size
            );
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
