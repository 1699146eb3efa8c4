//! Keys and the partition hash shared by shards and their consumers.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Hash used to route items between partitions.
///
/// Every producer and consumer of a shuffle must agree on it, so the values
/// are fixed: integers hash the way the JVM does, strings use the classic
/// 31-polynomial over their bytes.
pub trait PartitionHash {
    fn partition_hash(&self) -> i32;
}

impl PartitionHash for i32 {
    fn partition_hash(&self) -> i32 {
        *self
    }
}

impl PartitionHash for u32 {
    fn partition_hash(&self) -> i32 {
        *self as i32
    }
}

impl PartitionHash for i64 {
    fn partition_hash(&self) -> i32 {
        let v = *self as u64;
        (v ^ (v >> 32)) as i32
    }
}

impl PartitionHash for u64 {
    fn partition_hash(&self) -> i32 {
        (*self ^ (*self >> 32)) as i32
    }
}

impl PartitionHash for bool {
    fn partition_hash(&self) -> i32 {
        if *self {
            1231
        } else {
            1237
        }
    }
}

impl PartitionHash for String {
    fn partition_hash(&self) -> i32 {
        self.encode_utf16()
            .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
    }
}

impl<A: PartitionHash, B: PartitionHash> PartitionHash for (A, B) {
    fn partition_hash(&self) -> i32 {
        self.0
            .partition_hash()
            .wrapping_mul(31)
            .wrapping_add(self.1.partition_hash())
    }
}

/// A type-erased key produced by a key function.
pub trait KeyValue: PartitionHash + Any + Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: PartitionHash + Any + Send + Sync + Debug> KeyValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub type Key = Arc<dyn KeyValue>;

/// Output index for a key among `n` shards.
pub fn shard_index(key: &dyn KeyValue, n: usize) -> usize {
    ((key.partition_hash() & 0x7fff_ffff) as usize) % n.max(1)
}
