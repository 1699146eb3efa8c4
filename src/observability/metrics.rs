use std::sync::atomic::{AtomicU64, Ordering};

/// Per-operator counters, shared between the operator and its edges.
#[derive(Debug)]
pub struct OperatorMetrics {
    operator: String,
    items_in: AtomicU64,
    items_out: AtomicU64,
    errors_count: AtomicU64,
    bytes_transferred: AtomicU64,
}

impl OperatorMetrics {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            items_in: AtomicU64::new(0),
            items_out: AtomicU64::new(0),
            errors_count: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
        }
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn items_in(&self) -> u64 {
        self.items_in.load(Ordering::Relaxed)
    }

    pub fn items_out(&self) -> u64 {
        self.items_out.load(Ordering::Relaxed)
    }

    pub fn errors_count(&self) -> u64 {
        self.errors_count.load(Ordering::Relaxed)
    }

    /// Payload bytes read or written by network operators.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    pub fn record_item_in(&self) {
        self.items_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_item_out(&self) {
        self.items_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, bytes: usize) {
        self.bytes_transferred.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = OperatorMetrics::new("map");
        metrics.record_item_in();
        metrics.record_item_in();
        metrics.record_item_out();
        metrics.record_bytes(10);
        metrics.record_bytes(5);
        assert_eq!(metrics.operator(), "map");
        assert_eq!(metrics.items_in(), 2);
        assert_eq!(metrics.items_out(), 1);
        assert_eq!(metrics.errors_count(), 0);
        assert_eq!(metrics.bytes_transferred(), 15);
    }
}
