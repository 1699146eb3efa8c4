use std::collections::BTreeMap;
use std::sync::Arc;

use super::OperatorMetrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub operator: String,
    pub items_in: u64,
    pub items_out: u64,
    pub errors_count: u64,
    pub bytes_transferred: u64,
}

/// Metrics of every operator in one task, keyed by operator name.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    metrics: BTreeMap<String, Arc<OperatorMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operator: impl Into<String>, metrics: Arc<OperatorMetrics>) {
        self.metrics.insert(operator.into(), metrics);
    }

    pub fn get(&self, operator: &str) -> Option<Arc<OperatorMetrics>> {
        self.metrics.get(operator).cloned()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.metrics
            .iter()
            .map(|(name, metrics)| {
                (
                    name.clone(),
                    MetricsSnapshot {
                        operator: metrics.operator().to_string(),
                        items_in: metrics.items_in(),
                        items_out: metrics.items_out(),
                        errors_count: metrics.errors_count(),
                        bytes_transferred: metrics.bytes_transferred(),
                    },
                )
            })
            .collect()
    }

    /// Human-readable table, one line per operator.
    pub fn report(&self) -> String {
        if self.metrics.is_empty() {
            return "No operators registered".to_string();
        }
        let mut report = String::from("=== Task Metrics ===\n");
        for (name, snapshot) in self.snapshot() {
            report.push_str(&format!(
                "{}: in={} out={} errors={} bytes={}\n",
                name,
                snapshot.items_in,
                snapshot.items_out,
                snapshot.errors_count,
                snapshot.bytes_transferred
            ));
        }
        report
    }
}
