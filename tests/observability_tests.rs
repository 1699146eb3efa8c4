use std::sync::Arc;

use streamgrid::observability::{MetricsCollector, OperatorMetrics};

#[test]
fn test_collector_registration() {
    let mut collector = MetricsCollector::new();
    let metrics = Arc::new(OperatorMetrics::new("Map-0"));

    collector.register("Map-0", metrics.clone());

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.contains_key("Map-0"));
}

#[test]
fn test_collector_aggregation() {
    let mut collector = MetricsCollector::new();

    let m1 = Arc::new(OperatorMetrics::new("Map-0"));
    let m2 = Arc::new(OperatorMetrics::new("Filter-1"));

    m1.record_item_in();
    m1.record_item_in();
    m1.record_item_out();
    m2.record_error();

    collector.register("Map-0", m1);
    collector.register("Filter-1", m2);

    let snapshot = collector.snapshot();

    assert_eq!(snapshot.get("Map-0").unwrap().items_in, 2);
    assert_eq!(snapshot.get("Map-0").unwrap().items_out, 1);
    assert_eq!(snapshot.get("Filter-1").unwrap().errors_count, 1);
}

#[test]
fn test_collector_report() {
    let mut collector = MetricsCollector::new();
    assert_eq!(collector.report(), "No operators registered");

    let metrics = Arc::new(OperatorMetrics::new("Download-0"));
    metrics.record_bytes(128);
    collector.register("Download-0", metrics);

    let report = collector.report();
    assert!(report.contains("Download-0"));
    assert!(report.contains("bytes=128"));
}
