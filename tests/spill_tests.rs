use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use streamgrid::node::{NodeConsumerToList, NodeSort, NodeSupplierOfIterable};
use streamgrid::{
    DataflowError, Environment, FileSpillStorage, MemorySpillStorage, Node, Registry, ResultList, SpillStorage,
    TaskContext,
};

fn run_bytes(values: &[&'static [u8]]) -> Vec<Bytes> {
    values.iter().map(|v| Bytes::from_static(v)).collect()
}

#[tokio::test]
async fn test_memory_storage_round_trip() {
    let storage = MemorySpillStorage::new();
    let run = storage.write_run(run_bytes(&[b"a", b"bc"])).await.unwrap();
    assert_eq!(storage.live_runs(), 1);

    let read: Vec<Bytes> = storage.read_run(run).await.unwrap().try_collect().await.unwrap();
    assert_eq!(read, run_bytes(&[b"a", b"bc"]));

    storage.remove_run(run).await.unwrap();
    assert_eq!(storage.live_runs(), 0);
    assert!(storage.read_run(run).await.is_err());
}

#[tokio::test]
async fn test_file_storage_reports_io_failures() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileSpillStorage::new(dir.path().join("missing"));

    let err = storage.write_run(run_bytes(&[b"a"])).await.unwrap_err();
    assert!(matches!(err, DataflowError::Storage(_)));
    assert!(matches!(storage.read_run(7).await, Err(DataflowError::Storage(_))));
    assert!(matches!(storage.remove_run(7).await, Err(DataflowError::Storage(_))));
}

#[tokio::test]
async fn test_file_storage_round_trip() {
    let storage = FileSpillStorage::temporary().unwrap();
    let first = storage.write_run(run_bytes(&[b"one", b"two"])).await.unwrap();
    let second = storage.write_run(run_bytes(&[b"three"])).await.unwrap();
    assert_ne!(first, second);

    let read: Vec<Bytes> = storage.read_run(first).await.unwrap().try_collect().await.unwrap();
    assert_eq!(read, run_bytes(&[b"one", b"two"]));

    storage.remove_run(first).await.unwrap();
    assert!(storage.read_run(first).await.is_err());
    let read: Vec<Bytes> = storage.read_run(second).await.unwrap().try_collect().await.unwrap();
    assert_eq!(read, run_bytes(&[b"three"]));
}

#[tokio::test]
async fn test_file_storage_in_given_directory() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileSpillStorage::new(dir.path());
    let run = storage.write_run(run_bytes(&[b"x"])).await.unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    storage.remove_run(run).await.unwrap();
    assert_eq!(std::fs::read_dir(storage.dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_sort_spills_to_files() {
    let dir = tempfile::tempdir().unwrap();
    let results = ResultList::<String>::new();
    let words: Vec<String> = ["pear", "fig", "apple", "kiwi", "date", "banana", "cherry"]
        .iter()
        .map(|w| w.to_string())
        .collect();
    let env = Environment::new()
        .with_instance(Registry::with_builtins())
        .with_iterable("words", words)
        .with_result_list("sorted", &results)
        .with_spill_storage(Arc::new(FileSpillStorage::new(dir.path())));

    let source = NodeSupplierOfIterable::new("words");
    let sort = NodeSort::new("String", "identity_string", "natural_string", source.output).with_memory_limit(3);
    let sink = NodeConsumerToList::new(sort.output, "sorted");

    let nodes: Vec<Node> = vec![source.into(), sort.into(), sink.into()];
    let mut ctx = TaskContext::new(Arc::new(env)).unwrap();
    for node in &nodes {
        node.create_and_bind(&mut ctx).unwrap();
    }
    ctx.wire_all().unwrap().join().await.unwrap();

    assert_eq!(
        results.finished().await.unwrap(),
        vec!["apple", "banana", "cherry", "date", "fig", "kiwi", "pear"]
    );
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
