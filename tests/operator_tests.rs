use std::sync::Arc;

use streamgrid::node::{
    NodeConsumerToList, NodeFilter, NodeJoin, NodeMap, NodeMerge, NodeReduce, NodeReduceSimple, NodeShard,
    NodeSort, NodeSupplierOfIterable, NodeUnion,
};
use streamgrid::registry::{InnerJoiner, Joiner, LeftOuterJoiner, ReducerToResult};
use streamgrid::{
    DataflowError, DataflowResult, Environment, MemorySpillStorage, Node, ReducerRef, Registry, ResultList,
    TaskContext,
};

struct Sum;

impl ReducerToResult<String, (String, i64), (String, i64), i64> for Sum {
    fn create_accumulator(&self, _key: &String) -> i64 {
        0
    }

    fn accumulate(&self, accumulator: i64, value: (String, i64)) -> i64 {
        accumulator + value.1
    }

    fn combine(&self, accumulator: i64, other: i64) -> anyhow::Result<i64> {
        Ok(accumulator + other)
    }

    fn produce_result(&self, accumulator: i64) -> (String, i64) {
        ("total".to_string(), accumulator)
    }
}

/// Emits every side of every key, tagging unmatched items with their side.
struct FullOuter;

impl Joiner<i64, i64, i64, String> for FullOuter {
    fn on_inner_join(&self, key: &i64, lefts: Vec<i64>, rights: Vec<i64>, out: &mut Vec<String>) -> anyhow::Result<()> {
        out.push(format!("{}:{:?}|{:?}", key, lefts, rights));
        Ok(())
    }

    fn on_left_join(&self, key: &i64, left: i64, out: &mut Vec<String>) -> anyhow::Result<()> {
        out.push(format!("L{}={}", key, left));
        Ok(())
    }

    fn on_right_join(&self, key: &i64, right: i64, out: &mut Vec<String>) -> anyhow::Result<()> {
        out.push(format!("R{}={}", key, right));
        Ok(())
    }
}

fn registry() -> Registry {
    let mut registry = Registry::with_builtins();
    registry
        .register_predicate::<i64, _>("is_even", |v| v % 2 == 0)
        .register_mapper::<i64, i64, _>("double", |v| v * 2)
        .register_fallible_mapper::<i64, i64, _>("fail_on_3", |v| {
            if v == 3 {
                anyhow::bail!("refusing {}", v);
            }
            Ok(v)
        })
        .register_key_function::<(String, i64), String, _>("pair_name", |p| p.0.clone())
        .register_reducer_to_result::<String, (String, i64), (String, i64), i64, _>("sum", Sum)
        .register_joiner::<i64, i64, i64, String, _>(
            "pair",
            InnerJoiner::new(|k: &i64, l: &i64, r: &i64| format!("{}:{}+{}", k, l, r)),
        )
        .register_joiner::<i64, i64, i64, String, _>(
            "left_outer",
            LeftOuterJoiner::new(|k: &i64, _l: &i64, r: Option<&i64>| match r {
                Some(r) => format!("{}={}", k, r),
                None => format!("{}=none", k),
            }),
        )
        .register_joiner::<i64, i64, i64, String, _>("full_outer", FullOuter);
    registry
}

fn environment() -> Environment {
    Environment::new().with_instance(registry())
}

async fn run(environment: Environment, nodes: Vec<Node>) -> DataflowResult<()> {
    let mut ctx = TaskContext::new(Arc::new(environment))?;
    for node in &nodes {
        node.create_and_bind(&mut ctx)?;
    }
    ctx.wire_all()?.join().await
}

#[tokio::test]
async fn test_filter_pipeline() {
    let results = ResultList::<i64>::new();
    let env = environment()
        .with_iterable("numbers", vec![1i64, 2, 3, 4])
        .with_result_list("evens", &results);

    let source = NodeSupplierOfIterable::new("numbers");
    let filter = NodeFilter::new("is_even", source.output);
    let sink = NodeConsumerToList::new(filter.output, "evens");

    run(env, vec![source.into(), filter.into(), sink.into()]).await.unwrap();
    assert_eq!(results.finished().await.unwrap(), vec![2, 4]);
}

#[tokio::test]
async fn test_map_pipeline() {
    let results = ResultList::<i64>::new();
    let env = environment()
        .with_iterable("numbers", vec![1i64, 2, 3])
        .with_result_list("out", &results);

    let source = NodeSupplierOfIterable::new("numbers");
    let map = NodeMap::new("double", source.output);
    let sink = NodeConsumerToList::new(map.output, "out");

    run(env, vec![source.into(), map.into(), sink.into()]).await.unwrap();
    assert_eq!(results.finished().await.unwrap(), vec![2, 4, 6]);
}

#[tokio::test]
async fn test_shard_by_key_hash() {
    let evens = ResultList::<i64>::new();
    let odds = ResultList::<i64>::new();
    let env = environment()
        .with_iterable("numbers", vec![1i64, 2, 3, 4, 5, 6])
        .with_result_list("evens", &evens)
        .with_result_list("odds", &odds);

    let source = NodeSupplierOfIterable::new("numbers");
    let mut shard = NodeShard::new("identity_i64", source.output);
    let first = shard.add_output();
    let second = shard.add_output();

    run(
        env,
        vec![
            source.into(),
            shard.into(),
            NodeConsumerToList::new(first, "evens").into(),
            NodeConsumerToList::new(second, "odds").into(),
        ],
    )
    .await
    .unwrap();

    assert_eq!(evens.finished().await.unwrap(), vec![2, 4, 6]);
    assert_eq!(odds.finished().await.unwrap(), vec![1, 3, 5]);
}

#[tokio::test]
async fn test_merge_sorted_inputs() {
    let merged = ResultList::<i64>::new();
    let distinct = ResultList::<i64>::new();
    let env = environment()
        .with_iterable("a", vec![1i64, 3, 5, 5])
        .with_iterable("b", vec![2i64, 3, 6])
        .with_result_list("merged", &merged)
        .with_result_list("distinct", &distinct);

    let mut nodes: Vec<Node> = Vec::new();
    for (dedupe, list) in [(false, "merged"), (true, "distinct")] {
        let a = NodeSupplierOfIterable::new("a");
        let b = NodeSupplierOfIterable::new("b");
        let mut merge = NodeMerge::new("identity_i64", "natural_i64", dedupe);
        merge.add_input(a.output);
        merge.add_input(b.output);
        let sink = NodeConsumerToList::new(merge.output, list);
        nodes.extend([a.into(), b.into(), merge.into(), sink.into()]);
    }

    run(env, nodes).await.unwrap();
    assert_eq!(merged.finished().await.unwrap(), vec![1, 2, 3, 3, 5, 5, 6]);
    assert_eq!(distinct.finished().await.unwrap(), vec![1, 2, 3, 5, 6]);
}

#[tokio::test]
async fn test_sort_spills_runs() {
    let storage = Arc::new(MemorySpillStorage::new());
    let results = ResultList::<i64>::new();
    let env = environment()
        .with_iterable("numbers", vec![5i64, 3, 4, 1, 2])
        .with_result_list("sorted", &results)
        .with_spill_storage(storage.clone());

    let source = NodeSupplierOfIterable::new("numbers");
    let sort = NodeSort::new("i64", "identity_i64", "natural_i64", source.output).with_memory_limit(2);
    let sink = NodeConsumerToList::new(sort.output, "sorted");

    run(env, vec![source.into(), sort.into(), sink.into()]).await.unwrap();
    assert_eq!(results.finished().await.unwrap(), vec![1, 2, 3, 4, 5]);
    assert!(storage.runs_written() >= 1);
    assert_eq!(storage.live_runs(), 0);
}

#[tokio::test]
async fn test_sort_in_memory_dedupe() {
    let results = ResultList::<i64>::new();
    let env = environment()
        .with_iterable("numbers", vec![4i64, 1, 4, 2, 1])
        .with_result_list("sorted", &results);

    let source = NodeSupplierOfIterable::new("numbers");
    let sort = NodeSort::new("i64", "identity_i64", "natural_i64", source.output).with_dedupe(true);
    let sink = NodeConsumerToList::new(sort.output, "sorted");

    run(env, vec![source.into(), sort.into(), sink.into()]).await.unwrap();
    assert_eq!(results.finished().await.unwrap(), vec![1, 2, 4]);
}

#[tokio::test]
async fn test_sort_spill_without_storage_fails() {
    let results = ResultList::<i64>::new();
    let env = environment()
        .with_iterable("numbers", vec![5i64, 3, 4, 1, 2])
        .with_result_list("sorted", &results);

    let source = NodeSupplierOfIterable::new("numbers");
    let sort = NodeSort::new("i64", "identity_i64", "natural_i64", source.output).with_memory_limit(2);
    let sink = NodeConsumerToList::new(sort.output, "sorted");

    let err = run(env, vec![source.into(), sort.into(), sink.into()]).await.unwrap_err();
    assert!(matches!(err, DataflowError::MissingResource(_)));
    assert!(results.finished().await.is_err());
}

fn pairs(values: &[(&str, i64)]) -> Vec<(String, i64)> {
    values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[tokio::test]
async fn test_reduce_simple_sums_groups() {
    let results = ResultList::<(String, i64)>::new();
    let env = environment()
        .with_iterable("a", pairs(&[("a", 1), ("b", 2), ("b", 3)]))
        .with_iterable("b", pairs(&[("a", 10), ("c", 4)]))
        .with_result_list("sums", &results);

    let a = NodeSupplierOfIterable::new("a");
    let b = NodeSupplierOfIterable::new("b");
    let mut reduce = NodeReduceSimple::new(
        "pair_name",
        "natural_string",
        ReducerRef::InputToOutput { reducer: "sum".into() },
    );
    reduce.add_input(a.output);
    reduce.add_input(b.output);
    let sink = NodeConsumerToList::new(reduce.output, "sums");

    run(env, vec![a.into(), b.into(), reduce.into(), sink.into()]).await.unwrap();
    let sums: Vec<i64> = results.finished().await.unwrap().into_iter().map(|p| p.1).collect();
    assert_eq!(sums, vec![11, 5, 4]);
}

#[tokio::test]
async fn test_reduce_per_input_reducers() {
    let results = ResultList::<(String, i64)>::new();
    let env = environment()
        .with_iterable("a", pairs(&[("x", 1), ("y", 2)]))
        .with_iterable("b", pairs(&[("x", 5)]))
        .with_result_list("out", &results);

    let a = NodeSupplierOfIterable::new("a");
    let b = NodeSupplierOfIterable::new("b");
    let mut reduce = NodeReduce::new("natural_string");
    reduce.add_input(a.output, "pair_name", ReducerRef::MergeSort);
    reduce.add_input(b.output, "pair_name", ReducerRef::MergeSort);
    let sink = NodeConsumerToList::new(reduce.output, "out");

    run(env, vec![a.into(), b.into(), reduce.into(), sink.into()]).await.unwrap();
    let out = results.finished().await.unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(out[2], ("y".to_string(), 2));
}

#[tokio::test]
async fn test_inner_join() {
    let results = ResultList::<String>::new();
    let env = environment()
        .with_iterable("left", vec![1i64, 2, 2, 4])
        .with_iterable("right", vec![2i64, 3, 4, 4])
        .with_result_list("joined", &results);

    let left = NodeSupplierOfIterable::new("left");
    let right = NodeSupplierOfIterable::new("right");
    let join = NodeJoin::new(left.output, right.output, "natural_i64", "identity_i64", "identity_i64", "pair");
    let sink = NodeConsumerToList::new(join.output, "joined");

    run(env, vec![left.into(), right.into(), join.into(), sink.into()]).await.unwrap();
    assert_eq!(
        results.finished().await.unwrap(),
        vec!["2:2+2", "2:2+2", "4:4+4", "4:4+4"]
    );
}

#[tokio::test]
async fn test_left_outer_join() {
    let results = ResultList::<String>::new();
    let env = environment()
        .with_iterable("left", vec![1i64, 2, 5])
        .with_iterable("right", vec![2i64, 3])
        .with_result_list("joined", &results);

    let left = NodeSupplierOfIterable::new("left");
    let right = NodeSupplierOfIterable::new("right");
    let join = NodeJoin::new(
        left.output,
        right.output,
        "natural_i64",
        "identity_i64",
        "identity_i64",
        "left_outer",
    );
    let sink = NodeConsumerToList::new(join.output, "joined");

    run(env, vec![left.into(), right.into(), join.into(), sink.into()]).await.unwrap();
    assert_eq!(results.finished().await.unwrap(), vec!["1=none", "2=2", "5=none"]);
}

#[tokio::test]
async fn test_full_outer_join_visits_every_item() {
    let results = ResultList::<String>::new();
    let env = environment()
        .with_iterable("left", vec![1i64, 2, 2, 5])
        .with_iterable("right", vec![0i64, 2, 3, 3, 6])
        .with_result_list("joined", &results);

    let left = NodeSupplierOfIterable::new("left");
    let right = NodeSupplierOfIterable::new("right");
    let join = NodeJoin::new(
        left.output,
        right.output,
        "natural_i64",
        "identity_i64",
        "identity_i64",
        "full_outer",
    );
    let sink = NodeConsumerToList::new(join.output, "joined");

    run(env, vec![left.into(), right.into(), join.into(), sink.into()]).await.unwrap();
    assert_eq!(
        results.finished().await.unwrap(),
        vec!["R0=0", "L1=1", "2:[2, 2]|[2]", "R3=3", "R3=3", "L5=5", "R6=6"]
    );
}

#[tokio::test]
async fn test_union_interleaves_all_inputs() {
    let results = ResultList::<i64>::new();
    let env = environment()
        .with_iterable("a", vec![1i64, 2])
        .with_iterable("b", vec![3i64])
        .with_result_list("all", &results);

    let a = NodeSupplierOfIterable::new("a");
    let b = NodeSupplierOfIterable::new("b");
    let union = NodeUnion::new(vec![a.output, b.output]);
    let sink = NodeConsumerToList::new(union.output, "all");

    run(env, vec![a.into(), b.into(), union.into(), sink.into()]).await.unwrap();
    let mut all = results.finished().await.unwrap();
    all.sort();
    assert_eq!(all, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_operator_error_reaches_sink() {
    let results = ResultList::<i64>::new();
    let env = environment()
        .with_iterable("numbers", vec![1i64, 2, 3, 4])
        .with_result_list("out", &results);

    let source = NodeSupplierOfIterable::new("numbers");
    let map = NodeMap::new("fail_on_3", source.output);
    let sink = NodeConsumerToList::new(map.output, "out");

    let err = run(env, vec![source.into(), map.into(), sink.into()]).await.unwrap_err();
    match err {
        DataflowError::Operator { operator, message } => {
            assert_eq!(operator, "fail_on_3");
            assert!(message.contains("refusing 3"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(results.finished().await.is_err());
}

#[tokio::test]
async fn test_task_metrics_count_items() {
    let results = ResultList::<i64>::new();
    let env = environment()
        .with_iterable("numbers", vec![1i64, 2, 3, 4])
        .with_result_list("evens", &results);

    let source = NodeSupplierOfIterable::new("numbers");
    let filter = NodeFilter::new("is_even", source.output);
    let sink = NodeConsumerToList::new(filter.output, "evens");
    let nodes: Vec<Node> = vec![source.into(), filter.into(), sink.into()];

    let mut ctx = TaskContext::new(Arc::new(env)).unwrap();
    for node in &nodes {
        node.create_and_bind(&mut ctx).unwrap();
    }
    let handle = ctx.wire_all().unwrap();
    assert_eq!(handle.operator_count(), 3);
    let metrics = handle.metrics();
    handle.join().await.unwrap();

    let snapshot = metrics.snapshot();
    let filter = snapshot.values().find(|m| m.operator.starts_with("Filter")).unwrap();
    assert_eq!(filter.items_in, 4);
    assert_eq!(filter.items_out, 2);
}
