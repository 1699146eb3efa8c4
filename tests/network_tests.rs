use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use streamgrid::node::{
    NodeConsumerToList, NodeDownload, NodeFilter, NodeJoin, NodeReduce, NodeShard, NodeSupplierOfIterable, NodeUpload,
};
use streamgrid::registry::InnerJoiner;
use streamgrid::stream::collect_typed;
use streamgrid::{
    DataflowClient, DataflowConfig, DataflowError, DataflowServer, Environment, FrameError, Node, ReducerRef,
    Registry, ResultList, StreamId,
};

fn registry() -> Registry {
    let mut registry = Registry::with_builtins();
    registry
        .register_predicate::<i64, _>("is_even", |v| v % 2 == 0)
        .register_fallible_mapper::<i64, i64, _>("fail_on_3", |v| {
            if v == 3 {
                anyhow::bail!("refusing {}", v);
            }
            Ok(v)
        })
        .register_joiner::<i64, i64, i64, String, _>(
            "pair",
            InnerJoiner::new(|k: &i64, l: &i64, r: &i64| format!("{}:{}+{}", k, l, r)),
        );
    registry
}

fn client() -> DataflowClient {
    DataflowClient::new(Arc::new(registry()), DataflowConfig::default())
}

async fn start_server(environment: Environment) -> DataflowServer {
    let mut server = DataflowServer::new(environment.with_instance(registry()));
    server.listen("127.0.0.1:0").await.unwrap();
    server
}

#[tokio::test]
async fn test_shuffle_between_servers() {
    let received = ResultList::<i64>::new();
    let mut source = start_server(Environment::new().with_iterable("numbers", vec![1i64, 2, 3, 4, 5, 6])).await;
    let mut target = start_server(Environment::new().with_result_list("received", &received)).await;
    let source_addr = source.local_addr().unwrap();
    let target_addr = target.local_addr().unwrap();

    let supplier = NodeSupplierOfIterable::new("numbers");
    let mut shard = NodeShard::new("identity_i64", supplier.output);
    let local = shard.add_output();
    let remote = shard.add_output();
    let download = NodeDownload::new("i64", source_addr, remote);
    let sink = NodeConsumerToList::new(download.output, "received");

    let client = client();
    client
        .execute_acknowledged(target_addr, vec![download.into(), sink.into()])
        .await
        .unwrap();
    let ids = client
        .execute_acknowledged(
            source_addr,
            vec![
                supplier.into(),
                shard.into(),
                NodeUpload::new("i64", local).into(),
                NodeUpload::new("i64", remote).into(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(ids, vec![0, 1, 2, 3]);

    let evens = client.download_typed::<i64>(source_addr, local, "i64").unwrap();
    let evens: Vec<i64> = evens.map(|v| v.unwrap()).collect().await;
    assert_eq!(evens, vec![2, 4, 6]);
    assert_eq!(received.finished().await.unwrap(), vec![1, 3, 5]);

    source.close().await;
    target.close().await;
}

#[tokio::test]
async fn test_execute_keyed_nodes_on_server() {
    let joined = ResultList::<String>::new();
    let mut server = start_server(
        Environment::new()
            .with_iterable("left", vec![1i64, 2, 2, 4])
            .with_iterable("right", vec![2i64, 3, 4])
            .with_result_list("joined", &joined),
    )
    .await;
    let addr = server.local_addr().unwrap();

    let left = NodeSupplierOfIterable::new("left");
    let right = NodeSupplierOfIterable::new("right");
    let join = NodeJoin::new(left.output, right.output, "natural_i64", "identity_i64", "identity_i64", "pair");
    let join_sink = NodeConsumerToList::new(join.output, "joined");

    let more_left = NodeSupplierOfIterable::new("left");
    let more_right = NodeSupplierOfIterable::new("right");
    let mut reduce = NodeReduce::new("natural_i64");
    reduce.add_input(more_left.output, "identity_i64", ReducerRef::MergeDistinct);
    reduce.add_input(more_right.output, "identity_i64", ReducerRef::MergeDistinct);
    let reduced = reduce.output;

    let client = client();
    client
        .execute_acknowledged(
            addr,
            vec![
                left.into(),
                right.into(),
                join.into(),
                join_sink.into(),
                more_left.into(),
                more_right.into(),
                reduce.into(),
                NodeUpload::new("i64", reduced).into(),
            ],
        )
        .await
        .unwrap();

    let distinct = collect_typed::<i64>(client.download(addr, reduced, "i64").unwrap()).await.unwrap();
    assert_eq!(distinct, vec![1, 2, 3, 4]);
    assert_eq!(joined.finished().await.unwrap(), vec!["2:2+2", "2:2+2", "4:4+4"]);
    server.close().await;
}

#[tokio::test]
async fn test_download_before_upload() {
    let mut server = start_server(Environment::new().with_iterable("numbers", vec![1i64, 2, 3, 4])).await;
    let addr = server.local_addr().unwrap();
    let client = client();

    let supplier = NodeSupplierOfIterable::new("numbers");
    let filter = NodeFilter::new("is_even", supplier.output);
    let stream_id = filter.output;

    let download = tokio::spawn(collect_typed::<i64>(client.download(addr, stream_id, "i64").unwrap()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    client
        .execute_acknowledged(
            addr,
            vec![supplier.into(), filter.into(), NodeUpload::new("i64", stream_id).into()],
        )
        .await
        .unwrap();
    assert_eq!(download.await.unwrap().unwrap(), vec![2, 4]);
    server.close().await;
}

#[tokio::test]
async fn test_upload_before_download() {
    let mut server = start_server(Environment::new().with_iterable("numbers", vec![1i64, 2, 3, 4])).await;
    let addr = server.local_addr().unwrap();
    let client = client();

    let supplier = NodeSupplierOfIterable::new("numbers");
    let stream_id = supplier.output;
    client
        .execute_acknowledged(addr, vec![supplier.into(), NodeUpload::new("i64", stream_id).into()])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.pending_streams(), 1);

    let items = collect_typed::<i64>(client.download(addr, stream_id, "i64").unwrap()).await.unwrap();
    assert_eq!(items, vec![1, 2, 3, 4]);
    assert_eq!(server.pending_streams(), 0);
    server.close().await;
}

#[tokio::test]
async fn test_failed_upload_truncates_download() {
    let mut server = start_server(Environment::new().with_iterable("numbers", vec![1i64, 2, 3, 4])).await;
    let addr = server.local_addr().unwrap();
    let client = client();

    let supplier = NodeSupplierOfIterable::new("numbers");
    let map = streamgrid::node::NodeMap::new("fail_on_3", supplier.output);
    let stream_id = map.output;
    client
        .execute_acknowledged(
            addr,
            vec![supplier.into(), map.into(), NodeUpload::new("i64", stream_id).into()],
        )
        .await
        .unwrap();

    let err = collect_typed::<i64>(client.download(addr, stream_id, "i64").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, DataflowError::Frame(FrameError::Truncated { .. })));
    server.close().await;
}

#[tokio::test]
async fn test_execute_rejected_on_unbound_stream() {
    let mut server = start_server(Environment::new()).await;
    let addr = server.local_addr().unwrap();

    let orphan = NodeFilter::new("is_even", StreamId::new());
    let sink = NodeConsumerToList::new(orphan.output, "missing");
    let nodes: Vec<Node> = vec![orphan.into(), sink.into()];

    let err = client().execute_acknowledged(addr, nodes).await.unwrap_err();
    assert!(err.to_string().contains("rejected"));
    server.close().await;
}

#[tokio::test]
async fn test_execute_rejected_on_unknown_function() {
    let mut server = start_server(Environment::new().with_iterable("numbers", vec![1i64])).await;
    let addr = server.local_addr().unwrap();

    let supplier = NodeSupplierOfIterable::new("numbers");
    let filter = NodeFilter::new("no_such_predicate", supplier.output);
    let upload = NodeUpload::new("i64", filter.output);

    let result = client()
        .execute_acknowledged(addr, vec![supplier.into(), filter.into(), upload.into()])
        .await;
    assert!(result.is_err());
    assert_eq!(server.pending_streams(), 0);
    server.close().await;
}

#[tokio::test]
async fn test_rejected_execute_releases_parked_download() {
    let mut server = start_server(Environment::new().with_iterable("numbers", vec![1i64])).await;
    let addr = server.local_addr().unwrap();
    let client = Arc::new(client());

    let supplier = NodeSupplierOfIterable::new("numbers");
    let filter = NodeFilter::new("no_such_predicate", supplier.output);
    let upload = NodeUpload::new("i64", filter.output);

    let download = {
        let client = client.clone();
        let stream_id = filter.output;
        tokio::spawn(async move { collect_typed::<i64>(client.download(addr, stream_id, "i64").unwrap()).await })
    };
    while server.pending_streams() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let result = client
        .execute_acknowledged(addr, vec![supplier.into(), filter.into(), upload.into()])
        .await;
    assert!(result.is_err());
    assert_eq!(server.pending_streams(), 0);
    assert!(matches!(
        download.await.unwrap(),
        Err(DataflowError::Frame(FrameError::Truncated { .. }))
    ));
    server.close().await;
}

#[tokio::test]
async fn test_download_unknown_codec_fails_early() {
    let result = client().download("127.0.0.1:9".parse().unwrap(), StreamId::new(), "NoSuchType");
    assert!(matches!(result, Err(DataflowError::MissingResource(_))));
}
