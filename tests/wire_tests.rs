use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Framed, FramedRead};

use streamgrid::node::{
    NodeConsumerToList, NodeDownload, NodeFilter, NodeJoin, NodeMap, NodeMerge, NodeReduce, NodeReduceSimple,
    NodeShard, NodeSort, NodeSupplierOfIterable, NodeUnion, NodeUpload,
};
use streamgrid::wire::{data_stream, decode_message, encode_message, Command, Frame, FrameCodec, Response};
use streamgrid::{DataflowError, FrameError, Node, ReducerRef, StreamId};

#[tokio::test]
async fn test_frames_over_duplex() {
    let (client, server) = tokio::io::duplex(64);
    let mut writer = Framed::new(client, FrameCodec::new());
    let reader = FramedRead::new(server, FrameCodec::new());

    let sender = tokio::spawn(async move {
        for i in 0..100u32 {
            writer.send(Frame::Data(Bytes::from(i.to_be_bytes().to_vec()))).await.unwrap();
        }
        writer.send(Frame::Data(Bytes::from(vec![7u8; 1000]))).await.unwrap();
        writer.send(Frame::End).await.unwrap();
    });

    let payloads: Vec<Bytes> = data_stream(reader).map(|p| p.unwrap()).collect().await;
    sender.await.unwrap();

    assert_eq!(payloads.len(), 101);
    assert_eq!(&payloads[42][..], &42u32.to_be_bytes()[..]);
    assert_eq!(payloads[100].len(), 1000);
}

#[tokio::test]
async fn test_eof_without_end_is_truncation() {
    let (mut client, server) = tokio::io::duplex(64);
    let mut encoded = bytes::BytesMut::new();
    tokio_util::codec::Encoder::encode(&mut FrameCodec::new(), Frame::Data(Bytes::from_static(b"abc")), &mut encoded)
        .unwrap();
    client.write_all(&encoded).await.unwrap();
    drop(client);

    let results: Vec<_> = data_stream(FramedRead::new(server, FrameCodec::new())).collect().await;
    assert_eq!(results.len(), 2);
    assert_eq!(&results[0].as_ref().unwrap()[..], &b"abc"[..]);
    assert_eq!(
        results[1].as_ref().unwrap_err(),
        &DataflowError::Frame(FrameError::Truncated { remaining: 0 })
    );
}

#[tokio::test]
async fn test_eof_mid_frame_is_truncation() {
    let (mut client, server) = tokio::io::duplex(64);
    // Header declares 5 bytes, only 2 follow.
    client.write_all(&[5, b'a', b'b']).await.unwrap();
    drop(client);

    let results: Vec<_> = data_stream(FramedRead::new(server, FrameCodec::new())).collect().await;
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0],
        Err(DataflowError::Frame(FrameError::Truncated { .. }))
    ));
}

#[test]
fn test_execute_command_carries_nodes() {
    let mut shard = NodeShard::new("identity_i64", StreamId::new());
    let out = shard.add_output();
    let nodes: Vec<Node> = vec![shard.into(), NodeUpload::new("i64", out).into()];

    let payload = encode_message(&Command::Execute { nodes: nodes.clone() }).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(json["Execute"]["nodes"][0]["type"], "Shard");
    assert_eq!(json["Execute"]["nodes"][1]["type"], "Upload");

    match decode_message::<Command>(&payload).unwrap() {
        Command::Execute { nodes: decoded } => assert_eq!(decoded, nodes),
        other => panic!("unexpected command: {:?}", other),
    }
}

#[test]
fn test_garbage_response_is_protocol_error() {
    let err = decode_message::<Response>(b"{not json").unwrap_err();
    assert!(matches!(err, DataflowError::Protocol(_)));
}

#[test]
fn test_node_endpoints_in_declaration_order() {
    let left = StreamId::new();
    let right = StreamId::new();
    let join = NodeJoin::new(left, right, "natural_i64", "identity_i64", "identity_i64", "pair");
    let node: Node = join.clone().into();
    assert_eq!(node.kind(), "Join");
    assert_eq!(node.inputs(), vec![left, right]);
    assert_eq!(node.outputs(), vec![join.output]);

    let mut merge = NodeMerge::new("identity_i64", "natural_i64", false);
    let a = StreamId::new();
    let b = StreamId::new();
    merge.add_input(a);
    merge.add_input(b);
    let node: Node = merge.into();
    assert_eq!(node.inputs(), vec![a, b]);

    let upload: Node = NodeUpload::new("i64", a).into();
    assert_eq!(upload.inputs(), vec![a]);
    assert!(upload.outputs().is_empty());
}

/// One descriptor of every node type with its expected inputs and outputs.
fn every_node() -> Vec<(Node, Vec<StreamId>, Vec<StreamId>)> {
    let a = StreamId::new();
    let b = StreamId::new();
    let address = "127.0.0.1:4100".parse().unwrap();

    let map = NodeMap::new("double", a);
    let filter = NodeFilter::new("is_even", a);
    let mut shard = NodeShard::new("identity_i64", a);
    let shard_outputs = vec![shard.add_output(), shard.add_output()];
    let mut merge = NodeMerge::new("identity_i64", "natural_i64", true);
    merge.add_input(a);
    merge.add_input(b);
    let sort = NodeSort::new("i64", "identity_i64", "natural_i64", a).with_memory_limit(8);
    let mut reduce = NodeReduce::new("natural_string");
    reduce.add_input(b, "pair_name", ReducerRef::InputToAccumulator { reducer: "sum".into() });
    reduce.add_input(a, "pair_name", ReducerRef::MergeSort);
    let mut reduce_simple = NodeReduceSimple::new(
        "identity_i64",
        "natural_i64",
        ReducerRef::AccumulatorToOutput { reducer: "sum".into() },
    );
    reduce_simple.add_input(a);
    reduce_simple.add_input(b);
    let join = NodeJoin::new(a, b, "natural_i64", "identity_i64", "identity_i64", "pair");
    let union = NodeUnion::new(vec![a, b]);
    let download = NodeDownload::new("i64", address, a);
    let supplier = NodeSupplierOfIterable::new("numbers");

    vec![
        (map.clone().into(), vec![a], vec![map.output]),
        (filter.clone().into(), vec![a], vec![filter.output]),
        (shard.into(), vec![a], shard_outputs),
        (merge.clone().into(), vec![a, b], vec![merge.output]),
        (sort.clone().into(), vec![a], vec![sort.output]),
        (reduce.clone().into(), vec![a, b], vec![reduce.output]),
        (reduce_simple.clone().into(), vec![a, b], vec![reduce_simple.output]),
        (join.clone().into(), vec![a, b], vec![join.output]),
        (union.clone().into(), vec![a, b], vec![union.output]),
        (download.clone().into(), vec![], vec![download.output]),
        (NodeUpload::new("i64", b).into(), vec![b], vec![]),
        (supplier.clone().into(), vec![], vec![supplier.output]),
        (NodeConsumerToList::new(b, "out").into(), vec![b], vec![]),
    ]
}

#[test]
fn test_every_node_reports_its_endpoints() {
    let nodes = every_node();
    assert_eq!(nodes.len(), 13);
    for (node, inputs, outputs) in nodes {
        assert_eq!(node.inputs(), inputs, "inputs of {}", node.kind());
        assert_eq!(node.outputs(), outputs, "outputs of {}", node.kind());
    }
}

#[test]
fn test_every_node_survives_execute() {
    for (node, _, _) in every_node() {
        let payload = serde_json::to_vec(&node).unwrap();
        let decoded: Node = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded, node, "{} descriptor", node.kind());

        let payload = encode_message(&Command::Execute { nodes: vec![node.clone()] }).unwrap();
        match decode_message::<Command>(&payload) {
            Ok(Command::Execute { nodes }) => assert_eq!(nodes, vec![node]),
            other => panic!("{} did not decode: {:?}", node.kind(), other),
        }
    }
}
