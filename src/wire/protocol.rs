//! JSON command envelope carried in a single frame.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DataflowError, DataflowResult};
use crate::node::Node;
use crate::stream_id::StreamId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Run a batch of nodes on the receiving partition.
    Execute { nodes: Vec<Node> },
    /// Stream the items of a locally uploaded stream back to the caller.
    Download { stream_id: StreamId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ack,
    Disconnect,
    Execute { node_ids: Vec<usize> },
}

pub fn encode_message<T: Serialize>(message: &T) -> DataflowResult<Bytes> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| DataflowError::Protocol(e.to_string()))
}

pub fn decode_message<T: DeserializeOwned>(payload: &[u8]) -> DataflowResult<T> {
    serde_json::from_slice(payload).map_err(|e| DataflowError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_download_envelope() {
        let command = Command::Download {
            stream_id: StreamId::from_raw(7),
        };
        assert_eq!(
            serde_json::to_value(&command).unwrap(),
            json!({"Download": {"stream_id": 7}})
        );
    }

    #[test]
    fn test_responses() {
        assert_eq!(serde_json::to_value(Response::Ack).unwrap(), json!("Ack"));
        assert_eq!(
            serde_json::to_value(Response::Execute { node_ids: vec![0, 1] }).unwrap(),
            json!({"Execute": {"node_ids": [0, 1]}})
        );
        let back: Response = decode_message(b"\"Disconnect\"").unwrap();
        assert_eq!(back, Response::Disconnect);
    }

    #[test]
    fn test_malformed_command() {
        assert!(matches!(
            decode_message::<Command>(b"{\"Upload\":{}}"),
            Err(DataflowError::Protocol(_))
        ));
    }
}
