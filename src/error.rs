use crate::stream_id::StreamId;

/// Failure carried through dataflow streams.
///
/// Errors are cloned into every output of a failing operator, so every variant
/// holds owned, cloneable data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataflowError {
    /// A user-supplied function failed.
    #[error("operator {operator} failed: {message}")]
    Operator { operator: String, message: String },

    /// A type-erased value did not have the registered type.
    #[error("type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },

    /// The peer endpoint of a stream went away without finishing it.
    #[error("stream {0} closed before end of stream")]
    Closed(StreamId),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("binding error: {0}")]
    Binding(String),

    /// A registry entry or environment resource was not found.
    #[error("missing resource: {0}")]
    MissingResource(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// Spill storage could not create, read or remove a run.
    #[error("spill storage error: {0}")]
    Storage(String),
}

impl DataflowError {
    pub fn operator(operator: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Operator {
            operator: operator.into(),
            message: error.to_string(),
        }
    }

    pub fn network(error: impl std::fmt::Display) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for DataflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Framing failures. All of them are fatal for the stream being parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("size header longer than {max_bytes} bytes")]
    HeaderTooLong { max_bytes: usize },

    #[error("frame of {size} bytes exceeds maximum of {max} bytes")]
    Oversized { size: usize, max: usize },

    #[error("truncated stream: {remaining} bytes left before end of data")]
    Truncated { remaining: usize },

    #[error("empty payloads are reserved for the end-of-data marker")]
    EmptyPayload,

    #[error("deserialized size {consumed} != frame size {declared}")]
    SizeMismatch { consumed: usize, declared: usize },

    #[error("io: {0}")]
    Io(String),
}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type DataflowResult<T> = std::result::Result<T, DataflowError>;
