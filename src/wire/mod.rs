pub mod frame;
pub mod protocol;

use tokio::net::TcpStream;
use tokio_util::codec::Framed;

pub use frame::{data_stream, Frame, FrameCodec, MAX_FRAME_SIZE};
pub use protocol::{decode_message, encode_message, Command, Response};

/// A framed command connection.
pub type Connection = Framed<TcpStream, FrameCodec>;
