//! Length-prefixed frames.
//!
//! Each frame is a varint size header of at most three bytes (seven bits per
//! byte, low bits first, high bit set on every byte but the last) followed by
//! exactly that many payload bytes. A zero-size frame marks the end of a data
//! stream, so data frames are never empty.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{DataflowResult, FrameError};

pub const MAX_HEADER_BYTES: usize = 3;
pub const MAX_FRAME_SIZE: usize = (1 << (7 * MAX_HEADER_BYTES)) - 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Bytes),
    End,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a size header. `Ok(None)` when more bytes are needed.
fn read_header(src: &[u8]) -> Result<Option<(usize, usize)>, FrameError> {
    let mut size = 0usize;
    for i in 0..MAX_HEADER_BYTES {
        let Some(&b) = src.get(i) else {
            return Ok(None);
        };
        size |= ((b & 0x7f) as usize) << (7 * i);
        if b & 0x80 == 0 {
            return Ok(Some((i + 1, size)));
        }
    }
    Err(FrameError::HeaderTooLong {
        max_bytes: MAX_HEADER_BYTES,
    })
}

fn write_header(mut size: usize, dst: &mut BytesMut) {
    while size >= 0x80 {
        dst.put_u8((size as u8 & 0x7f) | 0x80);
        size >>= 7;
    }
    dst.put_u8(size as u8);
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let Some((header_len, size)) = read_header(src)? else {
            return Ok(None);
        };
        if size > self.max_frame_size {
            return Err(FrameError::Oversized {
                size,
                max: self.max_frame_size,
            });
        }
        if src.len() < header_len + size {
            src.reserve(header_len + size - src.len());
            return Ok(None);
        }
        src.advance(header_len);
        if size == 0 {
            return Ok(Some(Frame::End));
        }
        Ok(Some(Frame::Data(src.split_to(size).freeze())))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Truncated { remaining: src.len() }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        match frame {
            Frame::End => {
                dst.put_u8(0);
                Ok(())
            }
            Frame::Data(payload) if payload.is_empty() => Err(FrameError::EmptyPayload),
            Frame::Data(payload) => {
                if payload.len() > self.max_frame_size {
                    return Err(FrameError::Oversized {
                        size: payload.len(),
                        max: self.max_frame_size,
                    });
                }
                dst.reserve(MAX_HEADER_BYTES + payload.len());
                write_header(payload.len(), dst);
                dst.extend_from_slice(&payload);
                Ok(())
            }
        }
    }
}

/// Payloads of a framed data stream up to its end marker.
///
/// An input that ends before the marker yields a `Truncated` error.
pub fn data_stream<S>(frames: S) -> BoxStream<'static, DataflowResult<Bytes>>
where
    S: Stream<Item = Result<Frame, FrameError>> + Send + Unpin + 'static,
{
    stream::unfold(Some(frames), |state| async move {
        let mut frames = state?;
        match frames.next().await {
            Some(Ok(Frame::Data(payload))) => Some((Ok(payload), Some(frames))),
            Some(Ok(Frame::End)) => None,
            Some(Err(e)) => Some((Err(e.into()), None)),
            None => Some((Err(FrameError::Truncated { remaining: 0 }.into()), None)),
        }
    })
    .boxed()
}
