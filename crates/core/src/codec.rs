//! Length-prefixed JSON framing.
//!
//! Every frame on the wire is a 4-byte big-endian body length followed by
//! exactly that many bytes of UTF-8 JSON:
//!
//! ```text
//! +----------------+---------------------------+
//! | len: u32 (BE)  | body: len bytes of JSON   |
//! +----------------+---------------------------+
//! ```
//!
//! Two kinds of failure are kept apart:
//!
//! - A frame whose *length* is invalid (over [`MAX_FRAME_LEN`], or cut off by
//!   end of stream) leaves the reader unable to find the next frame. These
//!   surface as [`CodecError`] and the connection must be closed.
//! - A well-delimited frame whose *body* is not a valid message is reported
//!   as `Ok(Some(Err(MalformedFrame)))` by [`MessageCodec`]; the next frame is
//!   unaffected and the connection keeps going.

use std::io;
use std::marker::PhantomData;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest accepted body, in bytes.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Errors that desynchronize the stream.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Socket read or write failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The length prefix announces a body larger than allowed.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Announced length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The stream ended in the middle of a frame.
    #[error("stream ended mid-frame ({buffered} bytes buffered)")]
    Truncated {
        /// Bytes received for the unfinished frame.
        buffered: usize,
    },

    /// An outgoing message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A delimited frame whose contents could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed frame: {reason}")]
pub struct MalformedFrame {
    /// What was wrong with the frame.
    pub reason: String,
}

impl MalformedFrame {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Frame Codec
// =============================================================================

/// Splits a byte stream into raw frame bodies.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    /// Codec with the default [`MAX_FRAME_LEN`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Codec with a custom body limit.
    #[must_use]
    pub const fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Configured body limit.
    #[must_use]
    pub const fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(header) = src.get(..HEADER_LEN) else {
            src.reserve(HEADER_LEN);
            return Ok(None);
        };

        let mut prefix = [0u8; HEADER_LEN];
        prefix.copy_from_slice(header);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let buffered = src.len();
                src.clear();
                Err(CodecError::Truncated { buffered })
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = u32::try_from(body.len())
            .ok()
            .filter(|&len| len as usize <= self.max_frame_len)
            .ok_or(CodecError::FrameTooLarge {
                len: body.len(),
                max: self.max_frame_len,
            })?;

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u32(len);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

// =============================================================================
// Message Codec
// =============================================================================

/// Frames typed JSON messages.
///
/// `In` is what this side reads, `Out` is what it writes: the server uses
/// `MessageCodec<Request, Response>` and clients the reverse.
#[derive(Debug)]
pub struct MessageCodec<In, Out> {
    frames: FrameCodec,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<In, Out> MessageCodec<In, Out> {
    /// Codec with the default [`MAX_FRAME_LEN`].
    #[must_use]
    pub const fn new() -> Self {
        Self::with_frame_codec(FrameCodec::new())
    }

    /// Codec on top of a configured frame codec.
    #[must_use]
    pub const fn with_frame_codec(frames: FrameCodec) -> Self {
        Self {
            frames,
            _marker: PhantomData,
        }
    }
}

impl<In, Out> Default for MessageCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> Clone for MessageCodec<In, Out> {
    fn clone(&self) -> Self {
        Self::with_frame_codec(self.frames)
    }
}

impl<In: DeserializeOwned, Out> Decoder for MessageCodec<In, Out> {
    type Item = Result<In, MalformedFrame>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.frames.decode(src)?.map(|body| decode_body(&body)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.frames.decode_eof(src)?.map(|body| decode_body(&body)))
    }
}

impl<In, Out: Serialize> Encoder<Out> for MessageCodec<In, Out> {
    type Error = CodecError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item).map_err(CodecError::Encode)?;
        self.frames.encode(Bytes::from(body), dst)
    }
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, MalformedFrame> {
    serde_json::from_slice(body).map_err(|e| MalformedFrame::new(e.to_string()))
}

// =============================================================================
// Whole-frame helpers
// =============================================================================

/// Encode one message into a complete frame (prefix included).
///
/// # Errors
///
/// Returns `CodecError::Encode` if the message cannot be serialized, or
/// `CodecError::FrameTooLarge` if the body exceeds [`MAX_FRAME_LEN`].
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, CodecError> {
    let body = serde_json::to_vec(message).map_err(CodecError::Encode)?;
    let mut dst = BytesMut::with_capacity(HEADER_LEN + body.len());
    FrameCodec::new().encode(Bytes::from(body), &mut dst)?;
    Ok(dst.freeze())
}

/// Decode exactly one complete frame (prefix included).
///
/// # Errors
///
/// Returns `MalformedFrame` if the bytes are truncated, carry trailing
/// data, announce an oversized body, or the body is not a valid `T`.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, MalformedFrame> {
    let mut src = BytesMut::from(frame);
    let body = FrameCodec::new()
        .decode_eof(&mut src)
        .map_err(|e| MalformedFrame::new(e.to_string()))?
        .ok_or_else(|| MalformedFrame::new("empty input"))?;

    if !src.is_empty() {
        return Err(MalformedFrame::new(format!(
            "{} trailing bytes after frame",
            src.len()
        )));
    }

    decode_body(&body)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use futures::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::protocol::{CommandCode, Request, Response};

    fn login_request() -> Request {
        Request::new(CommandCode::BuyerLogin, None)
    }

    #[test]
    fn test_encode_prefixes_body_length() {
        let frame = encode(&login_request()).unwrap();
        let body_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(body_len, frame.len() - HEADER_LEN);
    }

    #[test]
    fn test_decode_whole_frame() {
        let frame = encode(&login_request()).unwrap();
        let decoded: Request = decode(&frame).unwrap();
        assert_eq!(decoded, login_request());
    }

    #[test]
    fn test_decode_truncated_is_malformed() {
        let frame = encode(&login_request()).unwrap();
        assert!(decode::<Request>(&frame[..frame.len() - 1]).is_err());
        assert!(decode::<Request>(&frame[..2]).is_err());
        assert!(decode::<Request>(&[]).is_err());
    }

    #[test]
    fn test_decode_trailing_bytes_is_malformed() {
        let mut frame = encode(&login_request()).unwrap().to_vec();
        frame.push(b'x');
        assert!(decode::<Request>(&frame).is_err());
    }

    #[test]
    fn test_decode_garbage_body_is_malformed() {
        let mut frame = BytesMut::new();
        frame.put_u32(5);
        frame.extend_from_slice(b"hello");
        let err = decode::<Request>(&frame).unwrap_err();
        assert!(err.reason.contains("expected"));
    }

    #[test]
    fn test_frame_codec_waits_for_full_frame() {
        let frame = encode(&login_request()).unwrap();
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&frame[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[3..frame.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[frame.len() - 1..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_codec_splits_merged_frames() {
        let first = encode(&login_request()).unwrap();
        let second = encode(&Request::new(CommandCode::ViewCart, None)).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);

        let mut codec = MessageCodec::<Request, Response>::new();
        let a = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        let b = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(a.command, CommandCode::BuyerLogin);
        assert_eq!(b.command, CommandCode::ViewCart);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_prefix_is_fatal() {
        let mut buf = BytesMut::new();
        buf.put_u32(u32::try_from(MAX_FRAME_LEN + 1).unwrap());
        let result = FrameCodec::new().decode(&mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_encoder_rejects_oversized_body() {
        let mut codec = FrameCodec::with_max_frame_len(4);
        let mut dst = BytesMut::new();
        let result = codec.encode(Bytes::from_static(b"12345"), &mut dst);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_malformed_body_does_not_poison_stream() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.extend_from_slice(b"{]}");
        buf.extend_from_slice(&encode(&login_request()).unwrap());

        let mut codec = MessageCodec::<Request, Response>::new();
        assert!(codec.decode(&mut buf).unwrap().unwrap().is_err());
        assert!(codec.decode(&mut buf).unwrap().unwrap().is_ok());
    }

    #[test]
    fn test_eof_mid_frame_is_truncated() {
        let frame = encode(&login_request()).unwrap();
        let mut buf = BytesMut::from(&frame[..frame.len() - 2]);
        let result = FrameCodec::new().decode_eof(&mut buf);
        assert!(matches!(result, Err(CodecError::Truncated { .. })));
    }

    #[tokio::test]
    async fn test_framed_stream_over_byte_by_byte_writes() {
        let (client, server) = tokio::io::duplex(64);
        let frame = encode(&login_request()).unwrap();

        let writer = tokio::spawn(async move {
            let mut client = client;
            for byte in frame.iter() {
                client.write_all(&[*byte]).await.unwrap();
            }
        });

        let mut reader = FramedRead::new(server, MessageCodec::<Request, Response>::new());
        let request = reader.next().await.unwrap().unwrap().unwrap();
        assert_eq!(request, login_request());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_framed_sink_roundtrip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, MessageCodec::<Response, Request>::new());
        let mut stream = FramedRead::new(server, MessageCodec::<Request, Response>::new());

        sink.send(login_request()).await.unwrap();
        let received = stream.next().await.unwrap().unwrap().unwrap();
        assert_eq!(received.command, CommandCode::BuyerLogin);
    }
}
