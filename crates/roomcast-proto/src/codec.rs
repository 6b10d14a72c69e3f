//! Length-prefixed CBOR framing.
//!
//! Frames are `[length: u32 BE][body]`. The length never counts itself and is
//! never zero. Readers enforce a maximum body size before allocating, so a
//! hostile length prefix cannot force a large allocation.
//!
//! # Invariants
//!
//! - A stream that ends exactly on a frame boundary is a clean end-of-input
//!   (`Ok(None)`), anywhere else it is [`ProtocolError::Truncated`].
//! - `encode` followed by `split_frame` on the same buffer yields the
//!   original body and consumes exactly the encoded length.
//! - [`FrameReader`] keeps partially received frames in its own buffer, so a
//!   read dropped mid-frame loses no bytes.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{ProtocolError, Result};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum body size (4 MiB).
pub const MAX_FRAME_SIZE: usize = 4 << 20;

/// Bytes requested from the reader per read call.
const READ_CHUNK: usize = 8 * 1024;

/// Serialize `message` as a complete frame into `dst`.
///
/// # Errors
///
/// - `ProtocolError::CborEncode` if serialization fails
/// - `ProtocolError::FrameTooLarge` if the body exceeds [`MAX_FRAME_SIZE`]
pub fn encode<T: Serialize>(message: &T, dst: &mut impl BufMut) -> Result<()> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(message, &mut body)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;

    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE });
    }

    // INVARIANT: body.len() <= MAX_FRAME_SIZE < u32::MAX
    dst.put_u32(body.len() as u32);
    dst.put_slice(&body);
    Ok(())
}

/// Deserialize a frame body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    ciborium::de::from_reader(body).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

/// Validate a length prefix against `max_frame_size`.
pub fn body_len(prefix: [u8; LENGTH_PREFIX_SIZE], max_frame_size: usize) -> Result<usize> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }
    if len > max_frame_size {
        return Err(ProtocolError::FrameTooLarge { size: len, max: max_frame_size });
    }
    Ok(len)
}

/// Split the first complete frame off the front of `buf`.
///
/// Returns the body and the total number of bytes consumed, or `None` if
/// `buf` does not yet hold a complete frame.
pub fn split_frame(buf: &[u8], max_frame_size: usize) -> Result<Option<(&[u8], usize)>> {
    let Some(prefix) = buf.first_chunk::<LENGTH_PREFIX_SIZE>() else {
        return Ok(None);
    };

    let len = body_len(*prefix, max_frame_size)?;
    let total = LENGTH_PREFIX_SIZE + len;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some((&buf[LENGTH_PREFIX_SIZE..total], total)))
}

/// Read one frame body from `reader`.
///
/// Returns `Ok(None)` when the stream ends cleanly before a new frame starts.
/// Not cancel-safe: a dropped call discards bytes already read. Use
/// [`FrameReader`] when the read may be raced against other work.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<BytesMut>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated { expected: LENGTH_PREFIX_SIZE, actual: filled });
        }
        filled += n;
    }

    let len = body_len(prefix, max_frame_size)?;
    let mut body = BytesMut::zeroed(len);
    reader.read_exact(&mut body).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => ProtocolError::Truncated { expected: len, actual: 0 },
        _ => ProtocolError::from(e),
    })?;

    Ok(Some(body))
}

/// Read and decode one message from `reader`.
pub async fn read_message<R, T>(reader: &mut R, max_frame_size: usize) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader, max_frame_size).await? {
        Some(body) => decode(&body).map(Some),
        None => Ok(None),
    }
}

/// Buffered, cancel-safe frame reader.
///
/// Bytes read from the underlying stream are appended to an owned buffer and
/// frames are split off its front. Dropping a pending [`FrameReader::read_frame`]
/// future keeps whatever was already received, and the next call resumes
/// from there.
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `reader`, rejecting bodies larger than `max_frame_size`.
    pub fn new(reader: R, max_frame_size: usize) -> Self {
        Self { reader, buf: BytesMut::new(), max_frame_size }
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Read one frame body.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
    pub async fn read_frame(&mut self) -> Result<Option<BytesMut>> {
        loop {
            let complete = split_frame(&self.buf, self.max_frame_size)?.map(|(_, total)| total);
            if let Some(total) = complete {
                let mut frame = self.buf.split_to(total);
                frame.advance(LENGTH_PREFIX_SIZE);
                return Ok(Some(frame));
            }

            self.buf.reserve(READ_CHUNK);
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                return match self.buf.first_chunk::<LENGTH_PREFIX_SIZE>() {
                    None if self.buf.is_empty() => Ok(None),
                    None => Err(ProtocolError::Truncated {
                        expected: LENGTH_PREFIX_SIZE,
                        actual: self.buf.len(),
                    }),
                    Some(prefix) => Err(ProtocolError::Truncated {
                        expected: body_len(*prefix, self.max_frame_size)?,
                        actual: self.buf.len() - LENGTH_PREFIX_SIZE,
                    }),
                };
            }
        }
    }

    /// Read and decode one message.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.read_frame().await? {
            Some(body) => decode(&body).map(Some),
            None => Ok(None),
        }
    }
}

/// Encode `message` and write it to `writer` as a single frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut buf = Vec::new();
    encode(message, &mut buf)?;
    writer.write_all(&buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ClientEnvelope, ClientMessage, ServerEvent};

    #[test]
    fn split_waits_for_complete_frame() {
        let mut buf = Vec::new();
        encode(&ClientEnvelope::chat("alice", "general", "hi"), &mut buf).unwrap();

        assert_eq!(split_frame(&buf[..2], MAX_FRAME_SIZE).unwrap(), None);
        assert_eq!(split_frame(&buf[..buf.len() - 1], MAX_FRAME_SIZE).unwrap(), None);

        let (body, consumed) = split_frame(&buf, MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(consumed, buf.len());

        let decoded: ClientEnvelope = decode(body).unwrap();
        assert!(matches!(decoded.message, Some(ClientMessage::Chat(_))));
    }

    #[test]
    fn zero_length_prefix_is_rejected() {
        let buf = [0u8, 0, 0, 0, 0xff];
        assert_eq!(split_frame(&buf, MAX_FRAME_SIZE), Err(ProtocolError::EmptyFrame));
    }

    #[test]
    fn oversized_prefix_is_rejected_before_body_arrives() {
        let buf = 1025u32.to_be_bytes();
        assert_eq!(
            split_frame(&buf, 1024),
            Err(ProtocolError::FrameTooLarge { size: 1025, max: 1024 })
        );
    }

    #[test]
    fn garbage_body_is_decode_error() {
        let result: Result<ServerEvent> = decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }

    #[tokio::test]
    async fn read_frame_reports_clean_eof() {
        let mut empty: &[u8] = &[];
        let frame = read_frame(&mut empty, MAX_FRAME_SIZE).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn read_frame_reports_truncated_prefix() {
        let mut partial: &[u8] = &[0, 0];
        let result = read_frame(&mut partial, MAX_FRAME_SIZE).await;
        assert_eq!(result, Err(ProtocolError::Truncated { expected: 4, actual: 2 }));
    }

    #[tokio::test]
    async fn frame_reader_splits_back_to_back_frames() {
        let mut buf = Vec::new();
        encode(&ClientEnvelope::join("alice", "", "general"), &mut buf).unwrap();
        encode(&ClientEnvelope::leave("alice", "general"), &mut buf).unwrap();

        let mut reader = FrameReader::new(buf.as_slice(), MAX_FRAME_SIZE);
        let first: ClientEnvelope = reader.read_message().await.unwrap().unwrap();
        let second: ClientEnvelope = reader.read_message().await.unwrap().unwrap();

        assert!(matches!(first.message, Some(ClientMessage::Join(_))));
        assert!(matches!(second.message, Some(ClientMessage::Leave(_))));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn frame_reader_keeps_partial_frame_when_read_is_dropped() {
        let mut frame = Vec::new();
        encode(&ClientEnvelope::chat("alice", "general", "hello"), &mut frame).unwrap();

        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx, MAX_FRAME_SIZE);

        tx.write_all(&frame[..6]).await.unwrap();
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            reader.read_message::<ClientEnvelope>(),
        )
        .await;
        assert!(pending.is_err());
        assert_eq!(reader.buffered(), 6);

        tx.write_all(&frame[6..]).await.unwrap();
        let envelope: ClientEnvelope = reader.read_message().await.unwrap().unwrap();
        assert!(matches!(envelope.message, Some(ClientMessage::Chat(_))));
    }

    #[tokio::test]
    async fn frame_reader_reports_truncated_body() {
        let mut partial: &[u8] = &[0, 0, 0, 8, 1, 2, 3];
        let mut reader = FrameReader::new(&mut partial, MAX_FRAME_SIZE);
        let result = reader.read_frame().await;
        assert_eq!(result, Err(ProtocolError::Truncated { expected: 8, actual: 3 }));
    }

    #[tokio::test]
    async fn read_frame_reports_truncated_body() {
        let mut partial: &[u8] = &[0, 0, 0, 8, 1, 2, 3];
        let result = read_frame(&mut partial, MAX_FRAME_SIZE).await;
        assert!(matches!(result, Err(ProtocolError::Truncated { expected: 8, .. })));
    }
}
