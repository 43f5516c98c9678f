//! Length-prefixed framing over a byte stream.
//!
//! Every frame is a 4-byte big-endian length followed by that many payload
//! bytes. Reads go through a caller-owned accumulation buffer and an
//! incremental decoder, so a read future dropped mid-frame (as happens inside
//! a `select!` loop) never loses bytes. A clean close is only legal between
//! frames; EOF inside a prefix or payload is a protocol error.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::WireError;

/// Number of bytes in the big-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum frame payload size (64 KiB)
pub const MAX_FRAME_SIZE: usize = 65536;

/// Try to decode one frame out of the accumulation buffer.
///
/// Returns `Ok(None)` when more bytes are needed. The length is validated
/// before any payload is consumed; a zero length or one above
/// [`MAX_FRAME_SIZE`] fails immediately.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, WireError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(WireError::Size(len));
    }

    if buf.len() < LENGTH_PREFIX_SIZE + len {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Read one frame from the stream, accumulating into `buf`.
///
/// Returns `Ok(None)` on a clean close (EOF with an empty buffer). EOF with
/// a partial frame buffered is a [`WireError::Truncated`]. Safe to use as a
/// `select!` branch: the only await is a single `read_buf`, and everything
/// already read survives in `buf`.
pub async fn recv_frame<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Option<Bytes>, WireError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = decode_frame(buf)? {
            return Ok(Some(frame));
        }

        let n = reader.read_buf(buf).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(WireError::Truncated);
        }
    }
}

/// Write one frame to the stream and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() || payload.len() > MAX_FRAME_SIZE {
        return Err(WireError::Size(payload.len()));
    }

    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn roundtrip(payload: &[u8]) -> Bytes {
        let mut buf = Vec::new();
        write_frame(&mut buf, payload).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let mut acc = BytesMut::new();
        recv_frame(&mut cursor, &mut acc).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let payloads = vec![
            b"x".to_vec(),
            b"hello world".to_vec(),
            vec![0u8; 4096],
            vec![0xAB; MAX_FRAME_SIZE],
        ];
        for payload in payloads {
            assert_eq!(roundtrip(&payload).await.as_ref(), &payload[..]);
        }
    }

    #[tokio::test]
    async fn test_sequential_frames() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"first").await.unwrap();
        write_frame(&mut buf, b"second").await.unwrap();

        let mut cursor = Cursor::new(buf);
        let mut acc = BytesMut::new();
        assert_eq!(
            recv_frame(&mut cursor, &mut acc).await.unwrap().unwrap().as_ref(),
            b"first"
        );
        assert_eq!(
            recv_frame(&mut cursor, &mut acc).await.unwrap().unwrap().as_ref(),
            b"second"
        );
        assert!(recv_frame(&mut cursor, &mut acc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clean_close_between_frames() {
        let mut cursor = Cursor::new(Vec::new());
        let mut acc = BytesMut::new();
        assert!(recv_frame(&mut cursor, &mut acc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_prefix_is_error() {
        let mut cursor = Cursor::new(vec![0u8, 0u8]);
        let mut acc = BytesMut::new();
        assert!(matches!(
            recv_frame(&mut cursor, &mut acc).await,
            Err(WireError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_payload_is_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"complete payload").await.unwrap();
        buf.truncate(buf.len() - 4);

        let mut cursor = Cursor::new(buf);
        let mut acc = BytesMut::new();
        assert!(matches!(
            recv_frame(&mut cursor, &mut acc).await,
            Err(WireError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_oversize_read_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        let mut cursor = Cursor::new(buf);
        let mut acc = BytesMut::new();
        assert!(matches!(
            recv_frame(&mut cursor, &mut acc).await,
            Err(WireError::Size(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_length_rejected() {
        let mut cursor = Cursor::new(vec![0u8; 4]);
        let mut acc = BytesMut::new();
        assert!(matches!(
            recv_frame(&mut cursor, &mut acc).await,
            Err(WireError::Size(0))
        ));
    }

    #[tokio::test]
    async fn test_oversize_write_rejected() {
        let mut buf = Vec::new();
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            write_frame(&mut buf, &payload).await,
            Err(WireError::Size(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incremental_decode() {
        let mut acc = BytesMut::new();

        // Drip the frame in byte by byte
        let mut framed = Vec::new();
        framed.extend_from_slice(&5u32.to_be_bytes());
        framed.extend_from_slice(b"drip!");

        for (i, byte) in framed.iter().enumerate() {
            acc.extend_from_slice(&[*byte]);
            let decoded = decode_frame(&mut acc).unwrap();
            if i + 1 < framed.len() {
                assert!(decoded.is_none());
            } else {
                assert_eq!(decoded.unwrap().as_ref(), b"drip!");
            }
        }
        assert!(acc.is_empty());
    }
}
