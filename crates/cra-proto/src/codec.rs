//! Framing primitives for control and data streams.
//!
//! All multi-byte integers are little-endian. Byte arrays are framed
//! as a 7-bit-encoded varint length followed by the payload; an empty
//! array is the single byte `0x00`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Maximum accepted length for a framed byte array (256 MiB).
pub const MAX_ARRAY_LEN: usize = 1 << 28;

/// Writes a little-endian 32-bit integer.
pub async fn write_i32<W>(writer: &mut W, value: i32) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&value.to_le_bytes()).await?;
    Ok(())
}

/// Reads a little-endian 32-bit integer.
pub async fn read_i32<R>(reader: &mut R) -> Result<i32, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await?;
    Ok(i32::from_le_bytes(buf))
}

/// Writes a length-prefixed byte array.
pub async fn write_byte_array<W>(writer: &mut W, bytes: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if bytes.len() > MAX_ARRAY_LEN {
        return Err(ProtocolError::ArrayTooLarge {
            size: bytes.len(),
            max: MAX_ARRAY_LEN,
        });
    }

    #[allow(clippy::cast_possible_truncation)]
    write_varint(writer, bytes.len() as u32).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

/// Reads a length-prefixed byte array.
pub async fn read_byte_array<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let len = read_varint(reader).await? as usize;
    if len > MAX_ARRAY_LEN {
        return Err(ProtocolError::ArrayTooLarge {
            size: len,
            max: MAX_ARRAY_LEN,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Writes a string as a UTF-8 byte array.
pub async fn write_string<W>(writer: &mut W, value: &str) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    write_byte_array(writer, value.as_bytes()).await
}

/// Reads a UTF-8 string framed as a byte array.
pub async fn read_string<R>(reader: &mut R) -> Result<String, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let bytes = read_byte_array(reader).await?;
    String::from_utf8(bytes).map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))
}

/// Writes a 7-bit-encoded varint: seven payload bits per byte, low
/// bits first, continuation bit high.
async fn write_varint<W>(writer: &mut W, mut value: u32) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        writer.write_all(&[byte]).await?;
        if value == 0 {
            return Ok(());
        }
    }
}

/// Reads a 7-bit-encoded varint. A u32 needs at most five bytes.
async fn read_varint<R>(reader: &mut R) -> Result<u32, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut value: u32 = 0;
    let mut shift = 0u32;

    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await?;
        let byte = byte[0];

        if shift == 28 && byte & 0xf0 != 0 {
            return Err(ProtocolError::InvalidVarint);
        }

        value |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }

        shift += 7;
        if shift > 28 {
            return Err(ProtocolError::InvalidVarint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip_i32(value: i32) -> i32 {
        let mut buf = Vec::new();
        write_i32(&mut buf, value).await.unwrap();
        assert_eq!(buf.len(), 4);
        read_i32(&mut buf.as_slice()).await.unwrap()
    }

    #[tokio::test]
    async fn i32_roundtrip() {
        for value in [0, 1, -1, 42, i32::MIN, i32::MAX] {
            assert_eq!(roundtrip_i32(value).await, value);
        }
    }

    #[tokio::test]
    async fn i32_is_little_endian() {
        let mut buf = Vec::new();
        write_i32(&mut buf, 0x0102_0304).await.unwrap();
        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01]);
    }

    #[tokio::test]
    async fn byte_array_roundtrip() {
        for payload in [&b""[..], &b"x"[..], &b"hello world"[..], &[0u8; 300][..]] {
            let mut buf = Vec::new();
            write_byte_array(&mut buf, payload).await.unwrap();
            let restored = read_byte_array(&mut buf.as_slice()).await.unwrap();
            assert_eq!(restored, payload);
        }
    }

    #[tokio::test]
    async fn empty_array_is_single_zero_byte() {
        let mut buf = Vec::new();
        write_byte_array(&mut buf, b"").await.unwrap();
        assert_eq!(buf, [0x00]);
    }

    #[tokio::test]
    async fn varint_prefix_uses_continuation_bit() {
        // 300 = 0b1_0010_1100 -> 0xac 0x02
        let mut buf = Vec::new();
        write_byte_array(&mut buf, &[0u8; 300]).await.unwrap();
        assert_eq!(&buf[..2], &[0xac, 0x02]);
        assert_eq!(buf.len(), 302);
    }

    #[tokio::test]
    async fn oversized_length_prefix_rejected() {
        // Five varint bytes encoding well past MAX_ARRAY_LEN.
        let buf = [0xff, 0xff, 0xff, 0xff, 0x0f];
        let err = read_byte_array(&mut &buf[..]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ArrayTooLarge { .. }));
    }

    #[tokio::test]
    async fn runaway_varint_rejected() {
        let buf = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        let err = read_byte_array(&mut &buf[..]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidVarint));
    }

    #[tokio::test]
    async fn string_roundtrip() {
        let mut buf = Vec::new();
        write_string(&mut buf, "vertex$3").await.unwrap();
        let restored = read_string(&mut buf.as_slice()).await.unwrap();
        assert_eq!(restored, "vertex$3");
    }

    #[tokio::test]
    async fn invalid_utf8_rejected() {
        let mut buf = Vec::new();
        write_byte_array(&mut buf, &[0xff, 0xfe]).await.unwrap();
        assert!(read_string(&mut buf.as_slice()).await.is_err());
    }

    #[tokio::test]
    async fn truncated_payload_is_io_error() {
        let mut buf = Vec::new();
        write_byte_array(&mut buf, b"hello").await.unwrap();
        buf.truncate(3);
        let err = read_byte_array(&mut buf.as_slice()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
