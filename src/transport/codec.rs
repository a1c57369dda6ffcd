use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::transport::TransportError;

/// Width of the record length prefix
pub const LENGTH_PREFIX_BYTES: usize = 8;
/// Upper bound for the device identifier carried by the handshake record
pub const MAX_DEVICE_ID_BYTES: usize = 256;

/// Reads one `u64 little-endian length || payload` record.
///
/// Partial reads are retried until the prefix and then exactly `length` payload bytes are in.
/// EOF before the first prefix byte is a clean close; EOF anywhere later is a truncated record.
pub async fn read_record<R>(reader: &mut R, max_len: u64) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_BYTES {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                TransportError::Closed
            } else {
                TransportError::Truncated {
                    expected: LENGTH_PREFIX_BYTES as u64,
                    received: filled as u64,
                }
            });
        }
        filled += n;
    }

    let length = u64::from_le_bytes(prefix);
    if length > max_len {
        return Err(TransportError::Oversized { length, max: max_len });
    }

    let mut payload = vec![0u8; length as usize];
    let mut received = 0;
    while received < payload.len() {
        let n = reader.read(&mut payload[received..]).await?;
        if n == 0 {
            return Err(TransportError::Truncated {
                expected: length,
                received: received as u64,
            });
        }
        received += n;
    }
    Ok(payload)
}

/// Writes one length-prefixed record and flushes it
pub async fn write_record<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let prefix = (payload.len() as u64).to_le_bytes();
    writer.write_all(&prefix).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the identifier record that opens every connection
pub async fn read_handshake<R>(reader: &mut R, timeout: Duration) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin,
{
    let record = tokio::time::timeout(timeout, read_record(reader, MAX_DEVICE_ID_BYTES as u64))
        .await
        .map_err(|_| TransportError::HandshakeTimeout(timeout))??;
    if record.is_empty() {
        return Err(TransportError::EmptyDeviceId);
    }
    let device_id = String::from_utf8(record).map_err(|_| TransportError::InvalidDeviceId)?;
    let device_id = device_id.trim().to_string();
    if device_id.is_empty() {
        return Err(TransportError::EmptyDeviceId);
    }
    Ok(device_id)
}

/// Sends the identifier record
pub async fn write_handshake<W>(writer: &mut W, device_id: &str) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if device_id.trim().is_empty() {
        return Err(TransportError::EmptyDeviceId);
    }
    if device_id.len() > MAX_DEVICE_ID_BYTES {
        return Err(TransportError::Oversized {
            length: device_id.len() as u64,
            max: MAX_DEVICE_ID_BYTES as u64,
        });
    }
    write_record(writer, device_id.as_bytes()).await
}

pub(crate) fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn encode(payload: &[u8]) -> Vec<u8> {
        let mut buf = (payload.len() as u64).to_le_bytes().to_vec();
        buf.extend_from_slice(payload);
        buf
    }

    #[tokio::test]
    async fn test_prefix_is_little_endian() {
        let mut out: Vec<u8> = Vec::new();
        write_record(&mut out, b"abc").await.unwrap();
        assert_eq!(&out[..8], &[3, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&out[8..], b"abc");
    }

    #[tokio::test]
    async fn test_partial_reads_are_reassembled() {
        let wire = [encode(b"first frame"), encode(b"second")].concat();
        // Tiny duplex buffer forces the reader to see a few bytes at a time
        let (mut tx, mut rx) = tokio::io::duplex(3);
        let writer = tokio::spawn(async move {
            for chunk in wire.chunks(2) {
                tx.write_all(chunk).await.unwrap();
            }
        });
        assert_eq!(read_record(&mut rx, 1024).await.unwrap(), b"first frame");
        assert_eq!(read_record(&mut rx, 1024).await.unwrap(), b"second");
        writer.await.unwrap();
        assert!(matches!(read_record(&mut rx, 1024).await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let mut wire = encode(b"0123456789");
        wire.truncate(8 + 4);
        let mut reader = wire.as_slice();
        let err = read_record(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, TransportError::Truncated { expected: 10, received: 4 }));
    }

    #[tokio::test]
    async fn test_truncated_prefix() {
        let wire = [5u8, 0, 0];
        let mut reader = &wire[..];
        let err = read_record(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, TransportError::Truncated { expected: 8, received: 3 }));
    }

    #[tokio::test]
    async fn test_oversized_record() {
        let wire = encode(&[0u8; 64]);
        let mut reader = wire.as_slice();
        let err = read_record(&mut reader, 16).await.unwrap_err();
        assert!(matches!(err, TransportError::Oversized { length: 64, max: 16 }));
    }

    #[tokio::test]
    async fn test_handshake() {
        let mut out: Vec<u8> = Vec::new();
        write_handshake(&mut out, "b8:27:eb:00:11:22").await.unwrap();
        let mut reader = out.as_slice();
        let id = read_handshake(&mut reader, Duration::from_secs(1)).await.unwrap();
        assert_eq!(id, "b8:27:eb:00:11:22");

        let wire = encode(&[0xff, 0xfe]);
        let mut reader = wire.as_slice();
        let err = read_handshake(&mut reader, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidDeviceId));

        let wire = encode(b"");
        let mut reader = wire.as_slice();
        let err = read_handshake(&mut reader, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::EmptyDeviceId));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (_tx, mut rx) = tokio::io::duplex(64);
        let err = read_handshake(&mut rx, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, TransportError::HandshakeTimeout(_)));
    }
}
