//! Length-prefixed framing
//!
//! Every message on a murmur TCP stream is a 4-byte big-endian length
//! followed by that many bytes of body.
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::transport_error;

/// Largest frame body either side accepts
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Read one frame. Returns `Ok(None)` when the peer closed the stream
/// cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(transport_error!("Failed to read length prefix: {}", e)),
    }

    let frame_len = u32::from_be_bytes(len_bytes) as usize;
    if frame_len > MAX_FRAME_LEN {
        return Err(transport_error!("Message too large: {} bytes", frame_len));
    }

    let mut buf = vec![0u8; frame_len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| transport_error!("Failed to read message data: {}", e))?;

    Ok(Some(Bytes::from(buf)))
}

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(transport_error!("Message too large: {} bytes", body.len()));
    }
    let len = body.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| transport_error!("Failed to write length prefix: {}", e))?;
    writer
        .write_all(body)
        .await
        .map_err(|e| transport_error!("Failed to write message data: {}", e))?;
    writer
        .flush()
        .await
        .map_err(|e| transport_error!("Failed to flush frame: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_survive_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            write_frame(&mut client, b"first").await.unwrap();
            write_frame(&mut client, b"").await.unwrap();
            write_frame(&mut client, b"third frame").await.unwrap();
        });

        assert_eq!(read_frame(&mut server).await.unwrap().unwrap(), "first");
        assert_eq!(read_frame(&mut server).await.unwrap().unwrap(), "");
        assert_eq!(
            read_frame(&mut server).await.unwrap().unwrap(),
            "third frame"
        );
        writer.await.unwrap();

        // Writer half dropped: clean end of stream
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        client.write_all(&len).await.unwrap();

        assert!(read_frame(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        assert!(read_frame(&mut server).await.is_err());
    }
}
