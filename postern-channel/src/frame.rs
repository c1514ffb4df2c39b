//! Length-prefixed bincode framing
//!
//! A frame is a big-endian `u32` body length followed by the body, encoded
//! with bincode's legacy configuration.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ChannelError, MAX_FRAME_SIZE, Result};

pub async fn read<T, R>(stream: &mut R) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ChannelError::ConnectionClosed
        } else {
            ChannelError::Io(e)
        }
    })?;

    let size = u32::from_be_bytes(len_buf);
    if size > MAX_FRAME_SIZE {
        return Err(ChannelError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; size as usize];
    stream.read_exact(&mut body).await?;

    let (value, _) = bincode::serde::decode_from_slice(&body, bincode::config::legacy())?;
    Ok(value)
}

pub async fn write<T, W>(stream: &mut W, value: &T) -> Result<()>
where
    T: Serialize + Sync,
    W: AsyncWrite + Unpin + Send,
{
    let body = bincode::serde::encode_to_vec(value, bincode::config::legacy())?;
    let size = u32::try_from(body.len())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    if size > MAX_FRAME_SIZE {
        return Err(ChannelError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    stream.write_all(&size.to_be_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{Request, RequestCommand, SystemCommand};

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let request = Request::new(RequestCommand::System(SystemCommand::Ping));

        write(&mut a, &request).await.unwrap();
        let received: Request = read(&mut b).await.unwrap();

        assert_eq!(received.version, request.version);
        assert!(matches!(
            received.command,
            RequestCommand::System(SystemCommand::Ping)
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_SIZE + 1).to_be_bytes()).await.unwrap();

        let result: Result<Request> = read(&mut b).await;
        assert!(matches!(result, Err(ChannelError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_garbage_body_is_a_decode_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&4u32.to_be_bytes()).await.unwrap();
        a.write_all(&[0xff, 0xff, 0xff, 0xff]).await.unwrap();

        let result: Result<Request> = read(&mut b).await;
        assert!(matches!(
            result,
            Err(ChannelError::ProtocolDeserialization(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);

        let result: Result<Request> = read(&mut b).await;
        assert!(matches!(result, Err(ChannelError::ConnectionClosed)));
    }
}
