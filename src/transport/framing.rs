//! Length-prefixed framing
//!
//! Every frame is a big-endian `u32` length followed by that many bytes.
//! Protocol messages put their tag in the first byte of the frame.
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{GossipError, Result};
use crate::gossip::{ProtocolMsg, ProtocolTag};
use crate::transport_error;

pub async fn write_frame_bytes<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len())
        .map_err(|_| transport_error!("frame of {} bytes too large", body.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `None` means the peer closed the stream between frames.
pub async fn read_frame_bytes<R>(reader: &mut R, max_len: usize) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_len {
        return Err(transport_error!("frame too large: {} bytes", len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(Bytes::from(buf)))
}

pub fn encode_protocol_msg(msg: &ProtocolMsg) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + msg.payload.len());
    buf.put_u8(msg.tag as u8);
    buf.put_slice(&msg.payload);
    buf.freeze()
}

pub fn decode_protocol_msg(mut frame: Bytes) -> Result<ProtocolMsg> {
    if frame.is_empty() {
        return Err(GossipError::Message("empty frame".to_string()).into());
    }
    let tag = ProtocolTag::try_from(frame[0])?;
    let payload = frame.split_off(1);
    Ok(ProtocolMsg::new(tag, payload))
}
