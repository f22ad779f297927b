//! Length-delimited frames as used on both master and channel connections: a u32 (BE) payload
//!  length followed by the payload itself.
//!
//! ```ascii
//! 0: payload length (u32 BE)
//! 4: payload (opaque)
//! ```

use anyhow::{bail, Context};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const LEN_PREFIX_SIZE: usize = 4;

pub const DEFAULT_MAX_FRAME_LEN: usize = 16*1024*1024;


/// Reads a single frame, treating a connection that is closed before the frame starts as an error
pub async fn read_frame<R: AsyncRead + Unpin + ?Sized>(reader: &mut R, max_frame_len: usize) -> anyhow::Result<Bytes> {
    match try_read_frame(reader, max_frame_len).await? {
        Some(frame) => Ok(frame),
        None => bail!("connection closed before a frame was received"),
    }
}

/// Reads a single frame, returning `None` if the connection was closed cleanly at a frame
///  boundary. A close in the middle of a frame is an error.
pub async fn try_read_frame<R: AsyncRead + Unpin + ?Sized>(reader: &mut R, max_frame_len: usize) -> anyhow::Result<Option<Bytes>> {
    let mut len_buf = [0u8; LEN_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LEN_PREFIX_SIZE {
        let num_read = reader.read(&mut len_buf[filled..]).await
            .context("reading frame length")?;
        if num_read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            bail!("connection closed inside a frame length prefix");
        }
        filled += num_read;
    }

    let frame_len = usize::try_from(u32::from_be_bytes(len_buf))?;
    if frame_len > max_frame_len {
        bail!("received a frame of {} bytes, exceeding the maximum of {} bytes", frame_len, max_frame_len);
    }

    let mut buf = BytesMut::zeroed(frame_len);
    reader.read_exact(&mut buf).await
        .context("connection closed inside a frame")?;
    Ok(Some(buf.freeze()))
}

/// Writes a frame with a single `write_all` so that prefix and payload are never split by
///  another writer's data
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, payload: &[u8]) -> anyhow::Result<()> {
    let Ok(payload_len) = u32::try_from(payload.len()) else {
        bail!("frame payload of {} bytes does not fit a u32 length prefix", payload.len());
    };

    let mut buf = BytesMut::with_capacity(LEN_PREFIX_SIZE + payload.len());
    buf.put_u32(payload_len);
    buf.put_slice(payload);

    writer.write_all(&buf).await
        .context("writing frame")?;
    writer.flush().await
        .context("flushing frame")?;
    Ok(())
}
