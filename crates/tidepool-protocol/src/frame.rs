//! TCP framing for control-plane messages.
//!
//! Length-prefixed framing: a 4-byte big-endian u32 length field followed
//! by a bincode payload. The same framing is used in both directions.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum frame size (16 MB). Control-plane payloads are small; storage
/// scan results across a large fleet are the biggest thing we expect.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

fn too_large(len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("frame size {len} exceeds limit {MAX_FRAME_SIZE}"),
    )
}

/// Encodes `msg` and writes it to `w` as a single frame, then flushes.
pub async fn write_frame<W, T>(w: &mut W, msg: &T) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let payload =
        bincode::serialize(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(too_large(payload.len()));
    }

    // header and payload go out in one write
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await?;
    w.flush().await
}

/// Reads one frame from `r` and decodes it.
///
/// The length is checked before anything is allocated, so a corrupt or
/// hostile header can't make us reserve more than [`MAX_FRAME_SIZE`].
pub async fn read_frame<R, T>(r: &mut R) -> io::Result<T>
where
    R: AsyncReadExt + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut header = [0u8; 4];
    r.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(too_large(len));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
