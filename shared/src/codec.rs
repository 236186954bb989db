//! Length-prefixed bincode framing over a byte stream.
//!
//! Each frame is a big-endian u32 length followed by a bincode-encoded
//! message body. The transport (TCP) preserves per-connection ordering;
//! the codec only has to delimit messages and bound their size.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this close the connection; no legitimate message
/// comes anywhere near it.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

fn encode_error(e: bincode::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Encodes a message into a single length-prefixed frame.
pub fn encode<T: Serialize>(msg: &T) -> io::Result<Vec<u8>> {
    let body = bincode::serialize(msg).map_err(encode_error)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", body.len()),
        ));
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Writes one framed message to the stream.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Reads one framed message from the stream.
///
/// Returns `UnexpectedEof` when the peer closed the connection and
/// `InvalidData` for oversized or undecodable frames; both are treated as
/// a transport-level disconnect by callers.
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    bincode::deserialize(&body).map_err(encode_error)
}
