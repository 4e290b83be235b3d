//! Newline-delimited JSON framing.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::WireFrame;

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &WireFrame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(frame)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Read one frame; `None` means the peer closed the connection.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<WireFrame>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    serde_json::from_str(line.trim())
        .map(Some)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}
