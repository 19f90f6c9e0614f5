use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::protocol::Ack;
use crate::utils::error::AckError;

/// Writes the fixed `{"ack":1}` line for one accepted message.
///
/// The write is awaited before the handler reads again, so acks leave in the
/// same order their messages arrived. Failures are not retried; the device
/// resends whatever it did not see acknowledged.
pub async fn send_ack<W>(writer: &mut W) -> Result<(), AckError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(&Ack::CANONICAL).map_err(io::Error::from)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
