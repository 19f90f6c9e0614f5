//! Append-only audit log backed by a plain file.
//!
//! Every accepted message becomes one compact JSON line of the form
//! `{"received_at":"...","entry":{...}}`. The file is opened once in append
//! mode and flushed after every write; it is never truncated or rotated here.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::protocol::{Envelope, Inbound};
use crate::utils::error::{ServerError, SinkError};

/// Durable destination for accepted messages.
///
/// The connection handler owns its sink exclusively for the lifetime of a
/// session, hence `&mut self`.
pub trait EnvelopeSink {
    fn append(
        &mut self,
        envelope: &Envelope,
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;

    /// Stamps `inbound` with the current time and appends it.
    fn record(
        &mut self,
        inbound: &Inbound,
    ) -> impl std::future::Future<Output = Result<Envelope, SinkError>> + Send
    where
        Self: Send,
    {
        async move {
            let envelope = Envelope::wrap(inbound, Utc::now());
            self.append(&envelope).await?;
            Ok(envelope)
        }
    }
}

#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    file: File,
    written: u64,
}

impl AuditLog {
    /// Open (or create) the log for appending. Failure here is fatal for the server.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| ServerError::SinkOpen {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file,
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Envelopes appended through this handle.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes and drops the handle.
    pub async fn close(mut self) -> Result<(), SinkError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

impl EnvelopeSink for AuditLog {
    async fn append(&mut self, envelope: &Envelope) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');

        self.file.write_all(&line).await?;
        self.file.flush().await?;
        self.written += 1;
        Ok(())
    }
}
