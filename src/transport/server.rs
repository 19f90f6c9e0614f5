//! TCP ingest server
//!
//! This file implements the server side of the device protocol:
//! - Accept one TCP connection at a time and serve it to completion
//! - Split the byte stream into lines and validate each one
//! - Archive every accepted message, then acknowledge it on the same socket
//!
//! Rejected lines get no reply at all. The device treats a missing ack like
//! any other failure and resends.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket, TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{BusyPolicy, ServerSettings};
use crate::persistence::{AuditLog, EnvelopeSink};
use crate::protocol::{Frame, Inbound, LineFramer, MessageKind, classify};
use crate::transport::ack::send_ack;
use crate::transport::session::SessionSlot;
use crate::utils::error::ServerError;

/// Counters for one connection, logged when it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub lines: u64,
    pub acked: u64,
    pub dropped: u64,
    pub sink_failures: u64,
    pub ack_failures: u64,
}

pub struct IngestServer<S> {
    listener: TcpListener,
    sink: S,
    settings: ServerSettings,
    slot: SessionSlot,
}

impl IngestServer<AuditLog> {
    /// Opens the audit log, then binds. Either failure is fatal.
    pub async fn bind(settings: ServerSettings) -> Result<Self, ServerError> {
        let sink = AuditLog::open(&settings.output_path).await?;
        info!(path = %settings.output_path.display(), "Logging to file");
        Self::bind_with_sink(settings, sink).await
    }
}

impl<S> IngestServer<S>
where
    S: EnvelopeSink + Send,
{
    pub async fn bind_with_sink(settings: ServerSettings, sink: S) -> Result<Self, ServerError> {
        let listener = listen(&settings).await?;
        Ok(Self {
            listener,
            sink,
            settings,
            slot: SessionSlot::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn slot(&self) -> &SessionSlot {
        &self.slot
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Gives the sink back for cleanup once the accept loop is dropped.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Accepts and serves connections, one session at a time, forever.
    pub async fn run(&mut self) {
        loop {
            info!("Waiting for device connection...");

            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Error accepting connection");
                    continue;
                }
            };

            // sessions are served inline, so the previous guard is always gone here
            let guard = self.slot.try_claim();
            debug_assert!(guard.is_some(), "session slot held across accept");

            info!(%peer, "Device connected");

            let stats = match self.settings.busy_policy {
                BusyPolicy::Queue => handle_connection(stream, &mut self.sink, &self.settings).await,
                BusyPolicy::Reject => {
                    let session = handle_connection(stream, &mut self.sink, &self.settings);
                    tokio::pin!(session);

                    loop {
                        tokio::select! {
                            stats = &mut session => break stats,
                            extra = self.listener.accept() => match extra {
                                Ok((extra, addr)) => {
                                    warn!(peer = %addr, active = %peer, "Rejecting connection while a session is active");
                                    reset(extra);
                                }
                                Err(e) => error!(error = %e, "Error accepting connection"),
                            },
                        }
                    }
                }
            };

            drop(guard);
            info!(
                %peer,
                lines = stats.lines,
                acked = stats.acked,
                dropped = stats.dropped,
                sink_failures = stats.sink_failures,
                ack_failures = stats.ack_failures,
                "Session closed"
            );
        }
    }
}

/// Closes with linger 0 so the peer sees a reset rather than a clean EOF.
fn reset(stream: TcpStream) {
    if let Err(e) = SockRef::from(&stream).set_linger(Some(Duration::ZERO)) {
        debug!(error = %e, "Could not set linger on rejected connection");
    }
    drop(stream);
}

async fn listen(settings: &ServerSettings) -> Result<TcpListener, ServerError> {
    let addr_str = settings.addr();
    let addr = lookup_host(addr_str.as_str())
        .await
        .map_err(|source| ServerError::Resolve {
            addr: addr_str.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| ServerError::NoAddress(addr_str.clone()))?;

    let bind_err = |source| ServerError::Bind { addr, source };
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;

    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    let listener = socket.listen(settings.backlog.max(1)).map_err(bind_err)?;

    info!(%addr, backlog = settings.backlog, "Server listening");
    Ok(listener)
}

/// Drives one connection until the peer closes it or the socket fails.
///
/// An idle read timeout is only logged; the session stays open.
pub async fn handle_connection<T, S>(
    mut stream: T,
    sink: &mut S,
    settings: &ServerSettings,
) -> SessionStats
where
    T: AsyncRead + AsyncWrite + Unpin,
    S: EnvelopeSink + Send,
{
    let mut framer = LineFramer::new(settings.max_line_bytes);
    let mut buf = vec![0u8; settings.read_buffer_bytes.max(1)];
    let mut stats = SessionStats::default();

    loop {
        let n = match timeout(settings.read_timeout(), stream.read(&mut buf)).await {
            Err(_) => {
                warn!(
                    timeout_secs = settings.read_timeout_secs,
                    "Socket timeout, still waiting for data"
                );
                continue;
            }
            Ok(Ok(0)) => {
                info!("Device disconnected");
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                error!(error = %e, "Socket error");
                break;
            }
        };

        for frame in framer.push(&buf[..n]) {
            match frame {
                Frame::Line(line) => {
                    stats.lines += 1;
                    process_line(&line, &mut stream, sink, &mut stats).await;
                }
                Frame::Oversized { len } => {
                    stats.dropped += 1;
                    error!(len, max = settings.max_line_bytes, "Line too long, discarding");
                }
                Frame::Overflow { buffered } => {
                    stats.dropped += 1;
                    error!(buffered, max = settings.max_line_bytes, "Buffer overflow, discarding");
                }
                Frame::Corrupt { discarded } => {
                    stats.dropped += 1;
                    error!(
                        discarded,
                        raw = %hex_preview(&buf[..n]),
                        "Invalid UTF-8, discarding buffer"
                    );
                }
            }
        }
    }

    stats
}

async fn process_line<W, S>(line: &str, writer: &mut W, sink: &mut S, stats: &mut SessionStats)
where
    W: AsyncWrite + Unpin,
    S: EnvelopeSink + Send,
{
    let inbound = match classify(line) {
        Ok(inbound) => inbound,
        Err(e) => {
            stats.dropped += 1;
            error!(
                error = %e,
                line = %line.chars().take(200).collect::<String>(),
                "Rejected line, no ack"
            );
            return;
        }
    };

    // Acked whether or not the write lands.
    if let Err(e) = sink.record(&inbound).await {
        stats.sink_failures += 1;
        error!(error = %e, "Failed to write to audit log");
    }

    log_received(&inbound);

    match send_ack(writer).await {
        Ok(()) => {
            stats.acked += 1;
            debug!("Ack sent");
        }
        Err(e) => {
            stats.ack_failures += 1;
            error!(error = %e, "Failed to send ack");
        }
    }
}

fn log_received(inbound: &Inbound) {
    let boot_seq = field_text(inbound.field("boot_seq"));
    let uptime_ms = field_text(inbound.field("uptime_ms"));

    match inbound.kind {
        MessageKind::Heartbeat => {
            info!(%boot_seq, %uptime_ms, "HEARTBEAT");
        }
        MessageKind::Log => {
            let seq = field_text(inbound.field("seq"));
            let level = inbound
                .field("level")
                .map(|v| field_text(Some(v)))
                .unwrap_or_else(|| "unknown".to_string());
            info!(%boot_seq, %seq, %level, msg = %inbound.display_msg(), "LOG");
        }
    }
}

fn field_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "?".to_string(),
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(64)
        .map(|b| format!("{b:02x}"))
        .collect()
}
