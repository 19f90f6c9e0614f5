//! Device-side delivery: send one message, wait for its ack, retry on failure.
//!
//! The sender keeps at most one message in flight. Every attempt walks
//! `Connecting -> Sent -> AwaitingAck` and ends in `Acked` or one of the
//! failure states; with attempts left it sleeps per the backoff schedule and
//! sends the same bytes again, otherwise it settles in `Failed`.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::DeviceSettings;
use crate::protocol::{Ack, Message};
use crate::utils::error::{DeliveryFailed, SendError};

/// Longest reply read while waiting for an ack.
const ACK_READ_LIMIT: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Disconnected,
    Connecting,
    Sent,
    AwaitingAck,
    Acked,
    TimedOut,
    AckInvalid,
    ConnError,
    Failed,
}

impl SendState {
    fn after(err: &SendError) -> Self {
        match err {
            SendError::AckTimeout => SendState::TimedOut,
            SendError::InvalidAck(_) => SendState::AckInvalid,
            _ => SendState::ConnError,
        }
    }
}

/// Delay before each retry. The last step repeats once the list runs out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    steps: Vec<Duration>,
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self { steps: vec![delay] }
    }

    /// An empty schedule retries immediately.
    pub fn stepped(steps: Vec<Duration>) -> Self {
        Self { steps }
    }

    pub fn from_millis(steps: &[u64]) -> Self {
        Self::stepped(steps.iter().copied().map(Duration::from_millis).collect())
    }

    /// Delay before retry number `retry` (zero based).
    pub fn delay(&self, retry: usize) -> Duration {
        self.steps
            .get(retry)
            .or_else(|| self.steps.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub addr: String,
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
    pub backoff: Backoff,
}

impl From<&DeviceSettings> for SenderConfig {
    fn from(settings: &DeviceSettings) -> Self {
        Self {
            addr: settings.addr(),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            ack_timeout: Duration::from_millis(settings.ack_timeout_ms),
            backoff: Backoff::from_millis(&settings.backoff_ms),
        }
    }
}

/// Outcome of a confirmed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub attempts: u32,
}

#[derive(Debug)]
struct Link {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

#[derive(Debug)]
pub struct Sender {
    config: SenderConfig,
    link: Option<Link>,
    state: SendState,
}

impl Sender {
    /// Creates a sender. Nothing connects until the first delivery.
    pub fn new(config: SenderConfig) -> Self {
        Self {
            config,
            link: None,
            state: SendState::Disconnected,
        }
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Delivers `message`, making at most `max_attempts` attempts.
    ///
    /// Any reply other than `{"ack":1}` within the ack timeout counts as a
    /// failed attempt. The connection is dropped after every failure, so the
    /// next attempt starts on a fresh socket.
    pub async fn deliver(
        &mut self,
        message: &Message,
        max_attempts: u32,
    ) -> Result<Delivery, DeliveryFailed> {
        let line = message.to_line().map_err(|e| DeliveryFailed {
            attempts: 0,
            last_error: SendError::Encode(e),
        })?;
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.attempt(&line).await {
                Ok(()) => {
                    self.state = SendState::Acked;
                    debug!(attempt, "Ack received");
                    return Ok(Delivery { attempts: attempt });
                }
                Err(err) => err,
            };

            self.state = SendState::after(&err);
            if err.is_transport() {
                warn!(attempt, error = %err, "Connection error, reconnecting on next attempt");
            }
            // a late ack must not answer the retransmission
            self.drop_link();

            if attempt >= max_attempts {
                self.state = SendState::Failed;
                warn!(attempts = attempt, error = %err, "Giving up on message");
                return Err(DeliveryFailed {
                    attempts: attempt,
                    last_error: err,
                });
            }

            let delay = self.config.backoff.delay((attempt - 1) as usize);
            warn!(
                error = %err,
                remaining = max_attempts - attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying"
            );
            sleep(delay).await;
        }
    }

    async fn attempt(&mut self, line: &str) -> Result<(), SendError> {
        if self.link.is_none() {
            self.state = SendState::Connecting;
            self.link = Some(connect(&self.config).await?);
        }

        let Self {
            config,
            link,
            state,
        } = self;
        let Some(link) = link.as_mut() else {
            return Err(SendError::Closed);
        };

        link.writer
            .write_all(line.as_bytes())
            .await
            .map_err(SendError::Write)?;
        link.writer.flush().await.map_err(SendError::Write)?;
        *state = SendState::Sent;
        debug!(bytes = line.len(), "Sent");

        *state = SendState::AwaitingAck;
        let mut reply = String::new();
        let mut limited = (&mut link.reader).take(ACK_READ_LIMIT);
        let read = limited.read_line(&mut reply);

        let n = match timeout(config.ack_timeout, read).await {
            Err(_) => return Err(SendError::AckTimeout),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(SendError::InvalidAck("reply is not UTF-8".to_string()));
            }
            Ok(Err(e)) => return Err(SendError::Read(e)),
            Ok(Ok(n)) => n,
        };

        if n == 0 {
            return Err(SendError::Closed);
        }
        if Ack::is_valid(&reply) {
            Ok(())
        } else {
            Err(SendError::InvalidAck(reply.trim().chars().take(100).collect()))
        }
    }

    fn drop_link(&mut self) {
        if self.link.take().is_some() {
            debug!("Connection dropped");
        }
    }

    /// Closes the connection, if any.
    pub fn disconnect(&mut self) {
        if self.link.take().is_some() {
            info!(addr = %self.config.addr, "Disconnected");
        }
        self.state = SendState::Disconnected;
    }
}

async fn connect(config: &SenderConfig) -> Result<Link, SendError> {
    let stream = timeout(config.connect_timeout, TcpStream::connect(config.addr.as_str()))
        .await
        .map_err(|_| SendError::ConnectTimeout)?
        .map_err(SendError::Connect)?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Could not disable Nagle");
    }
    info!(addr = %config.addr, "Connected");

    let (reader, writer) = stream.into_split();
    Ok(Link {
        reader: BufReader::new(reader),
        writer,
    })
}
