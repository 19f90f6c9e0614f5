use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the ingest server, the device simulator and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub device: DeviceSettings,
    pub logging: LoggingSettings,
}

/// What the acceptor does with a connection attempt while a session is active.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Leave it in the transport backlog until the session ends.
    #[default]
    Queue,
    /// Accept and immediately reset it.
    Reject,
}

/// Configuration settings for the ingest server.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Append-only audit log of received envelopes.
    pub output_path: PathBuf,
    pub read_timeout_secs: u64,
    pub read_buffer_bytes: usize,
    pub max_line_bytes: usize,
    pub backlog: u32,
    pub busy_policy: BusyPolicy,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Configuration settings for the device simulator and its sender.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DeviceSettings {
    pub host: String,
    pub port: u16,
    pub boot_seq: u64,
    pub connect_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    /// Total delivery attempts per message, first send included.
    pub max_attempts: u32,
    /// Delay before each retry; the last entry repeats.
    pub backoff_ms: Vec<u64>,
    pub heartbeat_interval_ms: u64,
}

impl DeviceSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional; missing values are filled from defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub device: Option<PartialDeviceSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub output_path: Option<PathBuf>,
    pub read_timeout_secs: Option<u64>,
    pub read_buffer_bytes: Option<usize>,
    pub max_line_bytes: Option<usize>,
    pub backlog: Option<u32>,
    pub busy_policy: Option<BusyPolicy>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialDeviceSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub boot_seq: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub ack_timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub backoff_ms: Option<Vec<u64>>,
    pub heartbeat_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Overlay whatever was provided on top of `defaults`.
    pub fn merge_over(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let device = self.device.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();
        let Settings {
            server: ds,
            device: dd,
            logging: dl,
        } = defaults;

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(ds.host),
                port: server.port.unwrap_or(ds.port),
                output_path: server.output_path.unwrap_or(ds.output_path),
                read_timeout_secs: server.read_timeout_secs.unwrap_or(ds.read_timeout_secs),
                read_buffer_bytes: server.read_buffer_bytes.unwrap_or(ds.read_buffer_bytes),
                max_line_bytes: server.max_line_bytes.unwrap_or(ds.max_line_bytes),
                backlog: server.backlog.unwrap_or(ds.backlog),
                busy_policy: server.busy_policy.unwrap_or(ds.busy_policy),
            },
            device: DeviceSettings {
                host: device.host.unwrap_or(dd.host),
                port: device.port.unwrap_or(dd.port),
                boot_seq: device.boot_seq.unwrap_or(dd.boot_seq),
                connect_timeout_ms: device.connect_timeout_ms.unwrap_or(dd.connect_timeout_ms),
                ack_timeout_ms: device.ack_timeout_ms.unwrap_or(dd.ack_timeout_ms),
                max_attempts: device.max_attempts.unwrap_or(dd.max_attempts),
                backoff_ms: device
                    .backoff_ms
                    .filter(|steps| !steps.is_empty())
                    .unwrap_or(dd.backoff_ms),
                heartbeat_interval_ms: device
                    .heartbeat_interval_ms
                    .unwrap_or(dd.heartbeat_interval_ms),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(dl.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 5000,
                output_path: PathBuf::from("tcp_server.log"),
                read_timeout_secs: 30,
                read_buffer_bytes: 4096,
                max_line_bytes: crate::protocol::MAX_LINE_BYTES,
                backlog: 1,
                busy_policy: BusyPolicy::Queue,
            },
            device: DeviceSettings {
                host: "localhost".to_string(),
                port: 5000,
                boot_seq: 1,
                connect_timeout_ms: 5000,
                ack_timeout_ms: 2000,
                max_attempts: 4,
                backoff_ms: vec![1000],
                heartbeat_interval_ms: 1000,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
