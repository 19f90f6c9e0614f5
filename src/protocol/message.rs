use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Allocator and filesystem counters reported with every message.
///
/// The values are opaque to the server; they are only stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub heap_free: u64,
    pub heap_used: u64,
    pub free_psram: u64,
    pub task_count: u64,
    pub spiffs_free: u64,
    pub spiffs_used: u64,
}

/// A log line produced by the device.
///
/// `seq` increases by one per boot, and only after the server confirmed the
/// previous entry. `ts` stays `None` until the device has a trustworthy clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub boot_seq: u64,
    pub uptime_ms: u64,
    pub seq: u64,
    pub level: String,
    pub msg: String,
    pub ts: Option<String>,
    pub system: SystemStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatTag {
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// Liveness report sent while the device has nothing to log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub boot_seq: u64,
    pub uptime_ms: u64,
    pub ts: Option<String>,
    #[serde(rename = "type")]
    pub tag: HeartbeatTag,
    pub system: SystemStats,
}

impl Heartbeat {
    pub fn new(boot_seq: u64, uptime_ms: u64, ts: Option<String>, system: SystemStats) -> Self {
        Self {
            boot_seq,
            uptime_ms,
            ts,
            tag: HeartbeatTag::Heartbeat,
            system,
        }
    }
}

/// Everything a device puts on the wire.
///
/// Heartbeats carry `"type":"heartbeat"`; log entries carry no discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Heartbeat(Heartbeat),
    Log(LogEntry),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Heartbeat(_) => MessageKind::Heartbeat,
            Message::Log(_) => MessageKind::Log,
        }
    }

    pub fn boot_seq(&self) -> u64 {
        match self {
            Message::Heartbeat(hb) => hb.boot_seq,
            Message::Log(entry) => entry.boot_seq,
        }
    }

    /// One wire line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl From<LogEntry> for Message {
    fn from(entry: LogEntry) -> Self {
        Message::Log(entry)
    }
}

impl From<Heartbeat> for Message {
    fn from(hb: Heartbeat) -> Self {
        Message::Heartbeat(hb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Log,
    Heartbeat,
}

/// A line the server accepted, kept exactly as the device sent it.
///
/// Field types are not checked beyond the presence of `boot_seq` and
/// `uptime_ms`, so the raw object is what gets archived.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub kind: MessageKind,
    pub entry: Map<String, Value>,
}

pub const DISPLAY_MSG_CHARS: usize = 80;

impl Inbound {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.entry.get(name)
    }

    /// `msg` cut to the first 80 characters, for log output only.
    pub fn display_msg(&self) -> String {
        match self.entry.get("msg") {
            Some(Value::String(msg)) => msg.chars().take(DISPLAY_MSG_CHARS).collect(),
            Some(other) => other.to_string().chars().take(DISPLAY_MSG_CHARS).collect(),
            None => String::new(),
        }
    }
}

/// The only acknowledgment the protocol knows: `{"ack":1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ack: u8,
}

pub const ACK_LINE: &str = "{\"ack\":1}\n";

impl Ack {
    pub const CANONICAL: Ack = Ack { ack: 1 };

    /// True only for an object with the single key `ack` set to integer 1.
    pub fn is_valid(line: &str) -> bool {
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(Value::Object(map)) => {
                map.len() == 1 && map.get("ack").and_then(Value::as_u64) == Some(1)
            }
            _ => false,
        }
    }
}

/// How an accepted message is archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub received_at: DateTime<Utc>,
    pub entry: Map<String, Value>,
}

impl Envelope {
    pub fn wrap(inbound: &Inbound, received_at: DateTime<Utc>) -> Self {
        Self {
            received_at,
            entry: inbound.entry.clone(),
        }
    }
}
