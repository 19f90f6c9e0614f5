use serde_json::Value;

use crate::protocol::message::{Inbound, MessageKind};
use crate::utils::error::ProtocolError;

pub const REQUIRED_FIELDS: [&str; 2] = ["boot_seq", "uptime_ms"];

/// Parses one candidate line and tags it as a log entry or a heartbeat.
///
/// Only the presence of `boot_seq` and `uptime_ms` is checked; types and
/// ranges are left alone so small firmware differences still get through.
pub fn classify(line: &str) -> Result<Inbound, ProtocolError> {
    let entry = match serde_json::from_str::<Value>(line)? {
        Value::Object(map) => map,
        _ => return Err(ProtocolError::NotAnObject),
    };

    if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !entry.contains_key(**f)) {
        return Err(ProtocolError::MissingField(*missing));
    }

    let kind = match entry.get("type").and_then(Value::as_str) {
        Some("heartbeat") => MessageKind::Heartbeat,
        _ => MessageKind::Log,
    };

    Ok(Inbound { kind, entry })
}
