//! Device simulator against the real ingest server over loopback TCP.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tempfile::tempdir;
use tokio::task::JoinHandle;

use crate::client::{Device, FixedStats};
use crate::config::{DeviceSettings, ServerSettings, Settings};
use crate::protocol::{LogEntry, Message, SystemStats};
use crate::transport::IngestServer;

const SAMPLE_STATS: SystemStats = SystemStats {
    heap_free: 200000,
    heap_used: 50000,
    free_psram: 4194304,
    task_count: 3,
    spiffs_free: 900000,
    spiffs_used: 100000,
};

async fn start_server(output: &Path) -> (DeviceSettings, JoinHandle<()>) {
    let settings = ServerSettings {
        host: "127.0.0.1".to_string(),
        port: 0,
        output_path: output.to_path_buf(),
        ..Settings::default().server
    };
    let mut server = IngestServer::bind(settings).await.expect("server should bind");
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(async move { server.run().await });

    let device = DeviceSettings {
        host: addr.ip().to_string(),
        port: addr.port(),
        ack_timeout_ms: 1000,
        backoff_ms: vec![20],
        ..Settings::default().device
    };
    (device, handle)
}

fn archived(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn integration_log_entry_is_archived_and_acked() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("device.jsonl");
    let (settings, handle) = start_server(&path).await;

    let mut device = Device::with_stats(&settings, FixedStats(SAMPLE_STATS));
    let entry = device.build_log("info", "hello");
    assert_eq!(entry.seq, 0);

    let delivery = device.send_log("info", "hello").await.expect("delivered");
    assert_eq!(delivery.attempts, 1);
    assert_eq!(device.seq(), 1);

    let stored = archived(&path);
    assert_eq!(stored.len(), 1);
    let stored_entry = &stored[0]["entry"];
    assert_eq!(stored_entry["boot_seq"], 1);
    assert_eq!(stored_entry["seq"], 0);
    assert_eq!(stored_entry["level"], "info");
    assert_eq!(stored_entry["msg"], "hello");
    assert_eq!(stored_entry["ts"], Value::Null);
    assert_eq!(stored_entry["system"], serde_json::to_value(SAMPLE_STATS).unwrap());
    assert!(stored[0]["received_at"].as_str().is_some());

    // the archived entry parses back into the message that was sent
    let round_trip: Message = serde_json::from_value(stored_entry.clone()).unwrap();
    let Message::Log(sent) = round_trip else {
        panic!("expected a log entry");
    };
    assert_eq!(
        sent,
        LogEntry {
            uptime_ms: sent.uptime_ms,
            ..entry
        }
    );

    handle.abort();
}

#[tokio::test]
async fn integration_synced_heartbeat_is_acked() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("device.jsonl");
    let (settings, handle) = start_server(&path).await;

    let mut device = Device::with_stats(&settings, FixedStats(SAMPLE_STATS));
    device.set_time_synced(true);
    device.send_heartbeat().await.expect("heartbeat delivered");
    assert_eq!(device.seq(), 0);

    let stored = archived(&path);
    assert_eq!(stored[0]["entry"]["type"], "heartbeat");
    assert!(stored[0]["entry"]["ts"].as_str().is_some());

    handle.abort();
}

#[tokio::test]
async fn integration_demo_sequence_delivers_everything() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("device.jsonl");
    let (settings, handle) = start_server(&path).await;
    let settings = DeviceSettings {
        heartbeat_interval_ms: 100,
        boot_seq: 9,
        ..settings
    };

    let mut device = Device::new(&settings);
    let summary = device.run_demo(Duration::from_millis(5)).await;

    assert_eq!(summary.delivered, 13);
    assert_eq!(summary.failed, 0);
    assert_eq!(device.seq(), 10);

    let stored = archived(&path);
    assert_eq!(stored.len(), 13);
    let seqs: Vec<_> = stored
        .iter()
        .filter_map(|e| e["entry"]["seq"].as_u64())
        .collect();
    assert_eq!(seqs, (0..10).collect::<Vec<_>>());
    let heartbeats = stored
        .iter()
        .filter(|e| e["entry"]["type"] == "heartbeat")
        .count();
    assert_eq!(heartbeats, 3);
    assert!(stored.iter().all(|e| e["entry"]["boot_seq"] == 9));
    // unsynced entries carry null timestamps, later ones a real one
    assert_eq!(stored[0]["entry"]["ts"], Value::Null);
    assert!(stored[3]["entry"]["ts"].is_string());

    handle.abort();
}
