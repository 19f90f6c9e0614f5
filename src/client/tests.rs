use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::device::{Device, FixedStats, SimulatedStats, StatsSource};
use super::sender::{Backoff, SendState, Sender, SenderConfig};
use crate::config::{DeviceSettings, Settings};
use crate::protocol::{ACK_LINE, Message, SystemStats};
use crate::utils::error::SendError;

#[derive(Debug, Clone, Copy)]
enum Reply {
    Ack,
    Silent,
    Garbage(&'static str),
    Hangup,
}

struct FakeServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
    handle: JoinHandle<()>,
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Answers each received line with the next scripted reply, then acks
/// everything once the script runs out.
async fn fake_server(script: Vec<Reply>) -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let script = Arc::new(Mutex::new(VecDeque::from(script)));
    let received = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(Mutex::new(0));

    let handle = {
        let received = received.clone();
        let connections = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                *connections.lock().unwrap() += 1;
                let (rd, mut wr) = stream.into_split();
                let mut rd = BufReader::new(rd);

                loop {
                    let mut line = String::new();
                    match rd.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    received.lock().unwrap().push(line);

                    let reply = script.lock().unwrap().pop_front().unwrap_or(Reply::Ack);
                    match reply {
                        Reply::Ack => {
                            let _ = wr.write_all(ACK_LINE.as_bytes()).await;
                        }
                        Reply::Silent => {}
                        Reply::Garbage(text) => {
                            let _ = wr.write_all(format!("{text}\n").as_bytes()).await;
                        }
                        Reply::Hangup => break,
                    }
                }
            }
        })
    };

    FakeServer {
        addr,
        received,
        connections,
        handle,
    }
}

fn device_settings(addr: SocketAddr) -> DeviceSettings {
    DeviceSettings {
        host: addr.ip().to_string(),
        port: addr.port(),
        connect_timeout_ms: 1000,
        ack_timeout_ms: 200,
        max_attempts: 4,
        backoff_ms: vec![10],
        ..Settings::default().device
    }
}

fn fixed_stats() -> FixedStats {
    FixedStats(SystemStats {
        heap_free: 200000,
        heap_used: 50000,
        free_psram: 4194304,
        task_count: 3,
        spiffs_free: 900000,
        spiffs_used: 100000,
    })
}

#[test]
fn test_backoff_repeats_last_step() {
    let backoff = Backoff::from_millis(&[5000, 10000, 30000]);
    assert_eq!(backoff.delay(0), Duration::from_millis(5000));
    assert_eq!(backoff.delay(1), Duration::from_millis(10000));
    assert_eq!(backoff.delay(2), Duration::from_millis(30000));
    assert_eq!(backoff.delay(9), Duration::from_millis(30000));

    assert_eq!(Backoff::fixed(Duration::from_secs(1)).delay(3), Duration::from_secs(1));
    assert_eq!(Backoff::stepped(Vec::new()).delay(0), Duration::ZERO);
}

#[test]
fn test_sender_config_from_settings() {
    let settings = Settings::default().device;
    let config = SenderConfig::from(&settings);
    assert_eq!(config.addr, "localhost:5000");
    assert_eq!(config.ack_timeout, Duration::from_secs(2));
    assert_eq!(config.connect_timeout, Duration::from_secs(5));
    assert_eq!(config.backoff, Backoff::fixed(Duration::from_secs(1)));

    let sender = Sender::new(config);
    assert_eq!(sender.config().addr, "localhost:5000");
    assert_eq!(sender.state(), SendState::Disconnected);
    assert!(!sender.is_connected());
}

#[tokio::test]
async fn test_connects_lazily_and_delivers() {
    let server = fake_server(vec![]).await;
    let mut device = Device::with_stats(&device_settings(server.addr), fixed_stats());
    assert!(!device.sender().is_connected());
    assert_eq!(device.sender().state(), SendState::Disconnected);

    let delivery = device.send_log("info", "hello").await.unwrap();

    assert_eq!(delivery.attempts, 1);
    assert_eq!(device.seq(), 1);
    assert!(device.sender().is_connected());
    assert_eq!(device.sender().state(), SendState::Acked);
}

#[tokio::test]
async fn test_retries_until_ack_when_failures_below_limit() {
    let server = fake_server(vec![Reply::Silent, Reply::Garbage("{\"ack\":0}"), Reply::Garbage("nope")]).await;
    let mut device = Device::with_stats(&device_settings(server.addr), fixed_stats());

    let delivery = device.send_log("warning", "flaky link").await.unwrap();

    assert_eq!(delivery.attempts, 4);
    assert_eq!(device.seq(), 1);

    // the same bytes every time
    let received = server.received.lock().unwrap().clone();
    assert_eq!(received.len(), 4);
    assert!(received.iter().all(|line| *line == received[0]));
    let sent: Value = serde_json::from_str(&received[0]).unwrap();
    assert_eq!(sent["seq"], 0);
}

#[tokio::test]
async fn test_gives_up_when_failures_reach_limit() {
    let server = fake_server(vec![Reply::Silent; 4]).await;
    let mut device = Device::with_stats(&device_settings(server.addr), fixed_stats());

    let err = device.send_log("info", "lost").await.unwrap_err();

    assert_eq!(err.attempts, 4);
    assert!(matches!(err.last_error, SendError::AckTimeout));
    assert_eq!(device.seq(), 0);
    assert_eq!(device.sender().state(), SendState::Failed);

    // next message still starts from seq 0 and goes through
    device.send_log("info", "found").await.unwrap();
    assert_eq!(device.seq(), 1);
    let received = server.received.lock().unwrap().clone();
    let last: Value = serde_json::from_str(received.last().unwrap()).unwrap();
    assert_eq!(last["seq"], 0);
    assert_eq!(last["msg"], "found");
}

#[tokio::test]
async fn test_reconnects_after_hangup() {
    let server = fake_server(vec![Reply::Hangup]).await;
    let mut device = Device::with_stats(&device_settings(server.addr), fixed_stats());

    let delivery = device.send_heartbeat().await.unwrap();

    assert_eq!(delivery.attempts, 2);
    assert_eq!(*server.connections.lock().unwrap(), 2);
    // heartbeats never touch seq
    assert_eq!(device.seq(), 0);
}

#[tokio::test]
async fn test_invalid_ack_state_is_reported() {
    let server = fake_server(vec![Reply::Garbage("{\"ack\":1,\"extra\":true}")]).await;
    let settings = DeviceSettings {
        max_attempts: 1,
        ..device_settings(server.addr)
    };
    let mut device = Device::with_stats(&settings, fixed_stats());

    let err = device.send_log("info", "strict").await.unwrap_err();
    assert!(matches!(err.last_error, SendError::InvalidAck(_)));
    assert_eq!(err.attempts, 1);
    assert!(!device.sender().is_connected());
}

#[tokio::test]
async fn test_connection_refused_exhausts_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut sender = Sender::new(SenderConfig {
        addr: addr.to_string(),
        connect_timeout: Duration::from_millis(500),
        ack_timeout: Duration::from_millis(100),
        backoff: Backoff::fixed(Duration::from_millis(5)),
    });
    let mut device = Device::with_stats(&device_settings(addr), fixed_stats());
    let message = Message::from(device.build_log("info", "nobody home"));

    let err = sender.deliver(&message, 3).await.unwrap_err();
    assert_eq!(err.attempts, 3);
    assert!(err.last_error.is_transport());
    assert_eq!(sender.state(), SendState::Failed);
}

#[tokio::test]
async fn test_timestamp_only_after_time_sync() {
    let server = fake_server(vec![]).await;
    let mut device = Device::with_stats(&device_settings(server.addr), fixed_stats());

    let before = device.build_log("info", "boot");
    assert_eq!(before.ts, None);
    assert_eq!(before.boot_seq, 1);

    device.set_time_synced(true);
    let after = device.build_heartbeat();
    let ts = after.ts.expect("synced device stamps wall-clock time");
    assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
}

#[tokio::test]
async fn test_heartbeat_due_after_idle_interval() {
    let server = fake_server(vec![]).await;
    let settings = DeviceSettings {
        heartbeat_interval_ms: 200,
        ..device_settings(server.addr)
    };
    let mut device = Device::with_stats(&settings, fixed_stats());

    assert!(device.heartbeat_due());
    device.send_log("info", "busy").await.unwrap();
    assert!(!device.heartbeat_due());
    assert!(device.tick().await.is_none());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(device.heartbeat_due());
    assert!(device.tick().await.unwrap().is_ok());
    assert!(!device.heartbeat_due());

    let received = server.received.lock().unwrap().clone();
    let hb: Value = serde_json::from_str(&received[1]).unwrap();
    assert_eq!(hb["type"], "heartbeat");
}

#[test]
fn test_simulated_stats_stay_within_jitter() {
    let mut stats = SimulatedStats;
    for _ in 0..100 {
        let s = stats.sample();
        assert!((190_000..=210_000).contains(&s.heap_free));
        assert!((45_000..=55_000).contains(&s.heap_used));
        assert!((850_000..=950_000).contains(&s.spiffs_free));
        assert!((90_000..=110_000).contains(&s.spiffs_used));
        assert_eq!(s.free_psram, 4_194_304);
        assert_eq!(s.task_count, 3);
    }
}
