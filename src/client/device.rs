//! Simulated device
//!
//! `Device` plays the firmware's role on a host machine: it keeps the boot
//! identity and the per-boot `seq`, stamps messages with uptime and (once time
//! is synced) wall-clock time, and hands them to a [`Sender`]. `seq` only
//! moves after the server acknowledged the entry carrying it.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::sender::{Delivery, Sender, SenderConfig};
use crate::config::DeviceSettings;
use crate::protocol::{Heartbeat, LogEntry, Message, SystemStats};
use crate::utils::error::DeliveryFailed;

/// Where a device gets its system counters from.
pub trait StatsSource {
    fn sample(&mut self) -> SystemStats;
}

/// Counters around a plausible baseline with a little noise on each sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedStats;

impl SimulatedStats {
    const BASELINE: SystemStats = SystemStats {
        heap_free: 200_000,
        heap_used: 50_000,
        free_psram: 4_194_304,
        task_count: 3,
        spiffs_free: 900_000,
        spiffs_used: 100_000,
    };
}

/// Uniform-ish value in `-spread..=spread`.
fn jitter(spread: u64) -> i64 {
    let span = u128::from(spread) * 2 + 1;
    (Uuid::new_v4().as_u128() % span) as i64 - spread as i64
}

impl StatsSource for SimulatedStats {
    fn sample(&mut self) -> SystemStats {
        let base = Self::BASELINE;
        SystemStats {
            heap_free: base.heap_free.saturating_add_signed(jitter(10_000)),
            heap_used: base.heap_used.saturating_add_signed(jitter(5_000)),
            free_psram: base.free_psram,
            task_count: base.task_count,
            spiffs_free: base.spiffs_free.saturating_add_signed(jitter(50_000)),
            spiffs_used: base.spiffs_used.saturating_add_signed(jitter(10_000)),
        }
    }
}

/// Always reports the same counters.
#[derive(Debug, Clone, Copy)]
pub struct FixedStats(pub SystemStats);

impl StatsSource for FixedStats {
    fn sample(&mut self) -> SystemStats {
        self.0
    }
}

/// Deliveries made by [`Device::run_demo`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemoSummary {
    pub delivered: u32,
    pub failed: u32,
}

impl DemoSummary {
    fn count(&mut self, result: &Result<Delivery, DeliveryFailed>) {
        match result {
            Ok(_) => self.delivered += 1,
            Err(e) => {
                self.failed += 1;
                warn!(error = %e, "Message abandoned");
            }
        }
    }
}

pub struct Device<S = SimulatedStats> {
    boot_seq: u64,
    seq: u64,
    booted: Instant,
    time_synced: bool,
    stats: S,
    sender: Sender,
    max_attempts: u32,
    heartbeat_interval: Duration,
    last_send: Option<Instant>,
}

impl Device<SimulatedStats> {
    pub fn new(settings: &DeviceSettings) -> Self {
        Self::with_stats(settings, SimulatedStats)
    }
}

impl<S: StatsSource> Device<S> {
    pub fn with_stats(settings: &DeviceSettings, stats: S) -> Self {
        Self {
            boot_seq: settings.boot_seq,
            seq: 0,
            booted: Instant::now(),
            time_synced: false,
            stats,
            sender: Sender::new(SenderConfig::from(settings)),
            max_attempts: settings.max_attempts,
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            last_send: None,
        }
    }

    pub fn boot_seq(&self) -> u64 {
        self.boot_seq
    }

    /// `seq` the next log entry will carry.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn time_synced(&self) -> bool {
        self.time_synced
    }

    /// Marks wall-clock time as trustworthy (or not); gates `ts`.
    pub fn set_time_synced(&mut self, synced: bool) {
        self.time_synced = synced;
    }

    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.booted.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn timestamp(&self) -> Option<String> {
        self.time_synced.then(|| Utc::now().to_rfc3339())
    }

    pub fn build_log(&mut self, level: &str, msg: &str) -> LogEntry {
        LogEntry {
            boot_seq: self.boot_seq,
            uptime_ms: self.uptime_ms(),
            seq: self.seq,
            level: level.to_string(),
            msg: msg.to_string(),
            ts: self.timestamp(),
            system: self.stats.sample(),
        }
    }

    pub fn build_heartbeat(&mut self) -> Heartbeat {
        Heartbeat::new(
            self.boot_seq,
            self.uptime_ms(),
            self.timestamp(),
            self.stats.sample(),
        )
    }

    /// Sends one log entry; `seq` advances only if it was acknowledged.
    pub async fn send_log(&mut self, level: &str, msg: &str) -> Result<Delivery, DeliveryFailed> {
        let message = Message::from(self.build_log(level, msg));
        let delivery = self.sender.deliver(&message, self.max_attempts).await?;

        self.seq += 1;
        self.last_send = Some(Instant::now());
        Ok(delivery)
    }

    pub async fn send_heartbeat(&mut self) -> Result<Delivery, DeliveryFailed> {
        let message = Message::from(self.build_heartbeat());
        let delivery = self.sender.deliver(&message, self.max_attempts).await?;

        self.last_send = Some(Instant::now());
        Ok(delivery)
    }

    /// True once the link has been quiet for a full heartbeat interval.
    pub fn heartbeat_due(&self) -> bool {
        self.last_send
            .is_none_or(|at| at.elapsed() >= self.heartbeat_interval)
    }

    /// Sends a heartbeat if one is due.
    pub async fn tick(&mut self) -> Option<Result<Delivery, DeliveryFailed>> {
        if self.heartbeat_due() {
            Some(self.send_heartbeat().await)
        } else {
            None
        }
    }

    pub fn disconnect(&mut self) {
        self.sender.disconnect();
    }

    /// Runs the canned boot sequence: unsynced logs, time sync, synced logs,
    /// idle heartbeats, closing logs. Pauses `pause` between log entries.
    pub async fn run_demo(&mut self, pause: Duration) -> DemoSummary {
        let mut summary = DemoSummary::default();

        info!(boot_seq = self.boot_seq, "Phase 1: logs without time sync");
        for msg in ["Device booting...", "WiFi connecting...", "WiFi connected"] {
            let result = self.send_log("info", msg).await;
            summary.count(&result);
            tokio::time::sleep(pause).await;
        }

        info!("Phase 2: time sync acquired");
        self.set_time_synced(true);
        let result = self.send_log("info", "Time sync successful").await;
        summary.count(&result);
        tokio::time::sleep(pause).await;

        info!("Phase 3: logs with timestamps");
        for (level, msg) in [
            ("info", "Logger initialized"),
            ("debug", "System stats: heap=200KB, SPIFFS=900KB free"),
            ("warning", "Temperature sensor not responding"),
            ("error", "Failed to read sensor (retry 1/3)"),
        ] {
            let result = self.send_log(level, msg).await;
            summary.count(&result);
            tokio::time::sleep(pause).await;
        }

        info!("Phase 4: heartbeats while idle");
        let mut beats = 0;
        while beats < 3 {
            match self.tick().await {
                Some(result) => {
                    summary.count(&result);
                    beats += 1;
                }
                None => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }

        info!("Phase 5: more logs");
        for msg in ["Sensor recovered, reading: 23.5°C", "All systems nominal"] {
            let result = self.send_log("info", msg).await;
            summary.count(&result);
            tokio::time::sleep(pause).await;
        }

        info!(
            delivered = summary.delivered,
            failed = summary.failed,
            "Demo sequence complete"
        );
        self.disconnect();
        summary
    }
}
