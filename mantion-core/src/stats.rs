//! Process-wide detection counters

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

const NO_DETECTION: i64 = i64::MIN;

/// Shared counters, updated from every camera thread without locks.
#[derive(Debug)]
pub struct GlobalStats {
    started_at: DateTime<Utc>,
    total_detections: AtomicU64,
    alarms_triggered: AtomicU64,
    /// Millis since epoch of the latest detection, `NO_DETECTION` if none
    last_detection_ms: AtomicI64,
}

/// Read-only copy handed to the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_detections: u64,
    pub last_detection: Option<DateTime<Utc>>,
    pub alarms_triggered: u64,
    pub uptime_seconds: u64,
    pub cameras_active: usize,
}

impl GlobalStats {
    pub fn new() -> Self {
        Self::started(Utc::now())
    }

    pub fn started(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            total_detections: AtomicU64::new(0),
            alarms_triggered: AtomicU64::new(0),
            last_detection_ms: AtomicI64::new(NO_DETECTION),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Count detections seen on one present cycle
    pub fn record_detections(&self, count: usize, at: DateTime<Utc>) {
        if count == 0 {
            return;
        }
        self.total_detections.fetch_add(count as u64, Ordering::Relaxed);
        // fetch_max keeps the newest timestamp when cameras race
        self.last_detection_ms.fetch_max(at.timestamp_millis(), Ordering::AcqRel);
    }

    /// Count one SAFE -> ALARM edge
    pub fn record_alarm(&self) {
        self.alarms_triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_detections(&self) -> u64 {
        self.total_detections.load(Ordering::Relaxed)
    }

    pub fn alarms_triggered(&self) -> u64 {
        self.alarms_triggered.load(Ordering::Relaxed)
    }

    pub fn last_detection(&self) -> Option<DateTime<Utc>> {
        match self.last_detection_ms.load(Ordering::Acquire) {
            NO_DETECTION => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    pub fn snapshot(&self, cameras_active: usize) -> StatsSnapshot {
        self.snapshot_at(cameras_active, Utc::now())
    }

    pub fn snapshot_at(&self, cameras_active: usize, now: DateTime<Utc>) -> StatsSnapshot {
        let uptime = (now - self.started_at).num_seconds().max(0) as u64;
        StatsSnapshot {
            total_detections: self.total_detections(),
            last_detection: self.last_detection(),
            alarms_triggered: self.alarms_triggered(),
            uptime_seconds: uptime,
            cameras_active,
        }
    }
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self::new()
    }
}
