use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    CpuPercent,
    MemPercent,
    NetRxBytesPerSec,
    NetTxBytesPerSec,
    DiskIo,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::CpuPercent => "cpu_percent",
            MetricKind::MemPercent => "mem_percent",
            MetricKind::NetRxBytesPerSec => "net_rx_bytes_per_sec",
            MetricKind::NetTxBytesPerSec => "net_tx_bytes_per_sec",
            MetricKind::DiskIo => "disk_io",
        }
    }

    /// Percent metrics are bounded to 0..=100.
    pub fn is_percent(&self) -> bool {
        matches!(self, MetricKind::CpuPercent | MetricKind::MemPercent)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded value. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Metric {
    pub fn now(kind: MetricKind, value: f64) -> Self {
        Self {
            kind,
            value,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Qualifies a sample that was produced but should not be trusted blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleNote {
    /// The source was unreadable and a placeholder value was used.
    Degraded,
    /// No previous counter existed, so the rate is zero.
    Warmup,
    /// The counter decreased; the delta was clamped to zero.
    CounterWraparound { previous: u64, current: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub metric: Metric,
    pub note: Option<SampleNote>,
}

impl Sample {
    pub fn clean(kind: MetricKind, value: f64) -> Self {
        Self {
            metric: Metric::now(kind, value),
            note: None,
        }
    }

    pub fn noted(kind: MetricKind, value: f64, note: SampleNote) -> Self {
        Self {
            metric: Metric::now(kind, value),
            note: Some(note),
        }
    }

    pub fn value(&self) -> f64 {
        self.metric.value
    }

    pub fn is_warmup(&self) -> bool {
        matches!(self.note, Some(SampleNote::Warmup))
    }
}

/// Cumulative interface counters at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct NetCounterSnapshot {
    pub interface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub taken_at: Instant,
}

/// Receive and transmit rates produced from two consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetRates {
    pub rx: Sample,
    pub tx: Sample,
}

/// Cumulative per-device counters as printed by `iostat -d -k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskCounters {
    pub device: String,
    pub tps: f64,
    pub kb_read: u64,
    pub kb_written: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiskCounterSnapshot {
    pub devices: Vec<DiskCounters>,
    pub taken_at: Instant,
}

impl DiskCounters {
    /// kB read plus kB written since boot.
    pub fn total_kb(&self) -> u64 {
        self.kb_read.saturating_add(self.kb_written)
    }
}

impl DiskCounterSnapshot {
    pub fn device(&self, name: &str) -> Option<&DiskCounters> {
        self.devices.iter().find(|d| d.device == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessUsage {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub mem_percent: f64,
}
