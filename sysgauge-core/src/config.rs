use crate::detector::TOP_N;
use crate::error::{MonitorError, Result};
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::metrics::MetricKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Tick period in milliseconds.
    pub tick_ms: u64,
    pub history_capacity: usize,
    pub top_n: usize,
    pub cpu_threshold: f64,
    pub mem_threshold: Option<f64>,
    pub net_rx_threshold: Option<f64>,
    pub net_tx_threshold: Option<f64>,
    pub disk_threshold: Option<f64>,
    /// Percent per `#` in the CPU graph.
    pub cpu_scale: f64,
    /// Percent per `*` in the memory graph.
    pub mem_scale: f64,
    /// Bytes/s per glyph in the network graphs.
    pub net_scale: f64,
    pub disk_scale: f64,
    pub interface: Option<String>,
    pub alert_log: Option<PathBuf>,
    pub net_sysfs_root: PathBuf,
    /// Keep previous counter readings when a loop stops.
    pub retain_counters: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            top_n: TOP_N,
            cpu_threshold: 80.0,
            mem_threshold: None,
            net_rx_threshold: None,
            net_tx_threshold: None,
            disk_threshold: None,
            cpu_scale: 2.0,
            mem_scale: 2.0,
            net_scale: 100.0 * 1024.0,
            disk_scale: 1024.0 * 1024.0,
            interface: None,
            alert_log: None,
            net_sysfs_root: PathBuf::from("/sys/class/net"),
            retain_counters: false,
        }
    }
}

impl MonitorConfig {
    /// Reads a JSON config file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: MonitorConfig = serde_json::from_str(&content).map_err(|e| {
            MonitorError::invalid(path.display().to_string(), e.to_string())
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            return Err(MonitorError::invalid("tick_ms", "must be greater than 0"));
        }
        if self.history_capacity == 0 {
            return Err(MonitorError::invalid("history_capacity", "must be greater than 0"));
        }
        if self.top_n == 0 || self.top_n > TOP_N {
            return Err(MonitorError::invalid(
                "top_n",
                format!("must be between 1 and {}", TOP_N),
            ));
        }

        for (key, scale) in [
            ("cpu_scale", self.cpu_scale),
            ("mem_scale", self.mem_scale),
            ("net_scale", self.net_scale),
            ("disk_scale", self.disk_scale),
        ] {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(MonitorError::invalid(key, "must be a positive number"));
            }
        }

        check_limit(MetricKind::CpuPercent, Some(self.cpu_threshold))?;
        check_limit(MetricKind::MemPercent, self.mem_threshold)?;
        check_limit(MetricKind::NetRxBytesPerSec, self.net_rx_threshold)?;
        check_limit(MetricKind::NetTxBytesPerSec, self.net_tx_threshold)?;
        check_limit(MetricKind::DiskIo, self.disk_threshold)?;
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Configured limit for `metric`, if alerting is enabled for it.
    pub fn threshold_for(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::CpuPercent => Some(self.cpu_threshold),
            MetricKind::MemPercent => self.mem_threshold,
            MetricKind::NetRxBytesPerSec => self.net_rx_threshold,
            MetricKind::NetTxBytesPerSec => self.net_tx_threshold,
            MetricKind::DiskIo => self.disk_threshold,
        }
    }
}

fn check_limit(metric: MetricKind, limit: Option<f64>) -> Result<()> {
    match limit {
        Some(limit) => crate::detector::Threshold::new(metric, limit).map(|_| ()),
        None => Ok(()),
    }
}
