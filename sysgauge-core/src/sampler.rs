//! Turns raw OS reads into `Sample`s.
//!
//! The sampler keeps the previous counter readings needed for rates. Nothing
//! else is cached between calls.

use crate::error::{MonitorError, Result};
use crate::metrics::{
    DiskCounterSnapshot, MetricKind, NetCounterSnapshot, NetRates, ProcessUsage, Sample,
    SampleNote,
};
use crate::monitor::{CpuTimes, SystemSource};
use std::collections::HashMap;
use std::time::Instant;

/// Per-device disk throughput derived from two `iostat` readings.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRate {
    pub device: String,
    pub tps: f64,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiskSample {
    /// Combined read+write bytes per second over all devices.
    pub total: Sample,
    pub devices: Vec<DeviceRate>,
}

pub struct Sampler<S: SystemSource> {
    source: S,
    prev_cpu: Option<CpuTimes>,
    prev_net: HashMap<String, NetCounterSnapshot>,
    prev_disk: Option<DiskCounterSnapshot>,
    interface: Option<String>,
}

impl<S: SystemSource> Sampler<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            prev_cpu: None,
            prev_net: HashMap::new(),
            prev_disk: None,
            interface: None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn list_interfaces(&self) -> Result<Vec<String>> {
        self.source.list_interfaces()
    }

    /// Makes `interface` current. Its previous counters are dropped, so the
    /// next network sample is a zero-rate warm-up.
    pub fn select_interface(&mut self, interface: impl Into<String>) {
        let interface = interface.into();
        self.prev_net.remove(&interface);
        tracing::debug!(%interface, "interface selected");
        self.interface = Some(interface);
    }

    pub fn selected_interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Forgets every previous counter reading.
    pub fn reset_counters(&mut self) {
        self.prev_cpu = None;
        self.prev_net.clear();
        self.prev_disk = None;
    }

    pub fn sample(&mut self, kind: MetricKind) -> Result<Sample> {
        match kind {
            MetricKind::CpuPercent => Ok(self.sample_cpu()),
            MetricKind::MemPercent => self.sample_memory(),
            MetricKind::NetRxBytesPerSec | MetricKind::NetTxBytesPerSec => {
                let interface = self.interface.clone().ok_or_else(|| {
                    MonitorError::invalid("interface", "no network interface selected")
                })?;
                let rates = self.sample_network(&interface)?;
                Ok(if kind == MetricKind::NetRxBytesPerSec {
                    rates.rx
                } else {
                    rates.tx
                })
            }
            MetricKind::DiskIo => Ok(self.sample_disk()?.total),
        }
    }

    /// CPU busy percent. Never fails: an unreadable source yields 0 with a
    /// `Degraded` note.
    pub fn sample_cpu(&mut self) -> Sample {
        let current = match self.source.cpu_times() {
            Ok(times) => times,
            Err(e) => {
                tracing::debug!(error = %e, "cpu source unavailable, degrading");
                return Sample::noted(MetricKind::CpuPercent, 0.0, SampleNote::Degraded);
            }
        };

        let idle_percent = match self.prev_cpu.replace(current) {
            Some(prev) if current.total > prev.total && current.idle >= prev.idle => {
                (current.idle - prev.idle) as f64 * 100.0 / (current.total - prev.total) as f64
            }
            _ if current.total > 0 => current.idle as f64 * 100.0 / current.total as f64,
            _ => 100.0,
        };

        let busy = (100.0 - idle_percent).clamp(0.0, 100.0);
        Sample::clean(MetricKind::CpuPercent, busy)
    }

    pub fn sample_memory(&mut self) -> Result<Sample> {
        let usage = self.source.memory()?;
        if usage.total_bytes == 0 {
            return Err(MonitorError::sample(MetricKind::MemPercent, "total memory reported as 0"));
        }

        let percent = (usage.used_bytes as f64 * 100.0 / usage.total_bytes as f64).round();
        Ok(Sample::clean(MetricKind::MemPercent, percent.clamp(0.0, 100.0)))
    }

    pub fn sample_network(&mut self, interface: &str) -> Result<NetRates> {
        self.sample_network_at(interface, Instant::now())
    }

    pub fn sample_network_at(&mut self, interface: &str, now: Instant) -> Result<NetRates> {
        let (rx_bytes, tx_bytes) = self.source.net_counters(interface)?;
        let current = NetCounterSnapshot {
            interface: interface.to_string(),
            rx_bytes,
            tx_bytes,
            taken_at: now,
        };

        let rates = match self.prev_net.get(interface) {
            None => NetRates {
                rx: Sample::noted(MetricKind::NetRxBytesPerSec, 0.0, SampleNote::Warmup),
                tx: Sample::noted(MetricKind::NetTxBytesPerSec, 0.0, SampleNote::Warmup),
            },
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev.taken_at).as_secs_f64();
                let rx_label = format!("{} rx", interface);
                let tx_label = format!("{} tx", interface);
                NetRates {
                    rx: rate_sample(
                        MetricKind::NetRxBytesPerSec,
                        &rx_label,
                        prev.rx_bytes,
                        rx_bytes,
                        elapsed,
                    ),
                    tx: rate_sample(
                        MetricKind::NetTxBytesPerSec,
                        &tx_label,
                        prev.tx_bytes,
                        tx_bytes,
                        elapsed,
                    ),
                }
            }
        };

        self.prev_net.insert(interface.to_string(), current);
        Ok(rates)
    }

    pub fn sample_disk(&mut self) -> Result<DiskSample> {
        self.sample_disk_at(Instant::now())
    }

    pub fn sample_disk_at(&mut self, now: Instant) -> Result<DiskSample> {
        let current = DiskCounterSnapshot {
            devices: self.source.disk_counters()?,
            taken_at: now,
        };

        let sample = match &self.prev_disk {
            None => DiskSample {
                total: Sample::noted(MetricKind::DiskIo, 0.0, SampleNote::Warmup),
                devices: current
                    .devices
                    .iter()
                    .map(|d| DeviceRate {
                        device: d.device.clone(),
                        tps: d.tps,
                        read_bytes_per_sec: 0.0,
                        write_bytes_per_sec: 0.0,
                    })
                    .collect(),
            },
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev.taken_at).as_secs_f64();
                // Only devices present in both readings contribute to the total,
                // so a device appearing or vanishing is not counted as traffic.
                let mut before_bytes = 0u64;
                let mut after_bytes = 0u64;
                let mut devices = Vec::with_capacity(current.devices.len());
                for d in &current.devices {
                    let rate = match prev.device(&d.device) {
                        Some(p) => {
                            before_bytes =
                                before_bytes.saturating_add(p.total_kb().saturating_mul(1024));
                            after_bytes =
                                after_bytes.saturating_add(d.total_kb().saturating_mul(1024));
                            let (read, _) = per_second(p.kb_read, d.kb_read, elapsed);
                            let (write, _) = per_second(p.kb_written, d.kb_written, elapsed);
                            DeviceRate {
                                device: d.device.clone(),
                                tps: d.tps,
                                read_bytes_per_sec: read * 1024.0,
                                write_bytes_per_sec: write * 1024.0,
                            }
                        }
                        None => DeviceRate {
                            device: d.device.clone(),
                            tps: d.tps,
                            read_bytes_per_sec: 0.0,
                            write_bytes_per_sec: 0.0,
                        },
                    };
                    devices.push(rate);
                }

                let total = rate_sample(
                    MetricKind::DiskIo,
                    "disk total",
                    before_bytes,
                    after_bytes,
                    elapsed,
                );
                DiskSample { total, devices }
            }
        };

        self.prev_disk = Some(current);
        Ok(sample)
    }

    pub fn top_processes(&mut self, n: usize) -> Result<Vec<ProcessUsage>> {
        self.source.top_processes(n)
    }

    pub fn sensors_report(&mut self) -> Result<String> {
        self.source.sensors_report()
    }
}

/// `(current - previous) / elapsed`, with `wrapped == true` when the counter
/// went backwards. A wrapped or zero-length interval yields a rate of 0.
pub fn per_second(previous: u64, current: u64, elapsed_secs: f64) -> (f64, bool) {
    if current < previous {
        return (0.0, true);
    }
    if elapsed_secs <= 0.0 {
        return (0.0, false);
    }
    ((current - previous) as f64 / elapsed_secs, false)
}

fn rate_sample(kind: MetricKind, label: &str, previous: u64, current: u64, elapsed: f64) -> Sample {
    let (rate, wrapped) = per_second(previous, current, elapsed);
    if wrapped {
        let err = MonitorError::CounterWraparound {
            counter: label.to_string(),
            previous,
            current,
        };
        tracing::warn!(error = %err, "treating counter decrease as zero delta");
        return Sample::noted(kind, 0.0, SampleNote::CounterWraparound { previous, current });
    }
    Sample::clean(kind, rate)
}
