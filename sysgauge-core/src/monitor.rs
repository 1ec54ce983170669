use crate::command::run_query;
use crate::error::{MonitorError, Result};
use crate::metrics::{DiskCounters, MetricKind, ProcessUsage};
use procfs::CurrentSI;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::{MemoryRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// Cumulative CPU time counters, in clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// Raw, read-only access to the operating system.
///
/// One method per data source. All text parsing of OS output stays behind
/// this trait so the rest of the core only sees typed values.
pub trait SystemSource: Send {
    fn cpu_times(&mut self) -> Result<CpuTimes>;

    fn memory(&mut self) -> Result<MemoryUsage>;

    /// Cumulative `(rx_bytes, tx_bytes)` for one interface.
    fn net_counters(&mut self, interface: &str) -> Result<(u64, u64)>;

    fn list_interfaces(&self) -> Result<Vec<String>>;

    fn disk_counters(&mut self) -> Result<Vec<DiskCounters>>;

    /// Highest CPU consumers first.
    fn top_processes(&mut self, n: usize) -> Result<Vec<ProcessUsage>>;

    fn sensors_report(&mut self) -> Result<String>;
}

pub struct LinuxSource {
    system: System,
    net_root: PathBuf,
    thermal_root: PathBuf,
}

impl LinuxSource {
    pub fn new() -> Self {
        Self::with_roots("/sys/class/net", "/sys/class/thermal")
    }

    pub fn with_roots(net_root: impl Into<PathBuf>, thermal_root: impl Into<PathBuf>) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );

        Self {
            system,
            net_root: net_root.into(),
            thermal_root: thermal_root.into(),
        }
    }

    fn read_counter(&self, interface: &str, file: &str, metric: MetricKind) -> Result<u64> {
        let iface_dir = self.net_root.join(interface);
        if !iface_dir.exists() {
            return Err(MonitorError::InterfaceNotFound(interface.to_string()));
        }

        let path = iface_dir.join("statistics").join(file);
        let content = fs::read_to_string(&path).map_err(|e| {
            MonitorError::sample(metric, format!("failed to read {}: {}", path.display(), e))
        })?;

        content.trim().parse::<u64>().map_err(|e| {
            MonitorError::sample(metric, format!("bad counter in {}: {}", path.display(), e))
        })
    }

    fn read_cpu_temperature(&self) -> Option<f32> {
        // Try to read from common thermal zones
        for i in 0..10 {
            let temp_path = self.thermal_root.join(format!("thermal_zone{}", i)).join("temp");
            if let Ok(temp_str) = fs::read_to_string(&temp_path) {
                if let Ok(temp) = temp_str.trim().parse::<f32>() {
                    return Some(temp / 1000.0); // Convert from millidegrees
                }
            }
        }

        None
    }
}

impl Default for LinuxSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSource for LinuxSource {
    fn cpu_times(&mut self) -> Result<CpuTimes> {
        let stats = procfs::KernelStats::current()
            .map_err(|e| MonitorError::sample(MetricKind::CpuPercent, e.to_string()))?;
        let t = stats.total;

        let idle = t.idle;
        let total = t.user
            + t.nice
            + t.system
            + t.idle
            + t.iowait.unwrap_or(0)
            + t.irq.unwrap_or(0)
            + t.softirq.unwrap_or(0)
            + t.steal.unwrap_or(0);

        Ok(CpuTimes { idle, total })
    }

    fn memory(&mut self) -> Result<MemoryUsage> {
        self.system.refresh_memory();

        let total_bytes = self.system.total_memory();
        if total_bytes == 0 {
            return Err(MonitorError::sample(MetricKind::MemPercent, "total memory reported as 0"));
        }

        Ok(MemoryUsage {
            used_bytes: self.system.used_memory(),
            total_bytes,
        })
    }

    fn net_counters(&mut self, interface: &str) -> Result<(u64, u64)> {
        let rx = self.read_counter(interface, "rx_bytes", MetricKind::NetRxBytesPerSec)?;
        let tx = self.read_counter(interface, "tx_bytes", MetricKind::NetTxBytesPerSec)?;
        Ok((rx, tx))
    }

    fn list_interfaces(&self) -> Result<Vec<String>> {
        list_dir_names(&self.net_root)
    }

    fn disk_counters(&mut self) -> Result<Vec<DiskCounters>> {
        let output = run_query("iostat", &["-d", "-k"])?;
        parse_iostat(&output)
    }

    fn top_processes(&mut self, n: usize) -> Result<Vec<ProcessUsage>> {
        self.system.refresh_memory();
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let total_memory = self.system.total_memory().max(1) as f64;
        let mut processes: Vec<ProcessUsage> = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessUsage {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().to_string(),
                cpu_percent: process.cpu_usage() as f64,
                mem_percent: process.memory() as f64 / total_memory * 100.0,
            })
            .collect();

        processes.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
        processes.truncate(n);
        Ok(processes)
    }

    fn sensors_report(&mut self) -> Result<String> {
        sensors_or_thermal(run_query("sensors", &[]), || self.read_cpu_temperature().map(f64::from))
    }
}

/// Falls back to the thermal zones when `sensors` is missing or finds
/// nothing (lm-sensors exits non-zero with "No sensors found!").
fn sensors_or_thermal(
    report: Result<String>,
    thermal: impl FnOnce() -> Option<f64>,
) -> Result<String> {
    match report {
        Ok(report) => Ok(report),
        Err(e @ (MonitorError::CapabilityUnavailable(_) | MonitorError::Command { .. })) => {
            match thermal() {
                Some(temp) => Ok(format!("CPU temperature: {:.1}°C (thermal zone)\n", temp)),
                None => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

fn list_dir_names(root: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MonitorError::CapabilityUnavailable(root.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    Ok(names)
}

/// Parses the last device report of `iostat -d -k`.
///
/// Columns are located by header name so both `Device:` (older sysstat) and
/// `Device` headers work. Loop and ram devices are skipped.
pub fn parse_iostat(output: &str) -> Result<Vec<DiskCounters>> {
    let lines: Vec<&str> = output.lines().collect();
    let header_idx = lines
        .iter()
        .rposition(|line| line.trim_start().starts_with("Device"))
        .ok_or_else(|| {
            MonitorError::sample(MetricKind::DiskIo, "no device header in iostat output")
        })?;

    let header: Vec<&str> = lines[header_idx].split_whitespace().collect();
    let column = |name: &str| {
        header.iter().position(|h| *h == name).ok_or_else(|| {
            MonitorError::sample(
                MetricKind::DiskIo,
                format!("iostat output has no '{}' column", name),
            )
        })
    };
    let tps_col = column("tps")?;
    let read_col = column("kB_read")?;
    let wrtn_col = column("kB_wrtn")?;

    let mut devices = Vec::new();
    for line in &lines[header_idx + 1..] {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            break;
        }
        if parts.len() <= tps_col.max(read_col).max(wrtn_col) {
            continue;
        }

        let device = parts[0].to_string();
        if device.starts_with("loop") || device.starts_with("ram") {
            continue;
        }

        devices.push(DiskCounters {
            device,
            tps: parts[tps_col].parse::<f64>().unwrap_or(0.0),
            kb_read: parse_kb(parts[read_col]),
            kb_written: parse_kb(parts[wrtn_col]),
        });
    }

    Ok(devices)
}

fn parse_kb(field: &str) -> u64 {
    field
        .parse::<u64>()
        .ok()
        .or_else(|| field.parse::<f64>().ok().map(|v| v.max(0.0) as u64))
        .unwrap_or(0)
}
