//! Plain-text rendering of histories and single samples.
//!
//! Every function returns one string block; the presentation layer decides
//! where it goes.

use crate::detector::AlertEvent;
use crate::error::{MonitorError, Result};
use crate::history::HistoryRing;
use crate::metrics::ProcessUsage;
use crate::sampler::DeviceRate;
use std::fmt::Write;

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * 1024.0;

/// Widest bar drawn for one sample. Longer bars are cut to this width.
pub const MAX_BAR_WIDTH: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    Percent,
    Rate,
}

/// Scale and glyph for one graph. Each graph owns its own scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarScale {
    divisor: f64,
    glyph: char,
    format: ValueFormat,
}

impl BarScale {
    pub fn new(divisor: f64, glyph: char, format: ValueFormat) -> Result<Self> {
        if !divisor.is_finite() || divisor <= 0.0 {
            return Err(MonitorError::invalid(
                "scale_divisor",
                format!("must be a positive number, got {}", divisor),
            ));
        }
        Ok(Self { divisor, glyph, format })
    }

    pub fn divisor(&self) -> f64 {
        self.divisor
    }

    pub fn glyph(&self) -> char {
        self.glyph
    }

    /// `floor(value / divisor)`, clamped to `0..=MAX_BAR_WIDTH`.
    pub fn bar_len(&self, value: f64) -> usize {
        let len = (value / self.divisor).floor();
        if len.is_nan() || len <= 0.0 {
            0
        } else if len >= MAX_BAR_WIDTH as f64 {
            MAX_BAR_WIDTH
        } else {
            len as usize
        }
    }

    fn format_value(&self, value: f64) -> String {
        match self.format {
            ValueFormat::Percent => format!("{:>5.1}%", value),
            ValueFormat::Rate => format!("{:>12}", render_rate(value)),
        }
    }
}

/// One line per sample, oldest first, with the value right-aligned after the
/// bar.
pub fn render_bargraph(ring: &HistoryRing, scale: &BarScale) -> String {
    let width = ring.iter().map(|v| scale.bar_len(v)).max().unwrap_or(0);
    let mut out = String::new();

    for value in ring.iter() {
        let bar: String = std::iter::repeat(scale.glyph).take(scale.bar_len(value)).collect();
        let _ = writeln!(out, "{:<width$} {}", bar, scale.format_value(value), width = width);
    }

    out
}

/// Binary unit steps: `X.XX MB/s`, `X.XX KB/s`, or whole `X B/s`.
pub fn render_rate(bytes_per_sec: f64) -> String {
    let value = if bytes_per_sec.is_finite() { bytes_per_sec.max(0.0) } else { 0.0 };

    if value >= MB {
        format!("{:.2} MB/s", value / MB)
    } else if value >= KB {
        format!("{:.2} KB/s", value / KB)
    } else {
        format!("{} B/s", value.floor() as u64)
    }
}

pub fn render_network_report(
    interface: &str,
    rx_bytes_per_sec: f64,
    tx_bytes_per_sec: f64,
) -> String {
    format!(
        "Interface: {}\nRX: {}\nTX: {}\n",
        interface,
        render_rate(rx_bytes_per_sec),
        render_rate(tx_bytes_per_sec)
    )
}

pub fn render_disk_report(devices: &[DeviceRate]) -> String {
    let mut out = format!("{:<12} {:>8} {:>14} {:>14}\n", "Device", "tps", "Read", "Write");
    for d in devices {
        let _ = writeln!(
            out,
            "{:<12} {:>8.2} {:>14} {:>14}",
            d.device,
            d.tps,
            render_rate(d.read_bytes_per_sec),
            render_rate(d.write_bytes_per_sec)
        );
    }
    out
}

pub fn render_top_processes(processes: &[ProcessUsage], cpu_limit: f64) -> String {
    let mut out = format!("{:>7}  {:<20} {:>7} {:>7}\n", "PID", "COMMAND", "%CPU", "%MEM");
    for p in processes {
        let marker = if p.cpu_percent > cpu_limit { " !" } else { "" };
        let _ = writeln!(
            out,
            "{:>7}  {:<20} {:>7.1} {:>7.1}{}",
            p.pid,
            truncate(&p.name, 20),
            p.cpu_percent,
            p.mem_percent,
            marker
        );
    }
    out
}

pub fn render_alerts(alerts: &[AlertEvent]) -> String {
    let mut out = String::new();
    for alert in alerts {
        let _ = writeln!(out, "ALERT {}", alert.describe());
    }
    out
}

pub fn render_no_data(label: &str) -> String {
    format!("{}: no data this tick\n", label)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
