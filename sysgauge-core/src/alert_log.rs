use crate::detector::AlertEvent;
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only destination for alert records.
pub trait AlertSink: Send {
    fn record(&mut self, alert: &AlertEvent) -> Result<()>;
}

/// Writes one JSON object per line: `{timestamp, metric, subject, value, threshold}`.
pub struct JsonLinesLog {
    path: PathBuf,
    file: File,
}

impl JsonLinesLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlertSink for JsonLinesLog {
    fn record(&mut self, alert: &AlertEvent) -> Result<()> {
        let line = serde_json::to_string(alert).map_err(std::io::Error::from)?;
        writeln!(self.file, "{}", line)?;
        Ok(())
    }
}

/// Emits each alert as a `tracing` warning.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn record(&mut self, alert: &AlertEvent) -> Result<()> {
        tracing::warn!(
            metric = %alert.metric,
            subject = alert.subject.as_deref().unwrap_or("system"),
            value = alert.value,
            threshold = alert.threshold,
            "threshold exceeded"
        );
        Ok(())
    }
}
