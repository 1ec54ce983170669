use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::metrics::{MetricKind, ProcessUsage, Sample};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// How many of the highest consumers are checked per tick.
pub const TOP_N: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: MetricKind,
    pub limit: f64,
}

impl Threshold {
    pub fn new(metric: MetricKind, limit: f64) -> Result<Self> {
        validate_limit(metric, limit)?;
        Ok(Self { metric, limit })
    }

    /// Strict greater-than; a value equal to the limit does not breach.
    pub fn is_breached_by(&self, value: f64) -> bool {
        value > self.limit
    }
}

fn validate_limit(metric: MetricKind, limit: f64) -> Result<()> {
    let key = format!("{}_threshold", metric);
    if !limit.is_finite() {
        return Err(MonitorError::invalid(key, "threshold must be a finite number"));
    }
    if limit < 0.0 {
        return Err(MonitorError::invalid(key, "threshold must not be negative"));
    }
    if metric.is_percent() && limit > 100.0 {
        return Err(MonitorError::invalid(key, "percent threshold must be at most 100"));
    }
    Ok(())
}

/// Shared, runtime-adjustable threshold.
///
/// Readers take one snapshot per tick; writers swap in a whole new value, so a
/// change is only seen by the next evaluation.
#[derive(Debug, Clone)]
pub struct ThresholdHandle {
    current: Arc<RwLock<Arc<Threshold>>>,
}

impl ThresholdHandle {
    pub fn new(threshold: Threshold) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(threshold))),
        }
    }

    pub fn snapshot(&self) -> Arc<Threshold> {
        Arc::clone(&self.current.read())
    }

    pub fn metric(&self) -> MetricKind {
        self.current.read().metric
    }

    pub fn set_limit(&self, limit: f64) -> Result<()> {
        let mut guard = self.current.write();
        let metric = guard.metric;
        validate_limit(metric, limit)?;
        *guard = Arc::new(Threshold { metric, limit });
        tracing::info!(%metric, limit, "threshold updated");
        Ok(())
    }

    /// Parses user input; non-numeric text leaves the current value in place.
    pub fn parse_and_set(&self, input: &str) -> Result<()> {
        let metric = self.metric();
        let limit = input.trim().parse::<f64>().map_err(|_| {
            MonitorError::invalid(
                format!("{}_threshold", metric),
                format!("not a number: {:?}", input.trim()),
            )
        })?;
        self.set_limit(limit)
    }
}

/// Process-wide set of thresholds, one handle per alert type. Clones share
/// the same handles.
#[derive(Debug, Clone, Default)]
pub struct Thresholds {
    handles: HashMap<MetricKind, ThresholdHandle>,
}

impl Thresholds {
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let mut thresholds = Self::default();
        for metric in [
            MetricKind::CpuPercent,
            MetricKind::MemPercent,
            MetricKind::NetRxBytesPerSec,
            MetricKind::NetTxBytesPerSec,
            MetricKind::DiskIo,
        ] {
            if let Some(limit) = config.threshold_for(metric) {
                thresholds.insert(Threshold::new(metric, limit)?);
            }
        }
        Ok(thresholds)
    }

    pub fn insert(&mut self, threshold: Threshold) -> ThresholdHandle {
        let handle = ThresholdHandle::new(threshold);
        self.handles.insert(threshold.metric, handle.clone());
        handle
    }

    pub fn get(&self, metric: MetricKind) -> Option<&ThresholdHandle> {
        self.handles.get(&metric)
    }

    /// One consistent read of every threshold, taken at the start of a tick.
    pub fn snapshot(&self) -> HashMap<MetricKind, Arc<Threshold>> {
        self.handles
            .iter()
            .map(|(metric, handle)| (*metric, handle.snapshot()))
            .collect()
    }
}

/// One entity observed this tick: a process, or the whole system when
/// `subject` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub subject: Option<String>,
    pub value: f64,
}

impl Observation {
    pub fn system(value: f64) -> Self {
        Self {
            subject: None,
            value,
        }
    }

    pub fn from_process(process: &ProcessUsage) -> Self {
        Self {
            subject: Some(format!("{} (PID: {})", process.name, process.pid)),
            value: process.cpu_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub metric: MetricKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subject: Option<String>,
    pub value: f64,
    pub threshold: f64,
}

impl AlertEvent {
    pub fn describe(&self) -> String {
        let who = self.subject.as_deref().unwrap_or("system");
        format!(
            "[{}] {} {}: {:.1} > {:.1}",
            self.timestamp.format("%H:%M:%S"),
            self.metric,
            who,
            self.value,
            self.threshold
        )
    }
}

/// Checks the first `TOP_N` observations against `threshold`.
///
/// Observations are expected in descending order of consumption.
pub fn evaluate(threshold: &Threshold, observations: &[Observation]) -> Vec<AlertEvent> {
    let now = chrono::Utc::now();
    observations
        .iter()
        .take(TOP_N)
        .filter(|o| threshold.is_breached_by(o.value))
        .map(|o| AlertEvent {
            timestamp: now,
            metric: threshold.metric,
            subject: o.subject.clone(),
            value: o.value,
            threshold: threshold.limit,
        })
        .collect()
}

/// Scalar form for a whole-system sample. Warm-up samples never alert.
pub fn evaluate_sample(threshold: &Threshold, sample: &Sample) -> Vec<AlertEvent> {
    if sample.is_warmup() || sample.metric.kind != threshold.metric {
        return Vec::new();
    }
    evaluate(threshold, &[Observation::system(sample.value())])
}
