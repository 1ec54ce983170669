//! Fixed-period tick loop: sample → history → evaluate → render → deliver.
//!
//! One loop hosts one metric group and owns its histories and counter
//! caches. Cancellation is checked at tick boundaries only, never while a
//! sample is being read.

use crate::alert_log::AlertSink;
use crate::config::MonitorConfig;
use crate::detector::{evaluate, evaluate_sample, AlertEvent, Observation, Threshold, Thresholds};
use crate::error::{MonitorError, Result};
use crate::history::HistoryRing;
use crate::metrics::{MetricKind, Sample, SampleNote};
use crate::monitor::SystemSource;
use crate::render::{self, BarScale, ValueFormat};
use crate::sampler::Sampler;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricGroup {
    /// CPU and memory graphs plus the top CPU consumers.
    Graph,
    Network { interface: String },
    Disk,
    Sensors,
}

impl MetricGroup {
    pub fn title(&self) -> String {
        match self {
            MetricGroup::Graph => "Live CPU / Memory".to_string(),
            MetricGroup::Network { interface } => format!("Network ({})", interface),
            MetricGroup::Disk => "Disk I/O".to_string(),
            MetricGroup::Sensors => "Sensors".to_string(),
        }
    }

    pub fn metrics(&self) -> &'static [MetricKind] {
        match self {
            MetricGroup::Graph => &[MetricKind::CpuPercent, MetricKind::MemPercent],
            MetricGroup::Network { .. } => {
                &[MetricKind::NetRxBytesPerSec, MetricKind::NetTxBytesPerSec]
            }
            MetricGroup::Disk => &[MetricKind::DiskIo],
            MetricGroup::Sensors => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

/// A failure surfaced to the presentation layer. Each failure streak is
/// reported once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickWarning {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TickOutput {
    pub seq: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub title: String,
    pub text: String,
    pub alerts: Vec<AlertEvent>,
    pub warnings: Vec<TickWarning>,
}

/// Presentation boundary. Receives one output per tick.
#[async_trait]
pub trait TickSink: Send {
    async fn deliver(&mut self, output: TickOutput) -> Result<()>;
}

pub struct ChannelSink {
    tx: mpsc::Sender<TickOutput>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<TickOutput>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl TickSink for ChannelSink {
    async fn deliver(&mut self, output: TickOutput) -> Result<()> {
        self.tx.send(output).await.map_err(|_| {
            MonitorError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "presentation layer closed"))
        })
    }
}

/// Cooperative stop request, observed at the next tick boundary.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

struct Scales {
    cpu: BarScale,
    mem: BarScale,
    net: BarScale,
    disk: BarScale,
}

impl Scales {
    fn from_config(config: &MonitorConfig) -> Result<Self> {
        Ok(Self {
            cpu: BarScale::new(config.cpu_scale, '#', ValueFormat::Percent)?,
            mem: BarScale::new(config.mem_scale, '*', ValueFormat::Percent)?,
            net: BarScale::new(config.net_scale, '=', ValueFormat::Rate)?,
            disk: BarScale::new(config.disk_scale, '=', ValueFormat::Rate)?,
        })
    }
}

#[derive(Default)]
struct TickReport {
    sections: Vec<String>,
    alerts: Vec<AlertEvent>,
    warnings: Vec<TickWarning>,
}

pub struct SchedulerLoop<S: SystemSource> {
    sampler: Sampler<S>,
    group: MetricGroup,
    period: Duration,
    top_n: usize,
    retain_counters: bool,
    histories: HashMap<MetricKind, HistoryRing>,
    scales: Scales,
    thresholds: Thresholds,
    alert_sinks: Vec<Box<dyn AlertSink>>,
    state: LoopState,
    seq: u64,
    last_good: HashMap<MetricKind, f64>,
    /// Sources whose current failure streak has already been reported.
    surfaced: HashSet<String>,
    /// Sources that reported `CapabilityUnavailable`; skipped from then on.
    disabled: HashSet<String>,
}

impl<S: SystemSource> SchedulerLoop<S> {
    pub fn new(
        source: S,
        group: MetricGroup,
        config: &MonitorConfig,
        thresholds: Thresholds,
    ) -> Result<Self> {
        Self::with_sampler(Sampler::new(source), group, config, thresholds)
    }

    /// Builds a loop around a sampler handed back by [`into_sampler`].
    ///
    /// Counters the sampler still holds are reused, so the first tick skips
    /// warm-up. Selecting a different interface still warms up.
    ///
    /// [`into_sampler`]: SchedulerLoop::into_sampler
    pub fn with_sampler(
        mut sampler: Sampler<S>,
        group: MetricGroup,
        config: &MonitorConfig,
        thresholds: Thresholds,
    ) -> Result<Self> {
        config.validate()?;

        let mut histories = HashMap::new();
        for metric in group.metrics() {
            histories.insert(*metric, HistoryRing::new(*metric, config.history_capacity)?);
        }

        if let MetricGroup::Network { interface } = &group {
            if sampler.selected_interface() != Some(interface.as_str()) {
                sampler.select_interface(interface.clone());
            }
        }

        Ok(Self {
            sampler,
            group,
            period: config.tick_period(),
            top_n: config.top_n,
            retain_counters: config.retain_counters,
            histories,
            scales: Scales::from_config(config)?,
            thresholds,
            alert_sinks: Vec::new(),
            state: LoopState::Idle,
            seq: 0,
            last_good: HashMap::new(),
            surfaced: HashSet::new(),
            disabled: HashSet::new(),
        })
    }

    pub fn with_alert_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.alert_sinks.push(sink);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn group(&self) -> &MetricGroup {
        &self.group
    }

    pub fn history(&self, metric: MetricKind) -> Option<&HistoryRing> {
        self.histories.get(&metric)
    }

    pub fn sampler(&self) -> &Sampler<S> {
        &self.sampler
    }

    /// Gives back the sampler. Its counters survive only when the loop was
    /// configured with `retain_counters`.
    pub fn into_sampler(self) -> Sampler<S> {
        self.sampler
    }

    /// Runs ticks until `cancel` fires or the sink goes away.
    ///
    /// A cancel that arrives while a tick is in progress lets that tick
    /// finish and deliver before the loop stops.
    pub async fn run<K>(&mut self, sink: &mut K, cancel: &CancelToken) -> Result<()>
    where
        K: TickSink + ?Sized,
    {
        if self.state == LoopState::Stopped {
            return Err(MonitorError::invalid("state", "loop has already stopped"));
        }

        self.state = LoopState::Running;
        tracing::info!(
            group = %self.group.title(),
            period_ms = self.period.as_millis() as u64,
            "monitor loop started"
        );

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = interval.tick() => {}
            }

            let output = self.tick_off_runtime();
            if let Err(e) = sink.deliver(output).await {
                break Err(e);
            }

            if cancel.is_cancelled() {
                break Ok(());
            }
        };

        self.stop();
        result
    }

    /// One full sample → history → evaluate → render pass.
    pub fn tick(&mut self) -> TickOutput {
        self.seq += 1;
        let limits = self.thresholds.snapshot();
        let mut report = TickReport::default();

        match self.group.clone() {
            MetricGroup::Graph => self.tick_graph(&limits, &mut report),
            MetricGroup::Network { interface } => {
                self.tick_network(&interface, &limits, &mut report)
            }
            MetricGroup::Disk => self.tick_disk(&limits, &mut report),
            MetricGroup::Sensors => self.tick_sensors(&mut report),
        }

        if !report.alerts.is_empty() {
            report.sections.push(render::render_alerts(&report.alerts));
        }
        self.log_alerts(&report.alerts, &mut report.warnings);

        tracing::debug!(
            seq = self.seq,
            alerts = report.alerts.len(),
            warnings = report.warnings.len(),
            "tick complete"
        );

        TickOutput {
            seq: self.seq,
            timestamp: chrono::Utc::now(),
            title: self.group.title(),
            text: report.sections.join("\n"),
            alerts: report.alerts,
            warnings: report.warnings,
        }
    }

    /// Runs `tick` so its blocking reads (`iostat`, `sensors`, the process
    /// table) do not stall other tasks on a multi-threaded runtime.
    fn tick_off_runtime(&mut self) -> TickOutput {
        match Handle::current().runtime_flavor() {
            RuntimeFlavor::MultiThread => tokio::task::block_in_place(|| self.tick()),
            _ => self.tick(),
        }
    }

    fn stop(&mut self) {
        self.state = LoopState::Stopped;
        if !self.retain_counters {
            self.sampler.reset_counters();
        }
        tracing::info!(group = %self.group.title(), ticks = self.seq, "monitor loop stopped");
    }

    fn tick_graph(
        &mut self,
        limits: &HashMap<MetricKind, Arc<Threshold>>,
        report: &mut TickReport,
    ) {
        let cpu = self.sampler.sample_cpu();
        let cpu = self.record(MetricKind::CpuPercent, Ok(cpu), report);
        let mem = if self.is_disabled(MetricKind::MemPercent.as_str()) {
            None
        } else {
            let result = self.sampler.sample_memory();
            self.record(MetricKind::MemPercent, result, report)
        };

        let top = self.top_processes(report);

        if let Some(threshold) = limits.get(&MetricKind::CpuPercent) {
            let observations: Vec<Observation> =
                top.iter().map(Observation::from_process).collect();
            report.alerts.extend(evaluate(threshold, &observations));
        }
        if let (Some(threshold), Some(sample)) =
            (limits.get(&MetricKind::MemPercent), mem.as_ref())
        {
            report.alerts.extend(evaluate_sample(threshold, sample));
        }

        let cpu_label = match cpu {
            Some(s) => format!("CPU usage: {:.1}%", s.value()),
            None => "CPU usage".to_string(),
        };
        report.sections.push(format!(
            "{}\n{}",
            cpu_label,
            self.graph(MetricKind::CpuPercent, self.scales.cpu)
        ));

        if self.is_disabled(MetricKind::MemPercent.as_str()) {
            report.sections.push(render::render_no_data("Memory usage"));
        } else {
            report.sections.push(format!(
                "Memory usage (%)\n{}",
                self.graph(MetricKind::MemPercent, self.scales.mem)
            ));
        }

        if !top.is_empty() {
            let cpu_limit = limits
                .get(&MetricKind::CpuPercent)
                .map(|t| t.limit)
                .unwrap_or(f64::INFINITY);
            report.sections.push(format!(
                "Top CPU consumers\n{}",
                render::render_top_processes(&top, cpu_limit)
            ));
        }
    }

    fn tick_network(
        &mut self,
        interface: &str,
        limits: &HashMap<MetricKind, Arc<Threshold>>,
        report: &mut TickReport,
    ) {
        let (rx, tx) = match self.sampler.sample_network(interface) {
            Ok(rates) => (
                self.record(MetricKind::NetRxBytesPerSec, Ok(rates.rx), report),
                self.record(MetricKind::NetTxBytesPerSec, Ok(rates.tx), report),
            ),
            Err(e) => {
                // Both directions come from the same read, so one warning covers them.
                self.record_failure(MetricKind::NetRxBytesPerSec, e, report);
                self.push_last_good(MetricKind::NetTxBytesPerSec);
                (None, None)
            }
        };

        for sample in [rx.as_ref(), tx.as_ref()].into_iter().flatten() {
            if let Some(threshold) = limits.get(&sample.metric.kind) {
                report.alerts.extend(evaluate_sample(threshold, sample));
            }
        }

        match (rx, tx) {
            (Some(rx), Some(tx)) => report.sections.push(render::render_network_report(
                interface,
                rx.value(),
                tx.value(),
            )),
            _ => report.sections.push(render::render_no_data(&format!("Interface {}", interface))),
        }
        report.sections.push(format!(
            "RX history\n{}",
            self.graph(MetricKind::NetRxBytesPerSec, self.scales.net)
        ));
        report.sections.push(format!(
            "TX history\n{}",
            self.graph(MetricKind::NetTxBytesPerSec, self.scales.net)
        ));
    }

    fn tick_disk(&mut self, limits: &HashMap<MetricKind, Arc<Threshold>>, report: &mut TickReport) {
        if self.is_disabled(MetricKind::DiskIo.as_str()) {
            report.sections.push(render::render_no_data("Disk I/O"));
            return;
        }

        let (total, devices) = match self.sampler.sample_disk() {
            Ok(disk) => (self.record(MetricKind::DiskIo, Ok(disk.total), report), disk.devices),
            Err(e) => (self.record(MetricKind::DiskIo, Err(e), report), Vec::new()),
        };

        if let (Some(threshold), Some(sample)) = (limits.get(&MetricKind::DiskIo), total.as_ref()) {
            report.alerts.extend(evaluate_sample(threshold, sample));
        }

        if self.is_disabled(MetricKind::DiskIo.as_str()) {
            report.sections.push(render::render_no_data("Disk I/O"));
            return;
        }

        match total {
            Some(total) => report
                .sections
                .push(format!("Disk I/O: {}\n", render::render_rate(total.value()))),
            None => report.sections.push(render::render_no_data("Disk I/O")),
        }
        if !devices.is_empty() {
            report.sections.push(render::render_disk_report(&devices));
        }
        report
            .sections
            .push(self.graph(MetricKind::DiskIo, self.scales.disk));
    }

    fn tick_sensors(&mut self, report: &mut TickReport) {
        const SOURCE: &str = "sensors";
        if self.is_disabled(SOURCE) {
            report.sections.push(render::render_no_data("Sensors"));
            return;
        }

        match self.sampler.sensors_report() {
            Ok(text) => {
                self.surfaced.remove(SOURCE);
                report.sections.push(text);
            }
            Err(e) => {
                self.surface(SOURCE, &e, report);
                report.sections.push(render::render_no_data("Sensors"));
            }
        }
    }

    fn top_processes(&mut self, report: &mut TickReport) -> Vec<crate::metrics::ProcessUsage> {
        const SOURCE: &str = "top_processes";
        if self.is_disabled(SOURCE) {
            return Vec::new();
        }

        match self.sampler.top_processes(self.top_n) {
            Ok(top) => {
                self.surfaced.remove(SOURCE);
                top
            }
            Err(e) => {
                self.surface(SOURCE, &e, report);
                Vec::new()
            }
        }
    }

    /// Pushes the sample (or the last good value on failure) into history.
    /// Returns the sample only when fresh data was read.
    fn record(
        &mut self,
        kind: MetricKind,
        result: Result<Sample>,
        report: &mut TickReport,
    ) -> Option<Sample> {
        match result {
            Ok(sample) => {
                match sample.note {
                    Some(SampleNote::Degraded) => {
                        let err = MonitorError::sample(kind, "source unavailable, showing 0");
                        self.surface(kind.as_str(), &err, report);
                    }
                    Some(SampleNote::CounterWraparound { previous, current }) => {
                        report.warnings.push(TickWarning {
                            source: kind.to_string(),
                            message: MonitorError::CounterWraparound {
                                counter: kind.to_string(),
                                previous,
                                current,
                            }
                            .to_string(),
                        });
                        self.surfaced.remove(kind.as_str());
                    }
                    _ => {
                        self.surfaced.remove(kind.as_str());
                    }
                }

                if sample.note != Some(SampleNote::Degraded) {
                    self.last_good.insert(kind, sample.value());
                }
                if let Some(ring) = self.histories.get_mut(&kind) {
                    ring.push(sample.value());
                }
                Some(sample)
            }
            Err(e) => {
                self.record_failure(kind, e, report);
                None
            }
        }
    }

    fn record_failure(&mut self, kind: MetricKind, err: MonitorError, report: &mut TickReport) {
        self.surface(kind.as_str(), &err, report);
        if matches!(err, MonitorError::CapabilityUnavailable(_)) {
            self.disabled.insert(kind.as_str().to_string());
            return;
        }
        self.push_last_good(kind);
    }

    fn push_last_good(&mut self, kind: MetricKind) {
        let value = self.last_good.get(&kind).copied().unwrap_or(0.0);
        if let Some(ring) = self.histories.get_mut(&kind) {
            ring.push(value);
        }
    }

    fn surface(&mut self, source: &str, err: &MonitorError, report: &mut TickReport) {
        if matches!(err, MonitorError::CapabilityUnavailable(_)) {
            self.disabled.insert(source.to_string());
        }
        if !self.surfaced.insert(source.to_string()) {
            return;
        }
        tracing::warn!(source, error = %err, "sampling failed");
        report.warnings.push(TickWarning {
            source: source.to_string(),
            message: err.to_string(),
        });
    }

    fn is_disabled(&self, source: &str) -> bool {
        self.disabled.contains(source)
    }

    fn graph(&self, kind: MetricKind, scale: BarScale) -> String {
        match self.histories.get(&kind) {
            Some(ring) => render::render_bargraph(ring, &scale),
            None => String::new(),
        }
    }

    fn log_alerts(&mut self, alerts: &[AlertEvent], warnings: &mut Vec<TickWarning>) {
        const SOURCE: &str = "alert_log";
        let mut failed = None;
        for alert in alerts {
            for sink in self.alert_sinks.iter_mut() {
                if let Err(e) = sink.record(alert) {
                    failed = Some(e);
                }
            }
        }

        match failed {
            Some(e) => {
                if self.surfaced.insert(SOURCE.to_string()) {
                    tracing::warn!(error = %e, "failed to write alert record");
                    warnings.push(TickWarning {
                        source: SOURCE.to_string(),
                        message: e.to_string(),
                    });
                }
            }
            None if !alerts.is_empty() => {
                self.surfaced.remove(SOURCE);
            }
            None => {}
        }
    }
}
