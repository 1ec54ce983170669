use anyhow::{Context, Result};
use std::collections::VecDeque;
use sysgauge_core::{
    CancelToken, ChannelSink, JsonLinesLog, LinuxSource, MetricGroup, MetricKind, MonitorConfig,
    Sampler, SchedulerLoop, SystemSource, Thresholds, TickOutput, TracingAlertSink,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const MAX_ALERTS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Screen {
    Graph,
    Network,
    Disk,
    Sensors,
}

impl Screen {
    pub const ALL: [Screen; 4] = [Screen::Graph, Screen::Network, Screen::Disk, Screen::Sensors];

    pub fn index(&self) -> usize {
        Screen::ALL.iter().position(|s| s == self).unwrap_or(0)
    }
}

struct RunningLoop {
    cancel: CancelToken,
    handle: JoinHandle<(Sampler<LinuxSource>, sysgauge_core::Result<()>)>,
    rx: mpsc::Receiver<TickOutput>,
}

pub struct App {
    config: MonitorConfig,
    thresholds: Thresholds,
    pub screen: Screen,
    pub interfaces: Vec<String>,
    interface_idx: usize,
    pub latest: Option<TickOutput>,
    pub alerts: VecDeque<String>,
    pub status_message: Option<String>,
    pub threshold_mode: bool,
    pub threshold_input: String,
    running: Option<RunningLoop>,
    /// Sampler of the last stopped loop, reused by the next one.
    sampler: Option<Sampler<LinuxSource>>,
}

impl App {
    pub async fn new(config: MonitorConfig, screen: Screen) -> Result<Self> {
        let thresholds = Thresholds::from_config(&config)?;
        let lister = LinuxSource::with_roots(&config.net_sysfs_root, "/sys/class/thermal");
        let interfaces = lister.list_interfaces().unwrap_or_default();
        let interface_idx = config
            .interface
            .as_ref()
            .and_then(|name| interfaces.iter().position(|i| i == name))
            .unwrap_or(0);

        let mut app = Self {
            config,
            thresholds,
            screen,
            interfaces,
            interface_idx,
            latest: None,
            alerts: VecDeque::new(),
            status_message: None,
            threshold_mode: false,
            threshold_input: String::new(),
            running: None,
            sampler: None,
        };

        app.start_loop().await?;
        Ok(app)
    }

    pub fn current_interface(&self) -> Option<&str> {
        self.interfaces.get(self.interface_idx).map(|s| s.as_str())
    }

    pub fn cpu_threshold(&self) -> Option<f64> {
        self.thresholds
            .get(MetricKind::CpuPercent)
            .map(|handle| handle.snapshot().limit)
    }

    pub async fn set_screen(&mut self, screen: Screen) -> Result<()> {
        if self.screen == screen {
            return Ok(());
        }
        self.screen = screen;
        self.start_loop().await
    }

    pub async fn next_screen(&mut self) -> Result<()> {
        let next = Screen::ALL[(self.screen.index() + 1) % Screen::ALL.len()];
        self.set_screen(next).await
    }

    pub async fn next_interface(&mut self) -> Result<()> {
        if self.interfaces.is_empty() {
            self.status_message = Some("No network interfaces found".to_string());
            return Ok(());
        }
        self.interface_idx = (self.interface_idx + 1) % self.interfaces.len();
        if self.screen == Screen::Network {
            self.start_loop().await?;
        }
        Ok(())
    }

    pub fn toggle_threshold_mode(&mut self) {
        self.threshold_mode = !self.threshold_mode;
        self.threshold_input.clear();
    }

    pub fn add_threshold_char(&mut self, c: char) {
        if c.is_ascii_digit() || c == '.' || c == '-' {
            self.threshold_input.push(c);
        }
    }

    pub fn remove_threshold_char(&mut self) {
        self.threshold_input.pop();
    }

    /// Applies the typed CPU threshold. A rejected value leaves the old one.
    pub fn apply_threshold(&mut self) {
        let input = std::mem::take(&mut self.threshold_input);
        self.threshold_mode = false;

        let Some(handle) = self.thresholds.get(MetricKind::CpuPercent) else {
            self.status_message = Some("CPU alerting is disabled".to_string());
            return;
        };

        self.status_message = Some(match handle.parse_and_set(&input) {
            Ok(()) => format!("CPU threshold set to {}%", handle.snapshot().limit),
            Err(e) => format!("Threshold unchanged: {}", e),
        });
    }

    /// Drains every output the running loop has delivered so far.
    pub fn poll_updates(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };

        while let Ok(output) = running.rx.try_recv() {
            for alert in &output.alerts {
                self.alerts.push_back(alert.describe());
                if self.alerts.len() > MAX_ALERTS {
                    self.alerts.pop_front();
                }
            }
            if let Some(warning) = output.warnings.last() {
                self.status_message = Some(format!("{}: {}", warning.source, warning.message));
            }
            self.latest = Some(output);
        }
    }

    fn group(&self) -> Option<MetricGroup> {
        match self.screen {
            Screen::Graph => Some(MetricGroup::Graph),
            Screen::Network => self.current_interface().map(|interface| MetricGroup::Network {
                interface: interface.to_string(),
            }),
            Screen::Disk => Some(MetricGroup::Disk),
            Screen::Sensors => Some(MetricGroup::Sensors),
        }
    }

    /// Stops the current loop, then starts one for the current screen. Only
    /// one loop runs at a time.
    async fn start_loop(&mut self) -> Result<()> {
        self.stop_loop().await;
        self.latest = None;

        let Some(group) = self.group() else {
            self.status_message = Some("No network interfaces found".to_string());
            return Ok(());
        };

        let sampler = match self.sampler.take() {
            Some(sampler) => sampler,
            None => Sampler::new(LinuxSource::with_roots(
                &self.config.net_sysfs_root,
                "/sys/class/thermal",
            )),
        };
        let mut monitor =
            SchedulerLoop::with_sampler(sampler, group, &self.config, self.thresholds.clone())?
                .with_alert_sink(Box::new(TracingAlertSink));
        if let Some(path) = &self.config.alert_log {
            let log = JsonLinesLog::open(path)
                .with_context(|| format!("failed to open alert log {}", path.display()))?;
            monitor = monitor.with_alert_sink(Box::new(log));
        }

        let (tx, rx) = mpsc::channel(16);
        let cancel = CancelToken::new();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut sink = ChannelSink::new(tx);
            let result = monitor.run(&mut sink, &loop_cancel).await;
            (monitor.into_sampler(), result)
        });

        self.running = Some(RunningLoop { cancel, handle, rx });
        Ok(())
    }

    async fn stop_loop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            // Drop the receiver so a loop blocked on a full channel wakes up.
            drop(running.rx);
            match running.handle.await {
                Ok((sampler, result)) => {
                    if let Err(e) = result {
                        tracing::debug!(error = %e, "monitor loop ended with error");
                    }
                    self.sampler = Some(sampler);
                }
                Err(e) => tracing::warn!(error = %e, "monitor loop task failed"),
            }
        }
    }

    pub async fn shutdown(&mut self) {
        self.stop_loop().await;
    }
}
