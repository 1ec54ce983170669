pub mod alert_log;
pub mod command;
pub mod config;
pub mod detector;
pub mod error;
pub mod history;
pub mod metrics;
pub mod monitor;
pub mod render;
pub mod sampler;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use alert_log::{AlertSink, JsonLinesLog, TracingAlertSink};
pub use config::MonitorConfig;
pub use detector::{AlertEvent, Observation, Threshold, ThresholdHandle, Thresholds, TOP_N};
pub use error::{MonitorError, Result};
pub use history::{HistoryRing, DEFAULT_HISTORY_CAPACITY};
pub use metrics::*;
pub use monitor::{LinuxSource, SystemSource};
pub use render::{render_bargraph, render_rate, BarScale, ValueFormat};
pub use sampler::Sampler;
pub use scheduler::{
    CancelToken, ChannelSink, LoopState, MetricGroup, SchedulerLoop, TickOutput, TickSink,
    TickWarning,
};
