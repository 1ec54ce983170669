#[cfg(test)]
mod tests {
    use crate::alert_log::AlertSink;
    use crate::config::MonitorConfig;
    use crate::detector::{AlertEvent, Thresholds};
    use crate::error::{MonitorError, Result};
    use crate::metrics::{DiskCounters, MetricKind, ProcessUsage, SampleNote};
    use crate::monitor::{CpuTimes, MemoryUsage, SystemSource};
    use crate::sampler::Sampler;
    use crate::scheduler::{
        CancelToken, ChannelSink, LoopState, MetricGroup, SchedulerLoop, TickOutput, TickSink,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Scripted in-memory system. Each queue is consumed one call at a time.
    struct FakeSource {
        cpu: Option<CpuTimes>,
        memory: VecDeque<Option<MemoryUsage>>,
        net: VecDeque<(u64, u64)>,
        disk: Option<Vec<DiskCounters>>,
        top: Vec<ProcessUsage>,
        sensors: Option<String>,
        disk_calls: Arc<AtomicUsize>,
        cancel_during_cpu: Option<CancelToken>,
    }

    impl Default for FakeSource {
        fn default() -> Self {
            Self {
                cpu: Some(CpuTimes { idle: 50, total: 100 }),
                memory: VecDeque::new(),
                net: VecDeque::new(),
                disk: None,
                top: Vec::new(),
                sensors: None,
                disk_calls: Arc::new(AtomicUsize::new(0)),
                cancel_during_cpu: None,
            }
        }
    }

    impl SystemSource for FakeSource {
        fn cpu_times(&mut self) -> Result<CpuTimes> {
            if let Some(token) = &self.cancel_during_cpu {
                token.cancel();
            }
            self.cpu
                .ok_or_else(|| MonitorError::sample(MetricKind::CpuPercent, "no /proc/stat"))
        }

        fn memory(&mut self) -> Result<MemoryUsage> {
            match self.memory.pop_front() {
                Some(Some(usage)) => Ok(usage),
                Some(None) => Err(MonitorError::sample(
                    MetricKind::MemPercent,
                    "meminfo unreadable",
                )),
                None => Ok(MemoryUsage { used_bytes: 50, total_bytes: 100 }),
            }
        }

        fn net_counters(&mut self, interface: &str) -> Result<(u64, u64)> {
            self.net
                .pop_front()
                .ok_or_else(|| MonitorError::InterfaceNotFound(interface.to_string()))
        }

        fn list_interfaces(&self) -> Result<Vec<String>> {
            Ok(vec!["eth0".to_string(), "lo".to_string()])
        }

        fn disk_counters(&mut self) -> Result<Vec<DiskCounters>> {
            self.disk_calls.fetch_add(1, Ordering::SeqCst);
            self.disk
                .clone()
                .ok_or_else(|| MonitorError::CapabilityUnavailable("iostat".to_string()))
        }

        fn top_processes(&mut self, n: usize) -> Result<Vec<ProcessUsage>> {
            Ok(self.top.iter().take(n).cloned().collect())
        }

        fn sensors_report(&mut self) -> Result<String> {
            self.sensors
                .clone()
                .ok_or_else(|| MonitorError::CapabilityUnavailable("sensors".to_string()))
        }
    }

    #[derive(Default)]
    struct CollectSink {
        outputs: Vec<TickOutput>,
        cancel_after: Option<(usize, CancelToken)>,
    }

    #[async_trait]
    impl TickSink for CollectSink {
        async fn deliver(&mut self, output: TickOutput) -> Result<()> {
            self.outputs.push(output);
            if let Some((n, token)) = &self.cancel_after {
                if self.outputs.len() >= *n {
                    token.cancel();
                }
            }
            Ok(())
        }
    }

    struct MemoryAlertSink(Arc<Mutex<Vec<AlertEvent>>>);

    impl AlertSink for MemoryAlertSink {
        fn record(&mut self, alert: &AlertEvent) -> Result<()> {
            self.0.lock().push(alert.clone());
            Ok(())
        }
    }

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            tick_ms: 10,
            history_capacity: 10,
            ..MonitorConfig::default()
        }
    }

    fn process(pid: u32, cpu: f64) -> ProcessUsage {
        ProcessUsage {
            pid,
            name: format!("proc{}", pid),
            cpu_percent: cpu,
            mem_percent: 1.0,
        }
    }

    fn graph_loop(source: FakeSource, config: &MonitorConfig) -> SchedulerLoop<FakeSource> {
        let thresholds = Thresholds::from_config(config).unwrap();
        SchedulerLoop::new(source, MetricGroup::Graph, config, thresholds).unwrap()
    }

    #[test]
    fn test_first_network_sample_is_zero_warmup() {
        let source = FakeSource {
            net: VecDeque::from(vec![(1000, 500), (3048, 1524)]),
            ..FakeSource::default()
        };
        let mut sampler = Sampler::new(source);
        sampler.select_interface("eth0");

        let start = Instant::now();
        let first = sampler.sample_network_at("eth0", start).unwrap();
        assert_eq!(first.rx.value(), 0.0);
        assert_eq!(first.rx.note, Some(SampleNote::Warmup));
        assert_eq!(first.tx.note, Some(SampleNote::Warmup));

        let second = sampler
            .sample_network_at("eth0", start + Duration::from_secs(2))
            .unwrap();
        assert_eq!(second.rx.value(), 1024.0);
        assert_eq!(second.tx.value(), 512.0);
        assert_eq!(second.rx.note, None);
    }

    #[test]
    fn test_counter_wraparound_is_zero_delta() {
        let source = FakeSource {
            net: VecDeque::from(vec![(1000, 1000), (200, 1500)]),
            ..FakeSource::default()
        };
        let mut sampler = Sampler::new(source);
        let start = Instant::now();
        sampler.sample_network_at("eth0", start).unwrap();

        let rates = sampler
            .sample_network_at("eth0", start + Duration::from_secs(1))
            .unwrap();
        assert_eq!(rates.rx.value(), 0.0);
        assert_eq!(
            rates.rx.note,
            Some(SampleNote::CounterWraparound { previous: 1000, current: 200 })
        );
        assert_eq!(rates.tx.value(), 500.0);
    }

    #[test]
    fn test_reselecting_interface_restarts_warmup() {
        let source = FakeSource {
            net: VecDeque::from(vec![(10, 10), (20, 20), (30, 30)]),
            ..FakeSource::default()
        };
        let mut sampler = Sampler::new(source);
        let start = Instant::now();
        sampler.select_interface("eth0");
        sampler.sample_network_at("eth0", start).unwrap();
        sampler
            .sample_network_at("eth0", start + Duration::from_secs(1))
            .unwrap();

        sampler.select_interface("eth0");
        let rates = sampler
            .sample_network_at("eth0", start + Duration::from_secs(2))
            .unwrap();
        assert!(rates.rx.is_warmup());
    }

    #[test]
    fn test_generic_sample_uses_selected_interface() {
        let source = FakeSource {
            net: VecDeque::from(vec![(10, 10)]),
            ..FakeSource::default()
        };
        let mut sampler = Sampler::new(source);
        let err = sampler.sample(MetricKind::NetRxBytesPerSec).unwrap_err();
        assert!(matches!(err, MonitorError::InvalidConfiguration { .. }));

        sampler.select_interface("eth0");
        let sample = sampler.sample(MetricKind::NetTxBytesPerSec).unwrap();
        assert_eq!(sample.metric.kind, MetricKind::NetTxBytesPerSec);
        assert!(sample.is_warmup());
    }

    #[test]
    fn test_cpu_degrades_instead_of_failing() {
        let source = FakeSource {
            cpu: None,
            ..FakeSource::default()
        };
        let mut sampler = Sampler::new(source);
        let sample = sampler.sample_cpu();
        assert_eq!(sample.value(), 0.0);
        assert_eq!(sample.note, Some(SampleNote::Degraded));
    }

    #[test]
    fn test_cpu_busy_from_idle_delta() {
        let mut sampler = Sampler::new(FakeSource::default());
        assert_eq!(sampler.sample_cpu().value(), 50.0);

        sampler.source_mut().cpu = Some(CpuTimes { idle: 80, total: 200 });
        // idle moved 30 of 100 ticks
        assert_eq!(sampler.sample_cpu().value(), 70.0);
    }

    #[test]
    fn test_memory_percent_rounds() {
        let source = FakeSource {
            memory: VecDeque::from(vec![Some(MemoryUsage { used_bytes: 1, total_bytes: 3 })]),
            ..FakeSource::default()
        };
        let mut sampler = Sampler::new(source);
        assert_eq!(sampler.sample_memory().unwrap().value(), 33.0);
    }

    #[test]
    fn test_disk_rate_from_cumulative_counters() {
        let source = FakeSource {
            disk: Some(vec![DiskCounters {
                device: "sda".into(),
                tps: 3.0,
                kb_read: 100,
                kb_written: 100,
            }]),
            ..FakeSource::default()
        };
        let mut sampler = Sampler::new(source);
        let start = Instant::now();

        let first = sampler.sample_disk_at(start).unwrap();
        assert!(first.total.is_warmup());
        assert_eq!(first.devices[0].read_bytes_per_sec, 0.0);

        sampler.source_mut().disk = Some(vec![DiskCounters {
            device: "sda".into(),
            tps: 3.0,
            kb_read: 102,
            kb_written: 104,
        }]);
        let second = sampler
            .sample_disk_at(start + Duration::from_secs(2))
            .unwrap();
        assert_eq!(second.total.value(), 3.0 * 1024.0);
        assert_eq!(second.devices[0].read_bytes_per_sec, 1024.0);
        assert_eq!(second.devices[0].write_bytes_per_sec, 2048.0);
    }

    fn disk(device: &str, kb_read: u64) -> DiskCounters {
        DiskCounters {
            device: device.into(),
            tps: 1.0,
            kb_read,
            kb_written: 0,
        }
    }

    #[test]
    fn test_disk_total_ignores_devices_coming_and_going() {
        let source = FakeSource {
            disk: Some(vec![disk("sda", 100)]),
            ..FakeSource::default()
        };
        let mut sampler = Sampler::new(source);
        let start = Instant::now();
        assert!(sampler.sample_disk_at(start).unwrap().total.is_warmup());

        sampler.source_mut().disk = Some(vec![disk("sda", 100), disk("sdb", 1_000_000)]);
        let appeared = sampler
            .sample_disk_at(start + Duration::from_secs(1))
            .unwrap();
        assert_eq!(appeared.total.value(), 0.0);
        assert_eq!(appeared.total.note, None);
        assert_eq!(appeared.devices[1].read_bytes_per_sec, 0.0);

        sampler.source_mut().disk = Some(vec![disk("sda", 102)]);
        let vanished = sampler
            .sample_disk_at(start + Duration::from_secs(2))
            .unwrap();
        assert_eq!(vanished.total.value(), 2048.0);
        assert_eq!(vanished.total.note, None);
    }

    #[test]
    fn test_graph_tick_alerts_on_strictly_greater() {
        let alerts = Arc::new(Mutex::new(Vec::new()));
        let source = FakeSource {
            top: vec![process(1, 95.0), process(2, 80.0), process(3, 79.0)],
            ..FakeSource::default()
        };
        let config = test_config();
        let mut monitor =
            graph_loop(source, &config).with_alert_sink(Box::new(MemoryAlertSink(alerts.clone())));

        let output = monitor.tick();
        assert_eq!(output.alerts.len(), 1);
        assert_eq!(output.alerts[0].subject.as_deref(), Some("proc1 (PID: 1)"));
        assert_eq!(output.alerts[0].threshold, 80.0);
        assert!(output.text.contains("ALERT"));
        assert!(output.text.contains("Top CPU consumers"));
        assert_eq!(alerts.lock().len(), 1);
    }

    #[test]
    fn test_threshold_change_applies_on_next_tick() {
        let source = FakeSource {
            top: vec![process(1, 70.0)],
            ..FakeSource::default()
        };
        let config = test_config();
        let thresholds = Thresholds::from_config(&config).unwrap();
        let handle = thresholds.get(MetricKind::CpuPercent).unwrap().clone();
        let mut monitor =
            SchedulerLoop::new(source, MetricGroup::Graph, &config, thresholds).unwrap();

        assert!(monitor.tick().alerts.is_empty());
        handle.parse_and_set("60").unwrap();
        assert_eq!(monitor.tick().alerts.len(), 1);

        assert!(handle.parse_and_set("sixty").is_err());
        assert_eq!(monitor.tick().alerts.len(), 1);
    }

    #[test]
    fn test_failure_surfaced_once_per_streak() {
        let usage = |used| Some(MemoryUsage { used_bytes: used, total_bytes: 100 });
        let source = FakeSource {
            memory: VecDeque::from(vec![usage(40), None, None, None, usage(60), None]),
            ..FakeSource::default()
        };
        let config = test_config();
        let mut monitor = graph_loop(source, &config);

        let warnings: Vec<usize> = (0..6).map(|_| monitor.tick().warnings.len()).collect();
        assert_eq!(warnings, vec![0, 1, 0, 0, 0, 1]);

        let history = monitor.history(MetricKind::MemPercent).unwrap().snapshot();
        assert_eq!(history, vec![40.0, 40.0, 40.0, 40.0, 60.0, 60.0]);
    }

    #[test]
    fn test_history_bounded_by_config() {
        let config = MonitorConfig {
            history_capacity: 3,
            ..test_config()
        };
        let mut monitor = graph_loop(FakeSource::default(), &config);
        for _ in 0..10 {
            monitor.tick();
        }
        let ring = monitor.history(MetricKind::CpuPercent).unwrap();
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.capacity(), 3);
    }

    #[test]
    fn test_missing_disk_tool_disables_metric() {
        let source = FakeSource::default();
        let calls = source.disk_calls.clone();
        let config = test_config();
        let thresholds = Thresholds::from_config(&config).unwrap();
        let mut monitor =
            SchedulerLoop::new(source, MetricGroup::Disk, &config, thresholds).unwrap();

        let first = monitor.tick();
        assert_eq!(first.warnings.len(), 1);
        assert!(first.warnings[0].message.contains("iostat"));
        assert!(first.text.contains("no data"));

        let second = monitor.tick();
        assert!(second.warnings.is_empty());
        assert!(second.text.contains("no data"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_network_loop_never_alerts_on_warmup() {
        let source = FakeSource {
            net: VecDeque::from(vec![(0, 0), (1_000_000, 0)]),
            ..FakeSource::default()
        };
        let config = MonitorConfig {
            net_rx_threshold: Some(0.0),
            ..test_config()
        };
        let thresholds = Thresholds::from_config(&config).unwrap();
        let group = MetricGroup::Network {
            interface: "eth0".to_string(),
        };
        let mut monitor = SchedulerLoop::new(source, group, &config, thresholds).unwrap();

        let first = monitor.tick();
        assert!(first.alerts.is_empty());
        assert!(first.text.contains("RX: 0 B/s"));

        std::thread::sleep(Duration::from_millis(5));
        let second = monitor.tick();
        assert_eq!(second.alerts.len(), 1);
        assert_eq!(second.alerts[0].metric, MetricKind::NetRxBytesPerSec);

        // Counters exhausted: interface vanished.
        let third = monitor.tick();
        assert_eq!(third.warnings.len(), 1);
        assert!(third.text.contains("no data"));
        assert_eq!(monitor.history(MetricKind::NetRxBytesPerSec).unwrap().len(), 3);
    }

    #[test]
    fn test_sensors_group() {
        let source = FakeSource {
            sensors: Some("coretemp-isa-0000\nPackage id 0:  +45.0°C\n".to_string()),
            ..FakeSource::default()
        };
        let config = test_config();
        let mut monitor =
            SchedulerLoop::new(source, MetricGroup::Sensors, &config, Thresholds::default())
                .unwrap();
        assert!(monitor.tick().text.contains("+45.0°C"));

        let mut missing = SchedulerLoop::new(
            FakeSource::default(),
            MetricGroup::Sensors,
            &config,
            Thresholds::default(),
        )
        .unwrap();
        assert_eq!(missing.tick().warnings.len(), 1);
        assert!(missing.tick().warnings.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_tick_completes_tick() {
        let cancel = CancelToken::new();
        let source = FakeSource {
            cancel_during_cpu: Some(cancel.clone()),
            ..FakeSource::default()
        };
        let config = test_config();
        let mut monitor = graph_loop(source, &config);
        let mut sink = CollectSink::default();

        tokio::time::timeout(Duration::from_secs(5), monitor.run(&mut sink, &cancel))
            .await
            .expect("loop did not stop")
            .unwrap();

        assert_eq!(sink.outputs.len(), 1);
        let text = &sink.outputs[0].text;
        assert!(text.contains("CPU usage"));
        assert!(text.contains("Memory usage"));
        assert_eq!(monitor.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_no_tick() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let config = test_config();
        let mut monitor = graph_loop(FakeSource::default(), &config);
        assert_eq!(monitor.state(), LoopState::Idle);

        let mut sink = CollectSink::default();
        monitor.run(&mut sink, &cancel).await.unwrap();
        assert!(sink.outputs.is_empty());
        assert_eq!(monitor.state(), LoopState::Stopped);

        let err = monitor.run(&mut sink, &cancel).await.unwrap_err();
        assert!(matches!(err, MonitorError::InvalidConfiguration { .. }));
    }

    #[tokio::test]
    async fn test_run_delivers_sequential_ticks() {
        let cancel = CancelToken::new();
        let config = test_config();
        let mut monitor = graph_loop(FakeSource::default(), &config);
        let mut sink = CollectSink {
            outputs: Vec::new(),
            cancel_after: Some((3, cancel.clone())),
        };

        tokio::time::timeout(Duration::from_secs(5), monitor.run(&mut sink, &cancel))
            .await
            .expect("loop did not stop")
            .unwrap();

        let seqs: Vec<u64> = sink.outputs.iter().map(|o| o.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(monitor.history(MetricKind::CpuPercent).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_closed_channel_stops_loop() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(rx);
        let cancel = CancelToken::new();
        let config = test_config();
        let mut monitor = graph_loop(FakeSource::default(), &config);
        let mut sink = ChannelSink::new(tx);

        let err = monitor.run(&mut sink, &cancel).await.unwrap_err();
        assert!(matches!(err, MonitorError::Io(_)));
        assert_eq!(monitor.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_output() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let cancel = CancelToken::new();
        let config = test_config();
        let monitor = graph_loop(FakeSource::default(), &config);

        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut monitor = monitor;
            let mut sink = ChannelSink::new(tx);
            monitor.run(&mut sink, &loop_cancel).await.map(|_| monitor.state())
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(first.title, "Live CPU / Memory");
        cancel.cancel();

        let state = handle.await.unwrap().unwrap();
        assert_eq!(state, LoopState::Stopped);
    }

    async fn run_one_tick(monitor: &mut SchedulerLoop<FakeSource>) -> TickOutput {
        let cancel = CancelToken::new();
        let mut sink = CollectSink {
            outputs: Vec::new(),
            cancel_after: Some((1, cancel.clone())),
        };
        tokio::time::timeout(Duration::from_secs(5), monitor.run(&mut sink, &cancel))
            .await
            .expect("loop did not stop")
            .unwrap();
        sink.outputs.remove(0)
    }

    #[tokio::test]
    async fn test_retained_counters_skip_warmup_on_rerun() {
        let config = MonitorConfig {
            retain_counters: true,
            ..test_config()
        };
        let source = FakeSource {
            disk: Some(vec![disk("sda", 100)]),
            ..FakeSource::default()
        };
        let mut monitor =
            SchedulerLoop::new(source, MetricGroup::Disk, &config, Thresholds::default()).unwrap();
        run_one_tick(&mut monitor).await;

        let mut sampler = monitor.into_sampler();
        sampler.source_mut().disk = Some(vec![disk("sda", 101)]);
        assert!(!sampler.sample_disk().unwrap().total.is_warmup());
    }

    #[tokio::test]
    async fn test_counters_dropped_on_stop_by_default() {
        let config = test_config();
        let source = FakeSource {
            disk: Some(vec![disk("sda", 100)]),
            ..FakeSource::default()
        };
        let mut monitor =
            SchedulerLoop::new(source, MetricGroup::Disk, &config, Thresholds::default()).unwrap();
        run_one_tick(&mut monitor).await;

        let mut sampler = monitor.into_sampler();
        assert!(sampler.sample_disk().unwrap().total.is_warmup());
    }

    #[tokio::test]
    async fn test_handed_back_sampler_keeps_interface_counters() {
        let config = MonitorConfig {
            retain_counters: true,
            ..test_config()
        };
        let group = MetricGroup::Network {
            interface: "eth0".to_string(),
        };
        let source = FakeSource {
            net: VecDeque::from(vec![(1000, 0), (1000 + 4096, 0)]),
            ..FakeSource::default()
        };
        let mut first =
            SchedulerLoop::new(source, group.clone(), &config, Thresholds::default()).unwrap();
        run_one_tick(&mut first).await;

        let mut rerun =
            SchedulerLoop::with_sampler(first.into_sampler(), group, &config, Thresholds::default())
                .unwrap();
        rerun.tick();
        let rx = rerun.history(MetricKind::NetRxBytesPerSec).unwrap().snapshot();
        assert_eq!(rx.len(), 1);
        assert!(rx[0] > 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_on_multi_thread_runtime() {
        let cancel = CancelToken::new();
        let config = test_config();
        let source = FakeSource {
            disk: Some(vec![disk("sda", 100)]),
            ..FakeSource::default()
        };
        let mut monitor =
            SchedulerLoop::new(source, MetricGroup::Disk, &config, Thresholds::default()).unwrap();
        let mut sink = CollectSink {
            outputs: Vec::new(),
            cancel_after: Some((2, cancel.clone())),
        };

        tokio::time::timeout(Duration::from_secs(5), monitor.run(&mut sink, &cancel))
            .await
            .expect("loop did not stop")
            .unwrap();

        let seqs: Vec<u64> = sink.outputs.iter().map(|o| o.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(sink.outputs[0].text.contains("Disk I/O"));
    }
}
