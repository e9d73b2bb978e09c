//! Metrics counters and the structured run report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Severity of an engine log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Err,
}

/// Destination for the metrics and log lines a transaction produces.
///
/// The sink doubles as the log destination while evaluation runs: the engine
/// brackets evaluation with `open`/`close` and forwards every resource log
/// line in between.
pub trait ReportSink {
    /// Record a named metric group (`resources`, `time`, `changes`).
    fn new_metric(&mut self, name: &str, values: BTreeMap<String, f64>);

    /// Stamp the report with the wall-clock completion time.
    fn set_time(&mut self, time: DateTime<Utc>);

    /// Capture a log line while the sink is open.
    fn log(&mut self, level: LogLevel, source: &str, message: &str);

    fn open(&mut self) {}

    fn close(&mut self) {}
}

/// A captured log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

/// Default in-memory report.
#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub time: Option<DateTime<Utc>>,
    pub metrics: BTreeMap<String, BTreeMap<String, f64>>,
    pub logs: Vec<LogLine>,
    #[serde(skip)]
    open: bool,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of one metric, e.g. `metric("resources", "applied")`.
    pub fn metric(&self, group: &str, name: &str) -> Option<f64> {
        self.metrics.get(group)?.get(name).copied()
    }
}

impl ReportSink for Report {
    fn new_metric(&mut self, name: &str, values: BTreeMap<String, f64>) {
        self.metrics.insert(name.to_string(), values);
    }

    fn set_time(&mut self, time: DateTime<Utc>) {
        self.time = Some(time);
    }

    fn log(&mut self, level: LogLevel, source: &str, message: &str) {
        if !self.open {
            return;
        }
        self.logs.push(LogLine {
            level,
            source: source.to_string(),
            message: message.to_string(),
        });
    }

    fn open(&mut self) {
        self.open = true;
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Forward a resource-scoped line to tracing and to the sink.
pub(crate) fn log_to(sink: &mut dyn ReportSink, level: LogLevel, source: &str, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!("{}: {}", source, message),
        LogLevel::Info | LogLevel::Notice => tracing::info!("{}: {}", source, message),
        LogLevel::Warning => tracing::warn!("{}: {}", source, message),
        LogLevel::Err => tracing::error!("{}: {}", source, message),
    }
    sink.log(level, source, message);
}

/// Per-resource outcome counters. `failed` is derived from the failure
/// table at report time rather than counted here.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResourceMetrics {
    pub total: u64,
    pub out_of_sync: u64,
    pub applied: u64,
    pub skipped: u64,
    pub restarted: u64,
    pub failed_restarts: u64,
    pub scheduled: u64,
}

impl ResourceMetrics {
    /// The `resources` metric map, with the computed `failed` count.
    pub fn as_values(&self, failed: u64) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();
        values.insert("total".to_string(), self.total as f64);
        values.insert("out_of_sync".to_string(), self.out_of_sync as f64);
        values.insert("applied".to_string(), self.applied as f64);
        values.insert("skipped".to_string(), self.skipped as f64);
        values.insert("restarted".to_string(), self.restarted as f64);
        values.insert("failed_restarts".to_string(), self.failed_restarts as f64);
        values.insert("scheduled".to_string(), self.scheduled as f64);
        values.insert("failed".to_string(), failed as f64);
        values
    }
}
