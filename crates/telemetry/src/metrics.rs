//! Counter/gauge/histogram sink appending to `metrics.jsonl`.

use crate::clock::iso8601_millis;
use crate::stream::LogStream;
use serde::Serialize;
use std::path::Path;
use std::time::SystemTime;
use tracing::error;

#[derive(Serialize)]
struct MetricRecord<'a> {
    ts: String,
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    thread: String,
}

/// Append-only metrics sink. Counters carry a `delta`, gauges and histogram
/// observations a `value`; every record is stamped with the writing thread.
pub struct MetricsSink {
    stream: Option<LogStream>,
}

impl MetricsSink {
    /// Open a sink writing to `path` (conventionally `metrics.jsonl`).
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<MetricsSink> {
        Ok(MetricsSink {
            stream: Some(LogStream::open(path)?),
        })
    }

    /// A sink that records nothing, for tests and metric-free runs.
    pub fn disabled() -> MetricsSink {
        MetricsSink { stream: None }
    }

    /// Increment a counter by one.
    pub fn counter(&self, name: &str) {
        self.inc_counter(name, 1.0);
    }

    /// Increment a counter by `delta`.
    pub fn inc_counter(&self, name: &str, delta: f64) {
        self.write("counter", name, Some(delta), None);
    }

    /// Set a gauge to `value`.
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.write("gauge", name, None, Some(value));
    }

    /// Record one histogram observation.
    pub fn observe(&self, name: &str, value: f64) {
        self.write("histogram", name, None, Some(value));
    }

    pub fn flush(&self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.flush() {
                error!(error = %e, "failed to flush metrics sink");
            }
        }
    }

    fn write(&self, kind: &'static str, name: &str, delta: Option<f64>, value: Option<f64>) {
        let Some(stream) = &self.stream else {
            return;
        };
        let thread = std::thread::current()
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{:?}", std::thread::current().id()));
        let record = MetricRecord {
            ts: iso8601_millis(SystemTime::now()),
            kind,
            name,
            delta,
            value,
            thread,
        };
        match serde_json::to_string(&record) {
            Ok(line) => {
                if let Err(e) = stream.write_line(&line) {
                    error!(error = %e, metric = name, "failed to write metric");
                }
            }
            Err(e) => error!(error = %e, metric = name, "failed to serialize metric"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_SEQ: AtomicU64 = AtomicU64::new(0);

    fn temp_path() -> std::path::PathBuf {
        let n = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("chainmesh-metrics-{}-{}.jsonl", std::process::id(), n))
    }

    #[test]
    fn test_record_kinds() {
        let path = temp_path();
        let sink = MetricsSink::open(&path).unwrap();
        sink.counter("blocks_appended");
        sink.inc_counter("tx_submitted", 3.0);
        sink.set_gauge("mempool_size", 12.0);
        sink.observe("relay_latency_ms", 4.5);
        sink.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0]["type"], "counter");
        assert_eq!(records[0]["delta"], 1.0);
        assert_eq!(records[1]["delta"], 3.0);
        assert_eq!(records[2]["type"], "gauge");
        assert_eq!(records[2]["value"], 12.0);
        assert_eq!(records[3]["type"], "histogram");
        assert!(records[3].get("delta").is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_disabled_sink_is_silent() {
        let sink = MetricsSink::disabled();
        sink.counter("nothing");
        sink.flush();
    }
}
