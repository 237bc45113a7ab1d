// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire format of a reported period.
//!
//! A [`Payload`] is a plain serializable snapshot of a [`ReportingPeriod`]
//! plus the [`Metadata`] identifying the sending process. It is encoded as JSON
//! and compressed with zstd before it reaches the transport. Every collection
//! is sorted so two payloads built from the same period are byte-identical.

use crate::errors::PayloadError;
use crate::histogram::Histogram;
use crate::layer::Layer;
use crate::metric::{MetricKey, MetricStats};
use crate::reporting_period::{epoch_secs, ReportingPeriod};
use crate::trace::{JobStats, Trace};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use ustr::Ustr;

pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub unique_id: String,
    pub payload_version: u32,
    pub agent_version: String,
    /// Seconds since the Unix epoch at which the payload was built.
    pub agent_time: u64,
    pub agent_pid: u32,
    pub platform: String,
    pub app_name: Option<String>,
    pub hostname: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TimeRangePayload {
    pub start: u64,
    pub end: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricPayload {
    #[serde(rename = "type")]
    pub metric_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub sum_of_squares: f64,
}

impl MetricPayload {
    fn new(key: &MetricKey, stats: &MetricStats) -> Self {
        MetricPayload {
            metric_type: key.metric_type.to_string(),
            name: key.name.to_string(),
            scope: key.scope.map(|scope| scope.to_string()),
            count: stats.count,
            sum: stats.sum,
            min: stats.min,
            max: stats.max,
            sum_of_squares: stats.sum_of_squares,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistogramPayload {
    pub name: String,
    pub count: u64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl HistogramPayload {
    fn new(name: Ustr, histogram: &Histogram) -> Self {
        HistogramPayload {
            name: name.to_string(),
            count: histogram.count(),
            mean: histogram.mean(),
            p50: histogram.quantile(0.50),
            p95: histogram.quantile(0.95),
            p99: histogram.quantile(0.99),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LayerPayload {
    #[serde(rename = "type")]
    pub layer_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub started_at: u64,
    pub duration_ms: f64,
    pub children: Vec<LayerPayload>,
}

impl From<&Layer> for LayerPayload {
    fn from(layer: &Layer) -> Self {
        LayerPayload {
            layer_type: layer.layer_type.to_string(),
            name: layer.name.to_string(),
            desc: layer.desc.clone(),
            started_at: epoch_millis(layer.started_at),
            duration_ms: layer.total_time().as_millis(),
            children: layer.children.iter().map(LayerPayload::from).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TracePayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub total_duration_ms: f64,
    /// Seconds since the Unix epoch.
    pub recorded_at: u64,
    pub context: BTreeMap<String, String>,
    pub root: LayerPayload,
}

impl From<&Trace> for TracePayload {
    fn from(trace: &Trace) -> Self {
        TracePayload {
            kind: trace.kind.to_string(),
            total_duration_ms: trace.total_duration.as_millis(),
            recorded_at: epoch_secs(trace.recorded_at),
            context: trace.context.clone(),
            root: LayerPayload::from(&trace.root),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobPayload {
    pub queue: String,
    pub name: String,
    pub count: u64,
    pub failures: u64,
    pub total_time: MetricStatsPayload,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MetricStatsPayload {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub sum_of_squares: f64,
}

impl From<&MetricStats> for MetricStatsPayload {
    fn from(stats: &MetricStats) -> Self {
        MetricStatsPayload {
            count: stats.count,
            sum: stats.sum,
            min: stats.min,
            max: stats.max,
            sum_of_squares: stats.sum_of_squares,
        }
    }
}

impl JobPayload {
    fn new(queue: Ustr, name: Ustr, stats: &JobStats) -> Self {
        JobPayload {
            queue: queue.to_string(),
            name: name.to_string(),
            count: stats.count,
            failures: stats.failures,
            total_time: MetricStatsPayload::from(&stats.total_time),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Payload {
    pub metadata: Metadata,
    pub time_range: TimeRangePayload,
    pub metrics: Vec<MetricPayload>,
    pub histograms: Vec<HistogramPayload>,
    pub web_traces: Vec<TracePayload>,
    pub job_traces: Vec<TracePayload>,
    pub jobs: Vec<JobPayload>,
}

impl Payload {
    #[must_use]
    pub fn new(metadata: Metadata, period: &ReportingPeriod) -> Self {
        let range = period.time_range();

        let mut metrics: Vec<MetricPayload> = period
            .metrics()
            .iter()
            .map(|(key, stats)| MetricPayload::new(key, stats))
            .collect();
        metrics.sort_by(|a, b| {
            (&a.metric_type, &a.name, &a.scope).cmp(&(&b.metric_type, &b.name, &b.scope))
        });

        let mut histograms: Vec<HistogramPayload> = period
            .histograms()
            .map(|(name, histogram)| HistogramPayload::new(*name, histogram))
            .collect();
        histograms.sort_by(|a, b| a.name.cmp(&b.name));

        let mut jobs: Vec<JobPayload> = period
            .jobs()
            .map(|((queue, name), stats)| JobPayload::new(*queue, *name, stats))
            .collect();
        jobs.sort_by(|a, b| (&a.queue, &a.name).cmp(&(&b.queue, &b.name)));

        Payload {
            metadata,
            time_range: TimeRangePayload {
                start: range.start(),
                end: range.end(),
            },
            metrics,
            histograms,
            web_traces: period
                .web_traces()
                .sorted()
                .into_iter()
                .map(TracePayload::from)
                .collect(),
            job_traces: period
                .job_traces()
                .sorted()
                .into_iter()
                .map(TracePayload::from)
                .collect(),
            jobs,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// JSON encoding compressed with zstd at `level`.
    pub fn compress(&self, level: i32) -> Result<Vec<u8>, PayloadError> {
        let json = self.to_json()?;
        Ok(zstd::encode_all(json.as_slice(), level)?)
    }
}

fn epoch_millis(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::Duration;
    use crate::histogram::HistogramSample;
    use crate::metric::{Metric, Scope};
    use crate::reporting_period::PeriodLimits;
    use crate::trace::{JobRecord, TraceKind};
    use serde_json::{json, Value};

    fn metadata() -> Metadata {
        Metadata {
            unique_id: "00000000-0000-0000-0000-000000000000".to_string(),
            payload_version: PAYLOAD_VERSION,
            agent_version: "0.1.0".to_string(),
            agent_time: 1_700_000_000,
            agent_pid: 42,
            platform: "linux".to_string(),
            app_name: Some("shop".to_string()),
            hostname: "web-1".to_string(),
        }
    }

    fn period() -> ReportingPeriod {
        let now = UNIX_EPOCH + std::time::Duration::from_secs(1_699_999_980);
        let mut period = ReportingPeriod::containing(now, PeriodLimits::default());
        let scope = Scope::new("Controller", "users#index");
        period.record_metric(&Metric::scoped(
            "Ecto",
            "select#users",
            Duration::from_millis(2.0),
            scope,
        ));
        period.record_metric(&Metric::new(
            "Controller",
            "users#index",
            Duration::from_millis(5.0),
        ));
        let mut root = Layer::closed("Controller", "users#index", Duration::from_millis(5.0));
        root.children.push(
            Layer::closed("Ecto", "select#users", Duration::from_millis(2.0))
                .with_desc("SELECT * FROM users"),
        );
        period.record_web_trace(Trace::new(TraceKind::Web, root, BTreeMap::new()));
        period.record_job_record(&JobRecord::new(
            "mailers",
            "SendEmail",
            Duration::from_millis(8.0),
            false,
        ));
        period.record_histogram_sample(&HistogramSample::new("Controller/users#index", 5_000.0));
        period
    }

    #[test]
    fn test_payload_shape() {
        let payload = Payload::new(metadata(), &period());
        let json = payload.to_json().expect("Failed to serialize payload");
        let value: Value = serde_json::from_slice(&json).expect("Failed to parse payload");

        assert_eq!(value["metadata"]["hostname"], json!("web-1"));
        assert_eq!(
            value["time_range"],
            json!({"start": 1_699_999_980u64, "end": 1_700_000_040u64})
        );
        assert_eq!(value["metrics"][0]["type"], json!("Controller"));
        assert!(value["metrics"][0].get("scope").is_none());
        assert_eq!(value["metrics"][1]["type"], json!("Ecto"));
        assert_eq!(
            value["metrics"][1]["scope"],
            json!("Controller/users#index")
        );
        assert_eq!(value["metrics"][1]["sum"], json!(2_000.0));

        let root = &value["web_traces"][0]["root"];
        assert_eq!(value["web_traces"][0]["type"], json!("web"));
        assert_eq!(root["duration_ms"], json!(5.0));
        assert_eq!(root["children"][0]["desc"], json!("SELECT * FROM users"));

        assert_eq!(value["jobs"][0]["queue"], json!("mailers"));
        assert_eq!(value["jobs"][0]["total_time"]["sum"], json!(8_000.0));
        let histogram = &value["histograms"][0];
        assert_eq!(histogram["count"], json!(1));
        let p50 = histogram["p50"].as_f64().expect("p50 is a number");
        assert!((p50 - 5_000.0).abs() < 100.0, "p50 was {p50}");
        assert_eq!(value["job_traces"], json!([]));
    }

    #[test]
    fn test_payload_is_deterministic() {
        let period = period();
        let first = Payload::new(metadata(), &period)
            .to_json()
            .expect("Failed to serialize first payload");
        let second = Payload::new(metadata(), &period)
            .to_json()
            .expect("Failed to serialize second payload");
        assert_eq!(first, second);
    }

    #[test]
    fn test_compress_decodes_to_json() {
        let payload = Payload::new(metadata(), &period());
        let compressed = payload.compress(3).expect("Failed to compress payload");
        let decoded = zstd::decode_all(compressed.as_slice()).expect("Failed to decompress payload");
        assert_eq!(
            decoded,
            payload.to_json().expect("Failed to serialize payload")
        );
    }
}
