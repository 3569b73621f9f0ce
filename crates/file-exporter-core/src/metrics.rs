//! Published metric state: the directory size gauge and the per-kind
//! last-update gauge.
//!
//! The update loop only sees the [`MetricSink`] trait, so tests can swap in a
//! recording sink. [`DirectoryMetrics`] is the production sink backed by a
//! private `prometheus::Registry`; its gauges are internally synchronised, so
//! scrapes and updates need no extra locking.

use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::model::{OperationKind, unix_seconds};

const NAMESPACE: &str = "file_exporter";
const SUBSYSTEM: &str = "directory";
const STATUS_LABEL: &str = "status";

/// Write side of the published metrics.
pub trait MetricSink: Send + Sync {
    /// Publishes the result of the latest completed scan.
    fn set_total_bytes(&self, bytes: u64);

    /// Records when the latest event of `kind` was observed.
    fn set_last_update(&self, kind: OperationKind, at: DateTime<Utc>);
}

/// Prometheus-backed metric state.
#[derive(Clone)]
pub struct DirectoryMetrics {
    registry: Registry,
    size: Gauge,
    last_update: GaugeVec,
}

impl DirectoryMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let size = Gauge::with_opts(
            Opts::new("get_size", "Size of directory in bytes")
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM),
        )?;
        let last_update = GaugeVec::new(
            Opts::new(
                "get_last_update",
                "Get last update directory time in UNIX seconds",
            )
            .namespace(NAMESPACE)
            .subsystem(SUBSYSTEM),
            &[STATUS_LABEL],
        )?;

        registry.register(Box::new(size.clone()))?;
        registry.register(Box::new(last_update.clone()))?;

        Ok(Self {
            registry,
            size,
            last_update,
        })
    }

    /// Current value of the size gauge.
    pub fn total_bytes(&self) -> f64 {
        self.size.get()
    }

    /// Current last-update value for `kind`, or `None` if no such event was processed.
    pub fn last_update(&self, kind: OperationKind) -> Option<f64> {
        // Look the series up without creating it.
        self.last_update
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|l| l.get_name() == STATUS_LABEL && l.get_value() == kind.as_str())
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    /// Renders all series in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Content type of [`DirectoryMetrics::encode`] output.
    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

impl MetricSink for DirectoryMetrics {
    fn set_total_bytes(&self, bytes: u64) {
        self.size.set(bytes as f64);
    }

    fn set_last_update(&self, kind: OperationKind, at: DateTime<Utc>) {
        self.last_update
            .with_label_values(&[kind.as_str()])
            .set(unix_seconds(at));
    }
}
