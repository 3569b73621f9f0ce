//! file-exporter-core: directory size watching for the file-exporter daemon.
//!
//! Provides:
//! - `walker`: recursive directory sizer over a `FileSystem` abstraction (real or mock)
//! - `source`: filesystem change notifications feeding a bounded event queue
//! - `metrics`: published gauges and the `MetricSink` seam
//! - `update`: the change-triggered recomputation loop
//! - `model`: shared data types

pub mod metrics;
pub mod model;
pub mod source;
pub mod update;
pub mod walker;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
