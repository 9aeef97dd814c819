//! Telemetry core for the kubeboard cluster dashboard.
//!
//! Three pieces: quantity decoding for Kubernetes resource strings, bounded
//! per-entity metric history fed by pollers, and append-only per-tab log
//! buffers with a follow/pause contract. The presentation layer injects a
//! `kube::Client` (or the synthetic source), starts monitors and tabs, and
//! pulls snapshots; it never mutates the buffers.

mod log;

pub mod config;
pub mod errors;
pub mod logs;
pub mod metrics;
pub mod quantity;
pub mod structs;

pub use config::TelemetryConfig;
pub use errors::{DecodeError, FetchError};
pub use log::setup_logger;
pub use logs::buffer::{FollowState, LineFormat, LogBuffer, LogEntry};
pub use logs::tail::{ClusterLogSource, LogSnapshot, LogSource, LogTailEngine, TabHandle};
pub use metrics::history::{HistorySeries, MetricPoint, MetricSample, ResourceKind};
pub use metrics::monitor::MetricsEngine;
pub use metrics::source::{ClusterSource, RawSample, SampleSource, SyntheticSource};
pub use structs::{ContainerRef, EntityRef, PodRef, SourceHealth};
