//! Per-entity metric history: bounded, time-ordered, capacity-aware.

use std::collections::VecDeque;

use crate::errors::DecodeError;
use crate::metrics::source::RawSample;
use crate::quantity::{decode_cpu, decode_memory};

/// Which resource a chart is projecting. Switching kinds is a read-side
/// concern only; the series underneath is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Cpu,
    Memory,
    Disk,
}

/// One decoded usage sample. Percentages are derived at read time, never
/// stored.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Wall-clock milliseconds.
    pub timestamp_ms: i64,
    /// Cores.
    pub cpu_used: f64,
    /// Cores; `None` when the backend did not report a capacity.
    pub cpu_capacity: Option<f64>,
    /// Bytes.
    pub mem_used: u64,
    pub mem_capacity: Option<u64>,
    /// Bytes; the metrics API has no disk usage for some entities.
    pub disk_used: Option<u64>,
    pub disk_capacity: Option<u64>,
    /// Generated placeholder data, never real cluster telemetry.
    pub is_synthetic: bool,
}

impl MetricSample {
    /// Decode a raw sample's quantity texts. Any malformed field fails the
    /// whole sample; missing capacities and disk fields stay unknown.
    pub fn from_raw(raw: &RawSample, timestamp_ms: i64) -> Result<Self, DecodeError> {
        let cpu_used = decode_cpu(raw.cpu_used.as_deref().unwrap_or(""))?;
        let mem_used = decode_memory(raw.mem_used.as_deref().unwrap_or(""))?;

        let cpu_capacity = raw.cpu_capacity.as_deref().map(decode_cpu).transpose()?;
        let mem_capacity = raw.mem_capacity.as_deref().map(decode_memory).transpose()?;
        let disk_used = raw.disk_used.as_deref().map(decode_memory).transpose()?;
        let disk_capacity = raw.disk_capacity.as_deref().map(decode_memory).transpose()?;

        Ok(Self {
            timestamp_ms,
            cpu_used,
            cpu_capacity,
            mem_used,
            mem_capacity,
            disk_used,
            disk_capacity,
            is_synthetic: raw.synthetic,
        })
    }
}

/// One chart point: absolute value plus the capacity-relative percentage,
/// `None` when the capacity is unknown. An unknown denominator never reads
/// as 0%.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub timestamp_ms: i64,
    pub value: f64,
    pub percent: Option<f64>,
}

fn pct(used: f64, capacity: Option<f64>) -> Option<f64> {
    match capacity {
        Some(cap) if cap > 0.0 => Some(used / cap * 100.0),
        _ => None,
    }
}

/// Time-window bounded series of samples for one monitored entity.
///
/// Samples are strictly ordered by timestamp; every append evicts samples
/// older than the retention window measured from the newest timestamp.
#[derive(Debug)]
pub struct HistorySeries {
    samples: VecDeque<MetricSample>,
    window_ms: i64,
}

impl HistorySeries {
    pub fn new(window_ms: i64) -> Self {
        Self {
            samples: VecDeque::new(),
            window_ms,
        }
    }

    /// Appends a sample and evicts everything older than the window.
    /// Out-of-order samples are dropped; append order equals tick order and
    /// a stale arrival must not break the ordering invariant.
    pub fn push(&mut self, sample: MetricSample) {
        if let Some(last) = self.samples.back() {
            if sample.timestamp_ms <= last.timestamp_ms {
                return;
            }
        }
        let cutoff = sample.timestamp_ms - self.window_ms;
        self.samples.push_back(sample);
        while let Some(front) = self.samples.front() {
            if front.timestamp_ms < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    /// Read-side projection for one resource kind. Samples with no usable
    /// value for that kind (disk on entities that never report it) yield no
    /// point rather than a fabricated zero.
    pub fn project(&self, kind: ResourceKind) -> Vec<MetricPoint> {
        self.samples
            .iter()
            .filter_map(|s| {
                let (value, percent) = match kind {
                    ResourceKind::Cpu => (s.cpu_used, pct(s.cpu_used, s.cpu_capacity)),
                    ResourceKind::Memory => {
                        let used = s.mem_used as f64;
                        (used, pct(used, s.mem_capacity.map(|c| c as f64)))
                    }
                    ResourceKind::Disk => {
                        let used = s.disk_used? as f64;
                        (used, pct(used, s.disk_capacity.map(|c| c as f64)))
                    }
                };
                Some(MetricPoint {
                    timestamp_ms: s.timestamp_ms,
                    value,
                    percent,
                })
            })
            .collect()
    }
}
