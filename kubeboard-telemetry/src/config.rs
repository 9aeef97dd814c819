use std::time::Duration;

use serde::Deserialize;

/// Recognized telemetry knobs. The presentation layer deserializes whatever
/// the user configured and hands the result to the engines; unset fields
/// fall back to the defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Metric poll cadence per monitored entity.
    pub poll_interval_secs: u64,
    /// How far back a history series retains samples.
    pub retention_window_mins: u64,
    /// Log tail poll cadence per open tab.
    pub log_poll_interval_secs: u64,
    /// Maximum retained log lines per tab; oldest are trimmed first.
    pub log_line_cap: usize,
    /// Deadline for a single fetch attempt (samples and log chunks alike).
    pub fetch_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            retention_window_mins: 30,
            log_poll_interval_secs: 2,
            log_line_cap: 5000,
            fetch_timeout_secs: 10,
        }
    }
}

impl TelemetryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retention_window_ms(&self) -> i64 {
        self.retention_window_mins as i64 * 60 * 1000
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_secs(self.log_poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = TelemetryConfig::default();
        assert_eq!(cfg.poll_interval_secs, 30);
        assert_eq!(cfg.log_poll_interval_secs, 2);
        assert_eq!(cfg.log_line_cap, 5000);
        assert_eq!(cfg.retention_window_ms(), 30 * 60 * 1000);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let cfg: TelemetryConfig =
            k8s_openapi::serde_json::from_str(r#"{"log_line_cap": 200}"#).unwrap();
        assert_eq!(cfg.log_line_cap, 200);
        assert_eq!(cfg.poll_interval_secs, 30);
    }
}
