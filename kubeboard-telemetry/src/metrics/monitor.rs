//! Per-entity metric pollers and the presentation-facing read API.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use chrono::Utc;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::mark_metrics_dirty;
use crate::config::TelemetryConfig;
use crate::metrics::history::{HistorySeries, MetricPoint, MetricSample, ResourceKind};
use crate::metrics::source::SampleSource;
use crate::structs::{EntityRef, SourceHealth};

/// One running collector: its task, its series, and its soft health flag.
struct Monitor {
    series: Arc<Mutex<HistorySeries>>,
    available: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Monitor {
    fn shutdown(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Owns one bounded history series per monitored entity, each fed by an
/// independent poller. Reads are snapshots; a slow backend call for one
/// entity never stalls another.
pub struct MetricsEngine {
    source: Arc<dyn SampleSource>,
    config: TelemetryConfig,
    monitors: Mutex<HashMap<EntityRef, Monitor>>,
}

impl MetricsEngine {
    pub fn new(source: Arc<dyn SampleSource>, config: TelemetryConfig) -> Self {
        Self {
            source,
            config,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Starts polling an entity. Must be called within a tokio runtime.
    ///
    /// Idempotent: an entity already being monitored keeps its poller and
    /// its history, so reselecting in the UI never flickers a series away.
    #[tracing::instrument(skip(self))]
    pub fn start_monitoring(&self, entity: EntityRef) {
        let mut monitors = self.monitors.lock().unwrap();
        if monitors.contains_key(&entity) {
            return;
        }

        let series = Arc::new(Mutex::new(HistorySeries::new(
            self.config.retention_window_ms(),
        )));
        let available = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let source = self.source.clone();
        let fetch_timeout = self.config.fetch_timeout();
        let timeout_secs = self.config.fetch_timeout_secs;
        let poll_interval = self.config.poll_interval();
        let task_series = series.clone();
        let task_available = available.clone();
        let task_entity = entity.clone();

        let handle = tokio::spawn(async move {
            let mut tick = time::interval(poll_interval);
            // A tick that fires while the previous fetch is still in flight
            // is skipped, not queued: one outstanding request per entity.
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tick.tick() => {
                        let fetch = time::timeout(fetch_timeout, source.fetch_sample(&task_entity));
                        let raw = match fetch.await {
                            Ok(Ok(raw)) => raw,
                            Ok(Err(e)) => {
                                warn!(entity = %task_entity, error = %e, "failed to fetch sample");
                                task_available.store(false, Ordering::Release);
                                continue;
                            }
                            Err(_) => {
                                let e = crate::errors::FetchError::Timeout(timeout_secs);
                                warn!(entity = %task_entity, error = %e, "failed to fetch sample");
                                task_available.store(false, Ordering::Release);
                                continue;
                            }
                        };

                        let sample = match MetricSample::from_raw(&raw, Utc::now().timestamp_millis()) {
                            Ok(sample) => sample,
                            Err(e) => {
                                // A bad quantity discards the tick; never append zeros.
                                warn!(entity = %task_entity, error = %e, "discarding undecodable sample");
                                task_available.store(false, Ordering::Release);
                                continue;
                            }
                        };

                        match task_series.lock() {
                            Ok(mut guard) => guard.push(sample),
                            Err(poisoned) => {
                                warn!("poisoned history lock, recovering");
                                poisoned.into_inner().push(sample);
                            }
                        }
                        task_available.store(true, Ordering::Release);
                        mark_metrics_dirty();
                    }
                }
            }
        });

        monitors.insert(
            entity,
            Monitor {
                series,
                available,
                handle,
                cancel,
            },
        );
    }

    /// Stops polling and destroys the entity's series. Any in-flight fetch
    /// is cancelled, not awaited; a stray result cannot revive the series.
    #[tracing::instrument(skip(self))]
    pub fn stop_monitoring(&self, entity: &EntityRef) {
        let removed = self.monitors.lock().unwrap().remove(entity);
        if let Some(monitor) = removed {
            monitor.shutdown();
        }
    }

    pub fn is_monitoring(&self, entity: &EntityRef) -> bool {
        self.monitors.lock().unwrap().contains_key(entity)
    }

    pub fn monitored_entities(&self) -> Vec<EntityRef> {
        self.monitors.lock().unwrap().keys().cloned().collect()
    }

    /// Point-in-time chart projection for one resource kind. Switching the
    /// kind is purely read-side: same series, no poller restart.
    pub fn snapshot(&self, entity: &EntityRef, kind: ResourceKind) -> Option<Vec<MetricPoint>> {
        let series = {
            let monitors = self.monitors.lock().unwrap();
            monitors.get(entity)?.series.clone()
        };
        let points = match series.lock() {
            Ok(guard) => guard.project(kind),
            Err(poisoned) => poisoned.into_inner().project(kind),
        };
        Some(points)
    }

    /// The newest decoded sample, for gauges and detail panels.
    pub fn latest_sample(&self, entity: &EntityRef) -> Option<MetricSample> {
        let series = {
            let monitors = self.monitors.lock().unwrap();
            monitors.get(entity)?.series.clone()
        };
        let latest = match series.lock() {
            Ok(guard) => guard.latest().cloned(),
            Err(poisoned) => poisoned.into_inner().latest().cloned(),
        };
        latest
    }

    /// Soft availability: `Unavailable` after a failed tick, back to `Live`
    /// on the next successful one. Never a terminal state.
    pub fn source_health(&self, entity: &EntityRef) -> Option<SourceHealth> {
        let monitors = self.monitors.lock().unwrap();
        let monitor = monitors.get(entity)?;
        Some(if monitor.available.load(Ordering::Acquire) {
            SourceHealth::Live
        } else {
            SourceHealth::Unavailable
        })
    }

    /// Stops every poller. Used on context switch or clean shutdown.
    pub fn shutdown(&self) {
        let drained: Vec<Monitor> = {
            let mut monitors = self.monitors.lock().unwrap();
            monitors.drain().map(|(_, m)| m).collect()
        };
        for monitor in drained {
            monitor.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use crate::metrics::source::{RawSample, SyntheticSource};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Fails the first `failures` fetches, then succeeds forever.
    struct FlakySource {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakySource {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SampleSource for FlakySource {
        async fn fetch_sample(&self, _entity: &EntityRef) -> Result<RawSample, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(FetchError::Unavailable("metrics-server down".into()));
            }
            Ok(RawSample {
                cpu_used: Some("500m".into()),
                cpu_capacity: Some("2".into()),
                mem_used: Some("256Mi".into()),
                mem_capacity: Some("1Gi".into()),
                ..RawSample::default()
            })
        }
    }

    async fn run_ticks(n: u64, interval_secs: u64) {
        // Paused clock: sleeping drives the pollers' interval timers.
        time::sleep(Duration::from_secs(n * interval_secs + 1)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    fn test_config() -> TelemetryConfig {
        TelemetryConfig {
            poll_interval_secs: 30,
            ..TelemetryConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ticks_leave_gaps_not_zeros() {
        let engine = MetricsEngine::new(Arc::new(FlakySource::new(3)), test_config());
        let entity = EntityRef::node("worker-1");
        engine.start_monitoring(entity.clone());

        // Ticks at 0s/30s/60s fail, 90s succeeds.
        run_ticks(3, 30).await;
        let points = engine.snapshot(&entity, ResourceKind::Cpu).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].percent, Some(25.0));

        // Monitoring survived the outage.
        assert!(engine.is_monitoring(&entity));
        assert_eq!(engine.source_health(&entity), Some(SourceHealth::Live));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_degrades_and_recovers() {
        let engine = MetricsEngine::new(Arc::new(FlakySource::new(1)), test_config());
        let entity = EntityRef::node("worker-1");
        engine.start_monitoring(entity.clone());

        run_ticks(0, 30).await;
        assert_eq!(
            engine.source_health(&entity),
            Some(SourceHealth::Unavailable)
        );
        assert!(engine.snapshot(&entity, ResourceKind::Cpu).unwrap().is_empty());

        run_ticks(1, 30).await;
        assert_eq!(engine.source_health(&entity), Some(SourceHealth::Live));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_monitoring_destroys_series() {
        let engine = MetricsEngine::new(Arc::new(SyntheticSource::new()), test_config());
        let entity = EntityRef::node("worker-1");
        engine.start_monitoring(entity.clone());

        run_ticks(0, 30).await;
        assert_eq!(engine.snapshot(&entity, ResourceKind::Cpu).unwrap().len(), 1);

        engine.stop_monitoring(&entity);
        assert!(engine.snapshot(&entity, ResourceKind::Cpu).is_none());
        assert!(!engine.is_monitoring(&entity));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_existing_history() {
        let engine = MetricsEngine::new(Arc::new(SyntheticSource::new()), test_config());
        let entity = EntityRef::node("worker-1");
        engine.start_monitoring(entity.clone());

        run_ticks(0, 30).await;
        let before = engine.snapshot(&entity, ResourceKind::Cpu).unwrap();
        assert_eq!(before.len(), 1);

        // Reselecting in the UI re-requests monitoring; history must survive.
        engine.start_monitoring(entity.clone());
        let after = engine.snapshot(&entity, ResourceKind::Cpu).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_samples_are_tagged() {
        let engine = MetricsEngine::new(Arc::new(SyntheticSource::new()), test_config());
        let entity = EntityRef::container("default", "web-0", "app");
        engine.start_monitoring(entity.clone());

        run_ticks(0, 30).await;
        let sample = engine.latest_sample(&entity).unwrap();
        assert!(sample.is_synthetic);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resource_kind_switch_shares_the_series() {
        let engine = MetricsEngine::new(Arc::new(SyntheticSource::new()), test_config());
        let entity = EntityRef::node("worker-1");
        engine.start_monitoring(entity.clone());

        run_ticks(0, 30).await;
        let cpu = engine.snapshot(&entity, ResourceKind::Cpu).unwrap();
        let mem = engine.snapshot(&entity, ResourceKind::Memory).unwrap();
        assert_eq!(cpu.len(), mem.len());
        assert_eq!(cpu[0].timestamp_ms, mem[0].timestamp_ms);
    }
}
