//! Sample acquisition: the seam between the pollers and the cluster.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_metrics::v1beta1 as metricsv1;
use kube::{Api, Client};

use crate::errors::FetchError;
use crate::structs::EntityRef;

/// One instantaneous usage reading, still in the apiserver's textual
/// quantity form. Decoding happens in the poller so a malformed field can
/// fail the whole tick.
#[derive(Debug, Clone, Default)]
pub struct RawSample {
    pub cpu_used: Option<String>,
    pub cpu_capacity: Option<String>,
    pub mem_used: Option<String>,
    pub mem_capacity: Option<String>,
    pub disk_used: Option<String>,
    pub disk_capacity: Option<String>,
    /// Marks generated placeholder data so it can never masquerade as real
    /// telemetry downstream.
    pub synthetic: bool,
}

/// Adapter that produces one usage sample per monitored entity.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn fetch_sample(&self, entity: &EntityRef) -> Result<RawSample, FetchError>;
}

/// Samples backed by the cluster metrics API (`metrics.k8s.io`) joined with
/// capacity from the owning Node or Pod object.
pub struct ClusterSource {
    client: Client,
}

impl ClusterSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn node_sample(&self, name: &str) -> Result<RawSample, FetchError> {
        let node_api: Api<Node> = Api::all(self.client.clone());
        let metrics_api: Api<metricsv1::NodeMetrics> = Api::all(self.client.clone());

        let (node, metrics) = tokio::try_join!(node_api.get(name), metrics_api.get(name))
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;

        let capacity = node.status.as_ref().and_then(|s| s.capacity.as_ref());

        // Node disk usage is not served by metrics.k8s.io; only the capacity
        // side is known here.
        Ok(RawSample {
            cpu_used: Some(metrics.usage.cpu.0.clone()),
            mem_used: Some(metrics.usage.memory.0.clone()),
            cpu_capacity: capacity.and_then(|c| c.get("cpu")).map(|q| q.0.clone()),
            mem_capacity: capacity.and_then(|c| c.get("memory")).map(|q| q.0.clone()),
            disk_used: None,
            disk_capacity: capacity
                .and_then(|c| c.get("ephemeral-storage"))
                .map(|q| q.0.clone()),
            synthetic: false,
        })
    }

    async fn container_sample(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<RawSample, FetchError> {
        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let metrics_api: Api<metricsv1::PodMetrics> = Api::namespaced(self.client.clone(), namespace);

        let (pod_obj, metrics) = tokio::try_join!(pod_api.get(pod), metrics_api.get(pod))
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;

        let usage = metrics
            .containers
            .iter()
            .find(|c| c.name == container)
            .map(|c| &c.usage)
            .ok_or_else(|| {
                FetchError::Unavailable(format!("container {container} not reporting metrics"))
            })?;

        // Capacity for a container is its configured resource limit; absent
        // limits leave the capacity unknown rather than guessed.
        let limits = pod_obj
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.iter().find(|c| c.name == container))
            .and_then(|c| c.resources.as_ref())
            .and_then(|r| r.limits.as_ref());

        Ok(RawSample {
            cpu_used: Some(usage.cpu.0.clone()),
            mem_used: Some(usage.memory.0.clone()),
            cpu_capacity: limits.and_then(|l| l.get("cpu")).map(|q| q.0.clone()),
            mem_capacity: limits.and_then(|l| l.get("memory")).map(|q| q.0.clone()),
            disk_used: None,
            disk_capacity: limits
                .and_then(|l| l.get("ephemeral-storage"))
                .map(|q| q.0.clone()),
            synthetic: false,
        })
    }
}

#[async_trait]
impl SampleSource for ClusterSource {
    #[tracing::instrument(skip(self))]
    async fn fetch_sample(&self, entity: &EntityRef) -> Result<RawSample, FetchError> {
        match entity {
            EntityRef::Node(name) => self.node_sample(name).await,
            EntityRef::Container(c) => {
                self.container_sample(&c.namespace, &c.pod, &c.container).await
            }
        }
    }
}

/// Deterministic placeholder generator for when no metrics backend is
/// configured. Every sample is tagged synthetic.
pub struct SyntheticSource {
    ticks: Mutex<HashMap<String, u64>>,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            ticks: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Triangular wave in [0, 1] over `period` steps.
fn triangle(step: u64, period: u64) -> f64 {
    let pos = (step % period) as f64 / period as f64;
    if pos < 0.5 {
        2.0 * pos
    } else {
        2.0 * (1.0 - pos)
    }
}

fn phase(key: &str) -> u64 {
    key.bytes().map(u64::from).sum()
}

#[async_trait]
impl SampleSource for SyntheticSource {
    async fn fetch_sample(&self, entity: &EntityRef) -> Result<RawSample, FetchError> {
        let key = entity.to_string();
        let tick = {
            let mut ticks = self.ticks.lock().unwrap();
            let counter = ticks.entry(key.clone()).or_insert(0);
            let tick = *counter;
            *counter += 1;
            tick
        };
        let step = tick + phase(&key);

        let sample = match entity {
            EntityRef::Node(_) => {
                let cpu_m = 500 + (triangle(step, 40) * 6000.0) as u64;
                let mem_mi = 4096 + (triangle(step.wrapping_add(13), 60) * 20480.0) as u64;
                let disk_gi = 60 + (triangle(step.wrapping_add(29), 120) * 80.0) as u64;
                RawSample {
                    cpu_used: Some(format!("{cpu_m}m")),
                    cpu_capacity: Some("8".to_string()),
                    mem_used: Some(format!("{mem_mi}Mi")),
                    mem_capacity: Some("32Gi".to_string()),
                    disk_used: Some(format!("{disk_gi}Gi")),
                    disk_capacity: Some("200Gi".to_string()),
                    synthetic: true,
                }
            }
            EntityRef::Container(_) => {
                let cpu_m = 50 + (triangle(step, 30) * 1500.0) as u64;
                let mem_mi = 128 + (triangle(step.wrapping_add(7), 45) * 1536.0) as u64;
                RawSample {
                    cpu_used: Some(format!("{cpu_m}m")),
                    cpu_capacity: Some("2".to_string()),
                    mem_used: Some(format!("{mem_mi}Mi")),
                    mem_capacity: Some("2Gi".to_string()),
                    disk_used: None,
                    disk_capacity: None,
                    synthetic: true,
                }
            }
        };

        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::history::MetricSample;

    #[tokio::test]
    async fn test_synthetic_is_deterministic_per_tick() {
        let a = SyntheticSource::new();
        let b = SyntheticSource::new();
        let entity = EntityRef::node("worker-1");

        for _ in 0..10 {
            let sa = a.fetch_sample(&entity).await.unwrap();
            let sb = b.fetch_sample(&entity).await.unwrap();
            assert_eq!(sa.cpu_used, sb.cpu_used);
            assert_eq!(sa.mem_used, sb.mem_used);
            assert_eq!(sa.disk_used, sb.disk_used);
        }
    }

    #[tokio::test]
    async fn test_synthetic_samples_decode_and_stay_tagged() {
        let source = SyntheticSource::new();
        for entity in [
            EntityRef::node("worker-1"),
            EntityRef::container("default", "web-0", "app"),
        ] {
            let raw = source.fetch_sample(&entity).await.unwrap();
            assert!(raw.synthetic);
            let sample = MetricSample::from_raw(&raw, 1).unwrap();
            assert!(sample.is_synthetic);
            assert!(sample.cpu_used >= 0.0);
            assert!(sample.cpu_capacity.unwrap() > 0.0);
        }
    }

    #[tokio::test]
    async fn test_synthetic_entities_do_not_share_counters() {
        let source = SyntheticSource::new();
        let a = EntityRef::node("worker-1");
        let b = EntityRef::node("worker-2");

        source.fetch_sample(&a).await.unwrap();
        // Interleave b; a's next tick must be unaffected by it.
        for _ in 0..5 {
            source.fetch_sample(&b).await.unwrap();
        }
        let second_a = source.fetch_sample(&a).await.unwrap();

        let fresh = SyntheticSource::new();
        fresh.fetch_sample(&a).await.unwrap();
        let expect_a = fresh.fetch_sample(&a).await.unwrap();
        assert_eq!(second_a.cpu_used, expect_a.cpu_used);
    }
}
