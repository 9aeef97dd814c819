//! Log tailing: per-tab pollers, chunk fetching, and the follow contract.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::LogParams;
use kube::{Api, Client};
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::buffer::{FollowState, LogBuffer, LogEntry};
use super::mark_logs_dirty;
use crate::config::TelemetryConfig;
use crate::errors::FetchError;
use crate::structs::{ContainerRef, SourceHealth};

/// Fetches the next chunk of raw log lines for a container, strictly after
/// `since_sequence` (the engine's count of lines already ingested).
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch_chunk(
        &self,
        target: &ContainerRef,
        since_sequence: u64,
    ) -> Result<Vec<String>, FetchError>;
}

/// Chunked log reads against the cluster.
///
/// The log API has no sequence addressing, so the sequence cursor maps to a
/// per-target `since_time` watermark: the first chunk tails the newest
/// `tail_lines`, each later chunk asks for everything since the previous
/// fetch started.
pub struct ClusterLogSource {
    client: Client,
    tail_lines: i64,
    watermarks: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ClusterLogSource {
    pub fn new(client: Client, tail_lines: i64) -> Self {
        Self {
            client,
            tail_lines,
            watermarks: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LogSource for ClusterLogSource {
    #[tracing::instrument(skip(self))]
    async fn fetch_chunk(
        &self,
        target: &ContainerRef,
        since_sequence: u64,
    ) -> Result<Vec<String>, FetchError> {
        let key = target.to_string();
        let since_time = {
            let watermarks = self.watermarks.lock().unwrap();
            watermarks.get(&key).copied()
        };
        debug!(since_sequence, ?since_time, "fetching log chunk");

        let lp = LogParams {
            follow: false,
            container: Some(target.container.clone()),
            since_time,
            tail_lines: since_time.is_none().then_some(self.tail_lines),
            ..LogParams::default()
        };

        let fetch_start = Utc::now();
        let pods_api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let stream = pods_api
            .log_stream(&target.pod, &lp)
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;

        let mut lines = stream.lines();
        let mut chunk = Vec::new();
        loop {
            match lines.try_next().await {
                Ok(Some(line)) => chunk.push(line),
                Ok(None) => break,
                Err(e) => return Err(FetchError::Unavailable(e.to_string())),
            }
        }

        let mut watermarks = self.watermarks.lock().unwrap();
        watermarks.insert(key, fetch_start);
        Ok(chunk)
    }
}

/// Identifies one open log tab. Stable for the tab's lifetime; handles are
/// never reused within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabHandle(u64);

struct LogTab {
    buffer: Arc<Mutex<LogBuffer>>,
    following: Arc<AtomicBool>,
    available: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl LogTab {
    fn shutdown(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

impl Drop for LogTab {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Point-in-time view of one tab: entries in sequence order plus the follow
/// state the presentation layer acts on (auto-scroll only when `Following`).
#[derive(Debug, Clone)]
pub struct LogSnapshot {
    pub entries: Vec<LogEntry>,
    pub follow: FollowState,
    pub last_sequence: u64,
}

/// Owns one append-only log buffer per open tab, each fed by an independent
/// tail poller. Buffer and poller live exactly as long as the tab.
pub struct LogTailEngine {
    source: Arc<dyn LogSource>,
    config: TelemetryConfig,
    tabs: Mutex<HashMap<TabHandle, LogTab>>,
    next_handle: AtomicU64,
}

impl LogTailEngine {
    pub fn new(source: Arc<dyn LogSource>, config: TelemetryConfig) -> Self {
        Self {
            source,
            config,
            tabs: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Opens a tab and starts tailing. Must be called within a tokio runtime.
    #[tracing::instrument(skip(self))]
    pub fn open_tab(&self, target: ContainerRef) -> TabHandle {
        let handle_id = TabHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));

        let buffer = Arc::new(Mutex::new(LogBuffer::new(self.config.log_line_cap)));
        let following = Arc::new(AtomicBool::new(true));
        let available = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let source = self.source.clone();
        let fetch_timeout = self.config.fetch_timeout();
        let timeout_secs = self.config.fetch_timeout_secs;
        let poll_interval = self.config.log_poll_interval();
        let task_buffer = buffer.clone();
        let task_available = available.clone();

        let handle = tokio::spawn(async move {
            let mut tick = time::interval(poll_interval);
            // One outstanding fetch per tab: overdue ticks are skipped.
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tick.tick() => {
                        let since_sequence = match task_buffer.lock() {
                            Ok(guard) => guard.last_sequence(),
                            Err(poisoned) => poisoned.into_inner().last_sequence(),
                        };

                        let fetch = time::timeout(fetch_timeout, source.fetch_chunk(&target, since_sequence));
                        let chunk = match fetch.await {
                            Ok(Ok(chunk)) => chunk,
                            Ok(Err(e)) => {
                                warn!(target = %target, error = %e, "failed to fetch log chunk");
                                task_available.store(false, Ordering::Release);
                                continue;
                            }
                            Err(_) => {
                                let e = FetchError::Timeout(timeout_secs);
                                warn!(target = %target, error = %e, "failed to fetch log chunk");
                                task_available.store(false, Ordering::Release);
                                continue;
                            }
                        };

                        task_available.store(true, Ordering::Release);
                        if chunk.is_empty() {
                            continue;
                        }

                        match task_buffer.lock() {
                            Ok(mut guard) => guard.append_lines(chunk),
                            Err(poisoned) => {
                                warn!("poisoned log buffer lock, recovering");
                                poisoned.into_inner().append_lines(chunk)
                            }
                        };
                        mark_logs_dirty();
                    }
                }
            }
        });

        self.tabs.lock().unwrap().insert(
            handle_id,
            LogTab {
                buffer,
                following,
                available,
                handle,
                cancel,
            },
        );
        handle_id
    }

    /// Closes a tab: cancels its poller without waiting for an in-flight
    /// fetch and releases the buffer, regardless of follow state.
    #[tracing::instrument(skip(self))]
    pub fn close_tab(&self, handle: TabHandle) {
        let removed = self.tabs.lock().unwrap().remove(&handle);
        if let Some(tab) = removed {
            tab.shutdown();
        }
    }

    pub fn is_open(&self, handle: TabHandle) -> bool {
        self.tabs.lock().unwrap().contains_key(&handle)
    }

    /// User scrolled: away from the bottom pauses following, back to the
    /// bottom resumes it. No button required.
    pub fn on_user_scroll(&self, handle: TabHandle, at_bottom: bool) {
        let tabs = self.tabs.lock().unwrap();
        if let Some(tab) = tabs.get(&handle) {
            tab.following.store(at_bottom, Ordering::Release);
        }
    }

    pub fn follow_state(&self, handle: TabHandle) -> Option<FollowState> {
        let tabs = self.tabs.lock().unwrap();
        let tab = tabs.get(&handle)?;
        Some(if tab.following.load(Ordering::Acquire) {
            FollowState::Following
        } else {
            FollowState::Paused
        })
    }

    /// Consistent point-in-time copy of the tab. Never mutates the buffer.
    pub fn snapshot(&self, handle: TabHandle) -> Option<LogSnapshot> {
        let (buffer, following) = {
            let tabs = self.tabs.lock().unwrap();
            let tab = tabs.get(&handle)?;
            (tab.buffer.clone(), tab.following.load(Ordering::Acquire))
        };
        let (entries, last_sequence) = match buffer.lock() {
            Ok(guard) => (guard.snapshot(), guard.last_sequence()),
            Err(poisoned) => {
                let guard = poisoned.into_inner();
                (guard.snapshot(), guard.last_sequence())
            }
        };
        Some(LogSnapshot {
            entries,
            follow: if following {
                FollowState::Following
            } else {
                FollowState::Paused
            },
            last_sequence,
        })
    }

    /// Records the UI-local expansion flag on one retained entry.
    pub fn set_expanded(&self, handle: TabHandle, sequence: u64, expanded: bool) -> bool {
        let buffer = {
            let tabs = self.tabs.lock().unwrap();
            match tabs.get(&handle) {
                Some(tab) => tab.buffer.clone(),
                None => return false,
            }
        };
        let result = match buffer.lock() {
            Ok(mut guard) => guard.set_expanded(sequence, expanded),
            Err(poisoned) => poisoned.into_inner().set_expanded(sequence, expanded),
        };
        result
    }

    /// Soft availability of the tab's backend, `Unavailable` after a failed
    /// tick and recovering on the next good one.
    pub fn source_health(&self, handle: TabHandle) -> Option<SourceHealth> {
        let tabs = self.tabs.lock().unwrap();
        let tab = tabs.get(&handle)?;
        Some(if tab.available.load(Ordering::Acquire) {
            SourceHealth::Live
        } else {
            SourceHealth::Unavailable
        })
    }

    /// Closes every tab. Used on context switch or clean shutdown.
    pub fn shutdown(&self) {
        let drained: Vec<LogTab> = {
            let mut tabs = self.tabs.lock().unwrap();
            tabs.drain().map(|(_, t)| t).collect()
        };
        for tab in drained {
            tab.shutdown();
        }
    }
}
