//! Reflection Pipeline.
//!
//! One run is a single pass through
//! `Load → Cluster → Summarize×N → Persist×N → Done`:
//!
//! 1. **Load** – the most recent `load_window` memories and their embeddings,
//!    paired by id.
//! 2. **Cluster** – k-means into at most `cluster_count` non-empty groups.
//!    Fewer memories than `cluster_count` ends the run with no reflections.
//! 3. **Summarize** – each cluster's captions (ascending by id) go to the
//!    [`Summarizer`]. Failures are retried with exponential backoff; a
//!    cluster that exhausts its attempts is skipped, the others continue.
//! 4. **Persist** – one [`ReflectionRecord`] per produced summary.
//!
//! A run can be cancelled through a [`CancellationToken`]: the token is
//! checked before each cluster is summarised, in-flight work finishes, and
//! summaries produced so far are still persisted.

use mnemos_types::{Embedding, MemoryId, MemoryRecord, ProducerError, ReflectionRecord, Summarizer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cluster::{KMeansConfig, kmeans};
use crate::error::StoreError;
use crate::store::MemoryStore;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded exponential backoff for summarizer calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per cluster, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 for the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }
}

/// Tuning of a [`ReflectionPipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Maximum number of clusters (and so reflections) per run.
    pub cluster_count: usize,
    /// How many recent memories a run loads.
    pub load_window: usize,
    pub kmeans_restarts: usize,
    pub kmeans_max_iterations: usize,
    pub retry: RetryPolicy,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        let kmeans = KMeansConfig::default();
        Self {
            cluster_count: kmeans.k,
            load_window: 100,
            kmeans_restarts: kmeans.restarts,
            kmeans_max_iterations: kmeans.max_iterations,
            retry: RetryPolicy::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run state
// ─────────────────────────────────────────────────────────────────────────────

/// Stage of a pipeline run, used to label log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Load,
    Cluster,
    Summarize,
    Persist,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Load => "load",
            Phase::Cluster => "cluster",
            Phase::Summarize => "summarize",
            Phase::Persist => "persist",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Memories grouped together by one run. Members are ascending by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub members: Vec<MemoryRecord>,
}

impl Cluster {
    pub fn member_ids(&self) -> Vec<MemoryId> {
        self.members.iter().map(|m| m.id).collect()
    }

    pub fn captions(&self) -> Vec<String> {
        self.members.iter().map(|m| m.caption.clone()).collect()
    }
}

/// Outcome of one [`ReflectionPipeline::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRun {
    pub run_id: Uuid,
    /// Memories loaded in the Load phase.
    pub loaded: usize,
    /// Non-empty clusters formed.
    pub clusters: usize,
    pub reflections: Vec<ReflectionRecord>,
    /// Zero-based indices of clusters that produced no reflection.
    pub skipped_clusters: Vec<usize>,
    /// The run stopped early because its token was cancelled.
    pub cancelled: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// ReflectionPipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Batch job turning recent memories into clustered summaries.
pub struct ReflectionPipeline {
    store: Arc<MemoryStore>,
    summarizer: Arc<dyn Summarizer>,
    config: ReflectionConfig,
}

impl ReflectionPipeline {
    pub fn new(store: Arc<MemoryStore>, summarizer: Arc<dyn Summarizer>, config: ReflectionConfig) -> Self {
        Self {
            store,
            summarizer,
            config,
        }
    }

    pub fn config(&self) -> &ReflectionConfig {
        &self.config
    }

    /// Execute one run.
    ///
    /// # Errors
    ///
    /// Only a failure to load memories aborts the run. Summarizer and
    /// per-reflection persistence failures skip the affected cluster.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ReflectionRun, StoreError> {
        let run_id = Uuid::new_v4();
        let mut run = ReflectionRun {
            run_id,
            loaded: 0,
            clusters: 0,
            reflections: Vec::new(),
            skipped_clusters: Vec::new(),
            cancelled: false,
        };

        info!(%run_id, phase = %Phase::Load, window = self.config.load_window, "reflection run started");
        let loaded = self.store.load_recent(self.config.load_window)?;
        run.loaded = loaded.len();

        debug!(%run_id, phase = %Phase::Cluster, memories = run.loaded);
        let clusters = self.cluster(loaded);
        run.clusters = clusters.len();
        if clusters.is_empty() {
            info!(
                %run_id,
                phase = %Phase::Done,
                memories = run.loaded,
                k = self.config.cluster_count,
                "not enough memories to cluster"
            );
            return Ok(run);
        }

        let mut summaries = Vec::with_capacity(clusters.len());
        for (index, cluster) in clusters.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(%run_id, phase = %Phase::Summarize, cluster = index, "run cancelled");
                run.cancelled = true;
                run.skipped_clusters.extend(index..clusters.len());
                break;
            }
            debug!(%run_id, phase = %Phase::Summarize, cluster = index, members = cluster.members.len());
            match self.summarize_with_retry(&cluster.captions()).await {
                Ok(summary) => summaries.push((index, summary)),
                Err(e) => {
                    warn!(%run_id, cluster = index, error = %e, "summarizer gave up; skipping cluster");
                    run.skipped_clusters.push(index);
                }
            }
        }

        for (index, summary) in summaries {
            match self.store.save_reflection(&summary, &[]) {
                Ok(reflection) => run.reflections.push(reflection),
                Err(e) => {
                    warn!(%run_id, phase = %Phase::Persist, cluster = index, error = %e, "could not save reflection");
                    run.skipped_clusters.push(index);
                }
            }
        }
        run.skipped_clusters.sort_unstable();

        info!(
            %run_id,
            phase = %Phase::Done,
            reflections = run.reflections.len(),
            skipped = run.skipped_clusters.len(),
            cancelled = run.cancelled,
            "reflection run finished"
        );
        Ok(run)
    }

    /// Group loaded memories into at most `cluster_count` non-empty clusters.
    /// Returns nothing when there are fewer memories than `cluster_count`.
    pub fn cluster(&self, loaded: Vec<(MemoryRecord, Embedding)>) -> Vec<Cluster> {
        let config = KMeansConfig {
            k: self.config.cluster_count,
            restarts: self.config.kmeans_restarts,
            max_iterations: self.config.kmeans_max_iterations,
        };
        let points: Vec<&[f32]> = loaded.iter().map(|(_, e)| e.as_slice()).collect();
        let Some(clustering) = kmeans(&points, &config, &mut rand::thread_rng()) else {
            return Vec::new();
        };
        clustering
            .groups()
            .into_iter()
            .map(|group| {
                let mut members: Vec<MemoryRecord> = group.into_iter().map(|i| loaded[i].0.clone()).collect();
                members.sort_by_key(|m| m.id);
                Cluster { members }
            })
            .collect()
    }

    async fn summarize_with_retry(&self, captions: &[String]) -> Result<String, ProducerError> {
        let attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.summarizer.summarize(captions).await {
                Ok(summary) => return Ok(summary),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.config.retry.backoff(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying summarizer"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
