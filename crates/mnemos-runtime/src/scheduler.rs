//! [`ReflectionScheduler`] – runs the reflection pipeline on a fixed
//! interval until cancelled.

use mnemos_memory::ReflectionPipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ReflectionScheduler {
    pipeline: Arc<ReflectionPipeline>,
    interval: Duration,
}

impl ReflectionScheduler {
    pub fn new(pipeline: Arc<ReflectionPipeline>, interval: Duration) -> Self {
        Self { pipeline, interval }
    }

    /// Run until `cancel` fires. The first run starts immediately; a run
    /// that overruns the interval delays the next one instead of stacking.
    /// Returns the number of runs that completed.
    pub async fn run(&self, cancel: CancellationToken) -> usize {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut completed = 0;

        info!(interval_ms = self.interval.as_millis() as u64, "reflection scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.pipeline.run(&cancel).await {
                Ok(run) => {
                    completed += 1;
                    info!(
                        run_id = %run.run_id,
                        reflections = run.reflections.len(),
                        "scheduled reflection finished"
                    );
                }
                Err(e) => warn!(error = %e, "scheduled reflection failed"),
            }
        }
        info!(completed, "reflection scheduler stopped");
        completed
    }

    /// Run on the current Tokio runtime in the background.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<usize> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mnemos_memory::{MemoryStore, ReflectionConfig};
    use mnemos_types::{Embedding, Modality, ProducerError, Summarizer};

    struct Constant;

    #[async_trait]
    impl Summarizer for Constant {
        async fn summarize(&self, _captions: &[String]) -> Result<String, ProducerError> {
            Ok("a summary".into())
        }
    }

    fn pipeline() -> (Arc<MemoryStore>, Arc<ReflectionPipeline>) {
        let store = Arc::new(MemoryStore::open_in_memory(2).unwrap());
        for i in 0..6 {
            store
                .add_memory(&format!("m{i}"), Modality::Text, "", Embedding::new(vec![i as f32, 0.0]))
                .unwrap();
        }
        let pipeline = ReflectionPipeline::new(store.clone(), Arc::new(Constant), ReflectionConfig::default());
        (store, Arc::new(pipeline))
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let (store, pipeline) = pipeline();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runs = ReflectionScheduler::new(pipeline, Duration::from_millis(5)).run(cancel).await;
        assert_eq!(runs, 0);
        assert!(store.list_reflections(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn runs_until_cancelled() {
        let (store, pipeline) = pipeline();
        let cancel = CancellationToken::new();
        let handle = ReflectionScheduler::new(pipeline, Duration::from_millis(10)).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        let runs = handle.await.unwrap();
        assert!(runs >= 1);
        assert!(!store.list_reflections(None).unwrap().is_empty());
    }
}
