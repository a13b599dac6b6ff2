//! Orchestration of several independent runs.
//!
//! A `PipelineRunner` drives a set of self-contained units (for example one
//! graph run per batch date) to completion, with at most `max_active` of them
//! in flight, staggered starts and shared shutdown handling.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A self-contained unit that can be executed by a `PipelineRunner`.
pub trait Pipeline: Send + 'static {
    /// The key type used to identify this unit in logs and results.
    type Key: Clone + Display + Send + 'static;

    /// Value produced on success.
    type Output: Send + 'static;

    /// The error type returned by this unit.
    type Error: std::error::Error + Send + 'static;

    /// Get a reference to the unit's key.
    fn key(&self) -> &Self::Key;

    /// Run this unit to completion.
    fn run(self) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}

/// How a unit driven by a `PipelineRunner` ended.
#[derive(Debug)]
pub enum RunOutcome<O, E> {
    Completed(O),
    Failed(E),
    /// Skipped because shutdown was requested before it started.
    Cancelled,
    Panicked(String),
}

impl<O, E> RunOutcome<O, E> {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

/// Orchestrates multiple executions with shared shutdown handling.
pub struct PipelineRunner<P: Pipeline> {
    pipelines: Vec<P>,
    shutdown: CancellationToken,
    max_active: Option<usize>,
    start_jitter_secs: u64,
    typetag: &'static str,
}

impl<P: Pipeline> PipelineRunner<P> {
    pub fn new(pipelines: Vec<P>, shutdown: CancellationToken, typetag: &'static str) -> Self {
        Self {
            pipelines,
            shutdown,
            max_active: None,
            start_jitter_secs: 0,
            typetag,
        }
    }

    /// Limit how many units run at the same time.
    pub fn with_max_active(mut self, max_active: Option<usize>) -> Self {
        self.max_active = max_active;
        self
    }

    /// Stagger start times by up to `secs` seconds.
    pub fn with_start_jitter(mut self, secs: u64) -> Self {
        self.start_jitter_secs = secs;
        self
    }

    /// Run all units to completion.
    ///
    /// Results are returned in the order the units were given.
    #[allow(clippy::type_complexity)]
    pub async fn run(self) -> Vec<(P::Key, RunOutcome<P::Output, P::Error>)> {
        let typetag = self.typetag;
        let limiter = self.max_active.map(|n| Arc::new(Semaphore::new(n.max(1))));
        let keys: Vec<P::Key> = self.pipelines.iter().map(|p| p.key().clone()).collect();
        let mut results: Vec<Option<RunOutcome<P::Output, P::Error>>> =
            keys.iter().map(|_| None).collect();
        let mut handles: JoinSet<(usize, RunOutcome<P::Output, P::Error>)> = JoinSet::new();
        let mut spawned = std::collections::HashMap::new();

        for (idx, pipeline) in self.pipelines.into_iter().enumerate() {
            let shutdown = self.shutdown.clone();
            let limiter = limiter.clone();
            let start_jitter = random_jitter(self.start_jitter_secs);

            let handle = handles.spawn(async move {
                let key = pipeline.key().clone();
                let _permit = match limiter {
                    Some(limiter) => match shutdown
                        .run_until_cancelled(limiter.acquire_owned())
                        .await
                    {
                        Some(Ok(permit)) => Some(permit),
                        _ => return (idx, RunOutcome::Cancelled),
                    },
                    None => None,
                };

                // Stagger start times, but respect shutdown signal
                if !start_jitter.is_zero() {
                    info!(
                        target = %key,
                        jitter_secs = start_jitter.as_secs(),
                        "Delaying {} start for jitter", typetag
                    );
                    if shutdown
                        .run_until_cancelled(tokio::time::sleep(start_jitter))
                        .await
                        .is_none()
                    {
                        info!(target = %key, "Shutdown requested during jitter delay");
                        return (idx, RunOutcome::Cancelled);
                    }
                }

                if shutdown.is_cancelled() {
                    return (idx, RunOutcome::Cancelled);
                }

                match pipeline.run().await {
                    Ok(output) => (idx, RunOutcome::Completed(output)),
                    Err(e) => (idx, RunOutcome::Failed(e)),
                }
            });
            spawned.insert(handle.id(), idx);
        }

        info!("Spawned {} {} tasks", handles.len(), typetag);

        while let Some(result) = handles.join_next_with_id().await {
            match result {
                Ok((_, (idx, outcome))) => {
                    match &outcome {
                        RunOutcome::Completed(_) => {
                            info!(target = %keys[idx], "{} completed", typetag)
                        }
                        RunOutcome::Failed(e) => {
                            error!(target = %keys[idx], error = %e, "{} failed", typetag)
                        }
                        RunOutcome::Cancelled => {
                            info!(target = %keys[idx], "{} cancelled", typetag)
                        }
                        RunOutcome::Panicked(_) => {}
                    }
                    results[idx] = Some(outcome);
                }
                Err(e) => {
                    error!(error = %e, "{} task panicked", typetag);
                    if let Some(idx) = spawned.get(&e.id()) {
                        results[*idx] = Some(RunOutcome::Panicked(e.to_string()));
                    }
                }
            }
        }

        info!("All {}s complete", typetag);

        keys.into_iter()
            .zip(results)
            .map(|(key, outcome)| (key, outcome.unwrap_or(RunOutcome::Cancelled)))
            .collect()
    }
}

/// Generate a random jitter duration up to the specified maximum seconds.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Nope;

    impl std::fmt::Display for Nope {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "nope")
        }
    }

    impl std::error::Error for Nope {}

    struct Unit {
        key: String,
        fail: bool,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Pipeline for Unit {
        type Key = String;
        type Output = usize;
        type Error = Nope;

        fn key(&self) -> &String {
            &self.key
        }

        async fn run(self) -> Result<usize, Nope> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail { Err(Nope) } else { Ok(self.key.len()) }
        }
    }

    fn units(n: usize, peak: &Arc<AtomicUsize>) -> Vec<Unit> {
        let running = Arc::new(AtomicUsize::new(0));
        (0..n)
            .map(|i| Unit {
                key: format!("2018-10-0{}", i + 1),
                fail: i == 1,
                running: Arc::clone(&running),
                peak: Arc::clone(peak),
            })
            .collect()
    }

    #[test]
    fn test_random_jitter_zero() {
        let jitter = random_jitter(0);
        assert_eq!(jitter, Duration::ZERO);
    }

    #[test]
    fn test_random_jitter_within_bounds() {
        for _ in 0..100 {
            let jitter = random_jitter(10);
            assert!(jitter <= Duration::from_secs(10));
        }
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let peak = Arc::new(AtomicUsize::new(0));
        let results = PipelineRunner::new(units(3, &peak), CancellationToken::new(), "run")
            .run()
            .await;

        let keys: Vec<&str> = results.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["2018-10-01", "2018-10-02", "2018-10-03"]);
        assert!(results[0].1.is_completed());
        assert!(matches!(results[1].1, RunOutcome::Failed(_)));
        assert!(results[2].1.is_completed());
    }

    #[tokio::test]
    async fn test_max_active_bounds_concurrency() {
        let peak = Arc::new(AtomicUsize::new(0));
        PipelineRunner::new(units(4, &peak), CancellationToken::new(), "run")
            .with_max_active(Some(1))
            .run()
            .await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_runner_skips_units() {
        let peak = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let results = PipelineRunner::new(units(2, &peak), shutdown, "run").run().await;
        assert!(
            results
                .iter()
                .all(|(_, outcome)| matches!(outcome, RunOutcome::Cancelled))
        );
        assert_eq!(peak.load(Ordering::SeqCst), 0);
    }
}
