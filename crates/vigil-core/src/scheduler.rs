//! Idle-triggered training scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::backend::{BackendError, SessionBackend};

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("training job not configured")]
    NotConfigured,
    #[error("training job failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A long-running training run. Implementations offload their blocking
/// work so callers can await without stalling an event loop.
#[async_trait]
pub trait TrainingJob: Send + Sync + 'static {
    async fn run(&self) -> Result<(), TrainError>;
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Train(#[from] TrainError),
}

/// Decides whether to start a training run based on an explicit force
/// request or session idle time crossing the configured threshold.
pub struct TrainingScheduler<B, J> {
    backend: Arc<B>,
    job: Arc<J>,
    idle_threshold: u64,
    running: AtomicBool,
}

impl<B: SessionBackend, J: TrainingJob> TrainingScheduler<B, J> {
    pub fn new(backend: Arc<B>, job: Arc<J>, idle_threshold: u64) -> Self {
        Self {
            backend,
            job,
            idle_threshold,
            running: AtomicBool::new(false),
        }
    }

    /// Whether a training run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the training job if `force` or the session has been idle for
    /// at least the threshold. Returns whether training ran.
    ///
    /// A request arriving while a run is already in flight is rejected
    /// with `Ok(false)` rather than starting an overlapping run.
    pub async fn maybe_train(&self, force: bool) -> Result<bool, ScheduleError> {
        let idle = self.backend.idle_time().await?;
        if !force && idle < self.idle_threshold {
            return Ok(false);
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("training already in progress; request skipped");
            return Ok(false);
        }

        tracing::info!(idle, force, "starting training run");
        let result = self.job.run().await;
        self.running.store(false, Ordering::SeqCst);
        result?;
        Ok(true)
    }
}
