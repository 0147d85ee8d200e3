//! In-process fetch workers
//!
//! Each worker polls [`CrawlEngine::claim_next`], hands the dispatch to a
//! [`Fetcher`] and reports the outcome back. Empty queues and proxy
//! back-pressure make the worker sleep for the poll interval.

mod http;

pub use http::{classify_status, HttpFetcher, StatusClass};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::engine::{CrawlEngine, Dispatch};
use crate::errors::{AppError, AppResult};
use crate::models::{Outcome, WorkerCapabilities};
use crate::queue::Transition;

/// Executes one dispatched request and classifies the result
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, dispatch: &Dispatch) -> Outcome;
}

/// What a single poll of the queue did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStep {
    Idle,
    Processed(Transition),
    /// No eligible proxy for the claimed request
    Backpressure,
}

#[derive(Clone)]
pub struct WorkerPool {
    engine: CrawlEngine,
    fetcher: Arc<dyn Fetcher>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(engine: CrawlEngine, fetcher: Arc<dyn Fetcher>, config: WorkerConfig) -> Self {
        Self {
            engine,
            fetcher,
            config,
        }
    }

    pub fn capabilities(&self, index: usize) -> WorkerCapabilities {
        let capabilities = WorkerCapabilities::new(format!("local-{index}"));
        if self.config.supports_browser {
            capabilities.with_browser()
        } else {
            capabilities
        }
    }

    /// Spawn the configured number of workers
    pub fn spawn(&self, cancellation_token: CancellationToken) -> Vec<JoinHandle<()>> {
        info!("Starting {} fetch workers", self.config.concurrency);
        (0..self.config.concurrency)
            .map(|index| {
                let pool = self.clone();
                let token = cancellation_token.clone();
                tokio::spawn(async move { pool.run_worker(index, token).await })
            })
            .collect()
    }

    async fn run_worker(&self, index: usize, cancellation_token: CancellationToken) {
        let capabilities = self.capabilities(index);
        let idle = Duration::from_millis(self.config.poll_interval_ms);
        debug!("Worker {} started", capabilities.worker_id);

        // A claimed request is always completed before shutting down
        while !cancellation_token.is_cancelled() {
            let pause = match self.step(&capabilities).await {
                Ok(WorkerStep::Processed(_)) => continue,
                Ok(WorkerStep::Idle) | Ok(WorkerStep::Backpressure) => idle,
                Err(e) => {
                    error!("Worker {} failed: {}", capabilities.worker_id, e);
                    idle
                }
            };

            tokio::select! {
                _ = sleep(pause) => {}
                _ = cancellation_token.cancelled() => break,
            }
        }

        debug!("Worker {} stopped", capabilities.worker_id);
    }

    /// Claim, fetch and complete at most one request
    pub async fn step(&self, capabilities: &WorkerCapabilities) -> AppResult<WorkerStep> {
        let dispatch = match self.engine.claim_next(capabilities).await {
            Ok(Some(dispatch)) => dispatch,
            Ok(None) => return Ok(WorkerStep::Idle),
            Err(AppError::PoolExhausted { message }) => {
                warn!(
                    "Worker {} backing off: {}",
                    capabilities.worker_id, message
                );
                return Ok(WorkerStep::Backpressure);
            }
            Err(e) => return Err(e),
        };

        let outcome = self.fetcher.fetch(&dispatch).await;
        let completion = self.engine.complete(dispatch.request.id, &outcome).await?;
        Ok(WorkerStep::Processed(completion.transition))
    }
}
