//! Dispatch control flow across the components
//!
//! ```text
//! claim -> acquire proxy -> look up session -> bind -> recompute job
//! complete -> record proxy outcome -> recompute job
//! ```
//!
//! Each step is its own atomic unit; the job status is re-derived after
//! every step that can change it, so a crash between steps leaves at worst
//! a stale job status that the next recompute repairs.

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::jobs::JobManager;
use crate::models::{Job, Outcome, Proxy, ProxyCriteria, Request, Session, WorkerCapabilities};
use crate::proxy_pool::ProxyPool;
use crate::queue::{Completion, RequestQueue, Transition};
use crate::sessions::SessionStore;

/// A claimed request together with the resources it must be fetched with
#[derive(Debug, Clone, Serialize)]
pub struct Dispatch {
    pub request: Request,
    pub proxy: Option<Proxy>,
    pub session: Option<Session>,
}

#[derive(Clone)]
pub struct CrawlEngine {
    queue: RequestQueue,
    proxies: ProxyPool,
    jobs: JobManager,
    sessions: SessionStore,
}

impl CrawlEngine {
    pub fn new(
        queue: RequestQueue,
        proxies: ProxyPool,
        jobs: JobManager,
        sessions: SessionStore,
    ) -> Self {
        Self {
            queue,
            proxies,
            jobs,
            sessions,
        }
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn proxies(&self) -> &ProxyPool {
        &self.proxies
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Claim the next dispatchable request for a worker.
    ///
    /// Returns `Ok(None)` when nothing is dispatchable. When the job needs a
    /// proxy and none is eligible, the request goes back to `pending`
    /// without consuming retry budget and `PoolExhausted` is returned.
    pub async fn claim_next(&self, capabilities: &WorkerCapabilities) -> AppResult<Option<Dispatch>> {
        let Some(request) = self.queue.claim(capabilities).await? else {
            return Ok(None);
        };
        let job = self.jobs.get(request.job_id).await?;

        let proxy = if job.settings.use_proxy {
            match self.proxies.acquire(&ProxyCriteria::default()).await {
                Ok(proxy) => Some(proxy),
                Err(e) => {
                    self.give_back(&request, &job).await?;
                    return Err(e);
                }
            }
        } else {
            None
        };

        let session = self
            .sessions
            .get(job.spider_id, job.settings.session_label.as_deref())
            .await?;

        let bound = self
            .queue
            .bind_resources(
                request.id,
                proxy.as_ref().map(|p| p.id),
                session.as_ref().map(|s| s.id),
            )
            .await?;
        self.jobs.recompute_status(job.id).await?;

        match bound {
            Some(request) => {
                debug!(
                    "Dispatching request {} to worker {} via proxy {} with session {:?}",
                    request.id,
                    capabilities.worker_id,
                    proxy
                        .as_ref()
                        .map(Proxy::masked_uri)
                        .unwrap_or_else(|| "direct".to_string()),
                    session.as_ref().map(|s| s.label.as_str())
                );
                Ok(Some(Dispatch {
                    request,
                    proxy,
                    session,
                }))
            }
            None => {
                debug!(
                    "Request {} of job {} left in_progress before dispatch",
                    request.id, job.id
                );
                Ok(None)
            }
        }
    }

    async fn give_back(&self, request: &Request, job: &Job) -> AppResult<()> {
        if !self.queue.release(request.id).await? {
            warn!(
                "Request {} could not be released; it is no longer in progress",
                request.id
            );
        }
        self.jobs.recompute_status(job.id).await?;
        Ok(())
    }

    /// Apply a fetch outcome and feed it back into the proxy statistics.
    /// A permanent failure without a response leaves the proxy untouched.
    pub async fn complete(&self, id: i64, outcome: &Outcome) -> AppResult<Completion> {
        let before = self.queue.get(id).await?;
        let completion = self.queue.complete(id, outcome).await?;

        if completion.transition != Transition::Unchanged {
            if let Some(proxy_id) = before.proxy_id {
                self.record_proxy_outcome(proxy_id, outcome).await;
            }
            self.jobs.recompute_status(before.job_id).await?;
        }
        Ok(completion)
    }

    async fn record_proxy_outcome(&self, proxy_id: i64, outcome: &Outcome) {
        let result = match outcome {
            Outcome::Success { .. } => self.proxies.record_success(proxy_id).await,
            Outcome::TransientFailure { reason, .. } => {
                self.proxies.record_failure(proxy_id, reason).await
            }
            Outcome::PermanentFailure {
                response: Some(_), ..
            } => self.proxies.record_success(proxy_id).await,
            Outcome::PermanentFailure { response: None, .. } => return,
        };

        // The proxy may have been deleted since dispatch
        if let Err(e) = result {
            match e {
                AppError::NotFound { .. } => {
                    debug!("Proxy {} is gone, outcome not recorded", proxy_id)
                }
                e => warn!("Failed to record outcome for proxy {}: {}", proxy_id, e),
            }
        }
    }

    /// Move a pending request to `in_progress` outside of `claim`
    pub async fn mark_in_progress(&self, id: i64, worker_id: &str) -> AppResult<Request> {
        let request = self.queue.mark_in_progress(id, worker_id).await?;
        self.jobs.recompute_status(request.job_id).await?;
        Ok(request)
    }

    pub async fn retry(&self, id: i64) -> AppResult<Request> {
        let request = self.queue.retry(id).await?;
        self.jobs.recompute_status(request.job_id).await?;
        Ok(request)
    }

    pub async fn cancel_job(&self, job_id: i64) -> AppResult<Job> {
        self.jobs.cancel(job_id).await
    }
}
