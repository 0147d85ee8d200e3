//! Request queue
//!
//! Holds the ordered backlog of fetch attempts for all jobs. Ordering and
//! mutual exclusion live in the database: `claim` is a single conditional
//! update, while `complete` and `retry` are compare-and-swap updates keyed on
//! the `(status, retries)` pair they observed.

mod backoff;

pub use backoff::BackoffPolicy;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::database::{Database, InsertRequest, ObservedRequest};
use crate::errors::{AppError, AppResult};
use crate::models::{
    NewRequest, Outcome, Page, PageRequest, Request, RequestFilter, RequestStatus, Response,
    WorkerCapabilities,
};
use crate::utils::urls::validate_target_url;
use crate::utils::SharedClock;

/// Compare-and-swap attempts before a contended request is reported as
/// changing under the caller
const MAX_CAS_ATTEMPTS: usize = 3;

/// What `complete` did to the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Done,
    /// Back to `pending` with one more retry consumed
    Requeued { retries: u32, delay_secs: i64 },
    Failed,
    /// Already terminal; nothing changed
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub request: Request,
    pub transition: Transition,
}

#[derive(Clone)]
pub struct RequestQueue {
    database: Database,
    config: QueueConfig,
    backoff: BackoffPolicy,
    clock: SharedClock,
}

impl RequestQueue {
    pub fn new(database: Database, config: QueueConfig, clock: SharedClock) -> Self {
        let backoff = BackoffPolicy::from_config(&config.backoff);
        Self {
            database,
            config,
            backoff,
            clock,
        }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn validate_priority(&self, priority: i32) -> AppResult<()> {
        if priority < self.config.min_priority || priority > self.config.max_priority {
            return Err(AppError::validation(format!(
                "priority {priority} outside [{}, {}]",
                self.config.min_priority, self.config.max_priority
            )));
        }
        Ok(())
    }

    pub fn validate_max_retries(&self, max_retries: u32) -> AppResult<()> {
        if max_retries > self.config.max_retries_cap {
            return Err(AppError::validation(format!(
                "max_retries {max_retries} exceeds cap {}",
                self.config.max_retries_cap
            )));
        }
        Ok(())
    }

    /// Add a pending request to an existing, uncancelled job
    pub async fn enqueue(&self, request: NewRequest) -> AppResult<Request> {
        let priority = request.priority.unwrap_or(0);
        let max_retries = request
            .max_retries
            .unwrap_or(self.config.default_max_retries);
        self.validate_priority(priority)?;
        self.validate_max_retries(max_retries)?;
        validate_target_url(&request.url).map_err(AppError::validation)?;

        let job = self
            .database
            .get_job(request.job_id)
            .await?
            .ok_or_else(|| AppError::validation(format!("unknown job {}", request.job_id)))?;
        if job.cancelled {
            return Err(AppError::invalid_state(format!(
                "job {} has been cancelled",
                job.id
            )));
        }

        let now = self.clock.now();
        let insert = InsertRequest {
            url: &request.url,
            method: request.method,
            priority,
            max_retries,
            scheduled_at: request.scheduled_at.unwrap_or(now),
        };
        let created = self.database.insert_request(job.id, &insert, now).await?;
        debug!(
            "Enqueued request {} for job {} (priority {}, max_retries {})",
            created.id, created.job_id, created.priority, created.max_retries
        );
        Ok(created)
    }

    /// Atomically hand the most urgent dispatchable request to one worker
    pub async fn claim(&self, capabilities: &WorkerCapabilities) -> AppResult<Option<Request>> {
        let claimed = self
            .database
            .claim_request(capabilities, self.clock.now())
            .await?;
        if let Some(request) = &claimed {
            debug!(
                "Worker {} claimed request {} (job {}, priority {})",
                capabilities.worker_id, request.id, request.job_id, request.priority
            );
        }
        Ok(claimed)
    }

    /// Move a specific pending request to `in_progress`
    pub async fn mark_in_progress(&self, id: i64, worker_id: &str) -> AppResult<Request> {
        match self
            .database
            .mark_request_in_progress(id, worker_id, self.clock.now())
            .await?
        {
            Some(request) => Ok(request),
            None => {
                let current = self.get(id).await?;
                Err(AppError::invalid_state(format!(
                    "request {id} is {} and cannot be marked in progress",
                    current.status
                )))
            }
        }
    }

    /// Apply a fetch outcome.
    ///
    /// A terminal request is left untouched and reported as
    /// [`Transition::Unchanged`].
    pub async fn complete(&self, id: i64, outcome: &Outcome) -> AppResult<Completion> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let request = self.get(id).await?;
            if request.is_terminal() {
                debug!("Request {} already {}, ignoring outcome", id, request.status);
                return Ok(Completion {
                    request,
                    transition: Transition::Unchanged,
                });
            }

            let observed = ObservedRequest::from(&request);
            let now = self.clock.now();
            let (applied, transition) = match outcome {
                Outcome::Success { response } => {
                    let applied = self
                        .database
                        .finish_request(observed, RequestStatus::Done, None, Some(response), now)
                        .await?;
                    (applied, Transition::Done)
                }
                Outcome::TransientFailure { reason, response } if request.has_retry_budget() => {
                    let delay = self.backoff.delay(request.retries);
                    let retries = request.retries + 1;
                    let applied = self
                        .database
                        .requeue_request(
                            observed,
                            retries,
                            now + delay,
                            Some(reason),
                            response.as_ref(),
                            now,
                        )
                        .await?;
                    (
                        applied,
                        Transition::Requeued {
                            retries,
                            delay_secs: delay.num_seconds(),
                        },
                    )
                }
                Outcome::TransientFailure { reason, response }
                | Outcome::PermanentFailure { reason, response } => {
                    let applied = self
                        .database
                        .finish_request(
                            observed,
                            RequestStatus::Error,
                            Some(reason),
                            response.as_ref(),
                            now,
                        )
                        .await?;
                    (applied, Transition::Failed)
                }
            };

            if applied {
                let request = self.get(id).await?;
                match transition {
                    Transition::Requeued {
                        retries,
                        delay_secs,
                    } => debug!(
                        "Request {} re-queued (retry {}/{}) in {}s",
                        id, retries, request.max_retries, delay_secs
                    ),
                    Transition::Failed => warn!(
                        "Request {} failed: {}",
                        id,
                        request.last_error.as_deref().unwrap_or("unknown")
                    ),
                    _ => debug!("Request {} done", id),
                }
                return Ok(Completion {
                    request,
                    transition,
                });
            }

            debug!("Request {} changed concurrently, re-reading", id);
        }

        Err(AppError::invalid_state(format!(
            "request {id} kept changing while applying outcome"
        )))
    }

    /// Manual override: back to `pending` and dispatchable now, keeping the
    /// retry count
    pub async fn retry(&self, id: i64) -> AppResult<Request> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let request = self.get(id).await?;
            if !request.is_terminal() {
                return Err(AppError::invalid_state(format!(
                    "request {id} is {}; only done or error requests can be retried",
                    request.status
                )));
            }

            let job = self
                .database
                .get_job(request.job_id)
                .await?
                .ok_or_else(|| AppError::not_found("job", request.job_id))?;
            if job.cancelled {
                return Err(AppError::invalid_state(format!(
                    "job {} has been cancelled",
                    job.id
                )));
            }

            if self
                .database
                .reopen_request(ObservedRequest::from(&request), self.clock.now())
                .await?
            {
                info!(
                    "Request {} manually re-queued from {} (retries {}/{})",
                    id, request.status, request.retries, request.max_retries
                );
                return self.get(id).await;
            }
        }

        Err(AppError::invalid_state(format!(
            "request {id} kept changing while retrying"
        )))
    }

    /// Return an in-progress request to `pending` without consuming retry
    /// budget, e.g. when no proxy was available for it
    pub async fn release(&self, id: i64) -> AppResult<bool> {
        let released = self
            .database
            .release_request(id, self.clock.now())
            .await?;
        if released {
            debug!("Request {} released back to the queue", id);
        }
        Ok(released)
    }

    /// Record the proxy and session an in-progress request is dispatched
    /// with. `None` when the request left `in_progress` in the meantime.
    pub async fn bind_resources(
        &self,
        id: i64,
        proxy_id: Option<i64>,
        session_id: Option<i64>,
    ) -> AppResult<Option<Request>> {
        self.database
            .bind_request_resources(id, proxy_id, session_id, self.clock.now())
            .await
    }

    /// Terminate every unterminated request of a job as cancelled errors
    pub async fn cancel_all_for_job(&self, job_id: i64) -> AppResult<u64> {
        let cancelled = self
            .database
            .cancel_requests_for_job(job_id, self.clock.now())
            .await?;
        if cancelled > 0 {
            info!("Cancelled {} requests of job {}", cancelled, job_id);
        }
        Ok(cancelled)
    }

    pub async fn set_priority(&self, id: i64, priority: i32) -> AppResult<Request> {
        self.validate_priority(priority)?;
        self.database
            .update_request_priority(id, priority, self.clock.now())
            .await?
            .ok_or_else(|| AppError::not_found("request", id))
    }

    pub async fn get(&self, id: i64) -> AppResult<Request> {
        self.database
            .get_request(id)
            .await?
            .ok_or_else(|| AppError::not_found("request", id))
    }

    pub async fn list(&self, filter: &RequestFilter, page: &PageRequest) -> AppResult<Page<Request>> {
        self.database.list_requests(filter, page).await
    }

    /// Stored responses of a request, newest first
    pub async fn responses(&self, id: i64) -> AppResult<Vec<Response>> {
        self.get(id).await?;
        self.database.list_responses(id).await
    }
}
