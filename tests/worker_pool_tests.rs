mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use common::{direct, Harness};
use crawl_orchestrator::engine::Dispatch;
use crawl_orchestrator::models::{JobStatus, Outcome, ResponseRecord, SpiderSettings};
use crawl_orchestrator::queue::Transition;
use crawl_orchestrator::worker::{Fetcher, WorkerPool, WorkerStep};

/// Answers 404 for URLs containing "missing", 200 otherwise
#[derive(Default)]
struct ScriptedFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, dispatch: &Dispatch) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if dispatch.request.url.contains("missing") {
            Outcome::failure("HTTP 404", false, Some(ResponseRecord::new(404, 3)))
        } else {
            Outcome::success(ResponseRecord::new(200, 7))
        }
    }
}

#[tokio::test]
async fn test_worker_steps_drain_a_job() {
    let h = Harness::new().await;
    let spider = h
        .spider(
            &["https://example.com/ok", "https://example.com/missing"],
            direct(),
        )
        .await;
    let job = h.jobs().create_job(spider.id).await.unwrap();

    let fetcher = Arc::new(ScriptedFetcher::default());
    let pool = WorkerPool::new(
        h.engine().clone(),
        fetcher.clone(),
        h.state.config.worker.clone(),
    );
    let caps = pool.capabilities(0);

    let mut transitions = Vec::new();
    loop {
        match pool.step(&caps).await.unwrap() {
            WorkerStep::Processed(transition) => transitions.push(transition),
            WorkerStep::Idle => break,
            WorkerStep::Backpressure => panic!("direct fetches need no proxy"),
        }
    }

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    assert!(transitions.contains(&Transition::Done));
    assert!(transitions.contains(&Transition::Failed));
    assert_eq!(h.jobs().get(job.id).await.unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_worker_reports_backpressure_without_proxies() {
    let h = Harness::new().await;
    let spider = h
        .spider(&["https://example.com/p"], SpiderSettings::default())
        .await;
    h.jobs().create_job(spider.id).await.unwrap();

    let fetcher = Arc::new(ScriptedFetcher::default());
    let pool = WorkerPool::new(
        h.engine().clone(),
        fetcher.clone(),
        h.state.config.worker.clone(),
    );

    let step = pool.step(&pool.capabilities(0)).await.unwrap();
    assert_eq!(step, WorkerStep::Backpressure);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}
