mod common;

use std::collections::HashSet;

use chrono::Duration;

use common::{direct, Harness};
use crawl_orchestrator::errors::AppError;
use crawl_orchestrator::models::{
    HttpMethod, NewRequest, Outcome, RequestStatus, ResponseRecord, SpiderSettings,
    WorkerCapabilities,
};

fn new_request(job_id: i64, url: &str, priority: i32) -> NewRequest {
    NewRequest {
        job_id,
        url: url.to_string(),
        method: HttpMethod::Get,
        priority: Some(priority),
        max_retries: None,
        scheduled_at: None,
    }
}

#[tokio::test]
async fn test_concurrent_claims_never_double_dispatch() {
    let h = Harness::new().await;
    let urls: Vec<String> = (0..12).map(|i| format!("https://example.com/{i}")).collect();
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    let spider = h
        .spider(
            &url_refs,
            SpiderSettings {
                concurrency: Some(0),
                ..direct()
            },
        )
        .await;
    h.jobs().create_job(spider.id).await.unwrap();

    let claims = (0..20).map(|i| {
        let queue = h.queue().clone();
        async move { queue.claim(&WorkerCapabilities::new(format!("w{i}"))).await }
    });
    let results = futures::future::join_all(claims).await;

    let claimed: Vec<i64> = results
        .into_iter()
        .filter_map(|r| r.unwrap())
        .map(|r| r.id)
        .collect();
    let unique: HashSet<i64> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), 12);
    assert_eq!(unique.len(), 12);
}

#[tokio::test]
async fn test_claim_order_priority_then_schedule_then_id() {
    let h = Harness::new().await;
    let spider = h.spider(&[], direct()).await;
    let job = h.jobs().create_job(spider.id).await.unwrap();

    let low = h.queue().enqueue(new_request(job.id, "https://example.com/low", 1)).await.unwrap();
    let high_a = h.queue().enqueue(new_request(job.id, "https://example.com/ha", 5)).await.unwrap();
    let high_b = h.queue().enqueue(new_request(job.id, "https://example.com/hb", 5)).await.unwrap();
    let later = h
        .queue()
        .enqueue(NewRequest {
            scheduled_at: Some(h.now() + Duration::minutes(5)),
            ..new_request(job.id, "https://example.com/later", 50)
        })
        .await
        .unwrap();

    let caps = WorkerCapabilities::new("w1");
    let mut order = Vec::new();
    while let Some(request) = h.queue().claim(&caps).await.unwrap() {
        order.push(request.id);
    }
    assert_eq!(order, vec![high_a.id, high_b.id, low.id]);

    h.clock.advance(Duration::minutes(5));
    assert_eq!(h.queue().claim(&caps).await.unwrap().unwrap().id, later.id);
}

#[tokio::test]
async fn test_enqueue_validation() {
    let h = Harness::new().await;
    let spider = h.spider(&[], direct()).await;
    let job = h.jobs().create_job(spider.id).await.unwrap();

    let err = h
        .queue()
        .enqueue(new_request(job.id, "https://example.com/", 1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    let err = h
        .queue()
        .enqueue(NewRequest {
            max_retries: Some(99),
            ..new_request(job.id, "https://example.com/", 0)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    let err = h
        .queue()
        .enqueue(new_request(job.id, "ftp://example.com/", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    let err = h
        .queue()
        .enqueue(new_request(9_999, "https://example.com/", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
}

#[tokio::test]
async fn test_browser_jobs_need_browser_workers() {
    let h = Harness::new().await;
    let spider = h
        .spider(
            &["https://example.com/spa"],
            SpiderSettings {
                browser: true,
                ..direct()
            },
        )
        .await;
    h.jobs().create_job(spider.id).await.unwrap();

    let plain = WorkerCapabilities::new("plain");
    assert!(h.queue().claim(&plain).await.unwrap().is_none());

    let browser = WorkerCapabilities::new("chrome").with_browser();
    let claimed = h.queue().claim(&browser).await.unwrap().unwrap();
    assert_eq!(claimed.claimed_by.as_deref(), Some("chrome"));
}

#[tokio::test]
async fn test_spider_allow_list_and_concurrency_limit() {
    let h = Harness::new().await;
    let limited = h
        .spider(
            &["https://example.com/1", "https://example.com/2", "https://example.com/3"],
            SpiderSettings {
                concurrency: Some(2),
                ..direct()
            },
        )
        .await;
    let other = h.spider(&["https://other.example/1"], direct()).await;
    h.jobs().create_job(limited.id).await.unwrap();
    let other_job = h.jobs().create_job(other.id).await.unwrap();

    let only_limited = WorkerCapabilities::new("w1").with_spiders(vec![limited.id]);
    assert!(h.queue().claim(&only_limited).await.unwrap().is_some());
    assert!(h.queue().claim(&only_limited).await.unwrap().is_some());
    // Third request of the job waits for a slot
    assert!(h.queue().claim(&only_limited).await.unwrap().is_none());

    let anyone = WorkerCapabilities::new("w2");
    let claimed = h.queue().claim(&anyone).await.unwrap().unwrap();
    assert_eq!(claimed.job_id, other_job.id);
}

#[tokio::test]
async fn test_mark_in_progress_and_release() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/m"], direct()).await;
    let job = h.jobs().create_job(spider.id).await.unwrap();
    let request = h
        .queue()
        .list(&Default::default(), &Default::default())
        .await
        .unwrap()
        .items
        .into_iter()
        .find(|r| r.job_id == job.id)
        .unwrap();

    let started = h.engine().mark_in_progress(request.id, "manual").await.unwrap();
    assert_eq!(started.status, RequestStatus::InProgress);
    assert_eq!(started.claimed_by.as_deref(), Some("manual"));
    let err = h.queue().mark_in_progress(request.id, "manual").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));

    assert!(h.queue().release(request.id).await.unwrap());
    assert!(!h.queue().release(request.id).await.unwrap());
    assert_eq!(h.queue().get(request.id).await.unwrap().status, RequestStatus::Pending);
}

#[tokio::test]
async fn test_retries_never_exceed_budget() {
    let h = Harness::new().await;
    let spider = h
        .spider(
            &["https://example.com/r"],
            SpiderSettings {
                max_retries: Some(1),
                ..direct()
            },
        )
        .await;
    h.jobs().create_job(spider.id).await.unwrap();
    let caps = WorkerCapabilities::new("w1");

    for _ in 0..4 {
        h.clock.advance(Duration::hours(1));
        let Some(request) = h.queue().claim(&caps).await.unwrap() else {
            break;
        };
        let completion = h
            .queue()
            .complete(
                request.id,
                &Outcome::failure("HTTP 500", true, Some(ResponseRecord::new(500, 5))),
            )
            .await
            .unwrap();
        assert!(completion.request.retries <= completion.request.max_retries);
    }

    let page = h.queue().list(&Default::default(), &Default::default()).await.unwrap();
    let request = page.items.iter().find(|r| r.url == "https://example.com/r").unwrap();
    assert_eq!(request.status, RequestStatus::Error);
    assert_eq!(request.retries, 1);
}

#[tokio::test]
async fn test_set_priority_bounds() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/p"], direct()).await;
    h.jobs().create_job(spider.id).await.unwrap();
    let request = h
        .queue()
        .list(&Default::default(), &Default::default())
        .await
        .unwrap()
        .items
        .into_iter()
        .find(|r| r.url == "https://example.com/p")
        .unwrap();

    let updated = h.queue().set_priority(request.id, 42).await.unwrap();
    assert_eq!(updated.priority, 42);
    let err = h.queue().set_priority(request.id, 101).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
    let err = h.queue().set_priority(9_999, 1).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test]
async fn test_cancel_all_for_job_keeps_retry_budget() {
    let h = Harness::new().await;
    let spider = h
        .spider(
            &["https://example.com/a", "https://example.com/b", "https://example.com/c"],
            direct(),
        )
        .await;
    let job = h.jobs().create_job(spider.id).await.unwrap();

    let first = h
        .queue()
        .claim(&WorkerCapabilities::new("w1"))
        .await
        .unwrap()
        .unwrap();
    h.queue()
        .complete(
            first.id,
            &Outcome::success(ResponseRecord::new(200, 10)),
        )
        .await
        .unwrap();
    let second = h
        .queue()
        .claim(&WorkerCapabilities::new("w1"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.queue().cancel_all_for_job(job.id).await.unwrap(), 2);

    let cancelled = h.queue().get(second.id).await.unwrap();
    assert_eq!(cancelled.status, RequestStatus::Error);
    assert!(cancelled.cancelled);
    assert_eq!(cancelled.retries, 0);

    let done = h.queue().get(first.id).await.unwrap();
    assert_eq!(done.status, RequestStatus::Done);
    assert!(!done.cancelled);

    // Nothing left to cancel
    assert_eq!(h.queue().cancel_all_for_job(job.id).await.unwrap(), 0);
}
