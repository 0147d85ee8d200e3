mod common;

use chrono::Duration;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use common::{direct, Harness};
use crawl_orchestrator::errors::AppError;
use crawl_orchestrator::models::{NewSession, SessionFilter};

fn session(spider_id: i64, label: &str, lifetime_hours: i64) -> NewSession {
    NewSession {
        spider_id,
        label: Some(label.to_string()),
        state: None,
        lifetime_hours: Some(lifetime_hours),
    }
}

#[tokio::test]
async fn test_cleanup_removes_exactly_the_expired_sessions() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/"], direct()).await;

    h.sessions().create(session(spider.id, "old-1", 1)).await.unwrap();
    h.sessions().create(session(spider.id, "old-2", 1)).await.unwrap();
    h.clock.advance(Duration::hours(2));
    for label in ["new-1", "new-2", "new-3"] {
        h.sessions().create(session(spider.id, label, 24)).await.unwrap();
    }

    let expired = SessionFilter {
        spider_id: Some(spider.id),
        expired: Some(true),
    };
    assert_eq!(
        h.sessions().list(&expired, &Default::default()).await.unwrap().total,
        2
    );

    assert_eq!(h.sessions().cleanup_expired().await.unwrap(), 2);
    assert_eq!(h.sessions().cleanup_expired().await.unwrap(), 0);

    let all = SessionFilter {
        spider_id: Some(spider.id),
        expired: None,
    };
    assert_eq!(
        h.sessions().list(&all, &Default::default()).await.unwrap().total,
        3
    );
}

#[tokio::test]
async fn test_get_uses_default_label_and_hides_expired() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/"], direct()).await;

    let created = h
        .sessions()
        .create(NewSession {
            spider_id: spider.id,
            label: None,
            state: Some(json!({"cookies": ["a=1"]})),
            lifetime_hours: Some(1),
        })
        .await
        .unwrap();
    assert_eq!(created.label, h.sessions().default_label());

    let found = h.sessions().get(spider.id, None).await.unwrap().unwrap();
    assert_eq!(found.id, created.id);
    assert_eq!(found.state, json!({"cookies": ["a=1"]}));
    assert!(h.sessions().get(spider.id, Some("other")).await.unwrap().is_none());

    h.clock.advance(Duration::hours(1) + Duration::seconds(1));
    assert!(h.sessions().get(spider.id, None).await.unwrap().is_none());
    assert!(h.sessions().get_by_id(created.id).await.unwrap().is_expired);
}

#[tokio::test]
async fn test_extend_validity_from_the_later_of_now_and_valid_until() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/"], direct()).await;
    let created = h.sessions().create(session(spider.id, "main", 2)).await.unwrap();

    let extended = assert_ok!(h.sessions().extend_validity(created.id, 3).await);
    assert_eq!(extended.valid_until, created.valid_until + Duration::hours(3));

    h.clock.advance(Duration::hours(10));
    let revived = assert_ok!(h.sessions().extend_validity(created.id, 1).await);
    assert_eq!(revived.valid_until, h.now() + Duration::hours(1));
    assert!(!revived.is_expired);

    let err = assert_err!(h.sessions().extend_validity(created.id, 0).await);
    assert!(matches!(err, AppError::Validation { .. }));
    let err = assert_err!(h.sessions().extend_validity(9_999, 1).await);
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test]
async fn test_create_replaces_existing_identity() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/"], direct()).await;

    let first = h
        .sessions()
        .create(NewSession {
            state: Some(json!({"token": "old"})),
            ..session(spider.id, "main", 1)
        })
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(30));
    let second = h
        .sessions()
        .create(NewSession {
            state: Some(json!({"token": "new"})),
            ..session(spider.id, "main", 1)
        })
        .await
        .unwrap();

    assert_eq!(second.state, json!({"token": "new"}));
    assert_eq!(second.valid_until, h.now() + Duration::hours(1));
    assert!(second.valid_until > first.valid_until);

    let all = SessionFilter {
        spider_id: Some(spider.id),
        expired: None,
    };
    assert_eq!(
        h.sessions().list(&all, &Default::default()).await.unwrap().total,
        1
    );
}

#[tokio::test]
async fn test_create_rejects_unknown_spider_and_bad_lifetime() {
    let h = Harness::new().await;
    let err = assert_err!(h.sessions().create(session(9_999, "main", 1)).await);
    assert!(matches!(err, AppError::Validation { .. }));

    let spider = h.spider(&["https://example.com/"], direct()).await;
    let err = assert_err!(h.sessions().create(session(spider.id, "main", 0)).await);
    assert!(matches!(err, AppError::Validation { .. }));
}
