mod common;

use chrono::{Duration, TimeZone, Utc};

use common::{direct, Harness};
use crawl_orchestrator::errors::AppError;
use crawl_orchestrator::models::{JobFilter, NewSchedule, ScheduleUpdate};
use crawl_orchestrator::scheduler::SchedulerDriver;
use crawl_orchestrator::utils::SharedClock;

fn hourly(spider_id: i64) -> NewSchedule {
    NewSchedule {
        spider_id,
        cron_expr: "0 * * * *".to_string(),
        timezone: None,
        enabled: true,
    }
}

#[tokio::test]
async fn test_hourly_schedule_round_trip() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/"], direct()).await;

    let schedule = h.state.scheduler.create(hourly(spider.id)).await.unwrap();
    let thirteen = Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap();
    assert_eq!(schedule.next_run_at, Some(thirteen));

    let late = Utc.with_ymd_and_hms(2024, 1, 1, 13, 5, 0).unwrap();
    let executed = h.state.scheduler.mark_executed(schedule.id, late).await.unwrap();
    assert_eq!(
        executed.next_run_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap())
    );
    assert_eq!(executed.last_run_at, Some(late));
}

#[tokio::test]
async fn test_mark_executed_on_a_boundary_moves_past_it() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/"], direct()).await;
    let schedule = h.state.scheduler.create(hourly(spider.id)).await.unwrap();

    let boundary = Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap();
    let executed = h
        .state
        .scheduler
        .mark_executed(schedule.id, boundary)
        .await
        .unwrap();
    assert!(executed.next_run_at.unwrap() > boundary);
}

#[tokio::test]
async fn test_schedule_evaluated_in_its_timezone() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/"], direct()).await;

    // 09:00 in New York is 14:00 UTC in January
    let schedule = h
        .state
        .scheduler
        .create(NewSchedule {
            spider_id: spider.id,
            cron_expr: "0 9 * * *".to_string(),
            timezone: Some("America/New_York".to_string()),
            enabled: true,
        })
        .await
        .unwrap();
    assert_eq!(
        schedule.next_run_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_invalid_definitions_are_rejected() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/"], direct()).await;

    for (cron, tz) in [
        ("61 * * * *", None),
        ("* * *", None),
        ("0 0 30 2 *", None),
        ("0 * * * *", Some("Mars/Olympus")),
    ] {
        let err = h
            .state
            .scheduler
            .create(NewSchedule {
                spider_id: spider.id,
                cron_expr: cron.to_string(),
                timezone: tz.map(str::to_string),
                enabled: true,
            })
            .await
            .unwrap_err();
        assert!(
            matches!(err, AppError::Validation { .. }),
            "{cron} / {tz:?} should be rejected"
        );
    }

    let err = h.state.scheduler.create(hourly(9_999)).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
}

#[tokio::test]
async fn test_disabled_schedule_is_never_due_and_enable_replans() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/"], direct()).await;
    let schedule = h.state.scheduler.create(hourly(spider.id)).await.unwrap();

    h.state.scheduler.disable(schedule.id).await.unwrap();
    h.clock.advance(Duration::hours(5));
    assert!(h.state.scheduler.list_due(h.now()).await.unwrap().is_empty());

    let err = h
        .state
        .scheduler
        .mark_executed(schedule.id, h.now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState { .. }));

    // 17:00 now; the stale 13:00 slot is not resurrected
    let enabled = h.state.scheduler.enable(schedule.id).await.unwrap();
    assert_eq!(
        enabled.next_run_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 18, 0, 0).unwrap())
    );
    assert!(!enabled.is_due(h.now()));
    assert!(h.state.scheduler.list_due(h.now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_due_and_upcoming_listings() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/"], direct()).await;

    let hourly_schedule = h.state.scheduler.create(hourly(spider.id)).await.unwrap();
    let every_quarter = h
        .state
        .scheduler
        .create(NewSchedule {
            spider_id: spider.id,
            cron_expr: "*/15 * * * *".to_string(),
            timezone: None,
            enabled: true,
        })
        .await
        .unwrap();

    let upcoming = h
        .state
        .scheduler
        .list_upcoming(h.now(), Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(
        upcoming.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![every_quarter.id]
    );

    h.clock.advance(Duration::hours(2));
    let due = h.state.scheduler.list_due(h.now()).await.unwrap();
    assert_eq!(
        due.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![every_quarter.id, hourly_schedule.id]
    );
    assert!(due.iter().all(|s| s.is_due(h.now())));
}

#[tokio::test]
async fn test_edit_replans_enabled_schedule() {
    let h = Harness::new().await;
    let spider = h.spider(&["https://example.com/"], direct()).await;
    let schedule = h.state.scheduler.create(hourly(spider.id)).await.unwrap();

    let updated = h
        .state
        .scheduler
        .update(
            schedule.id,
            &ScheduleUpdate {
                cron_expr: Some("30 12 * * *".to_string()),
                timezone: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.cron_expr, "30 12 * * *");
    assert_eq!(
        updated.next_run_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap())
    );
}

#[tokio::test]
async fn test_driver_fires_each_slot_once() {
    let h = Harness::new().await;
    let spider = h
        .spider(&["https://example.com/a", "https://example.com/b"], direct())
        .await;
    let schedule = h.state.scheduler.create(hourly(spider.id)).await.unwrap();
    let slot = schedule.next_run_at.unwrap();

    let clock: SharedClock = std::sync::Arc::new(h.clock.clone());
    let driver = SchedulerDriver::new(h.state.scheduler.clone(), h.jobs().clone(), clock);

    let report = driver.run_once().await.unwrap();
    assert_eq!(report.due, 0);

    h.clock.advance(Duration::minutes(61));
    let report = driver.run_once().await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.jobs_created, 1);

    let report = driver.run_once().await.unwrap();
    assert_eq!(report.due, 0);

    let filter = JobFilter {
        spider_id: Some(spider.id),
        ..JobFilter::default()
    };
    let jobs = h.jobs().list(&filter, &Default::default()).await.unwrap();
    assert_eq!(jobs.total, 1);
    assert_eq!(jobs.items[0].schedule_id, Some(schedule.id));
    assert_eq!(jobs.items[0].scheduled_for, Some(slot));

    // A crashed trigger re-run for the same slot does not duplicate the job
    let again = h
        .jobs()
        .create_scheduled_job(spider.id, schedule.id, slot)
        .await
        .unwrap();
    assert!(again.is_none());
}
