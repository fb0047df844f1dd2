use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use kantoor::config::SchedulerConfig;
use kantoor::errors::{SyncError, SyncResult};
use kantoor::pipeline::{backoff_delay, watermark_for_run, Pipeline, RunContext, RunReport};
use kantoor::scheduler::SchedulerBuilder;
use kantoor::store::Store;
use kantoor::types::RunOutcome;

/// Test double that appends its name to a shared log and returns a
/// scripted outcome.
struct Scripted {
    name: &'static str,
    account: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    outcome: fn() -> SyncResult<RunReport>,
}

#[async_trait]
impl Pipeline for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn account(&self) -> &str {
        self.account
    }

    fn cadence(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn run(&self, _ctx: &RunContext) -> SyncResult<RunReport> {
        if let Ok(mut log) = self.log.lock() {
            log.push(self.name.to_string());
        }
        (self.outcome)()
    }
}

fn scripted(
    name: &'static str,
    account: &'static str,
    log: &Arc<Mutex<Vec<String>>>,
    outcome: fn() -> SyncResult<RunReport>,
) -> Arc<Scripted> {
    Arc::new(Scripted {
        name,
        account,
        log: log.clone(),
        outcome,
    })
}

#[tokio::test]
async fn successful_run_records_cursor_and_watermark() {
    let store = Store::open_in_memory().await.expect("store");
    let log = Arc::new(Mutex::new(Vec::new()));
    let scheduler = SchedulerBuilder::new(store.clone(), SchedulerConfig::default())
        .register(scripted("demo-pull", "demo", &log, || {
            Ok(RunReport {
                fetched: 3,
                applied: 3,
                failed: 0,
                watermark: Some("2026-08-23T08:00:00Z".into()),
            })
        }))
        .build();

    scheduler.run_pipeline("demo-pull").await.expect("run");

    let cursor = store.load_cursor("demo-pull").await.expect("cursor");
    assert_eq!(cursor.last_outcome, Some(RunOutcome::Ok));
    assert_eq!(cursor.consecutive_failures, 0);
    assert_eq!(cursor.last_watermark.as_deref(), Some("2026-08-23T08:00:00Z"));
    assert!(cursor.last_run.is_some());
}

#[tokio::test]
async fn failures_accumulate_and_auth_errors_halt() {
    let store = Store::open_in_memory().await.expect("store");
    let log = Arc::new(Mutex::new(Vec::new()));
    let scheduler = SchedulerBuilder::new(store.clone(), SchedulerConfig::default())
        .register(scripted("flaky", "demo", &log, || {
            Err(SyncError::Transient("connection reset".into()))
        }))
        .register(scripted("locked-out", "demo", &log, || {
            Err(SyncError::AuthFailed("401 rejected".into()))
        }))
        .build();

    scheduler.run_pipeline("flaky").await.expect("first");
    scheduler.run_pipeline("flaky").await.expect("second");
    let cursor = store.load_cursor("flaky").await.expect("cursor");
    assert_eq!(cursor.consecutive_failures, 2);
    assert_eq!(cursor.last_outcome, Some(RunOutcome::Failed));
    assert!(!cursor.auth_halted);
    assert!(cursor
        .last_error
        .as_deref()
        .map_or(false, |e| e.contains("connection reset")));

    scheduler.run_pipeline("locked-out").await.expect("auth");
    let cursor = store.load_cursor("locked-out").await.expect("cursor");
    assert!(cursor.auth_halted);
    assert_eq!(cursor.last_outcome, Some(RunOutcome::AuthHalted));
}

#[tokio::test]
async fn unconfigured_pipeline_skips_without_a_failure_streak() {
    let store = Store::open_in_memory().await.expect("store");
    let log = Arc::new(Mutex::new(Vec::new()));
    let scheduler = SchedulerBuilder::new(store.clone(), SchedulerConfig::default())
        .register(scripted("bare", "demo", &log, || Err(SyncError::NotConfigured)))
        .build();

    scheduler.run_pipeline("bare").await.expect("run");

    let cursor = store.load_cursor("bare").await.expect("cursor");
    assert_eq!(cursor.last_outcome, Some(RunOutcome::Skipped));
    assert_eq!(cursor.consecutive_failures, 0);
    assert!(cursor.last_error.is_none());
    assert!(cursor.last_run.is_some());
}

#[tokio::test]
async fn run_all_once_keeps_registration_order_within_an_account() {
    let store = Store::open_in_memory().await.expect("store");
    let log = Arc::new(Mutex::new(Vec::new()));
    let ok = || Ok(RunReport::default());
    let scheduler = SchedulerBuilder::new(store, SchedulerConfig::default())
        .register(scripted("tickets-pull", "website", &log, ok))
        .register(scripted("tickets-push", "website", &log, ok))
        .register(scripted("mail-pull-1", "mailbox-1", &log, ok))
        .build();

    scheduler.run_all_once().await;

    let seen = log.lock().expect("log").clone();
    assert_eq!(seen, vec!["tickets-pull", "tickets-push", "mail-pull-1"]);
}

#[tokio::test]
async fn unknown_pipeline_names_are_rejected() {
    let store = Store::open_in_memory().await.expect("store");
    let log = Arc::new(Mutex::new(Vec::new()));
    let scheduler = SchedulerBuilder::new(store, SchedulerConfig::default())
        .register(scripted("demo-pull", "demo", &log, || Ok(RunReport::default())))
        .build();

    assert!(scheduler.run_pipeline("no-such-pipeline").await.is_err());
    assert!(scheduler.run_now("no-such-pipeline").is_err());
    assert!(scheduler.run_now("demo-pull").is_ok());
    assert_eq!(scheduler.pipeline_names(), vec!["demo-pull"]);
}

#[test]
fn backoff_is_exact_at_zero_failures_and_capped_after() {
    let base = Duration::from_secs(100);

    assert_eq!(backoff_delay(base, 0), base);

    // Three failures: 8x base, within the 10% jitter band.
    let delay = backoff_delay(base, 3);
    assert!(delay >= Duration::from_secs(720), "{delay:?}");
    assert!(delay <= Duration::from_secs(880), "{delay:?}");

    // The factor stops growing at 32x no matter how long the streak.
    let delay = backoff_delay(base, 40);
    assert!(delay >= Duration::from_secs(2880), "{delay:?}");
    assert!(delay <= Duration::from_secs(3520), "{delay:?}");
}

#[test]
fn watermark_never_trails_the_run_start() {
    let run_started = Utc
        .with_ymd_and_hms(2026, 8, 23, 10, 0, 0)
        .unwrap()
        .timestamp();
    let behind = run_started - 3600;
    let ahead = run_started + 3600;

    assert_eq!(
        watermark_for_run(run_started, None),
        "2026-08-23T10:00:00Z"
    );
    assert_eq!(
        watermark_for_run(run_started, Some(behind)),
        "2026-08-23T10:00:00Z"
    );
    assert_eq!(
        watermark_for_run(run_started, Some(ahead)),
        "2026-08-23T11:00:00Z"
    );
}
