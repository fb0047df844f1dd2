//! Pipelines: idempotent units of sync work dispatched by the scheduler.
//!
//! A pull run pages remote records into the store; a push run drains
//! locally pending rows out. Runs never hold state across invocations
//! beyond the persisted cursor, so a crashed or cancelled run re-does at
//! most one window of work.

pub mod accounting;
pub mod customers;
pub mod forms;
pub mod payments;
pub mod tickets;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::errors::SyncResult;

/// Page size requested from paginated pull endpoints.
pub const PULL_PAGE_SIZE: u32 = 50;
/// A single pull run ingests at most this many items.
pub const PULL_MAX_ITEMS: usize = 500;
/// And walks at most this many pages, whichever comes first.
pub const PULL_MAX_PAGES: u32 = 10;
/// Push runs drain at most this many pending rows.
pub const PUSH_BATCH: usize = 50;

const BACKOFF_FACTOR_CAP: u32 = 32;

/// Ambient state handed to every run.
#[derive(Clone)]
pub struct RunContext {
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        RunContext { cancel }
    }
}

/// What a run did, for the cursor and the logs.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub fetched: usize,
    pub applied: usize,
    pub failed: usize,
    /// New watermark to persist; None leaves the cursor's watermark alone.
    pub watermark: Option<String>,
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Stable identifier, also the cursor key.
    fn name(&self) -> &str;

    /// Remote account the run talks to; runs against the same account are
    /// serialized.
    fn account(&self) -> &str;

    fn cadence(&self) -> Duration;

    async fn run(&self, ctx: &RunContext) -> SyncResult<RunReport>;
}

/// Exponential backoff with a capped factor and ±10% jitter, so a stuck
/// pipeline retries at base, 2x, 4x ... 32x base.
pub fn backoff_delay(base: Duration, consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return base;
    }
    let factor = 2u32
        .saturating_pow(consecutive_failures.min(16))
        .min(BACKOFF_FACTOR_CAP);
    let jitter = rand::thread_rng().gen_range(0.9..=1.1);
    base.saturating_mul(factor).mul_f64(jitter)
}

pub fn iso_from_ts(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Watermark for a completed pull: the newest remote timestamp observed,
/// but never behind the run's own start. A remote clock running ahead can
/// only cause re-observation, which upserts absorb.
pub fn watermark_for_run(run_started: i64, newest_remote: Option<i64>) -> String {
    iso_from_ts(run_started.max(newest_remote.unwrap_or(i64::MIN)))
}
