use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::{SyncError, SyncResult};
use crate::remote::shapes::{self, normalize_ticket};
use crate::remote::website::WebsiteClient;
use crate::store::Store;
use crate::types::{now_ts, SyncState};

use super::{
    watermark_for_run, Pipeline, RunContext, RunReport, PULL_MAX_ITEMS, PULL_MAX_PAGES,
    PULL_PAGE_SIZE, PUSH_BATCH,
};

pub const PULL_NAME: &str = "tickets-pull";
pub const PUSH_NAME: &str = "tickets-push";

/// Pulls support tickets and their message threads from the website. Falls
/// back to the legacy admin feed when the v1 endpoint is not deployed.
pub struct TicketsPull {
    store: Store,
    website: Arc<WebsiteClient>,
    cadence: Duration,
}

impl TicketsPull {
    pub fn new(store: Store, website: Arc<WebsiteClient>, cadence: Duration) -> Self {
        TicketsPull {
            store,
            website,
            cadence,
        }
    }

    async fn apply(&self, value: &serde_json::Value, report: &mut RunReport) -> SyncResult<()> {
        match normalize_ticket(value) {
            Ok(ticket) => {
                self.store
                    .upsert_ticket(&ticket)
                    .await
                    .map_err(SyncError::fatal)?;
                report.applied += 1;
                Ok(())
            }
            Err(err) if err.is_item_level() => {
                warn!(pipeline = PULL_NAME, error = %err, "Skipping ticket record");
                report.failed += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Legacy path: one unpaginated feed, acked per ticket so a crash
    /// mid-run re-delivers only the unacked tail.
    async fn run_legacy(&self, ctx: &RunContext, report: &mut RunReport) -> SyncResult<()> {
        let items = self.website.unsynced_tickets_legacy().await?;
        report.fetched += items.len();

        for value in &items {
            if ctx.cancel.is_cancelled() {
                return Ok(());
            }
            let before = report.applied;
            self.apply(value, report).await?;
            if report.applied > before {
                if let Ok(ticket) = normalize_ticket(value) {
                    self.website
                        .mark_ticket_synced_legacy(&ticket.ticket_number)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Pipeline for TicketsPull {
    fn name(&self) -> &str {
        PULL_NAME
    }

    fn account(&self) -> &str {
        "website"
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    async fn run(&self, ctx: &RunContext) -> SyncResult<RunReport> {
        let started = Instant::now();
        let run_started = now_ts();
        let cursor = self
            .store
            .load_cursor(PULL_NAME)
            .await
            .map_err(SyncError::fatal)?;
        let since = cursor.last_watermark.clone();

        let mut report = RunReport::default();
        let mut newest_remote: Option<i64> = None;
        let mut page = 1u32;

        loop {
            if ctx.cancel.is_cancelled() {
                return Ok(report);
            }

            let envelope = match self
                .website
                .tickets_page(page, PULL_PAGE_SIZE, since.as_deref())
                .await
            {
                Ok(envelope) => envelope,
                Err(SyncError::NotFound(_)) if page == 1 => {
                    debug!(pipeline = PULL_NAME, "v1 tickets endpoint absent; using legacy feed");
                    self.run_legacy(ctx, &mut report).await?;
                    break;
                }
                Err(err) => return Err(err),
            };

            let batch = envelope.data.len();
            report.fetched += batch;

            for value in &envelope.data {
                let observed = value
                    .get("updatedAt")
                    .or_else(|| value.get("updated_at"))
                    .and_then(|v| v.as_str())
                    .and_then(shapes::parse_instant);
                if let Some(ts) = observed {
                    newest_remote = Some(newest_remote.map_or(ts, |n| n.max(ts)));
                }
                self.apply(value, &mut report).await?;
            }

            if batch < PULL_PAGE_SIZE as usize
                || report.fetched >= PULL_MAX_ITEMS
                || page >= PULL_MAX_PAGES
            {
                break;
            }
            page += 1;
        }

        report.watermark = Some(watermark_for_run(run_started, newest_remote));
        info!(
            pipeline = PULL_NAME,
            fetched = report.fetched,
            applied = report.applied,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ticket pull complete"
        );
        Ok(report)
    }
}

/// Pushes locally edited tickets (status, resolution, replies) back to the
/// website.
pub struct TicketsPush {
    store: Store,
    website: Arc<WebsiteClient>,
    cadence: Duration,
}

impl TicketsPush {
    pub fn new(store: Store, website: Arc<WebsiteClient>, cadence: Duration) -> Self {
        TicketsPush {
            store,
            website,
            cadence,
        }
    }
}

#[async_trait]
impl Pipeline for TicketsPush {
    fn name(&self) -> &str {
        PUSH_NAME
    }

    fn account(&self) -> &str {
        "website"
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    async fn run(&self, ctx: &RunContext) -> SyncResult<RunReport> {
        let started = Instant::now();
        let pending = self
            .store
            .tickets_for_push(PUSH_BATCH)
            .await
            .map_err(SyncError::fatal)?;

        let mut report = RunReport {
            fetched: pending.len(),
            ..RunReport::default()
        };

        for update in &pending {
            if ctx.cancel.is_cancelled() {
                // Unpushed items keep their pending state.
                return Ok(report);
            }
            match self.website.push_ticket_update(update).await {
                Ok(()) => {
                    self.store
                        .set_ticket_sync(update.id, SyncState::Synced, None)
                        .await
                        .map_err(SyncError::fatal)?;
                    report.applied += 1;
                }
                Err(err) if err.is_item_level() => {
                    warn!(
                        pipeline = PUSH_NAME,
                        ticket = %update.ticket_number,
                        error = %err,
                        "Ticket push rejected"
                    );
                    self.store
                        .set_ticket_sync(update.id, SyncState::Error, Some(&err.to_string()))
                        .await
                        .map_err(SyncError::fatal)?;
                    report.failed += 1;
                }
                Err(err) if err.is_item_retry() => {
                    warn!(
                        pipeline = PUSH_NAME,
                        ticket = %update.ticket_number,
                        error = %err,
                        "Ticket push attempt failed; retrying next run"
                    );
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if report.fetched > 0 {
            info!(
                pipeline = PUSH_NAME,
                pushed = report.applied,
                failed = report.failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Ticket push complete"
            );
        }
        Ok(report)
    }
}
