use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::{SyncError, SyncResult};
use crate::remote::shapes::{self, normalize_customer};
use crate::remote::website::WebsiteClient;
use crate::store::Store;
use crate::types::now_ts;

use super::{
    watermark_for_run, Pipeline, RunContext, RunReport, PULL_MAX_ITEMS, PULL_MAX_PAGES,
    PULL_PAGE_SIZE,
};

pub const NAME: &str = "customers-pull";

/// Pages the website's customer list into the contacts table.
pub struct CustomersPull {
    store: Store,
    website: Arc<WebsiteClient>,
    cadence: Duration,
}

impl CustomersPull {
    pub fn new(store: Store, website: Arc<WebsiteClient>, cadence: Duration) -> Self {
        CustomersPull {
            store,
            website,
            cadence,
        }
    }
}

#[async_trait]
impl Pipeline for CustomersPull {
    fn name(&self) -> &str {
        NAME
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
            .load_cursor(NAME)
            .await
            .map_err(SyncError::fatal)?;
        let since = cursor.last_watermark.clone();

        let mut report = RunReport::default();
        let mut newest_remote: Option<i64> = None;
        let mut page = 1u32;

        loop {
            if ctx.cancel.is_cancelled() {
                // Partial run; the watermark stays put so nothing is lost.
                return Ok(report);
            }

            let envelope = self
                .website
                .customers_page(page, PULL_PAGE_SIZE, since.as_deref())
                .await?;
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

                match normalize_customer(value) {
                    Ok(customer) => {
                        self.store
                            .upsert_customer(&customer)
                            .await
                            .map_err(SyncError::fatal)?;
                        report.applied += 1;
                    }
                    Err(err) if err.is_item_level() => {
                        warn!(pipeline = NAME, error = %err, "Skipping customer record");
                        report.failed += 1;
                    }
                    Err(err) => return Err(err),
                }
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
            pipeline = NAME,
            fetched = report.fetched,
            applied = report.applied,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Customer pull complete"
        );
        Ok(report)
    }
}
