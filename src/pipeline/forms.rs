use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::{SyncError, SyncResult};
use crate::remote::shapes::normalize_form;
use crate::remote::website::WebsiteClient;
use crate::store::Store;
use crate::types::FormKind;

use super::{Pipeline, RunContext, RunReport};

pub const NAME: &str = "forms-pull";

/// Ingests contact/quote form submissions and work orders from the legacy
/// admin feeds, acking each batch with the local ids it produced.
pub struct FormsPull {
    store: Store,
    website: Arc<WebsiteClient>,
    cadence: Duration,
}

impl FormsPull {
    pub fn new(store: Store, website: Arc<WebsiteClient>, cadence: Duration) -> Self {
        FormsPull {
            store,
            website,
            cadence,
        }
    }

    async fn ingest_batch(
        &self,
        ctx: &RunContext,
        items: &[serde_json::Value],
        remote_prefix: &str,
        default_kind: FormKind,
        report: &mut RunReport,
    ) -> SyncResult<(Vec<String>, HashMap<String, i64>)> {
        let mut acked_ids = Vec::new();
        let mut mapping = HashMap::new();

        for value in items {
            if ctx.cancel.is_cancelled() {
                break;
            }
            match normalize_form(value, remote_prefix, default_kind) {
                Ok((remote_id, form)) => {
                    let (local_id, inserted) = self
                        .store
                        .insert_form_submission(&form)
                        .await
                        .map_err(SyncError::fatal)?;
                    if inserted {
                        report.applied += 1;
                    }
                    if let Some(remote_id) = remote_id {
                        mapping.insert(remote_id.clone(), local_id);
                        acked_ids.push(remote_id);
                    }
                }
                Err(err) if err.is_item_level() => {
                    warn!(pipeline = NAME, error = %err, "Skipping form record");
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok((acked_ids, mapping))
    }
}

#[async_trait]
impl Pipeline for FormsPull {
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
        let mut report = RunReport::default();

        let forms = self.website.unsynced_forms().await?;
        report.fetched += forms.len();
        let (form_ids, form_mapping) = self
            .ingest_batch(ctx, &forms, "form:", FormKind::Contact, &mut report)
            .await?;
        if !form_ids.is_empty() {
            self.website.ack_forms(&form_ids, &form_mapping).await?;
        }

        let orders = self.website.unsynced_work_orders().await?;
        report.fetched += orders.len();
        let (order_ids, order_mapping) = self
            .ingest_batch(ctx, &orders, "order:", FormKind::WorkOrder, &mut report)
            .await?;
        if !order_ids.is_empty() {
            self.website
                .ack_work_orders(&order_ids, &order_mapping)
                .await?;
        }

        if report.fetched > 0 {
            info!(
                pipeline = NAME,
                fetched = report.fetched,
                applied = report.applied,
                failed = report.failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Form pull complete"
            );
        }
        Ok(report)
    }
}
