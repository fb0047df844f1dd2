use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::{SyncError, SyncResult};
use crate::remote::shapes::normalize_payment;
use crate::remote::website::WebsiteClient;
use crate::store::Store;

use super::{Pipeline, RunContext, RunReport};

pub const NAME: &str = "payments-pull";

/// Turns unsynced website payments into paid invoices, then acks them with
/// the invoice numbers they produced. The feed is legacy-only and has no
/// watermark; idempotency rests entirely on the payment reference.
pub struct PaymentsPull {
    store: Store,
    website: Arc<WebsiteClient>,
    cadence: Duration,
}

impl PaymentsPull {
    pub fn new(store: Store, website: Arc<WebsiteClient>, cadence: Duration) -> Self {
        PaymentsPull {
            store,
            website,
            cadence,
        }
    }
}

#[async_trait]
impl Pipeline for PaymentsPull {
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
        let payments = self.website.unsynced_payments().await?;

        let mut report = RunReport {
            fetched: payments.len(),
            ..RunReport::default()
        };
        let mut acked_ids: Vec<String> = Vec::new();
        let mut invoice_mapping: HashMap<String, String> = HashMap::new();

        for value in &payments {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let normalized = match normalize_payment(value) {
                Ok(normalized) => normalized,
                Err(err) if err.is_item_level() => {
                    warn!(pipeline = NAME, error = %err, "Skipping payment record");
                    report.failed += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let (invoice_id, inserted) = self
                .store
                .insert_invoice_from_payment(&normalized.import)
                .await
                .map_err(SyncError::fatal)?;
            if inserted {
                report.applied += 1;
            }

            // Re-observed payments are acked again; the ack may have been
            // the part that failed last run.
            let invoice = self
                .store
                .get_invoice(invoice_id)
                .await
                .map_err(SyncError::fatal)?
                .ok_or_else(|| SyncError::Fatal("invoice vanished after insert".into()))?;
            invoice_mapping.insert(normalized.remote_id.clone(), invoice.number);
            acked_ids.push(normalized.remote_id);
        }

        if !acked_ids.is_empty() {
            // An ack failure aborts the run; the invoices are already
            // committed and the next run re-acks the same references.
            self.website.ack_payments(&acked_ids, &invoice_mapping).await?;
        }

        if report.fetched > 0 {
            info!(
                pipeline = NAME,
                fetched = report.fetched,
                invoiced = report.applied,
                failed = report.failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Payment pull complete"
            );
        }
        Ok(report)
    }
}
