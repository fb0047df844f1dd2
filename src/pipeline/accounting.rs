use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::{SyncError, SyncResult};
use crate::remote::accounting::AccountingClient;
use crate::store::Store;
use crate::types::{Contact, SyncState};

use super::{Pipeline, RunContext, RunReport, PUSH_BATCH};

pub const NAME: &str = "accounting-push";

/// Pushes contacts as relations and paid invoices as sales bookings into
/// the bookkeeping system. Contacts go first; an invoice whose contact has
/// no relation yet gets the contact pushed inline, inside the same item
/// boundary, so a relation failure marks the invoice and not half of it.
pub struct AccountingPush {
    store: Store,
    accounting: Arc<AccountingClient>,
    cadence: Duration,
}

impl AccountingPush {
    pub fn new(store: Store, accounting: Arc<AccountingClient>, cadence: Duration) -> Self {
        AccountingPush {
            store,
            accounting,
            cadence,
        }
    }

    /// Ensures the contact has a remote relation; returns its id.
    async fn ensure_relation(&self, contact: &Contact) -> SyncResult<String> {
        if let Some(id) = &contact.accounting_id {
            return Ok(id.clone());
        }
        let relation_id = self.accounting.create_relation(contact).await?;
        self.store
            .set_contact_accounting(contact.id, SyncState::Synced, Some(&relation_id), None)
            .await
            .map_err(SyncError::fatal)?;
        Ok(relation_id)
    }
}

#[async_trait]
impl Pipeline for AccountingPush {
    fn name(&self) -> &str {
        NAME
    }

    fn account(&self) -> &str {
        "accounting"
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    async fn run(&self, ctx: &RunContext) -> SyncResult<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::default();

        let contacts = self
            .store
            .contacts_for_accounting_push(PUSH_BATCH)
            .await
            .map_err(SyncError::fatal)?;
        report.fetched += contacts.len();

        for contact in &contacts {
            if ctx.cancel.is_cancelled() {
                return Ok(report);
            }
            match self.ensure_relation(contact).await {
                Ok(_) => report.applied += 1,
                Err(err) if err.is_item_level() => {
                    warn!(
                        pipeline = NAME,
                        contact_id = contact.id,
                        error = %err,
                        "Relation push rejected"
                    );
                    self.store
                        .set_contact_accounting(
                            contact.id,
                            SyncState::Error,
                            None,
                            Some(&err.to_string()),
                        )
                        .await
                        .map_err(SyncError::fatal)?;
                    report.failed += 1;
                }
                Err(err) if err.is_item_retry() => {
                    warn!(
                        pipeline = NAME,
                        contact_id = contact.id,
                        error = %err,
                        "Relation push attempt failed; retrying next run"
                    );
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }

        let invoices = self
            .store
            .invoices_for_accounting_push(PUSH_BATCH)
            .await
            .map_err(SyncError::fatal)?;
        report.fetched += invoices.len();

        for invoice in &invoices {
            if ctx.cancel.is_cancelled() {
                return Ok(report);
            }

            let outcome = self.push_invoice(invoice).await;
            match outcome {
                Ok(booking_id) => {
                    self.store
                        .set_invoice_accounting(
                            invoice.id,
                            SyncState::Synced,
                            Some(&booking_id),
                            None,
                        )
                        .await
                        .map_err(SyncError::fatal)?;
                    report.applied += 1;
                }
                Err(err) if err.is_item_level() => {
                    warn!(
                        pipeline = NAME,
                        invoice = %invoice.number,
                        error = %err,
                        "Booking push rejected"
                    );
                    self.store
                        .set_invoice_accounting(
                            invoice.id,
                            SyncState::Error,
                            None,
                            Some(&err.to_string()),
                        )
                        .await
                        .map_err(SyncError::fatal)?;
                    report.failed += 1;
                }
                Err(err) if err.is_item_retry() => {
                    warn!(
                        pipeline = NAME,
                        invoice = %invoice.number,
                        error = %err,
                        "Booking push attempt failed; retrying next run"
                    );
                    report.failed += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if report.fetched > 0 {
            info!(
                pipeline = NAME,
                pushed = report.applied,
                failed = report.failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Accounting push complete"
            );
        }
        Ok(report)
    }
}

impl AccountingPush {
    async fn push_invoice(&self, invoice: &crate::types::Invoice) -> SyncResult<String> {
        let contact_id = invoice.contact_id.ok_or_else(|| {
            SyncError::Malformed(format!("invoice {} has no contact", invoice.number))
        })?;
        let contact = self
            .store
            .get_contact(contact_id)
            .await
            .map_err(SyncError::fatal)?
            .ok_or_else(|| SyncError::Fatal(format!("contact {contact_id} missing")))?;
        let relation_id = self.ensure_relation(&contact).await?;
        self.accounting
            .create_sales_booking(invoice, &relation_id)
            .await
    }
}
