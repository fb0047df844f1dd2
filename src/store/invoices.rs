use anyhow::{Context, Result};
use chrono::{Datelike, TimeZone, Utc};
use sqlx::Row;

use crate::types::{now_ts, round2, Invoice, InvoiceDirection, InvoiceStatus, SyncState};

use super::Store;

/// A remote payment normalized for invoice creation. Amounts arrive
/// VAT-inclusive; the exclusive amount and VAT are recomputed here so the
/// rounding invariant holds by construction.
#[derive(Clone, Debug)]
pub struct PaymentImport {
    /// Remote payment id; the idempotency key (`reference`).
    pub reference: String,
    pub amount_incl_vat: f64,
    pub vat_percentage: f64,
    pub customer_email: Option<String>,
    pub description: String,
    pub paid_at: i64,
}

impl Store {
    /// Creates a paid outgoing invoice from a payment inside one
    /// transaction: number allocation and insert are atomic. Idempotent on
    /// `reference`; a re-observed payment returns the existing invoice id.
    pub async fn insert_invoice_from_payment(&self, payment: &PaymentImport) -> Result<(i64, bool)> {
        if let Some(existing) = self.find_invoice_id_by_reference(&payment.reference).await? {
            return Ok((existing, false));
        }

        let amount_incl = round2(payment.amount_incl_vat);
        let amount_excl = round2(amount_incl / (1.0 + payment.vat_percentage / 100.0));
        // Recompute VAT from the two rounded sides (rounding-safe).
        let vat_amount = round2(amount_incl - amount_excl);

        let year = Utc
            .timestamp_opt(payment.paid_at, 0)
            .single()
            .unwrap_or_else(Utc::now)
            .year();
        let now = now_ts();

        let contact_id = match &payment.customer_email {
            Some(email) => self.find_contact_id_by_email(email).await?,
            None => None,
        };

        let mut tx = self.pool().begin().await.context("beginning invoice tx")?;

        // Numbers are never reused: allocate past the highest sequence on
        // file, so a deleted invoice leaves a gap instead of a collision.
        // The `FAC-<year>-` prefix is nine characters.
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(CAST(substr(number, 10) AS INTEGER)), 0)
            FROM invoices
            WHERE year = ?1 AND direction = 'outgoing';
            "#,
        )
        .bind(year)
        .fetch_one(&mut *tx)
        .await
        .context("allocating next invoice number")?;
        let seq: i64 = row.get::<i64, _>(0) + 1;
        let number = format!("FAC-{year}-{seq:04}");

        let res = sqlx::query(
            r#"
            INSERT INTO invoices (direction, status, number, year, contact_id, company_name,
                                  description, amount_excl_vat, vat_percentage, vat_amount,
                                  amount_incl_vat, invoice_date, paid_at, reference,
                                  accounting_sync, created_at, updated_at)
            VALUES ('outgoing', 'paid', ?1, ?2, ?3, NULL, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                    'unsynced', ?12, ?13);
            "#,
        )
        .bind(&number)
        .bind(year)
        .bind(contact_id)
        .bind(&payment.description)
        .bind(amount_excl)
        .bind(payment.vat_percentage)
        .bind(vat_amount)
        .bind(amount_incl)
        .bind(payment.paid_at)
        .bind(payment.paid_at)
        .bind(&payment.reference)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("inserting invoice from payment")?;
        let id = res.last_insert_rowid();

        tx.commit().await.context("committing invoice tx")?;
        Ok((id, true))
    }

    /// Removes an invoice outright. Its number is not reissued.
    pub async fn delete_invoice(&self, id: i64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM invoices WHERE id = ?1;")
            .bind(id)
            .execute(self.pool())
            .await
            .context("deleting invoice")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn find_invoice_id_by_reference(&self, reference: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM invoices WHERE reference = ?1;")
            .bind(reference)
            .fetch_optional(self.pool())
            .await
            .context("looking up invoice by reference")?;
        Ok(row.map(|r| r.get(0)))
    }

    pub async fn get_invoice(&self, id: i64) -> Result<Option<Invoice>> {
        let row = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1;"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .context("loading invoice")?;
        Ok(row.map(map_invoice))
    }

    /// Outgoing invoices due for the accounting push. The selected batch is
    /// moved to `pending` in the same transaction.
    pub async fn invoices_for_accounting_push(&self, limit: usize) -> Result<Vec<Invoice>> {
        let mut tx = self.pool().begin().await.context("beginning push selection")?;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {INVOICE_COLUMNS} FROM invoices
            WHERE direction = 'outgoing'
              AND accounting_sync IN ('unsynced', 'pending', 'error')
            ORDER BY id ASC
            LIMIT ?1;
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .context("listing invoices for accounting push")?;

        let mut invoices: Vec<Invoice> = rows.into_iter().map(map_invoice).collect();
        let ids: Vec<i64> = invoices.iter().map(|i| i.id).collect();
        super::db::mark_batch_pending(&mut tx, "invoices", "accounting_sync", &ids).await?;
        tx.commit().await.context("committing push selection")?;

        for invoice in &mut invoices {
            invoice.accounting_sync = SyncState::Pending;
        }
        Ok(invoices)
    }

    pub async fn set_invoice_accounting(
        &self,
        id: i64,
        state: SyncState,
        accounting_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET accounting_sync = ?1,
                accounting_id = COALESCE(?2, accounting_id),
                sync_error = ?3,
                updated_at = ?4
            WHERE id = ?5;
            "#,
        )
        .bind(state.as_str())
        .bind(accounting_id)
        .bind(error.map(crate::errors::truncate_error))
        .bind(now_ts())
        .bind(id)
        .execute(self.pool())
        .await
        .context("updating invoice accounting state")?;
        Ok(())
    }
}

const INVOICE_COLUMNS: &str = "id, direction, status, number, year, contact_id, company_name, \
     description, amount_excl_vat, vat_percentage, vat_amount, amount_incl_vat, invoice_date, \
     due_date, paid_at, file_path, reference, accounting_id, accounting_sync, sync_error, \
     created_at, updated_at";

fn map_invoice(row: sqlx::sqlite::SqliteRow) -> Invoice {
    Invoice {
        id: row.get(0),
        direction: InvoiceDirection::parse(&row.get::<String, _>(1)),
        status: InvoiceStatus::parse(&row.get::<String, _>(2)),
        number: row.get(3),
        year: row.get(4),
        contact_id: row.get(5),
        company_name: row.get(6),
        description: row.get(7),
        amount_excl_vat: row.get(8),
        vat_percentage: row.get(9),
        vat_amount: row.get(10),
        amount_incl_vat: row.get(11),
        invoice_date: row.get(12),
        due_date: row.get(13),
        paid_at: row.get(14),
        file_path: row.get(15),
        reference: row.get(16),
        accounting_id: row.get(17),
        accounting_sync: SyncState::parse(&row.get::<String, _>(18)),
        sync_error: row.get(19),
        created_at: row.get(20),
        updated_at: row.get(21),
    }
}
