use anyhow::{Context, Result};
use sqlx::Row;

use crate::types::{now_ts, Contact, ContactStatus, SyncState};

use super::Store;

/// Remote-owned contact fields, as produced by the customers pull pipeline
/// or a ticket's customer block.
#[derive(Clone, Debug, Default)]
pub struct CustomerUpsert {
    pub name: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub status: Option<ContactStatus>,
}

impl Store {
    /// Pull upsert. Located by email when present, else by (company, name).
    /// On hit only remote-owned fields are updated; status and the
    /// accounting sync fields belong to the local side. Returns
    /// `(contact_id, inserted)`.
    pub async fn upsert_customer(&self, customer: &CustomerUpsert) -> Result<(i64, bool)> {
        let existing = match &customer.email {
            Some(email) => self.find_contact_id_by_email(email).await?,
            None => {
                self.find_contact_id_by_company_name(customer.company.as_deref(), &customer.name)
                    .await?
            }
        };

        let now = now_ts();
        match existing {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE contacts
                    SET name = ?1, company = ?2, phone = ?3, address = ?4, updated_at = ?5
                    WHERE id = ?6;
                    "#,
                )
                .bind(&customer.name)
                .bind(&customer.company)
                .bind(&customer.phone)
                .bind(&customer.address)
                .bind(now)
                .bind(id)
                .execute(self.pool())
                .await
                .context("updating contact from remote")?;
                Ok((id, false))
            }
            None => {
                let status = customer.status.unwrap_or(ContactStatus::Prospect);
                let res = sqlx::query(
                    r#"
                    INSERT INTO contacts (name, company, email, phone, address, status,
                                          accounting_sync, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'unsynced', ?7, ?8);
                    "#,
                )
                .bind(&customer.name)
                .bind(&customer.company)
                .bind(&customer.email)
                .bind(&customer.phone)
                .bind(&customer.address)
                .bind(status.as_str())
                .bind(now)
                .bind(now)
                .execute(self.pool())
                .await;

                match res {
                    Ok(done) => Ok((done.last_insert_rowid(), true)),
                    // Lost a race on the unique email; the row is there now.
                    Err(err) if is_unique_violation(&err) => {
                        let email = customer.email.as_deref().unwrap_or_default();
                        let id = self
                            .find_contact_id_by_email(email)
                            .await?
                            .context("contact vanished after unique conflict")?;
                        Ok((id, false))
                    }
                    Err(err) => Err(err).context("inserting contact"),
                }
            }
        }
    }

    pub async fn find_contact_id_by_email(&self, email: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM contacts WHERE email = ?1;")
            .bind(email)
            .fetch_optional(self.pool())
            .await
            .context("looking up contact by email")?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn find_contact_id_by_company_name(
        &self,
        company: Option<&str>,
        name: &str,
    ) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM contacts WHERE company IS ?1 AND name = ?2;")
            .bind(company)
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .context("looking up contact by company and name")?;
        Ok(row.map(|r| r.get(0)))
    }

    pub async fn get_contact(&self, id: i64) -> Result<Option<Contact>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1;"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .context("loading contact")?;
        Ok(row.map(map_contact))
    }

    /// Contacts due for the accounting push: everything not yet `synced`.
    /// The selected batch is moved to `pending` in the same transaction.
    pub async fn contacts_for_accounting_push(&self, limit: usize) -> Result<Vec<Contact>> {
        let mut tx = self.pool().begin().await.context("beginning push selection")?;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CONTACT_COLUMNS} FROM contacts
            WHERE accounting_sync IN ('unsynced', 'pending', 'error')
            ORDER BY id ASC
            LIMIT ?1;
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .context("listing contacts for accounting push")?;

        let mut contacts: Vec<Contact> = rows.into_iter().map(map_contact).collect();
        let ids: Vec<i64> = contacts.iter().map(|c| c.id).collect();
        super::db::mark_batch_pending(&mut tx, "contacts", "accounting_sync", &ids).await?;
        tx.commit().await.context("committing push selection")?;

        for contact in &mut contacts {
            contact.accounting_sync = SyncState::Pending;
        }
        Ok(contacts)
    }

    pub async fn set_contact_accounting(
        &self,
        id: i64,
        state: SyncState,
        accounting_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE contacts
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
        .context("updating contact accounting state")?;
        Ok(())
    }
}

const CONTACT_COLUMNS: &str = "id, name, company, email, phone, address, status, \
     accounting_id, accounting_sync, sync_error, created_at, updated_at";

pub(super) fn map_contact(row: sqlx::sqlite::SqliteRow) -> Contact {
    Contact {
        id: row.get(0),
        name: row.get(1),
        company: row.get(2),
        email: row.get(3),
        phone: row.get(4),
        address: row.get(5),
        status: ContactStatus::parse(&row.get::<String, _>(6)),
        accounting_id: row.get(7),
        accounting_sync: SyncState::parse(&row.get::<String, _>(8)),
        sync_error: row.get(9),
        created_at: row.get(10),
        updated_at: row.get(11),
    }
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}
