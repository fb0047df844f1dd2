use anyhow::{Context, Result};
use sqlx::Row;

use crate::types::{now_ts, Lead, LeadStatus};

use super::contacts::is_unique_violation;
use super::Store;

#[derive(Clone, Debug, Default)]
pub struct LeadImport {
    pub business_name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub quality_score: u8,
    pub website_exists: bool,
}

impl Store {
    /// Idempotent on (business_name, city). Re-imports refresh the contact
    /// channels and score but never touch status or the converted FK.
    pub async fn upsert_lead(&self, lead: &LeadImport) -> Result<(i64, bool)> {
        let now = now_ts();
        let res = sqlx::query(
            r#"
            INSERT INTO leads (business_name, address, city, email, phone, quality_score,
                               website_exists, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'new', ?8, ?9);
            "#,
        )
        .bind(&lead.business_name)
        .bind(&lead.address)
        .bind(&lead.city)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(lead.quality_score.min(100) as i64)
        .bind(if lead.website_exists { 1 } else { 0 })
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await;

        match res {
            Ok(done) => Ok((done.last_insert_rowid(), true)),
            Err(err) if is_unique_violation(&err) => {
                let row = sqlx::query(
                    "SELECT id FROM leads WHERE business_name = ?1 AND city IS ?2;",
                )
                .bind(&lead.business_name)
                .bind(&lead.city)
                .fetch_one(self.pool())
                .await
                .context("reloading lead after unique conflict")?;
                let id: i64 = row.get(0);
                sqlx::query(
                    r#"
                    UPDATE leads
                    SET address = ?1, email = ?2, phone = ?3, quality_score = ?4,
                        website_exists = ?5, updated_at = ?6
                    WHERE id = ?7;
                    "#,
                )
                .bind(&lead.address)
                .bind(&lead.email)
                .bind(&lead.phone)
                .bind(lead.quality_score.min(100) as i64)
                .bind(if lead.website_exists { 1 } else { 0 })
                .bind(now)
                .bind(id)
                .execute(self.pool())
                .await
                .context("refreshing lead on re-import")?;
                Ok((id, false))
            }
            Err(err) => Err(err).context("inserting lead"),
        }
    }

    pub async fn get_lead(&self, id: i64) -> Result<Option<Lead>> {
        let row = sqlx::query(
            r#"
            SELECT id, business_name, address, city, email, phone, quality_score,
                   website_exists, status, contact_id, created_at, updated_at
            FROM leads WHERE id = ?1;
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .context("loading lead")?;
        Ok(row.map(map_lead))
    }

    /// Creates a Contact from a Lead and flips the Lead to `converted` in
    /// one transaction; both rows move together or not at all.
    pub async fn convert_lead_to_contact(&self, lead_id: i64) -> Result<i64> {
        let lead = self
            .get_lead(lead_id)
            .await?
            .with_context(|| format!("lead {lead_id} not found"))?;
        if lead.status == LeadStatus::Converted {
            if let Some(contact_id) = lead.contact_id {
                return Ok(contact_id);
            }
        }

        let now = now_ts();
        let mut tx = self.pool().begin().await.context("beginning conversion tx")?;

        let res = sqlx::query(
            r#"
            INSERT INTO contacts (name, company, email, phone, address, status,
                                  accounting_sync, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'prospect', 'unsynced', ?6, ?7);
            "#,
        )
        .bind(&lead.business_name)
        .bind(&lead.business_name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.address)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("creating contact from lead")?;
        let contact_id = res.last_insert_rowid();

        sqlx::query(
            "UPDATE leads SET status = 'converted', contact_id = ?1, updated_at = ?2 WHERE id = ?3;",
        )
        .bind(contact_id)
        .bind(now)
        .bind(lead_id)
        .execute(&mut *tx)
        .await
        .context("marking lead converted")?;

        tx.commit().await.context("committing lead conversion")?;
        Ok(contact_id)
    }
}

fn map_lead(row: sqlx::sqlite::SqliteRow) -> Lead {
    Lead {
        id: row.get(0),
        business_name: row.get(1),
        address: row.get(2),
        city: row.get(3),
        email: row.get(4),
        phone: row.get(5),
        quality_score: row.get::<i64, _>(6) as u8,
        website_exists: row.get::<i64, _>(7) == 1,
        status: LeadStatus::parse(&row.get::<String, _>(8)),
        contact_id: row.get(9),
        created_at: row.get(10),
        updated_at: row.get(11),
    }
}
