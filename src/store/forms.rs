use anyhow::{Context, Result};
use sqlx::Row;

use crate::types::{now_ts, FormKind, FormStatus, FormSubmission};

use super::contacts::is_unique_violation;
use super::Store;

/// A form or work order normalized from any ingress (pull pipeline or
/// webhook).
#[derive(Clone, Debug)]
pub struct FormImport {
    pub kind: FormKind,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    /// `form:<remote-id>` / `order:<remote-id>`, or None for anonymous
    /// webhook posts.
    pub source: Option<String>,
    pub submitted_at: i64,
}

impl Store {
    /// Insert keyed on `source` when present; a duplicate source is treated
    /// as already ingested. Returns `(id, inserted)`.
    pub async fn insert_form_submission(&self, form: &FormImport) -> Result<(i64, bool)> {
        if let Some(source) = &form.source {
            if let Some(id) = self.find_form_id_by_source(source).await? {
                return Ok((id, false));
            }
        }

        let res = sqlx::query(
            r#"
            INSERT INTO form_submissions (kind, status, name, email, phone, company, subject,
                                          message, source, submitted_at, created_at)
            VALUES (?1, 'new', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);
            "#,
        )
        .bind(form.kind.as_str())
        .bind(&form.name)
        .bind(&form.email)
        .bind(&form.phone)
        .bind(&form.company)
        .bind(&form.subject)
        .bind(&form.message)
        .bind(&form.source)
        .bind(form.submitted_at)
        .bind(now_ts())
        .execute(self.pool())
        .await;

        match res {
            Ok(done) => Ok((done.last_insert_rowid(), true)),
            Err(err) if is_unique_violation(&err) => {
                let source = form.source.as_deref().unwrap_or_default();
                let id = self
                    .find_form_id_by_source(source)
                    .await?
                    .context("form vanished after unique conflict")?;
                Ok((id, false))
            }
            Err(err) => Err(err).context("inserting form submission"),
        }
    }

    pub async fn find_form_id_by_source(&self, source: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM form_submissions WHERE source = ?1;")
            .bind(source)
            .fetch_optional(self.pool())
            .await
            .context("looking up form by source")?;
        Ok(row.map(|r| r.get(0)))
    }

    pub async fn get_form_submission(&self, id: i64) -> Result<Option<FormSubmission>> {
        let row = sqlx::query(
            r#"
            SELECT id, kind, status, name, email, phone, company, subject, message, source,
                   submitted_at, created_at
            FROM form_submissions WHERE id = ?1;
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .context("loading form submission")?;

        Ok(row.map(|row| FormSubmission {
            id: row.get(0),
            kind: FormKind::parse(&row.get::<String, _>(1)),
            status: FormStatus::parse(&row.get::<String, _>(2)),
            name: row.get(3),
            email: row.get(4),
            phone: row.get(5),
            company: row.get(6),
            subject: row.get(7),
            message: row.get(8),
            source: row.get(9),
            submitted_at: row.get(10),
            created_at: row.get(11),
        }))
    }
}
