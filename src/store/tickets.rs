use anyhow::{Context, Result};
use sqlx::Row;

use crate::types::{now_ts, SyncState, Ticket, TicketPriority, TicketSender, TicketStatus};

use super::contacts::CustomerUpsert;
use super::Store;

/// A ticket as normalized from either API shape.
#[derive(Clone, Debug)]
pub struct RemoteTicket {
    pub ticket_number: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_company: Option<String>,
    pub subject: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub created_at: Option<i64>,
    pub messages: Vec<RemoteTicketMessage>,
}

#[derive(Clone, Debug)]
pub struct RemoteTicketMessage {
    pub remote_id: Option<String>,
    pub sender: TicketSender,
    pub body: String,
    pub internal: bool,
    pub created_at: i64,
}

/// Locally edited fields waiting to be pushed back to the website.
#[derive(Clone, Debug)]
pub struct TicketLocalUpdate {
    pub id: i64,
    pub ticket_number: String,
    pub status: TicketStatus,
    pub resolution: Option<String>,
    pub reply: Option<String>,
}

impl Store {
    /// Pull upsert keyed on `ticket_number`. One transaction covers the
    /// ticket row, its appended messages, and the optional contact
    /// placeholder. Remote-owned fields only: local status/assignee edits
    /// and AI fields survive re-observation. Returns `(id, inserted)`.
    pub async fn upsert_ticket(&self, ticket: &RemoteTicket) -> Result<(i64, bool)> {
        let now = now_ts();
        let contact_id = match &ticket.customer_email {
            Some(email) => {
                let placeholder = CustomerUpsert {
                    name: ticket
                        .customer_name
                        .clone()
                        .unwrap_or_else(|| email.clone()),
                    company: ticket.customer_company.clone(),
                    email: Some(email.clone()),
                    phone: ticket.customer_phone.clone(),
                    address: None,
                    status: None,
                };
                Some(self.upsert_customer(&placeholder).await?.0)
            }
            None => None,
        };

        let mut tx = self.pool().begin().await.context("beginning ticket tx")?;

        let existing = sqlx::query("SELECT id FROM tickets WHERE ticket_number = ?1;")
            .bind(&ticket.ticket_number)
            .fetch_optional(&mut *tx)
            .await
            .context("looking up ticket")?;

        let (ticket_id, inserted) = match existing {
            Some(row) => {
                let id: i64 = row.get(0);
                sqlx::query(
                    r#"
                    UPDATE tickets
                    SET customer_id = ?1, customer_name = ?2, customer_email = ?3,
                        customer_phone = ?4, customer_company = ?5, contact_id = COALESCE(?6, contact_id),
                        subject = ?7, description = ?8, category = ?9, priority = ?10,
                        updated_at = ?11
                    WHERE id = ?12;
                    "#,
                )
                .bind(&ticket.customer_id)
                .bind(&ticket.customer_name)
                .bind(&ticket.customer_email)
                .bind(&ticket.customer_phone)
                .bind(&ticket.customer_company)
                .bind(contact_id)
                .bind(&ticket.subject)
                .bind(&ticket.description)
                .bind(&ticket.category)
                .bind(ticket.priority.as_str())
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("updating ticket from remote")?;
                (id, false)
            }
            None => {
                // New open tickets are flagged for AI analysis downstream.
                let ai_requested = ticket.status == TicketStatus::Open;
                let res = sqlx::query(
                    r#"
                    INSERT INTO tickets (ticket_number, customer_id, customer_name, customer_email,
                                         customer_phone, customer_company, contact_id, subject,
                                         description, category, priority, status, ai_requested,
                                         remote_sync, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'synced', ?14, ?15);
                    "#,
                )
                .bind(&ticket.ticket_number)
                .bind(&ticket.customer_id)
                .bind(&ticket.customer_name)
                .bind(&ticket.customer_email)
                .bind(&ticket.customer_phone)
                .bind(&ticket.customer_company)
                .bind(contact_id)
                .bind(&ticket.subject)
                .bind(&ticket.description)
                .bind(&ticket.category)
                .bind(ticket.priority.as_str())
                .bind(ticket.status.as_str())
                .bind(if ai_requested { 1 } else { 0 })
                .bind(ticket.created_at.unwrap_or(now))
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("inserting ticket")?;
                (res.last_insert_rowid(), true)
            }
        };

        for message in &ticket.messages {
            // remote_id dedupes re-observed messages; messages without one
            // are only appended when the ticket is new.
            if message.remote_id.is_none() && !inserted {
                continue;
            }
            let res = sqlx::query(
                r#"
                INSERT INTO ticket_messages (ticket_id, remote_id, sender, body, internal, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6);
                "#,
            )
            .bind(ticket_id)
            .bind(&message.remote_id)
            .bind(message.sender.as_str())
            .bind(&message.body)
            .bind(if message.internal { 1 } else { 0 })
            .bind(message.created_at)
            .execute(&mut *tx)
            .await;
            if let Err(err) = res {
                if super::contacts::is_unique_violation(&err) {
                    continue;
                }
                return Err(err).context("appending ticket message");
            }
        }

        tx.commit().await.context("committing ticket tx")?;
        Ok((ticket_id, inserted))
    }

    /// Local edit from the embedding process: status/assignee/resolution
    /// change marks the ticket for the next push run.
    pub async fn update_ticket_local(
        &self,
        id: i64,
        status: TicketStatus,
        assignee: Option<&str>,
        resolution: Option<&str>,
    ) -> Result<()> {
        let now = now_ts();
        let resolved_at = matches!(status, TicketStatus::Resolved | TicketStatus::Closed)
            .then_some(now);
        sqlx::query(
            r#"
            UPDATE tickets
            SET status = ?1, assignee = ?2, resolution = COALESCE(?3, resolution),
                resolved_at = COALESCE(?4, resolved_at),
                remote_sync = 'pending', sync_error = NULL, updated_at = ?5
            WHERE id = ?6;
            "#,
        )
        .bind(status.as_str())
        .bind(assignee)
        .bind(resolution)
        .bind(resolved_at)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .context("updating ticket locally")?;
        Ok(())
    }

    /// Selects the next push batch and marks it `pending` in one
    /// transaction.
    pub async fn tickets_for_push(&self, limit: usize) -> Result<Vec<TicketLocalUpdate>> {
        let mut tx = self.pool().begin().await.context("beginning push selection")?;
        let rows = sqlx::query(
            r#"
            SELECT id, ticket_number, status, resolution
            FROM tickets
            WHERE remote_sync IN ('unsynced', 'pending', 'error')
            ORDER BY updated_at ASC
            LIMIT ?1;
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .context("listing tickets for push")?;

        let updates: Vec<TicketLocalUpdate> = rows
            .into_iter()
            .map(|row| TicketLocalUpdate {
                id: row.get(0),
                ticket_number: row.get(1),
                status: TicketStatus::parse(&row.get::<String, _>(2)),
                resolution: row.get(3),
                reply: None,
            })
            .collect();

        let ids: Vec<i64> = updates.iter().map(|u| u.id).collect();
        super::db::mark_batch_pending(&mut tx, "tickets", "remote_sync", &ids).await?;
        tx.commit().await.context("committing push selection")?;
        Ok(updates)
    }

    pub async fn set_ticket_sync(
        &self,
        id: i64,
        state: SyncState,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE tickets SET remote_sync = ?1, sync_error = ?2, updated_at = ?3 WHERE id = ?4;",
        )
        .bind(state.as_str())
        .bind(error.map(crate::errors::truncate_error))
        .bind(now_ts())
        .bind(id)
        .execute(self.pool())
        .await
        .context("updating ticket sync state")?;
        Ok(())
    }

    pub async fn get_ticket_by_number(&self, ticket_number: &str) -> Result<Option<Ticket>> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE ticket_number = ?1;"
        ))
        .bind(ticket_number)
        .fetch_optional(self.pool())
        .await
        .context("loading ticket by number")?;
        Ok(row.map(map_ticket))
    }

    pub async fn count_ticket_messages(&self, ticket_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM ticket_messages WHERE ticket_id = ?1;")
            .bind(ticket_id)
            .fetch_one(self.pool())
            .await
            .context("counting ticket messages")?;
        Ok(row.get(0))
    }
}

const TICKET_COLUMNS: &str = "id, ticket_number, customer_id, customer_name, customer_email, \
     customer_phone, customer_company, contact_id, monitored_service_id, subject, description, \
     category, priority, status, assignee, ai_requested, ai_summary, ai_suggested_reply, \
     resolution, first_response_at, resolved_at, remote_sync, sync_error, created_at, updated_at";

fn map_ticket(row: sqlx::sqlite::SqliteRow) -> Ticket {
    Ticket {
        id: row.get(0),
        ticket_number: row.get(1),
        customer_id: row.get(2),
        customer_name: row.get(3),
        customer_email: row.get(4),
        customer_phone: row.get(5),
        customer_company: row.get(6),
        contact_id: row.get(7),
        monitored_service_id: row.get(8),
        subject: row.get(9),
        description: row.get(10),
        category: row.get(11),
        priority: TicketPriority::parse(&row.get::<String, _>(12)),
        status: TicketStatus::parse(&row.get::<String, _>(13)),
        assignee: row.get(14),
        ai_requested: row.get::<i64, _>(15) == 1,
        ai_summary: row.get(16),
        ai_suggested_reply: row.get(17),
        resolution: row.get(18),
        first_response_at: row.get(19),
        resolved_at: row.get(20),
        remote_sync: SyncState::parse(&row.get::<String, _>(21)),
        sync_error: row.get(22),
        created_at: row.get(23),
        updated_at: row.get(24),
    }
}
