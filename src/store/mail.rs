use anyhow::{Context, Result};
use sqlx::Row;

use crate::config::MailboxConfig;
use crate::crypto::SecretBox;
use crate::types::{now_ts, AttachmentRecord, Mailbox, MessageRecord};

use super::Store;

impl Store {
    /// Seeds or refreshes a mailbox from configuration. The password is
    /// encrypted before it touches the database.
    pub async fn upsert_mailbox(
        &self,
        config: &MailboxConfig,
        secrets: &SecretBox,
    ) -> Result<i64> {
        let password_enc = secrets
            .encrypt(&config.password)
            .context("encrypting mailbox password")?;
        let display_name = config
            .display_name
            .clone()
            .unwrap_or_else(|| config.username.clone());
        let now = now_ts();

        sqlx::query(
            r#"
            INSERT INTO mailboxes (host, imap_port, smtp_port, username, password_enc,
                                   display_name, active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(host, username) DO UPDATE SET
                imap_port = excluded.imap_port,
                smtp_port = excluded.smtp_port,
                password_enc = excluded.password_enc,
                display_name = excluded.display_name,
                active = excluded.active,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(&config.host)
        .bind(config.imap_port as i64)
        .bind(config.smtp_port as i64)
        .bind(&config.username)
        .bind(&password_enc)
        .bind(&display_name)
        .bind(if config.active { 1 } else { 0 })
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .context("upserting mailbox")?;

        let row = sqlx::query("SELECT id FROM mailboxes WHERE host = ?1 AND username = ?2;")
            .bind(&config.host)
            .bind(&config.username)
            .fetch_one(self.pool())
            .await
            .context("reloading mailbox id")?;
        Ok(row.get(0))
    }

    pub async fn list_active_mailboxes(&self) -> Result<Vec<Mailbox>> {
        let rows = sqlx::query(
            r#"
            SELECT id, host, imap_port, smtp_port, username, password_enc, display_name,
                   active, last_sync, created_at, updated_at
            FROM mailboxes
            WHERE active = 1
            ORDER BY id ASC;
            "#,
        )
        .fetch_all(self.pool())
        .await
        .context("listing mailboxes")?;

        Ok(rows
            .into_iter()
            .map(|row| Mailbox {
                id: row.get(0),
                host: row.get(1),
                imap_port: row.get::<i64, _>(2) as u16,
                smtp_port: row.get::<i64, _>(3) as u16,
                username: row.get(4),
                password_enc: row.get(5),
                display_name: row.get(6),
                active: row.get::<i64, _>(7) == 1,
                last_sync: row.get(8),
                created_at: row.get(9),
                updated_at: row.get(10),
            })
            .collect())
    }

    pub async fn get_mailbox(&self, id: i64) -> Result<Option<Mailbox>> {
        let row = sqlx::query(
            r#"
            SELECT id, host, imap_port, smtp_port, username, password_enc, display_name,
                   active, last_sync, created_at, updated_at
            FROM mailboxes WHERE id = ?1;
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .context("loading mailbox")?;
        Ok(row.map(|row| Mailbox {
            id: row.get(0),
            host: row.get(1),
            imap_port: row.get::<i64, _>(2) as u16,
            smtp_port: row.get::<i64, _>(3) as u16,
            username: row.get(4),
            password_enc: row.get(5),
            display_name: row.get(6),
            active: row.get::<i64, _>(7) == 1,
            last_sync: row.get(8),
            created_at: row.get(9),
            updated_at: row.get(10),
        }))
    }

    pub async fn update_mailbox_last_sync(&self, id: i64, last_sync: i64) -> Result<()> {
        sqlx::query("UPDATE mailboxes SET last_sync = ?1, updated_at = ?2 WHERE id = ?3;")
            .bind(last_sync)
            .bind(now_ts())
            .bind(id)
            .execute(self.pool())
            .await
            .context("updating mailbox watermark")?;
        Ok(())
    }

    pub async fn message_exists(&self, message_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM messages WHERE message_id = ?1;")
            .bind(message_id)
            .fetch_optional(self.pool())
            .await
            .context("checking message existence")?;
        Ok(row.is_some())
    }

    /// Stores a message and its attachments in one transaction. Duplicates
    /// by `message_id` are skipped; returns whether the row was inserted.
    pub async fn insert_message(
        &self,
        message: &MessageRecord,
        attachments: &[AttachmentRecord],
    ) -> Result<bool> {
        let mut tx = self.pool().begin().await.context("beginning message tx")?;

        let res = sqlx::query(
            r#"
            INSERT OR IGNORE INTO messages (message_id, mailbox_id, from_addr, from_name,
                                            to_addrs, subject, body_text, body_html, sent_at,
                                            folder, read, starred, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);
            "#,
        )
        .bind(&message.message_id)
        .bind(message.mailbox_id)
        .bind(&message.from_addr)
        .bind(&message.from_name)
        .bind(&message.to_addrs)
        .bind(&message.subject)
        .bind(&message.body_text)
        .bind(&message.body_html)
        .bind(message.sent_at)
        .bind(&message.folder)
        .bind(if message.read { 1 } else { 0 })
        .bind(if message.starred { 1 } else { 0 })
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .context("inserting message")?;

        let inserted = res.rows_affected() > 0;
        if inserted {
            for attachment in attachments {
                sqlx::query(
                    r#"
                    INSERT INTO attachments (message_id, file_name, file_path, size_bytes, mime_type)
                    VALUES (?1, ?2, ?3, ?4, ?5);
                    "#,
                )
                .bind(&message.message_id)
                .bind(&attachment.file_name)
                .bind(&attachment.file_path)
                .bind(attachment.size_bytes)
                .bind(&attachment.mime_type)
                .execute(&mut *tx)
                .await
                .context("inserting attachment")?;
            }
        }

        tx.commit().await.context("committing message tx")?;
        Ok(inserted)
    }

    /// Read/star flags are the only mutable Message fields.
    pub async fn set_message_flags(
        &self,
        message_id: &str,
        read: Option<bool>,
        starred: Option<bool>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE messages
            SET read = COALESCE(?1, read), starred = COALESCE(?2, starred)
            WHERE message_id = ?3;
            "#,
        )
        .bind(read.map(|b| if b { 1i64 } else { 0 }))
        .bind(starred.map(|b| if b { 1i64 } else { 0 }))
        .bind(message_id)
        .execute(self.pool())
        .await
        .context("updating message flags")?;
        Ok(())
    }

    pub async fn load_message(&self, message_id: &str) -> Result<Option<MessageRecord>> {
        let row = sqlx::query(
            r#"
            SELECT message_id, mailbox_id, from_addr, from_name, to_addrs, subject,
                   body_text, body_html, sent_at, folder, read, starred, created_at
            FROM messages WHERE message_id = ?1;
            "#,
        )
        .bind(message_id)
        .fetch_optional(self.pool())
        .await
        .context("loading message")?;

        Ok(row.map(|row| MessageRecord {
            message_id: row.get(0),
            mailbox_id: row.get(1),
            from_addr: row.get(2),
            from_name: row.get(3),
            to_addrs: row.get(4),
            subject: row.get(5),
            body_text: row.get(6),
            body_html: row.get(7),
            sent_at: row.get(8),
            folder: row.get(9),
            read: row.get::<i64, _>(10) == 1,
            starred: row.get::<i64, _>(11) == 1,
            created_at: row.get(12),
        }))
    }
}
