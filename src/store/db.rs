use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::types::now_ts;

const DB_FILE_NAME: &str = "db";

/// Single embedded relational store. One pool per process; every other
/// component goes through the methods on this type, and no SQL is written
/// outside `src/store/`.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    root: PathBuf,
}

impl Store {
    pub async fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("creating data directory {}", root.display()))?;
        let db_path = root.join(DB_FILE_NAME);
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = SqlitePool::connect(&url)
            .await
            .with_context(|| format!("connecting to sqlite at {}", db_path.display()))?;

        let store = Store {
            pool,
            root: root.to_path_buf(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps the database
    /// alive for the pool's lifetime.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("connecting to in-memory sqlite")?;
        let store = Store {
            pool,
            root: std::env::temp_dir(),
        };
        store.migrate().await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE_NAME)
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.root.join("attachments")
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Copies the database file into `backups/<timestamp>.db`.
    pub async fn backup(&self) -> Result<PathBuf> {
        let backups = self.root.join("backups");
        tokio::fs::create_dir_all(&backups)
            .await
            .with_context(|| format!("creating backups directory {}", backups.display()))?;
        let target = backups.join(format!("{}.db", Utc::now().format("%Y%m%d-%H%M%S")));

        // Flush the WAL before copying the file.
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&self.pool)
            .await
            .context("checkpointing before backup")?;
        tokio::fs::copy(self.db_path(), &target)
            .await
            .with_context(|| format!("copying database to {}", target.display()))?;
        Ok(target)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&self.pool)
            .await
            .context("enabling foreign keys")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                company TEXT,
                email TEXT UNIQUE,
                phone TEXT,
                address TEXT,
                status TEXT NOT NULL DEFAULT 'prospect',
                accounting_id TEXT,
                accounting_sync TEXT NOT NULL DEFAULT 'unsynced',
                sync_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_contacts_accounting_sync ON contacts(accounting_sync);

            CREATE TABLE IF NOT EXISTS leads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                business_name TEXT NOT NULL,
                address TEXT,
                city TEXT,
                email TEXT,
                phone TEXT,
                quality_score INTEGER NOT NULL DEFAULT 0,
                website_exists INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'new',
                contact_id INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(business_name, city),
                FOREIGN KEY (contact_id) REFERENCES contacts(id)
            );

            CREATE TABLE IF NOT EXISTS form_submissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                name TEXT,
                email TEXT,
                phone TEXT,
                company TEXT,
                subject TEXT,
                message TEXT,
                source TEXT UNIQUE,
                submitted_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS invoices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                direction TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                number TEXT NOT NULL,
                year INTEGER NOT NULL,
                contact_id INTEGER,
                company_name TEXT,
                description TEXT,
                amount_excl_vat REAL NOT NULL,
                vat_percentage REAL NOT NULL,
                vat_amount REAL NOT NULL,
                amount_incl_vat REAL NOT NULL,
                invoice_date INTEGER NOT NULL,
                due_date INTEGER,
                paid_at INTEGER,
                file_path TEXT,
                reference TEXT UNIQUE,
                accounting_id TEXT,
                accounting_sync TEXT NOT NULL DEFAULT 'unsynced',
                sync_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(year, direction, number),
                FOREIGN KEY (contact_id) REFERENCES contacts(id)
            );
            CREATE INDEX IF NOT EXISTS idx_invoices_accounting_sync ON invoices(accounting_sync);

            CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_number TEXT NOT NULL UNIQUE,
                customer_id TEXT,
                customer_name TEXT,
                customer_email TEXT,
                customer_phone TEXT,
                customer_company TEXT,
                contact_id INTEGER,
                monitored_service_id TEXT,
                subject TEXT NOT NULL,
                description TEXT,
                category TEXT,
                priority TEXT NOT NULL DEFAULT 'medium',
                status TEXT NOT NULL DEFAULT 'open',
                assignee TEXT,
                ai_requested INTEGER NOT NULL DEFAULT 0,
                ai_summary TEXT,
                ai_suggested_reply TEXT,
                resolution TEXT,
                first_response_at INTEGER,
                resolved_at INTEGER,
                remote_sync TEXT NOT NULL DEFAULT 'synced',
                sync_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (contact_id) REFERENCES contacts(id)
            );
            CREATE INDEX IF NOT EXISTS idx_tickets_remote_sync ON tickets(remote_sync);

            CREATE TABLE IF NOT EXISTS ticket_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_id INTEGER NOT NULL,
                remote_id TEXT,
                sender TEXT NOT NULL,
                body TEXT NOT NULL,
                internal INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE(ticket_id, remote_id),
                FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS mailboxes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host TEXT NOT NULL,
                imap_port INTEGER NOT NULL DEFAULT 993,
                smtp_port INTEGER NOT NULL DEFAULT 587,
                username TEXT NOT NULL,
                password_enc TEXT NOT NULL,
                display_name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                last_sync INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(host, username)
            );

            CREATE TABLE IF NOT EXISTS messages (
                message_id TEXT PRIMARY KEY,
                mailbox_id INTEGER NOT NULL,
                from_addr TEXT,
                from_name TEXT,
                to_addrs TEXT,
                subject TEXT,
                body_text TEXT,
                body_html TEXT,
                sent_at INTEGER,
                folder TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                starred INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (mailbox_id) REFERENCES mailboxes(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_messages_mailbox_folder ON messages(mailbox_id, folder);
            CREATE INDEX IF NOT EXISTS idx_messages_sent_at ON messages(mailbox_id, sent_at DESC);

            CREATE TABLE IF NOT EXISTS attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                mime_type TEXT,
                FOREIGN KEY (message_id) REFERENCES messages(message_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS cursors (
                pipeline TEXT PRIMARY KEY,
                last_run INTEGER,
                last_watermark TEXT,
                last_outcome TEXT,
                last_error TEXT,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                auth_halted INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("running migrations")?;

        Ok(())
    }
}

/// Flips a freshly selected push batch to `pending`, in the same
/// transaction as the selection. An attempt that dies mid-push leaves the
/// rows re-selectable on the next run.
pub(super) async fn mark_batch_pending(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    column: &str,
    ids: &[i64],
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let mut builder = sqlx::QueryBuilder::new(format!(
        "UPDATE {table} SET {column} = 'pending', updated_at = "
    ));
    builder.push_bind(now_ts());
    builder.push(" WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    builder.push(");");
    builder
        .build()
        .execute(&mut **tx)
        .await
        .with_context(|| format!("marking {table} batch pending"))?;
    Ok(())
}
