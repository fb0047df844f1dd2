use anyhow::{Context, Result};
use sqlx::Row;

use crate::types::{now_ts, Cursor, RunOutcome};

use super::Store;

impl Store {
    pub async fn load_cursor(&self, pipeline: &str) -> Result<Cursor> {
        let row = sqlx::query(
            r#"
            SELECT last_run, last_watermark, last_outcome, last_error,
                   consecutive_failures, auth_halted
            FROM cursors
            WHERE pipeline = ?1;
            "#,
        )
        .bind(pipeline)
        .fetch_optional(self.pool())
        .await
        .context("loading cursor")?;

        Ok(match row {
            Some(row) => Cursor {
                pipeline: pipeline.to_string(),
                last_run: row.get(0),
                last_watermark: row.get(1),
                last_outcome: row
                    .get::<Option<String>, _>(2)
                    .map(|s| RunOutcome::parse(&s)),
                last_error: row.get(3),
                consecutive_failures: row.get::<i64, _>(4) as u32,
                auth_halted: row.get::<i64, _>(5) == 1,
            },
            None => Cursor::empty(pipeline),
        })
    }

    /// Records a successful run: watermark advances, failure streak resets.
    pub async fn cursor_success(&self, pipeline: &str, watermark: Option<&str>) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            r#"
            INSERT INTO cursors (pipeline, last_run, last_watermark, last_outcome, last_error,
                                 consecutive_failures, auth_halted, updated_at)
            VALUES (?1, ?2, ?3, 'ok', NULL, 0, 0, ?4)
            ON CONFLICT(pipeline) DO UPDATE SET
                last_run = excluded.last_run,
                last_watermark = COALESCE(excluded.last_watermark, cursors.last_watermark),
                last_outcome = 'ok',
                last_error = NULL,
                consecutive_failures = 0,
                auth_halted = 0,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(pipeline)
        .bind(now)
        .bind(watermark)
        .bind(now)
        .execute(self.pool())
        .await
        .context("recording cursor success")?;
        Ok(())
    }

    /// Records a quiet skip: the attempt is timestamped but the failure
    /// streak and watermark stay put.
    pub async fn cursor_skipped(&self, pipeline: &str) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            r#"
            INSERT INTO cursors (pipeline, last_run, last_watermark, last_outcome, last_error,
                                 consecutive_failures, auth_halted, updated_at)
            VALUES (?1, ?2, NULL, 'skipped', NULL, 0, 0, ?3)
            ON CONFLICT(pipeline) DO UPDATE SET
                last_run = excluded.last_run,
                last_outcome = 'skipped',
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(pipeline)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .context("recording cursor skip")?;
        Ok(())
    }

    /// Records a failed run: increments the streak; `auth_halt` marks the
    /// cursor so the scheduler stops re-running until credentials change.
    pub async fn cursor_failure(&self, pipeline: &str, error: &str, auth_halt: bool) -> Result<()> {
        let now = now_ts();
        let outcome = if auth_halt {
            RunOutcome::AuthHalted
        } else {
            RunOutcome::Failed
        };
        sqlx::query(
            r#"
            INSERT INTO cursors (pipeline, last_run, last_watermark, last_outcome, last_error,
                                 consecutive_failures, auth_halted, updated_at)
            VALUES (?1, ?2, NULL, ?3, ?4, 1, ?5, ?6)
            ON CONFLICT(pipeline) DO UPDATE SET
                last_run = excluded.last_run,
                last_outcome = excluded.last_outcome,
                last_error = excluded.last_error,
                consecutive_failures = cursors.consecutive_failures + 1,
                auth_halted = excluded.auth_halted,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(pipeline)
        .bind(now)
        .bind(outcome.as_str())
        .bind(crate::errors::truncate_error(error))
        .bind(if auth_halt { 1 } else { 0 })
        .bind(now)
        .execute(self.pool())
        .await
        .context("recording cursor failure")?;
        Ok(())
    }

    /// Lifts auth halts. Called at startup, after credentials may have been
    /// re-configured.
    pub async fn clear_auth_halts(&self) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE cursors SET auth_halted = 0, updated_at = ?1 WHERE auth_halted = 1;",
        )
        .bind(now_ts())
        .execute(self.pool())
        .await
        .context("clearing auth halts")?;
        Ok(res.rows_affected())
    }
}
