//! Data Access Layer
//!
//! A Postgres-backed `TranscriptStore`. Calls live in `calls`; turns live in
//! `call_turns` and are ordered by their `BIGSERIAL` id, so append order is
//! preserved even when timestamps collide.

use anyhow::Result;
use async_trait::async_trait;
use callagent_core::{CallRecord, CallStatus, EndReason, StoreError, Turn, TranscriptStore};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

/// A wrapper around the `PgPool` implementing the transcript store.
#[derive(Clone)]
pub struct PgTranscriptStore {
    pool: PgPool,
}

impl PgTranscriptStore {
    /// Creates a new `PgTranscriptStore` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn ensure_exists(&self, call_id: &str) -> Result<(), StoreError> {
        let exists = sqlx::query("SELECT 1 FROM calls WHERE call_id = $1")
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        match exists {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(call_id.to_string())),
        }
    }
}

fn unavailable(err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn turn_from_row(row: &PgRow) -> Result<Turn, StoreError> {
    let speaker: String = row.try_get("speaker").map_err(unavailable)?;
    Ok(Turn {
        speaker: speaker.parse().map_err(unavailable)?,
        text: row.try_get("text").map_err(unavailable)?,
        timestamp: row.try_get("created_at").map_err(unavailable)?,
    })
}

fn parse_end_reason(raw: Option<String>) -> Result<Option<EndReason>, StoreError> {
    raw.map(|reason| reason.parse::<EndReason>().map_err(unavailable))
        .transpose()
}

#[async_trait]
impl TranscriptStore for PgTranscriptStore {
    async fn create_record(
        &self,
        call_id: &str,
        phone_number: Option<String>,
        status: CallStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO calls (call_id, phone_number, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (call_id) DO NOTHING
            "#,
        )
        .bind(call_id)
        .bind(phone_number)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn append_turn(&self, call_id: &str, turn: &Turn) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let updated = sqlx::query("UPDATE calls SET last_updated = $2 WHERE call_id = $1")
            .bind(call_id)
            .bind(turn.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(call_id.to_string()));
        }

        sqlx::query(
            "INSERT INTO call_turns (call_id, speaker, text, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(call_id)
        .bind(turn.speaker.as_str())
        .bind(&turn.text)
        .bind(turn.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn set_status(
        &self,
        call_id: &str,
        status: CallStatus,
        reason: Option<EndReason>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE calls
            SET status = $2,
                end_reason = COALESCE($3, end_reason),
                end_time = COALESCE($4, end_time),
                last_updated = COALESCE($4, now())
            WHERE call_id = $1
            "#,
        )
        .bind(call_id)
        .bind(status.as_str())
        .bind(reason.map(|r| r.as_str()))
        .bind(ended_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(call_id.to_string()));
        }
        Ok(())
    }

    async fn get_history(&self, call_id: &str) -> Result<Vec<Turn>, StoreError> {
        self.ensure_exists(call_id).await?;

        let rows = sqlx::query(
            "SELECT speaker, text, created_at FROM call_turns WHERE call_id = $1 ORDER BY id ASC",
        )
        .bind(call_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(turn_from_row).collect()
    }

    async fn get_record(&self, call_id: &str) -> Result<CallRecord, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT call_id, phone_number, status, end_reason, start_time, end_time, last_updated
            FROM calls
            WHERE call_id = $1
            "#,
        )
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .ok_or_else(|| StoreError::NotFound(call_id.to_string()))?;

        let status: String = row.try_get("status").map_err(unavailable)?;
        let end_reason: Option<String> = row.try_get("end_reason").map_err(unavailable)?;

        Ok(CallRecord {
            call_id: row.try_get("call_id").map_err(unavailable)?,
            phone_number: row.try_get("phone_number").map_err(unavailable)?,
            status: status.parse().map_err(unavailable)?,
            end_reason: parse_end_reason(end_reason)?,
            start_time: row.try_get("start_time").map_err(unavailable)?,
            end_time: row.try_get("end_time").map_err(unavailable)?,
            history: self.get_history(call_id).await?,
            last_updated: row.try_get("last_updated").map_err(unavailable)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_end_reason() {
        assert_eq!(parse_end_reason(None).unwrap(), None);
        assert_eq!(
            parse_end_reason(Some("no_input".to_string())).unwrap(),
            Some(EndReason::NoInput)
        );
        assert!(matches!(
            parse_end_reason(Some("vanished".to_string())),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_unavailable_keeps_cause() {
        let err = unavailable(sqlx::Error::PoolTimedOut);
        match err {
            StoreError::Unavailable(msg) => assert!(msg.contains("timed out")),
            other => panic!("Expected Unavailable, got {:?}", other),
        }
    }
}
