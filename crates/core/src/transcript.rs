//! Transcript Store
//!
//! The durable home of each call's history and status. The registry only
//! talks to the `TranscriptStore` trait; the backing store is chosen at
//! startup.

use crate::error::StoreError;
use crate::session::{CallStatus, EndReason, Turn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[cfg(test)]
use mockall::automock;

/// The persisted shape of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub phone_number: Option<String>,
    pub status: CallStatus,
    pub end_reason: Option<EndReason>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub history: Vec<Turn>,
    pub last_updated: DateTime<Utc>,
}

/// Append-only storage of call transcripts keyed by call id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Creates the record for a call. Creating an existing record is a no-op.
    async fn create_record(
        &self,
        call_id: &str,
        phone_number: Option<String>,
        status: CallStatus,
    ) -> Result<(), StoreError>;

    /// Appends a turn to the end of a call's history.
    async fn append_turn(&self, call_id: &str, turn: &Turn) -> Result<(), StoreError>;

    /// Updates the status, and for terminal statuses the reason and end time.
    async fn set_status(
        &self,
        call_id: &str,
        status: CallStatus,
        reason: Option<EndReason>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Returns the history in append order.
    async fn get_history(&self, call_id: &str) -> Result<Vec<Turn>, StoreError>;

    async fn get_record(&self, call_id: &str) -> Result<CallRecord, StoreError>;
}

/// A process-local `TranscriptStore`, used in tests and when no database is configured.
#[derive(Default)]
pub struct InMemoryTranscriptStore {
    records: RwLock<HashMap<String, CallRecord>>,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl TranscriptStore for InMemoryTranscriptStore {
    async fn create_record(
        &self,
        call_id: &str,
        phone_number: Option<String>,
        status: CallStatus,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        self.records
            .write()
            .await
            .entry(call_id.to_string())
            .or_insert_with(|| CallRecord {
                call_id: call_id.to_string(),
                phone_number,
                status,
                end_reason: None,
                start_time: now,
                end_time: None,
                history: Vec::new(),
                last_updated: now,
            });
        Ok(())
    }

    async fn append_turn(&self, call_id: &str, turn: &Turn) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(call_id)
            .ok_or_else(|| StoreError::NotFound(call_id.to_string()))?;
        record.history.push(turn.clone());
        record.last_updated = turn.timestamp;
        Ok(())
    }

    async fn set_status(
        &self,
        call_id: &str,
        status: CallStatus,
        reason: Option<EndReason>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(call_id)
            .ok_or_else(|| StoreError::NotFound(call_id.to_string()))?;
        record.status = status;
        if reason.is_some() {
            record.end_reason = reason;
        }
        if ended_at.is_some() {
            record.end_time = ended_at;
        }
        record.last_updated = ended_at.unwrap_or_else(Utc::now);
        Ok(())
    }

    async fn get_history(&self, call_id: &str) -> Result<Vec<Turn>, StoreError> {
        self.records
            .read()
            .await
            .get(call_id)
            .map(|record| record.history.clone())
            .ok_or_else(|| StoreError::NotFound(call_id.to_string()))
    }

    async fn get_record(&self, call_id: &str) -> Result<CallRecord, StoreError> {
        self.records
            .read()
            .await
            .get(call_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(call_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Speaker;

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = InMemoryTranscriptStore::new();
        store
            .create_record("CA1", Some("+15550100".into()), CallStatus::Active)
            .await
            .unwrap();
        store.append_turn("CA1", &Turn::user("hello")).await.unwrap();
        store.append_turn("CA1", &Turn::agent("hi there")).await.unwrap();
        store.append_turn("CA1", &Turn::system("bye")).await.unwrap();

        let history = store.get_history("CA1").await.unwrap();
        let speakers: Vec<Speaker> = history.iter().map(|t| t.speaker).collect();
        assert_eq!(speakers, vec![Speaker::User, Speaker::Agent, Speaker::System]);
        assert_eq!(history[1].text, "hi there");
    }

    #[tokio::test]
    async fn test_unknown_call_is_not_found() {
        let store = InMemoryTranscriptStore::new();
        assert_eq!(
            store.append_turn("nope", &Turn::user("x")).await,
            Err(StoreError::NotFound("nope".into()))
        );
        assert!(matches!(
            store.get_history("nope").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.set_status("nope", CallStatus::Ended, None, None).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_record_is_idempotent() {
        let store = InMemoryTranscriptStore::new();
        store.create_record("CA1", None, CallStatus::Initiated).await.unwrap();
        store.append_turn("CA1", &Turn::user("hello")).await.unwrap();
        store.create_record("CA1", None, CallStatus::Initiated).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get_history("CA1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_status_records_end() {
        let store = InMemoryTranscriptStore::new();
        store.create_record("CA1", None, CallStatus::Active).await.unwrap();
        let ended_at = Utc::now();
        store
            .set_status("CA1", CallStatus::Ended, Some(EndReason::NoInput), Some(ended_at))
            .await
            .unwrap();

        let record = store.get_record("CA1").await.unwrap();
        assert_eq!(record.status, CallStatus::Ended);
        assert_eq!(record.end_reason, Some(EndReason::NoInput));
        assert_eq!(record.end_time, Some(ended_at));
        assert_eq!(record.last_updated, ended_at);
    }
}
