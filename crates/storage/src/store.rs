use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use struk_core::{ExpenseRecord, MerchantProfile};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook rejected the entry with status {0}")]
    Rejected(u16),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// One confirmed expense as written to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub sender: String,
    pub record: ExpenseRecord,
    /// Fingerprint of the OCR text the record came from, if any.
    pub receipt_hash: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(sender: impl Into<String>, record: ExpenseRecord, receipt_hash: Option<String>) -> Self {
        LedgerEntry {
            id: Uuid::new_v4(),
            sender: sender.into(),
            record,
            receipt_hash,
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only sink for confirmed expenses.
#[async_trait]
pub trait ExpenseLedger: Send + Sync {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError>;
}

/// Backing store for merchant profiles. `save_profiles` replaces the whole set.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load_profiles(&self) -> Result<Vec<MerchantProfile>, StoreError>;
    async fn save_profiles(&self, profiles: &[MerchantProfile]) -> Result<(), StoreError>;
}

/// Backing store for fingerprints of receipts already seen.
#[async_trait]
pub trait SeenReceiptStore: Send + Sync {
    /// Fingerprints first seen at or after `since`.
    async fn load_seen(&self, since: DateTime<Utc>) -> Result<Vec<(String, DateTime<Utc>)>, StoreError>;
    /// Record `hash` as seen at `seen_at`, replacing any earlier timestamp.
    async fn insert_seen(&self, hash: &str, seen_at: DateTime<Utc>) -> Result<(), StoreError>;
    /// Delete fingerprints first seen before `before`; returns how many went.
    async fn prune_seen(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}
