use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use struk_core::MerchantProfile;
use tokio::sync::Mutex;

use crate::store::{ExpenseLedger, LedgerEntry, ProfileStore, SeenReceiptStore, StoreError};

#[derive(Default)]
struct Inner {
    entries: Vec<LedgerEntry>,
    profiles: Vec<MerchantProfile>,
    seen: HashMap<String, DateTime<Utc>>,
}

/// Volatile store backing all three traits. Used by tests and dry runs.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    fail_appends: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.lock().await.entries.clone()
    }

    pub async fn profiles(&self) -> Vec<MerchantProfile> {
        self.inner.lock().await.profiles.clone()
    }

    /// Make subsequent `append` calls fail until switched back.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExpenseLedger for InMemoryStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(503));
        }
        self.inner.lock().await.entries.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn load_profiles(&self) -> Result<Vec<MerchantProfile>, StoreError> {
        Ok(self.inner.lock().await.profiles.clone())
    }

    async fn save_profiles(&self, profiles: &[MerchantProfile]) -> Result<(), StoreError> {
        self.inner.lock().await.profiles = profiles.to_vec();
        Ok(())
    }
}

#[async_trait]
impl SeenReceiptStore for InMemoryStore {
    async fn load_seen(&self, since: DateTime<Utc>) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let inner = self.inner.lock().await;
        let mut seen: Vec<_> = inner
            .seen
            .iter()
            .filter(|(_, at)| **at >= since)
            .map(|(h, at)| (h.clone(), *at))
            .collect();
        seen.sort_by_key(|(_, at)| *at);
        Ok(seen)
    }

    async fn insert_seen(&self, hash: &str, seen_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.lock().await.seen.insert(hash.to_string(), seen_at);
        Ok(())
    }

    async fn prune_seen(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let len = inner.seen.len();
        inner.seen.retain(|_, at| *at >= before);
        Ok((len - inner.seen.len()) as u64)
    }
}
