use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use struk_core::config::DedupConfig;
use struk_storage::{SeenReceiptStore, StoreError};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use struk_ocr::receipt_fingerprint as receipt_hash;

#[derive(Default)]
struct SeenSet {
    by_hash: HashMap<String, DateTime<Utc>>,
    /// Same entries ordered by first-seen time, oldest first.
    by_age: BTreeSet<(DateTime<Utc>, String)>,
}

impl SeenSet {
    fn insert(&mut self, hash: String, at: DateTime<Utc>) {
        if let Some(old) = self.by_hash.insert(hash.clone(), at) {
            self.by_age.remove(&(old, hash.clone()));
        }
        self.by_age.insert((at, hash));
    }

    fn remove(&mut self, hash: &str) {
        if let Some(at) = self.by_hash.remove(hash) {
            self.by_age.remove(&(at, hash.to_string()));
        }
    }

    fn evict_to(&mut self, max_entries: usize) -> usize {
        let mut evicted = 0;
        while self.by_hash.len() > max_entries {
            let Some((_, hash)) = self.by_age.pop_first() else {
                break;
            };
            self.by_hash.remove(&hash);
            evicted += 1;
        }
        evicted
    }

    fn expire_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut expired = 0;
        while self.by_age.first().is_some_and(|(at, _)| *at < cutoff) {
            if let Some((_, hash)) = self.by_age.pop_first() {
                self.by_hash.remove(&hash);
                expired += 1;
            }
        }
        expired
    }
}

/// Remembers fingerprints of OCR receipts already submitted.
///
/// Fingerprints expire after the retention window and the set never holds
/// more than `max_entries`; the oldest go first.
pub struct DuplicateDetector {
    seen: Mutex<SeenSet>,
    store: Arc<dyn SeenReceiptStore>,
    retention: Duration,
    max_entries: usize,
}

impl DuplicateDetector {
    pub async fn load(store: Arc<dyn SeenReceiptStore>, config: &DedupConfig) -> Result<Self, StoreError> {
        let retention = Duration::days(config.retention_days);
        let max_entries = config.max_entries.max(1);

        let mut seen = SeenSet::default();
        for (hash, at) in store.load_seen(Utc::now() - retention).await? {
            seen.insert(hash, at);
        }
        seen.evict_to(max_entries);
        info!(count = seen.by_hash.len(), "Loaded seen receipt fingerprints");

        Ok(Self { seen: Mutex::new(seen), store, retention, max_entries })
    }

    pub async fn is_duplicate(&self, hash: &str) -> bool {
        self.is_duplicate_at(hash, Utc::now()).await
    }

    /// `true` if `hash` was seen within the retention window before `now`.
    /// Otherwise it is recorded as seen at `now` and `false` is returned.
    pub async fn is_duplicate_at(&self, hash: &str, now: DateTime<Utc>) -> bool {
        let mut seen = self.seen.lock().await;
        let within_window = seen.by_hash.get(hash).map(|at| *at >= now - self.retention);
        match within_window {
            Some(true) => return true,
            Some(false) => seen.remove(hash),
            None => {}
        }

        seen.insert(hash.to_string(), now);
        seen.evict_to(self.max_entries);
        if let Err(e) = self.store.insert_seen(hash, now).await {
            warn!(error = %e, "Failed to persist receipt fingerprint");
        }
        false
    }

    pub async fn prune(&self) -> Result<usize, StoreError> {
        self.prune_at(Utc::now()).await
    }

    /// Drop fingerprints older than the retention window, in memory and in
    /// the backing store. Returns how many were dropped from memory.
    pub async fn prune_at(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = now - self.retention;
        let mut seen = self.seen.lock().await;
        let expired = seen.expire_before(cutoff);
        let stored = self.store.prune_seen(cutoff).await?;
        if expired > 0 || stored > 0 {
            info!(expired, stored, "Pruned receipt fingerprints");
        }
        Ok(expired)
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.by_hash.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use struk_storage::InMemoryStore;

    async fn detector(config: DedupConfig) -> (Arc<InMemoryStore>, DuplicateDetector) {
        let store = Arc::new(InMemoryStore::new());
        let detector = DuplicateDetector::load(store.clone(), &config).await.unwrap();
        (store, detector)
    }

    #[tokio::test]
    async fn second_sighting_is_duplicate() {
        let (_store, d) = detector(DedupConfig::default()).await;
        let h = receipt_hash("TOKO MAJU\nTOTAL 15.000");
        assert!(!d.is_duplicate(&h).await);
        assert!(d.is_duplicate(&h).await);
        assert!(d.is_duplicate(&receipt_hash("TOKO  MAJU TOTAL 15.000")).await);
        assert_eq!(d.len().await, 1);
    }

    #[tokio::test]
    async fn expired_hash_counts_as_unseen() {
        let (_store, d) = detector(DedupConfig::default()).await;
        let t0 = Utc::now();
        assert!(!d.is_duplicate_at("abc", t0).await);
        assert!(d.is_duplicate_at("abc", t0 + Duration::days(89)).await);
        assert!(!d.is_duplicate_at("abc", t0 + Duration::days(91)).await);
        // Re-recorded at day 91.
        assert!(d.is_duplicate_at("abc", t0 + Duration::days(92)).await);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let config = DedupConfig { max_entries: 2, ..DedupConfig::default() };
        let (_store, d) = detector(config).await;
        let t0 = Utc::now();
        assert!(!d.is_duplicate_at("a", t0).await);
        assert!(!d.is_duplicate_at("b", t0 + Duration::seconds(1)).await);
        assert!(!d.is_duplicate_at("c", t0 + Duration::seconds(2)).await);
        assert_eq!(d.len().await, 2);
        assert!(!d.is_duplicate_at("a", t0 + Duration::seconds(3)).await);
        assert!(d.is_duplicate_at("c", t0 + Duration::seconds(4)).await);
    }

    #[tokio::test]
    async fn prune_drops_old_entries_everywhere() {
        let (store, d) = detector(DedupConfig::default()).await;
        let t0 = Utc::now();
        d.is_duplicate_at("old", t0 - Duration::days(100)).await;
        d.is_duplicate_at("new", t0).await;

        assert_eq!(d.prune_at(t0).await.unwrap(), 1);
        assert_eq!(d.len().await, 1);
        assert_eq!(store.load_seen(t0 - Duration::days(1000)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reload_remembers_recent_hashes() {
        let (store, d) = detector(DedupConfig::default()).await;
        assert!(!d.is_duplicate("persisted").await);

        let reloaded = DuplicateDetector::load(store, &DedupConfig::default()).await.unwrap();
        assert!(reloaded.is_duplicate("persisted").await);
    }
}
