use std::collections::HashMap;
use std::sync::Arc;

use struk_core::config::MemoryConfig;
use struk_core::{MerchantProfile, Rupiah};
use struk_storage::{ProfileStore, StoreError};
use tokio::sync::Mutex;
use tracing::{debug, info};

const KEY_MAX_CHARS: usize = 40;

/// Canonical lookup key for a merchant name: ASCII letters, digits and
/// single spaces only, uppercased, at most 40 characters.
pub fn normalize_key(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    let upper = collapsed.to_ascii_uppercase();
    let capped: String = upper.chars().take(KEY_MAX_CHARS).collect();
    capped.trim_end().to_string()
}

/// Learned categories and recent spending per merchant.
///
/// Every mutation is flushed to the backing [`ProfileStore`] before the call
/// returns, with the lock still held, so concurrent writers never interleave
/// partial snapshots.
pub struct MerchantMemory {
    profiles: Mutex<HashMap<String, MerchantProfile>>,
    store: Arc<dyn ProfileStore>,
    window: usize,
    anomaly_factor: u32,
}

impl MerchantMemory {
    pub async fn load(store: Arc<dyn ProfileStore>, config: &MemoryConfig) -> Result<Self, StoreError> {
        let window = config.window.max(1);
        let mut profiles = HashMap::new();
        for mut profile in store.load_profiles().await? {
            while profile.recent_totals.len() > window {
                profile.recent_totals.pop_front();
            }
            profiles.insert(profile.key.clone(), profile);
        }
        info!(count = profiles.len(), "Loaded merchant profiles");
        Ok(Self {
            profiles: Mutex::new(profiles),
            store,
            window,
            anomaly_factor: config.anomaly_factor,
        })
    }

    /// Record `category` as the merchant's category from now on.
    pub async fn learn(&self, merchant: &str, category: &str) -> Result<(), StoreError> {
        let key = normalize_key(merchant);
        if key.is_empty() {
            return Ok(());
        }
        let mut profiles = self.profiles.lock().await;
        profiles
            .entry(key.clone())
            .or_insert_with(|| MerchantProfile::new(key.clone()))
            .learned_category = Some(category.to_string());
        debug!(merchant_key = %key, category, "Learned merchant category");
        self.flush(&profiles).await
    }

    pub async fn recall_category(&self, merchant: &str) -> Option<String> {
        let key = normalize_key(merchant);
        if key.is_empty() {
            return None;
        }
        self.profiles
            .lock()
            .await
            .get(&key)
            .and_then(|p| p.learned_category.clone())
    }

    pub async fn remember_total(&self, merchant: &str, total: Rupiah) -> Result<(), StoreError> {
        let key = normalize_key(merchant);
        if key.is_empty() {
            return Ok(());
        }
        let mut profiles = self.profiles.lock().await;
        profiles
            .entry(key.clone())
            .or_insert_with(|| MerchantProfile::new(key))
            .push_total(total, self.window);
        self.flush(&profiles).await
    }

    /// `true` when `total` exceeds the anomaly factor times the merchant's
    /// average recent total. A merchant without history is never anomalous.
    pub async fn anomaly_check(&self, merchant: &str, total: Rupiah) -> bool {
        let key = normalize_key(merchant);
        let profiles = self.profiles.lock().await;
        let Some(profile) = profiles.get(&key) else {
            return false;
        };
        let n = profile.recent_totals.len() as i128;
        if n == 0 {
            return false;
        }
        let sum = profile.sum_of_totals();
        let flagged = i128::from(total.amount()) * n > i128::from(self.anomaly_factor) * sum;
        if flagged {
            info!(merchant_key = %key, total = total.amount(), "Total is anomalous for merchant");
        }
        flagged
    }

    pub async fn profile(&self, merchant: &str) -> Option<MerchantProfile> {
        self.profiles.lock().await.get(&normalize_key(merchant)).cloned()
    }

    async fn flush(&self, profiles: &HashMap<String, MerchantProfile>) -> Result<(), StoreError> {
        let mut snapshot: Vec<MerchantProfile> = profiles.values().cloned().collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        self.store.save_profiles(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use struk_storage::InMemoryStore;

    async fn memory() -> (Arc<InMemoryStore>, MerchantMemory) {
        let store = Arc::new(InMemoryStore::new());
        let memory = MerchantMemory::load(store.clone(), &MemoryConfig::default()).await.unwrap();
        (store, memory)
    }

    #[test]
    fn normalize_key_strips_and_uppercases() {
        assert_eq!(normalize_key("Kopi Kenangan"), "KOPI KENANGAN");
        assert_eq!(normalize_key("  Toko-Maju!! (Cab. 2) "), "TOKOMAJU CAB 2");
        assert_eq!(normalize_key("***"), "");
    }

    #[test]
    fn normalize_key_is_idempotent() {
        for name in ["Kopi Kenangan", "  a.b.c  d ", "Warung Makan Sederhana Padang Raya Jaya Abadi Sentosa", "Café Ñ"] {
            let once = normalize_key(name);
            assert_eq!(normalize_key(&once), once);
        }
    }

    #[test]
    fn normalize_key_caps_length() {
        let key = normalize_key(&"A".repeat(100));
        assert_eq!(key.len(), 40);
    }

    #[tokio::test]
    async fn learn_then_recall() {
        let (store, memory) = memory().await;
        assert_eq!(memory.recall_category("Kopi Kenangan").await, None);
        memory.learn("Kopi Kenangan", "Food & Drink").await.unwrap();
        assert_eq!(memory.recall_category("KOPI kenangan!").await.as_deref(), Some("Food & Drink"));
        // Written through.
        let saved = store.profiles().await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].learned_category.as_deref(), Some("Food & Drink"));
    }

    #[tokio::test]
    async fn remember_total_keeps_last_five() {
        let (_store, memory) = memory().await;
        for amount in 1..=7 {
            memory.remember_total("Toko", Rupiah::new(amount * 1_000)).await.unwrap();
        }
        let profile = memory.profile("Toko").await.unwrap();
        let totals: Vec<i64> = profile.recent_totals.iter().map(|t| t.amount()).collect();
        assert_eq!(totals, vec![3_000, 4_000, 5_000, 6_000, 7_000]);
    }

    #[tokio::test]
    async fn cold_start_is_never_anomalous() {
        let (_store, memory) = memory().await;
        assert!(!memory.anomaly_check("Baru", Rupiah::new(10_000_000)).await);
    }

    #[tokio::test]
    async fn anomaly_against_recent_average() {
        let (_store, memory) = memory().await;
        for amount in [20_000, 22_000, 21_000] {
            memory.remember_total("Kopi Kenangan", Rupiah::new(amount)).await.unwrap();
        }
        assert!(memory.anomaly_check("Kopi Kenangan", Rupiah::new(90_000)).await);
        // Exactly three times the average is not above it.
        assert!(!memory.anomaly_check("Kopi Kenangan", Rupiah::new(63_000)).await);
        assert!(!memory.anomaly_check("Kopi Kenangan", Rupiah::new(25_000)).await);
    }

    #[tokio::test]
    async fn anomaly_with_near_max_totals() {
        let (_store, memory) = memory().await;
        for _ in 0..2 {
            memory.remember_total("Dealer", Rupiah::new(5_000_000_000_000_000_000)).await.unwrap();
        }
        assert!(!memory.anomaly_check("Dealer", Rupiah::new(i64::MAX)).await);
        assert!(!memory.anomaly_check("Dealer", Rupiah::new(1_000)).await);
    }

    #[tokio::test]
    async fn symbol_only_names_are_not_stored() {
        let (store, memory) = memory().await;
        memory.learn("!!!", "Other").await.unwrap();
        memory.remember_total("!!!", Rupiah::new(5_000)).await.unwrap();
        assert!(store.profiles().await.is_empty());
        assert_eq!(memory.recall_category("!!!").await, None);
    }

    #[tokio::test]
    async fn reload_restores_profiles() {
        let (store, memory) = memory().await;
        memory.learn("Alfamart", "Shopping").await.unwrap();
        memory.remember_total("Alfamart", Rupiah::new(12_000)).await.unwrap();

        let reloaded = MerchantMemory::load(store, &MemoryConfig::default()).await.unwrap();
        assert_eq!(reloaded.recall_category("alfamart").await.as_deref(), Some("Shopping"));
        assert_eq!(reloaded.profile("alfamart").await.unwrap().recent_totals.len(), 1);
    }
}
