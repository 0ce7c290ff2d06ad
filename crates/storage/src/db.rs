use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::VecDeque;
use std::path::Path;
use struk_core::{ExpenseRecord, MerchantProfile, Rupiah, Source};
use uuid::Uuid;

use crate::store::{ExpenseLedger, LedgerEntry, ProfileStore, SeenReceiptStore, StoreError};

pub(crate) type DbPool = Pool<Sqlite>;

pub(crate) async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA cache_size = -32000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            sender TEXT NOT NULL,
            merchant TEXT NOT NULL,
            total INTEGER NOT NULL CHECK (total > 0),
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            category TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            ocr_confidence INTEGER NOT NULL,
            source TEXT NOT NULL,
            receipt_hash TEXT,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merchant_profiles (
            key TEXT PRIMARY KEY,
            learned_category TEXT,
            recent_totals TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS seen_receipts (
            hash TEXT PRIMARY KEY,
            seen_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_seen_receipts_seen_at ON seen_receipts(seen_at)")
        .execute(pool)
        .await?;

    Ok(())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{s}': {e}")))
}

/// SQLite-backed ledger, profile and seen-receipt store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self { pool: create_db(path).await? })
    }

    /// Wait for in-flight queries and checkpoint before the process exits.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Most recently recorded entries, newest first.
    pub async fn recent_expenses(&self, limit: i64) -> Result<Vec<LedgerEntry>, StoreError> {
        type Row = (
            String,
            String,
            String,
            i64,
            String,
            String,
            String,
            String,
            i64,
            String,
            Option<String>,
            String,
        );
        let rows = sqlx::query_as::<_, Row>(
            "SELECT id, sender, merchant, total, date, time, category, payment_method, ocr_confidence, source, receipt_hash, recorded_at
             FROM expenses ORDER BY recorded_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let id = Uuid::parse_str(&r.0)
                    .map_err(|e| StoreError::Corrupt(format!("expense id '{}': {e}", r.0)))?;
                let date = NaiveDate::parse_from_str(&r.4, "%Y-%m-%d")
                    .map_err(|e| StoreError::Corrupt(format!("date '{}': {e}", r.4)))?;
                let time = NaiveTime::parse_from_str(&r.5, "%H:%M")
                    .map_err(|e| StoreError::Corrupt(format!("time '{}': {e}", r.5)))?;
                let source: Source = r.9.parse().map_err(StoreError::Corrupt)?;
                Ok(LedgerEntry {
                    id,
                    sender: r.1,
                    record: ExpenseRecord {
                        merchant: r.2,
                        total: Rupiah::new(r.3),
                        date,
                        time,
                        category: r.6,
                        payment_method: r.7,
                        ocr_confidence: r.8.clamp(0, 100) as u8,
                        source,
                    },
                    receipt_hash: r.10,
                    recorded_at: parse_timestamp(&r.11)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ExpenseLedger for SqliteStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let r = &entry.record;
        sqlx::query(
            "INSERT INTO expenses (id, sender, merchant, total, date, time, category, payment_method, ocr_confidence, source, receipt_hash, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(&entry.sender)
        .bind(&r.merchant)
        .bind(r.total.amount())
        .bind(r.date.format("%Y-%m-%d").to_string())
        .bind(r.time_label())
        .bind(&r.category)
        .bind(&r.payment_method)
        .bind(r.ocr_confidence as i64)
        .bind(r.source.to_string())
        .bind(&entry.receipt_hash)
        .bind(timestamp(entry.recorded_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn load_profiles(&self) -> Result<Vec<MerchantProfile>, StoreError> {
        let rows = sqlx::query_as::<_, (String, Option<String>, String)>(
            "SELECT key, learned_category, recent_totals FROM merchant_profiles ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(key, learned_category, totals)| {
                let recent_totals: VecDeque<Rupiah> = serde_json::from_str(&totals)?;
                Ok(MerchantProfile { key, learned_category, recent_totals })
            })
            .collect()
    }

    async fn save_profiles(&self, profiles: &[MerchantProfile]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM merchant_profiles")
            .execute(&mut *tx)
            .await?;
        for profile in profiles {
            sqlx::query(
                "INSERT INTO merchant_profiles (key, learned_category, recent_totals) VALUES (?, ?, ?)",
            )
            .bind(&profile.key)
            .bind(&profile.learned_category)
            .bind(serde_json::to_string(&profile.recent_totals)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SeenReceiptStore for SqliteStore {
    async fn load_seen(&self, since: DateTime<Utc>) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT hash, seen_at FROM seen_receipts WHERE seen_at >= ? ORDER BY seen_at",
        )
        .bind(timestamp(since))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(hash, at)| Ok((hash, parse_timestamp(&at)?)))
            .collect()
    }

    async fn insert_seen(&self, hash: &str, seen_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO seen_receipts (hash, seen_at) VALUES (?, ?)
             ON CONFLICT(hash) DO UPDATE SET seen_at = excluded.seen_at",
        )
        .bind(hash)
        .bind(timestamp(seen_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_seen(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM seen_receipts WHERE seen_at < ?")
            .bind(timestamp(before))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
