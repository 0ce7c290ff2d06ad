pub mod db;
pub mod memory;
pub mod store;
pub mod webhook;

pub use db::SqliteStore;
pub use memory::InMemoryStore;
pub use store::{ExpenseLedger, LedgerEntry, ProfileStore, SeenReceiptStore, StoreError};
pub use webhook::WebhookLedger;
