pub mod config;
pub mod expense;
pub mod money;

pub use config::{Config, ConfigError, KeywordRule, MerchantHeuristic, OcrEngine};
pub use expense::{DraftExpense, ExpenseError, ExpenseRecord, MerchantProfile, Source};
pub use money::Rupiah;
