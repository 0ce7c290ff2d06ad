use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

use super::money::Rupiah;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Ocr,
    Manual,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Ocr => write!(f, "ocr"),
            Source::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for Source {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ocr" => Ok(Source::Ocr),
            "manual" => Ok(Source::Manual),
            other => Err(format!("Unknown expense source: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpenseError {
    #[error("expense has no total amount")]
    MissingTotal,
    #[error("expense total must be positive, got {0}")]
    NonPositiveTotal(Rupiah),
}

/// An expense under construction. The total may still be missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftExpense {
    pub merchant: String,
    pub total: Option<Rupiah>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub category: String,
    pub payment_method: String,
    /// 0–100.
    pub ocr_confidence: u8,
    pub source: Source,
}

/// An expense whose total is known to be positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub merchant: String,
    pub total: Rupiah,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub category: String,
    pub payment_method: String,
    pub ocr_confidence: u8,
    pub source: Source,
}

impl ExpenseRecord {
    pub fn validate(draft: DraftExpense) -> Result<ExpenseRecord, ExpenseError> {
        let total = draft.total.ok_or(ExpenseError::MissingTotal)?;
        if !total.is_positive() {
            return Err(ExpenseError::NonPositiveTotal(total));
        }

        Ok(ExpenseRecord {
            merchant: draft.merchant,
            total,
            date: draft.date,
            time: minute_precision(draft.time),
            category: draft.category,
            payment_method: draft.payment_method,
            ocr_confidence: draft.ocr_confidence.min(100),
            source: draft.source,
        })
    }

    /// `DD/MM/YYYY`
    pub fn date_label(&self) -> String {
        self.date.format("%d/%m/%Y").to_string()
    }

    /// Zero-padded `HH:MM`.
    pub fn time_label(&self) -> String {
        self.time.format("%H:%M").to_string()
    }

    pub fn set_time(&mut self, time: NaiveTime) {
        self.time = minute_precision(time);
    }
}

/// Drop seconds and sub-second precision; records only carry `HH:MM`.
pub fn minute_precision(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// Learned knowledge about one merchant, keyed by its normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantProfile {
    pub key: String,
    pub learned_category: Option<String>,
    /// Oldest first.
    pub recent_totals: VecDeque<Rupiah>,
}

impl MerchantProfile {
    pub fn new(key: impl Into<String>) -> Self {
        MerchantProfile {
            key: key.into(),
            learned_category: None,
            recent_totals: VecDeque::new(),
        }
    }

    /// Append a total, dropping the oldest entries beyond `window`.
    pub fn push_total(&mut self, total: Rupiah, window: usize) {
        self.recent_totals.push_back(total);
        while self.recent_totals.len() > window {
            self.recent_totals.pop_front();
        }
    }

    /// Widened so a full window of near-`i64::MAX` totals cannot overflow.
    pub fn sum_of_totals(&self) -> i128 {
        self.recent_totals.iter().map(|t| i128::from(t.amount())).sum()
    }
}
