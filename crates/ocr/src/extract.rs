use std::cmp::Ordering;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use struk_core::expense::minute_precision;
use struk_core::{Config, MerchantHeuristic, Rupiah};

use crate::rules::{KeywordTable, DEFAULT_CATEGORY, DEFAULT_PAYMENT_METHOD};
use crate::types::{ExtractedField, ExtractedReceipt, OcrToken, RawScanResult};

pub const MERCHANT_PLACEHOLDER: &str = "Merchant";
const MERCHANT_FALLBACK_MAX_CHARS: usize = 40;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// 3+ digits with at least one `.`/`,` thousands group: 15.000, 1,250,000.
// Letters may touch it (`Rp15.000`, `TOTAL15.000`); digits may not.
re!(re_grouped,
    r"(?:^|\D)(\d{1,3}(?:[.,]\d{3})+)");
// A whole OCR token holding an amount; separators optional here.
re!(re_token_numeral,
    r"(?i)^(?:rp\.?\s*)?(\d{1,3}(?:[.,]\d{3})+|\d{3,})(?:[.,]\d{2})?$");
re!(re_total_keyword,
    r"(?i)total");
re!(re_total_excluded,
    r"(?i)kembali|diskon|pajak");

re!(re_merchant_blacklist,
    r"(?i)struk|receipt|transaksi|kasir|alamat|telp|npwp|terima\s*kasih");

re!(re_date_time,
    r"(\d{1,2})[/\-](\d{1,2})[/\-](\d{2,4}).{0,15}?\b(\d{1,2})[:.](\d{2})\b");
re!(re_date_textual,
    r"(?i)\b(\d{1,2})\s+(januari|februari|maret|april|mei|juni|juli|agustus|september|oktober|november|desember)\s+(\d{4})\b");
re!(re_date_only,
    r"^(\d{1,2})[/\-](\d{1,2})[/\-](\d{2,4})$");
re!(re_clock,
    r"^(\d{1,2})[:.](\d{2})$");

// ── Public extraction API ─────────────────────────────────────────────────────

/// Turns raw receipt text into candidate fields. The merchant heuristic and
/// both keyword tables are swappable so alternatives can be evaluated offline.
#[derive(Debug, Clone)]
pub struct Extractor {
    merchant_heuristic: MerchantHeuristic,
    categories: KeywordTable,
    payments: KeywordTable,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            merchant_heuristic: MerchantHeuristic::default(),
            categories: KeywordTable::default_categories(),
            payments: KeywordTable::default_payments(),
        }
    }
}

impl Extractor {
    pub fn new(
        merchant_heuristic: MerchantHeuristic,
        categories: KeywordTable,
        payments: KeywordTable,
    ) -> Self {
        Self { merchant_heuristic, categories, payments }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            merchant_heuristic: config.extract.merchant_heuristic,
            categories: KeywordTable::or_default(
                &config.categories,
                DEFAULT_CATEGORY,
                KeywordTable::default_categories,
            ),
            payments: KeywordTable::or_default(
                &config.payments,
                DEFAULT_PAYMENT_METHOD,
                KeywordTable::default_payments,
            ),
        }
    }

    pub fn categories(&self) -> &KeywordTable {
        &self.categories
    }

    pub fn payments(&self) -> &KeywordTable {
        &self.payments
    }

    /// Extract structured fields from one scan. `now` stands in for any date
    /// or time the receipt does not print.
    pub fn extract(&self, scan: &RawScanResult, now: NaiveDateTime) -> ExtractedReceipt {
        let text = scan.text.as_str();
        let merchant = extract_merchant(text, self.merchant_heuristic);
        let (date, time) = extract_date_time(text, now);
        let total = extract_total(text, &scan.tokens);
        let category = self.detect_category(text);
        let payment_method = self.detect_payment_method(text);

        // Aggregate confidence: weighted sum of key fields.
        let confidence = {
            let weighted = [
                (Some(merchant.confidence), 0.25f32),
                (Some(date.confidence), 0.25),
                (total.as_ref().map(|f| f.confidence), 0.40),
                (Some(payment_method.confidence), 0.10),
            ];
            let (score, weight) = weighted.iter().fold((0.0f32, 0.0f32), |(s, w), (conf, fw)| {
                (s + conf.unwrap_or(0.0) * fw, w + fw)
            });
            if weight > 0.0 { score / weight } else { 0.0 }
        };

        tracing::debug!(
            merchant = %merchant.value,
            total = ?total.as_ref().map(|t| t.value.amount()),
            date = %date.value,
            confidence,
            "extracted receipt fields"
        );

        ExtractedReceipt { merchant, date, time, total, category, payment_method, confidence }
    }

    pub fn detect_category(&self, text: &str) -> ExtractedField<String> {
        classify(&self.categories, text)
    }

    pub fn detect_payment_method(&self, text: &str) -> ExtractedField<String> {
        classify(&self.payments, text)
    }
}

fn classify(table: &KeywordTable, text: &str) -> ExtractedField<String> {
    match table.first_match(text) {
        Some(label) => ExtractedField::new(label.to_string(), 0.80),
        None => ExtractedField::new(table.fallback().to_string(), 0.20),
    }
}

// ── Total ─────────────────────────────────────────────────────────────────────

/// Best guess at the grand total, or `None` when nothing amount-shaped exists.
///
/// Order: highest-confidence numeral token; last numeral on the bottom-most
/// `total` line that is not change/discount/tax; largest numeral anywhere.
pub fn extract_total(text: &str, tokens: &[OcrToken]) -> Option<ExtractedField<Rupiah>> {
    if let Some(total) = total_from_tokens(tokens) {
        return Some(ExtractedField::new(total, 0.95));
    }
    if let Some(total) = total_from_keyword_line(text) {
        return Some(ExtractedField::new(total, 0.90));
    }
    largest_numeral(text).map(|total| ExtractedField::new(total, 0.50))
}

fn total_from_tokens(tokens: &[OcrToken]) -> Option<Rupiah> {
    tokens
        .iter()
        .filter_map(|t| {
            let caps = re_token_numeral().captures(t.text.trim())?;
            let value = Rupiah::from_numeral(caps.get(1)?.as_str())?;
            value.is_positive().then_some((value, t.confidence))
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .map(|(value, _)| value)
}

fn total_from_keyword_line(text: &str) -> Option<Rupiah> {
    text.lines()
        .rev()
        .filter(|l| re_total_keyword().is_match(l) && !re_total_excluded().is_match(l))
        .find_map(|l| grouped_numerals(l).last())
}

fn largest_numeral(text: &str) -> Option<Rupiah> {
    grouped_numerals(text).max()
}

fn grouped_numerals(text: &str) -> impl Iterator<Item = Rupiah> + '_ {
    re_grouped()
        .captures_iter(text)
        .filter_map(move |c| {
            let m = c.get(1)?;
            let digit_follows = text[m.end()..].starts_with(|ch: char| ch.is_ascii_digit());
            if digit_follows {
                return None;
            }
            Rupiah::from_numeral(m.as_str())
        })
        .filter(|v| v.is_positive())
}

// ── Merchant ─────────────────────────────────────────────────────────────────

/// Store names are usually the longest plain-text line in the header, so
/// lines with digits or boilerplate words are filtered out first.
pub fn extract_merchant(text: &str, heuristic: MerchantHeuristic) -> ExtractedField<String> {
    let mut candidates = text
        .lines()
        .map(collapse_whitespace)
        .filter(|l| is_merchant_candidate(l));

    let picked = match heuristic {
        // Ties keep the earlier line.
        MerchantHeuristic::LongestLine => candidates.fold(None::<String>, |best, line| match best {
            Some(b) if b.chars().count() >= line.chars().count() => Some(b),
            _ => Some(line),
        }),
        MerchantHeuristic::FirstLine => candidates.next(),
    };
    if let Some(name) = picked {
        return ExtractedField::new(name, 0.60);
    }

    match text.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(first) => ExtractedField::new(
            first.chars().take(MERCHANT_FALLBACK_MAX_CHARS).collect::<String>().trim_end().to_string(),
            0.20,
        ),
        None => ExtractedField::new(MERCHANT_PLACEHOLDER.to_string(), 0.0),
    }
}

fn is_merchant_candidate(line: &str) -> bool {
    line.chars().count() > 5
        && !line.chars().any(|c| c.is_ascii_digit())
        // separator rows like "--------" carry no name
        && line.chars().any(char::is_alphabetic)
        && !re_merchant_blacklist().is_match(line)
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Date & time ──────────────────────────────────────────────────────────────

/// Receipt date and time. Tries `DD/MM/YY[YY] … HH:MM`, then `D <bulan> YYYY`;
/// whatever is missing or invalid is taken from `now`.
pub fn extract_date_time(
    text: &str,
    now: NaiveDateTime,
) -> (ExtractedField<NaiveDate>, ExtractedField<NaiveTime>) {
    let fallback_time = minute_precision(now.time());

    for caps in re_date_time().captures_iter(text) {
        let Some((date, time)) = try_date_time(&caps) else {
            continue;
        };
        return match time {
            Some(t) => (ExtractedField::new(date, 0.90), ExtractedField::new(t, 0.90)),
            None => (ExtractedField::new(date, 0.90), ExtractedField::new(fallback_time, 0.10)),
        };
    }

    for caps in re_date_textual().captures_iter(text) {
        if let Some(date) = try_date_textual(&caps) {
            return (ExtractedField::new(date, 0.85), ExtractedField::new(fallback_time, 0.10));
        }
    }

    (ExtractedField::new(now.date(), 0.0), ExtractedField::new(fallback_time, 0.0))
}

/// Parse a standalone `DD/MM/YYYY` or `DD-MM-YY` date.
pub fn parse_numeric_date(s: &str) -> Option<NaiveDate> {
    let c = re_date_only().captures(s.trim())?;
    numeric_date(c.get(1)?.as_str(), c.get(2)?.as_str(), c.get(3)?.as_str())
}

/// Parse a standalone `HH:MM` or `HH.MM` time of day.
pub fn parse_clock_time(s: &str) -> Option<NaiveTime> {
    let c = re_clock().captures(s.trim())?;
    clock_time(c.get(1)?.as_str(), c.get(2)?.as_str())
}

/// `None` when the date is invalid; an invalid time alone only drops the time.
fn try_date_time(c: &regex::Captures<'_>) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let date = numeric_date(c.get(1)?.as_str(), c.get(2)?.as_str(), c.get(3)?.as_str())?;
    let time = clock_time(c.get(4)?.as_str(), c.get(5)?.as_str());
    Some((date, time))
}

fn try_date_textual(c: &regex::Captures<'_>) -> Option<NaiveDate> {
    let day: u32 = c.get(1)?.as_str().parse().ok()?;
    let month = month_name_to_num(c.get(2)?.as_str())?;
    let year: i32 = c.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn numeric_date(day: &str, month: &str, year: &str) -> Option<NaiveDate> {
    let d: u32 = day.parse().ok()?;
    let m: u32 = month.parse().ok()?;
    let y: i32 = expand_year(year)?;
    NaiveDate::from_ymd_opt(y, m, d)
}

fn clock_time(hour: &str, minute: &str) -> Option<NaiveTime> {
    let h: u32 = hour.parse().ok()?;
    let m: u32 = minute.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    NaiveTime::from_hms_opt(h, m, 0)
}

fn expand_year(y: &str) -> Option<i32> {
    match y.len() {
        2 => format!("20{y}").parse().ok(),
        4 => y.parse().ok(),
        _ => None,
    }
}

fn month_name_to_num(name: &str) -> Option<u32> {
    match name.to_lowercase().as_str() {
        "januari" => Some(1), "februari" => Some(2), "maret" => Some(3),
        "april" => Some(4), "mei" => Some(5), "juni" => Some(6),
        "juli" => Some(7), "agustus" => Some(8), "september" => Some(9),
        "oktober" => Some(10), "november" => Some(11), "desember" => Some(12),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
