use chrono::{NaiveDate, NaiveTime};
use struk_core::{ExpenseRecord, Rupiah};
use struk_ocr::extract::{parse_clock_time, parse_numeric_date};
use struk_ocr::KeywordTable;

use crate::util::{parse_amount, re, squash, title_case};

re!(re_keyed_edit,
    r"(?i)^(?:edit\s+)?(nominal|total|merchant|toko|store|kategori|category|metode|jam|tanggal)(?:\s*:\s*|\s+)(.+)$");
re!(re_edit_shorthand,
    r"(?i)^edit\s+(.+)$");

/// One parsed line of a reply to a pending expense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Confirm,
    Cancel,
    SetTotal(Rupiah),
    SetMerchant(String),
    SetCategory(String),
    SetPaymentMethod(String),
    SetTime(NaiveTime),
    SetDate(NaiveDate),
}

/// What a whole message amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Confirm,
    Cancel,
    Edited { applied: usize },
}

/// Parse a single line. Unrecognized or malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<Directive> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.eq_ignore_ascii_case("y") {
        return Some(Directive::Confirm);
    }
    if line.eq_ignore_ascii_case("n") {
        return Some(Directive::Cancel);
    }

    if let Some(caps) = re_keyed_edit().captures(line) {
        let keyword = caps.get(1)?.as_str().to_ascii_lowercase();
        let value = caps.get(2)?.as_str().trim();
        return match keyword.as_str() {
            "nominal" | "total" => positive_amount(value).map(Directive::SetTotal),
            "merchant" | "toko" | "store" => {
                let name = title_case(value);
                (!name.is_empty()).then_some(Directive::SetMerchant(name))
            }
            "kategori" | "category" => non_empty(value).map(Directive::SetCategory),
            "metode" => non_empty(value).map(Directive::SetPaymentMethod),
            "jam" => parse_clock_time(value).map(Directive::SetTime),
            "tanggal" => parse_numeric_date(value).map(Directive::SetDate),
            _ => None,
        };
    }

    if let Some(total) = bare_amount(line) {
        return Some(Directive::SetTotal(total));
    }
    if let Some(caps) = re_edit_shorthand().captures(line) {
        return positive_amount(caps.get(1)?.as_str()).map(Directive::SetTotal);
    }
    parse_numeric_date(line).map(Directive::SetDate)
}

fn positive_amount(s: &str) -> Option<Rupiah> {
    parse_amount(s).filter(|r| r.is_positive())
}

/// An unlabelled line only counts as a total with at least three digits,
/// so a stray `1` or `2` leaves the record alone.
fn bare_amount(s: &str) -> Option<Rupiah> {
    let digits = s.chars().filter(char::is_ascii_digit).count();
    if digits < 3 {
        return None;
    }
    positive_amount(s)
}

fn non_empty(s: &str) -> Option<String> {
    let s = squash(s);
    (!s.is_empty()).then_some(s)
}

/// Apply a field edit. Terminal directives leave the record untouched.
pub fn apply(record: &mut ExpenseRecord, directive: Directive, categories: &KeywordTable) -> bool {
    match directive {
        Directive::Confirm | Directive::Cancel => return false,
        Directive::SetTotal(total) => record.total = total,
        Directive::SetMerchant(name) => record.merchant = name,
        Directive::SetCategory(name) => {
            record.category = categories.canonical_label(&name).map(str::to_string).unwrap_or(name)
        }
        Directive::SetPaymentMethod(method) => record.payment_method = method,
        Directive::SetTime(time) => record.set_time(time),
        Directive::SetDate(date) => record.date = date,
    }
    true
}

/// Evaluate every line of `text` in order against `record`.
///
/// The first `Y` or `N` ends evaluation; edits on earlier lines have already
/// been applied by then.
pub fn apply_message(record: &mut ExpenseRecord, text: &str, categories: &KeywordTable) -> Outcome {
    let mut applied = 0;
    for line in text.lines() {
        match parse_line(line) {
            Some(Directive::Confirm) => return Outcome::Confirm,
            Some(Directive::Cancel) => return Outcome::Cancel,
            Some(directive) => {
                if apply(record, directive, categories) {
                    applied += 1;
                }
            }
            None => {}
        }
    }
    Outcome::Edited { applied }
}
