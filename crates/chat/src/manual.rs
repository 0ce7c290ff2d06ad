use chrono::NaiveDateTime;
use struk_core::expense::minute_precision;
use struk_core::{DraftExpense, Source};
use struk_ocr::extract::{parse_clock_time, parse_numeric_date};
use struk_ocr::rules::DEFAULT_PAYMENT_METHOD;
use struk_ocr::KeywordTable;

use crate::util::{parse_amount, re, squash};

re!(re_manual_line,
    r"(?i)^manual(?:\s+(.*))?$");
re!(re_keyed_line,
    r"(?i)^(total|merchant|kategori|metode|tanggal|jam)(?:\s*:\s*|\s+)(.*)$");

/// A manually typed expense, not yet validated.
#[derive(Debug, Clone)]
pub struct ManualEntry {
    pub draft: DraftExpense,
    /// The user named a category explicitly.
    pub category_given: bool,
}

/// Whether `text` looks like a manual entry: a `manual …` line or a keyed
/// block with a `total` line.
pub fn is_manual_entry(text: &str) -> bool {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(first) = lines.next() else {
        return false;
    };
    if re_manual_line().is_match(first) {
        return true;
    }
    std::iter::once(first).chain(lines).any(|line| {
        re_keyed_line()
            .captures(line)
            .and_then(|c| c.get(1))
            .is_some_and(|k| k.as_str().eq_ignore_ascii_case("total"))
    })
}

/// Parse either `manual <total> [<merchant>] [<category>]` or a keyed block:
///
/// ```text
/// total 25000
/// merchant Warung Bu Ani
/// kategori Food & Drink
/// metode Cash
/// tanggal 01/02/2024
/// jam 12:30
/// ```
///
/// Missing or unreadable fields keep their defaults. A missing total stays
/// `None` for the caller to reject.
pub fn parse_manual(
    text: &str,
    now: NaiveDateTime,
    placeholder: &str,
    categories: &KeywordTable,
) -> ManualEntry {
    let mut draft = DraftExpense {
        merchant: placeholder.to_string(),
        total: None,
        date: now.date(),
        time: minute_precision(now.time()),
        category: placeholder.to_string(),
        payment_method: DEFAULT_PAYMENT_METHOD.to_string(),
        ocr_confidence: 0,
        source: Source::Manual,
    };
    let mut category_given = false;

    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let keyed: Vec<(String, &str)> = lines
        .iter()
        .filter_map(|line| {
            let c = re_keyed_line().captures(line)?;
            Some((c.get(1)?.as_str().to_ascii_lowercase(), c.get(2)?.as_str().trim()))
        })
        .collect();

    if keyed.is_empty() {
        let first = lines.first().copied().unwrap_or_default();
        let rest = match re_manual_line().captures(first) {
            Some(c) => c.get(1).map_or("", |m| m.as_str()),
            None => first,
        };
        category_given = parse_single_line(rest, &mut draft, categories);
        return ManualEntry { draft, category_given };
    }

    for (key, value) in keyed {
        match key.as_str() {
            "total" => draft.total = parse_amount(value),
            "merchant" => {
                let name = squash(value);
                if !name.is_empty() {
                    draft.merchant = name;
                }
            }
            "kategori" => {
                let name = squash(value);
                if !name.is_empty() {
                    draft.category = canonical(&name, categories);
                    category_given = true;
                }
            }
            "metode" => {
                let method = squash(value);
                if !method.is_empty() {
                    draft.payment_method = method;
                }
            }
            "tanggal" => {
                if let Some(date) = parse_numeric_date(value) {
                    draft.date = date;
                }
            }
            "jam" => {
                if let Some(time) = parse_clock_time(value) {
                    draft.time = time;
                }
            }
            _ => {}
        }
    }
    ManualEntry { draft, category_given }
}

/// `<total> [<merchant>] [<category>]`. Merchant and category may be split by
/// `,` or `|`; otherwise a trailing word naming a known category is taken as
/// the category. Returns whether a category was given.
fn parse_single_line(rest: &str, draft: &mut DraftExpense, categories: &KeywordTable) -> bool {
    let rest = rest.trim();
    let (amount, tail) = match rest.split_once(char::is_whitespace) {
        Some((amount, tail)) => (amount, tail.trim()),
        None => (rest, ""),
    };
    draft.total = parse_amount(amount);
    if tail.is_empty() {
        return false;
    }

    if let Some((merchant, category)) = tail.split_once([',', '|']) {
        let merchant = squash(merchant);
        let category = squash(category);
        if !merchant.is_empty() {
            draft.merchant = merchant;
        }
        if category.is_empty() {
            return false;
        }
        draft.category = canonical(&category, categories);
        return true;
    }

    let words: Vec<&str> = tail.split_whitespace().collect();
    if let Some((last, init)) = words.split_last() {
        if let Some(label) = categories.canonical_label(last) {
            draft.category = label.to_string();
            if !init.is_empty() {
                draft.merchant = init.join(" ");
            }
            return true;
        }
    }
    draft.merchant = words.join(" ");
    false
}

fn canonical(name: &str, categories: &KeywordTable) -> String {
    categories.canonical_label(name).map(str::to_string).unwrap_or_else(|| name.to_string())
}
