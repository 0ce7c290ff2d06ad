use struk_core::KeywordRule;

pub const DEFAULT_CATEGORY: &str = "Other";
pub const DEFAULT_PAYMENT_METHOD: &str = "Unknown";

/// Internal pairing of a rule with its lowercased keywords.
#[derive(Debug, Clone)]
struct CompiledRule {
    label: String,
    keywords: Vec<String>,
}

/// An ordered keyword → label table. The first rule with a keyword contained
/// in the text wins; `fallback` is used when none match.
#[derive(Debug, Clone)]
pub struct KeywordTable {
    rules: Vec<CompiledRule>,
    fallback: String,
}

impl KeywordTable {
    pub fn new(rules: Vec<KeywordRule>, fallback: impl Into<String>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| CompiledRule {
                label: r.label,
                keywords: r
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .collect();
        Self { rules, fallback: fallback.into() }
    }

    pub fn default_categories() -> Self {
        Self::new(
            vec![
                KeywordRule::new(
                    "Shopping",
                    &["alfamart", "indomaret", "alfamidi", "minimarket", "supermarket", "belanja"],
                ),
                KeywordRule::new(
                    "Food & Drink",
                    &["makan", "jajan", "kopi", "coffee", "resto", "cafe", "bakso"],
                ),
                KeywordRule::new(
                    "Transport",
                    &["grab", "gojek", "ojek", "transport", "parkir", "bensin", "pertamina"],
                ),
                KeywordRule::new("Utilities", &["pulsa", "listrik", "token", "pln", "pdam"]),
            ],
            DEFAULT_CATEGORY,
        )
    }

    pub fn default_payments() -> Self {
        Self::new(
            vec![
                KeywordRule::new("QRIS", &["qris"]),
                KeywordRule::new("Cash", &["tunai", "cash"]),
                KeywordRule::new(
                    "Card",
                    &["debit", "kredit", "credit", "card", "kartu", "visa", "mastercard", "edc"],
                ),
            ],
            DEFAULT_PAYMENT_METHOD,
        )
    }

    /// Build from configured rules, or fall back to `default` when none are configured.
    pub fn or_default(rules: &[KeywordRule], fallback: &str, default: fn() -> Self) -> Self {
        if rules.is_empty() {
            default()
        } else {
            Self::new(rules.to_vec(), fallback)
        }
    }

    pub fn first_match(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.rules
            .iter()
            .find(|r| r.keywords.iter().any(|k| text.contains(k.as_str())))
            .map(|r| r.label.as_str())
    }

    #[cfg(test)]
    fn classify(&self, text: &str) -> &str {
        self.first_match(text).unwrap_or(&self.fallback)
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// All labels, in rule order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.label.as_str())
    }

    /// The configured label matching `name` case-insensitively, if any.
    pub fn canonical_label(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        self.labels()
            .chain(std::iter::once(self.fallback.as_str()))
            .find(|l| l.eq_ignore_ascii_case(name))
    }
}
