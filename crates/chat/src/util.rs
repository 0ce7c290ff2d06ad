use struk_core::Rupiah;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        pub(crate) fn $name() -> &'static regex::Regex {
            static R: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
            R.get_or_init(|| regex::Regex::new($pat).expect("invalid regex"))
        }
    };
}

pub(crate) use re;

re!(re_amount, r"(?i)^(?:rp\.?\s*)?(\d{1,3}(?:[.,]\d{3})+|\d+)$");

/// A typed amount: `15000`, `15.000`, `Rp 15.000`, `rp15,000`.
pub(crate) fn parse_amount(s: &str) -> Option<Rupiah> {
    let caps = re_amount().captures(s.trim())?;
    Rupiah::from_numeral(caps.get(1)?.as_str())
}

/// `kopi  KENANGAN` → `Kopi Kenangan`
pub(crate) fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapse runs of whitespace into single spaces.
pub(crate) fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
