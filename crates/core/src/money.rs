use serde::{Deserialize, Serialize};
use std::fmt;

/// A whole-rupiah amount. Receipts in this domain never carry minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rupiah(i64);

impl Rupiah {
    pub fn new(amount: i64) -> Self {
        Rupiah(amount)
    }

    pub fn amount(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Parse a printed numeral such as `15.000`, `1,250,000` or `27500`.
    ///
    /// Both `.` and `,` are treated as thousands separators and dropped.
    /// Anything other than digits and separators is rejected.
    pub fn from_numeral(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
            return None;
        }
        let digits: String = s.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return None;
        }
        digits.parse::<i64>().ok().map(Rupiah)
    }

    /// The amount with `.` thousands separators, e.g. `1.250.000`.
    pub fn grouped(self) -> String {
        let digits = self.0.unsigned_abs().to_string();
        let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
        if self.0 < 0 {
            out.push('-');
        }
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                out.push('.');
            }
            out.push(c);
        }
        out
    }
}

impl fmt::Display for Rupiah {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rp {}", self.grouped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grouped_numerals() {
        assert_eq!(Rupiah::from_numeral("15.000"), Some(Rupiah::new(15_000)));
        assert_eq!(Rupiah::from_numeral("1,250,000"), Some(Rupiah::new(1_250_000)));
        assert_eq!(Rupiah::from_numeral("27500"), Some(Rupiah::new(27_500)));
    }

    #[test]
    fn rejects_non_numerals() {
        assert_eq!(Rupiah::from_numeral(""), None);
        assert_eq!(Rupiah::from_numeral("..."), None);
        assert_eq!(Rupiah::from_numeral("Rp 5.000"), None);
        assert_eq!(Rupiah::from_numeral("12a"), None);
    }

    #[test]
    fn grouped_formatting() {
        assert_eq!(Rupiah::new(0).grouped(), "0");
        assert_eq!(Rupiah::new(999).grouped(), "999");
        assert_eq!(Rupiah::new(15_000).grouped(), "15.000");
        assert_eq!(Rupiah::new(1_250_000).grouped(), "1.250.000");
        assert_eq!(Rupiah::new(-2_000).grouped(), "-2.000");
    }

    #[test]
    fn display_has_currency_prefix() {
        assert_eq!(Rupiah::new(21_000).to_string(), "Rp 21.000");
    }

    #[test]
    fn positivity() {
        assert!(Rupiah::new(1).is_positive());
        assert!(!Rupiah::new(0).is_positive());
        assert!(!Rupiah::new(-5).is_positive());
    }
}
