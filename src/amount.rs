use regex::Regex;
use std::sync::OnceLock;

/// Cascade order matters: currency-symbol patterns first, labelled totals last.
const AMOUNT_PATTERNS: [(&str, &str); 5] = [
    ("rupee_symbol", r"₹\s?(\d[\d,]*\.?\d*)"),
    ("rs", r"Rs\.?\s?(\d[\d,]*\.?\d*)"),
    ("inr", r"INR\s?(\d[\d,]*\.?\d*)"),
    ("invoice_total", r"Invoice Total\s+(\d+\.\d{2})"),
    ("total_amount", r"Total Amount\s+(\d+\.\d{2})"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountMatch {
    pub cents: i64,
    pub pattern: &'static str,
}

fn amount_cascade() -> &'static [(&'static str, Regex)] {
    static CASCADE: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    CASCADE.get_or_init(|| {
        AMOUNT_PATTERNS
            .iter()
            .map(|(name, pattern)| (*name, Regex::new(pattern).expect("invalid amount regex")))
            .collect()
    })
}

/// First value strictly above `min_exclusive_cents`, trying patterns in cascade order
/// and matches of one pattern in text order.
pub fn extract_amount(text: &str, min_exclusive_cents: i64) -> Option<i64> {
    extract_amount_match(text, min_exclusive_cents).map(|m| m.cents)
}

pub fn extract_amount_match(text: &str, min_exclusive_cents: i64) -> Option<AmountMatch> {
    for (name, re) in amount_cascade() {
        let hit = re
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| ParsedAmount::parse(m.as_str()))
            .find(|amount| amount.exceeds(min_exclusive_cents));
        if let Some(amount) = hit {
            return Some(AmountMatch {
                cents: amount.rounded_cents,
                pattern: name,
            });
        }
    }
    None
}

/// Parses `1,234.56`-style text into cents. Digits past the second decimal are rounded half-up.
pub fn parse_amount_to_cents(raw: &str) -> Option<i64> {
    ParsedAmount::parse(raw).map(|amount| amount.rounded_cents)
}

/// Exact decimal view of an amount: whole cents plus whether anything non-zero follows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ParsedAmount {
    truncated_cents: i64,
    sub_cent: bool,
    rounded_cents: i64,
}

impl ParsedAmount {
    fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim().replace(',', "");
        if s.is_empty() {
            return None;
        }
        let parts = s.split('.').collect::<Vec<_>>();
        if parts.len() > 2 {
            return None;
        }
        let int_part = parts[0];
        if int_part.is_empty() || !int_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let frac_part = if parts.len() == 2 { parts[1] } else { "" };
        if !frac_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let int_val = int_part.parse::<i64>().ok()?;
        let digits = frac_part.as_bytes();
        let digit = |i: usize| digits.get(i).map(|b| i64::from(b - b'0')).unwrap_or(0);
        let truncated_cents = int_val
            .checked_mul(100)?
            .checked_add(digit(0) * 10 + digit(1))?;
        let round_up = i64::from(digit(2) >= 5);
        Some(Self {
            truncated_cents,
            sub_cent: digits.iter().skip(2).any(|b| *b != b'0'),
            rounded_cents: truncated_cents.checked_add(round_up)?,
        })
    }

    /// Strictly above `min_cents` on the exact value, before rounding.
    fn exceeds(&self, min_cents: i64) -> bool {
        self.truncated_cents > min_cents || (self.truncated_cents == min_cents && self.sub_cent)
    }
}
