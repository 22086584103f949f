use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Utc};
use mailparse::{MailHeaderMap, ParsedMail};
use regex::Regex;
use std::sync::OnceLock;

/// Inclusive `[start, end]` span of message timestamps eligible for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    /// First instant of the previous calendar month (UTC) through `now`.
    pub fn trailing_two_months(now: DateTime<Utc>) -> Self {
        let first_this_month = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
            .unwrap_or_else(|| now.date_naive());
        let last_prev_month = first_this_month - Duration::days(1);
        let first_prev_month =
            NaiveDate::from_ymd_opt(last_prev_month.year(), last_prev_month.month(), 1)
                .unwrap_or(last_prev_month);
        let start = Utc.from_utc_datetime(&first_prev_month.and_hms_opt(0, 0, 0).unwrap_or_default());
        Self { start, end: now }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

const MONTH_TOKENS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4}\b").expect("invalid year regex"))
}

/// Strict RFC 2822 first. The lenient mailparse parser only gets headers that carry
/// both a four-digit year and a month name, since it maps arbitrary text to the epoch.
pub fn parse_date_header(raw: &str) -> Result<DateTime<Utc>, String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err("empty Date header".to_string());
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(text) {
        return Ok(ts.with_timezone(&Utc));
    }

    let lower = text.to_ascii_lowercase();
    let has_month = MONTH_TOKENS.iter().any(|m| lower.contains(m));
    if !has_month || !year_re().is_match(text) {
        return Err(format!("unparseable Date header {text:?}"));
    }
    let secs = mailparse::dateparse(text)
        .map_err(|e| format!("unparseable Date header {text:?}: {e}"))?;
    if secs <= 0 {
        return Err(format!("unparseable Date header {text:?}"));
    }
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| format!("Date header out of range: {text:?}"))
}

pub fn message_date(mail: &ParsedMail) -> Result<DateTime<Utc>, String> {
    let raw = mail
        .headers
        .get_first_value("Date")
        .ok_or_else(|| "missing Date header".to_string())?;
    parse_date_header(&raw)
}

/// Calendar date of `ts` as seen in the reader's local timezone.
pub fn local_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&Local).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().expect("valid ts")
    }

    #[test]
    fn window_starts_at_first_of_previous_month() {
        let w = DateWindow::trailing_two_months(utc(2026, 10, 19, 12));
        assert_eq!(w.start, utc(2026, 9, 1, 0));
        assert_eq!(w.end, utc(2026, 10, 19, 12));
    }

    #[test]
    fn window_crosses_year_boundary() {
        let w = DateWindow::trailing_two_months(utc(2026, 1, 3, 8));
        assert_eq!(w.start, utc(2025, 12, 1, 0));
    }

    #[test]
    fn contains_is_inclusive_and_rejects_old_and_future() {
        let now = utc(2026, 10, 19, 12);
        let w = DateWindow::trailing_two_months(now);
        assert!(w.contains(utc(2026, 9, 1, 0)));
        assert!(w.contains(now));
        assert!(w.contains(utc(2026, 10, 1, 9)));
        assert!(!w.contains(utc(2026, 6, 19, 12)));
        assert!(!w.contains(utc(2026, 8, 31, 23)));
        assert!(!w.contains(utc(2026, 10, 19, 13)));
    }

    #[test]
    fn parses_rfc2822_dates_with_offsets() {
        let ts = parse_date_header("Mon, 19 Oct 2026 10:30:00 +0530").expect("parse date");
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 10, 19, 5, 0, 0).single().expect("ts"));
    }

    #[test]
    fn malformed_dates_are_errors_not_panics() {
        assert!(parse_date_header("").is_err());
        assert!(parse_date_header("yesterday-ish").is_err());
        assert!(parse_date_header("not a date at all").is_err());
        assert!(parse_date_header("garbage 12").is_err());
        assert!(parse_date_header("sometime in 2026").is_err());
    }

    #[test]
    fn dates_without_weekday_parse() {
        let ts = parse_date_header("19 Oct 2026 10:30:00 GMT").expect("parse date");
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 10, 19, 10, 30, 0).single().expect("ts"));
    }
}
