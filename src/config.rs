use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PUSH_CAP: usize = 5;
/// Amounts must be strictly above this many cents (10.00) to count as an invoice total.
pub const DEFAULT_MIN_AMOUNT_CENTS: i64 = 1_000;
pub const DEFAULT_MAX_SCANNED_MESSAGES: usize = 500;
pub const DEFAULT_MAX_RUN_SECS: u64 = 300;
pub const DEFAULT_MAILBOX: &str = "INBOX";
pub const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
pub const DEFAULT_IMAP_PORT: u16 = 993;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ImapSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_IMAP_HOST.to_string(),
            port: DEFAULT_IMAP_PORT,
        }
    }
}

impl ImapSettings {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("INVOICE_IMAP_HOST")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string()),
            port: env_parse("INVOICE_IMAP_PORT").unwrap_or(DEFAULT_IMAP_PORT),
        }
    }
}

/// Tunables of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub push_cap: usize,
    pub min_amount_cents: i64,
    pub max_scanned_messages: usize,
    pub max_run_duration: Duration,
    /// HTML parts are an optional source; PDF attachments are always extracted.
    pub include_html_bodies: bool,
    pub temp_dir: PathBuf,
    pub mailbox: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            push_cap: DEFAULT_PUSH_CAP,
            min_amount_cents: DEFAULT_MIN_AMOUNT_CENTS,
            max_scanned_messages: DEFAULT_MAX_SCANNED_MESSAGES,
            max_run_duration: Duration::from_secs(DEFAULT_MAX_RUN_SECS),
            include_html_bodies: false,
            temp_dir: std::env::temp_dir(),
            mailbox: DEFAULT_MAILBOX.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Reads overrides from `INVOICE_*` variables; anything unset or unparsable keeps its default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            push_cap: env_parse("INVOICE_PUSH_CAP").unwrap_or(defaults.push_cap),
            min_amount_cents: env_parse("INVOICE_MIN_AMOUNT_CENTS")
                .unwrap_or(defaults.min_amount_cents),
            max_scanned_messages: env_parse("INVOICE_MAX_SCANNED_MESSAGES")
                .unwrap_or(defaults.max_scanned_messages),
            max_run_duration: env_parse::<u64>("INVOICE_MAX_RUN_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_run_duration),
            include_html_bodies: std::env::var("INVOICE_INCLUDE_HTML")
                .ok()
                .map(|v| parse_boolish(&v))
                .unwrap_or(defaults.include_html_bodies),
            temp_dir: std::env::var("INVOICE_TEMP_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            mailbox: std::env::var("INVOICE_MAILBOX")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.mailbox),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.push_cap == 0 {
            return Err("push_cap must be at least 1".to_string());
        }
        if self.min_amount_cents < 0 {
            return Err("min_amount_cents must not be negative".to_string());
        }
        if self.max_scanned_messages == 0 {
            return Err("max_scanned_messages must be at least 1".to_string());
        }
        if self.max_run_duration.is_zero() {
            return Err("max_run_duration must be positive".to_string());
        }
        if self.mailbox.trim().is_empty() {
            return Err("mailbox name must not be empty".to_string());
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn parse_boolish(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.push_cap, 5);
        assert_eq!(cfg.min_amount_cents, 1_000);
        assert!(!cfg.include_html_bodies);
        assert_eq!(cfg.mailbox, "INBOX");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_push_cap_is_rejected() {
        let cfg = PipelineConfig {
            push_cap: 0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn boolish_values() {
        assert!(parse_boolish(" YES "));
        assert!(parse_boolish("1"));
        assert!(!parse_boolish("off"));
        assert!(!parse_boolish(""));
    }
}
