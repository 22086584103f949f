use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Merchant platforms the pipeline recognises. Order of `ALL` is the match priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Swiggy,
    Zomato,
    Zepto,
    Amazon,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Swiggy,
        Platform::Zomato,
        Platform::Zepto,
        Platform::Amazon,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Swiggy => "Swiggy",
            Platform::Zomato => "Zomato",
            Platform::Zepto => "Zepto",
            Platform::Amazon => "Amazon",
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Platform::Swiggy => "swiggy",
            Platform::Zomato => "zomato",
            Platform::Zepto => "zepto",
            Platform::Amazon => "amazon",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(text))
            .ok_or_else(|| format!("unknown platform: {text}"))
    }
}

/// Case-insensitive substring match, first platform in priority order wins.
pub fn classify(text: &str) -> Option<Platform> {
    let lowered = text.to_lowercase();
    Platform::ALL
        .into_iter()
        .find(|p| lowered.contains(p.keyword()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_ignores_case() {
        assert_eq!(classify("SWIGGY order confirmed"), Some(Platform::Swiggy));
        assert_eq!(classify("swiggy order confirmed"), Some(Platform::Swiggy));
        assert_eq!(classify("Your ZoMaTo receipt"), Some(Platform::Zomato));
    }

    #[test]
    fn priority_order_decides_between_platforms() {
        assert_eq!(
            classify("Paid via Amazon Pay for your Zepto order"),
            Some(Platform::Zepto)
        );
        assert_eq!(
            classify("zomato and swiggy both mentioned"),
            Some(Platform::Swiggy)
        );
    }

    #[test]
    fn unknown_text_yields_none() {
        assert_eq!(classify("Flipkart order #1234"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn parses_display_names() {
        assert_eq!("amazon".parse::<Platform>(), Ok(Platform::Amazon));
        assert!("flipkart".parse::<Platform>().is_err());
    }
}
