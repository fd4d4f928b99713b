//! Human-friendly durations such as `"90s"`, `"15m"`, `"6h"` or `"1d"`.
//!
//! Also usable as a serde `with` module for `Duration` fields.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Parse interval string like "1h", "30m", "6h", "1d", or raw seconds.
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    let (number, unit, name) = if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600, "hours")
    } else if let Some(minutes) = s.strip_suffix('m') {
        (minutes, 60, "minutes")
    } else if let Some(days) = s.strip_suffix('d') {
        (days, 86400, "days")
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1, "seconds")
    } else {
        return s
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| format!("Invalid interval: {}. Use format like '1h', '30m', '1d'", s));
    };

    let count = number
        .parse::<u64>()
        .map_err(|_| format!("Invalid {}: {}", name, number))?;
    let secs = count
        .checked_mul(unit)
        .ok_or_else(|| format!("Invalid {}: {} is too large", name, number))?;

    Ok(Duration::from_secs(secs))
}

/// Format interval for display
pub fn format_interval(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 86400 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_interval(*d))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(s) => parse_interval(&s).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_interval("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_interval("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_interval("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_interval("3600").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_interval(" 6H ").unwrap(), Duration::from_secs(21600));
        assert!(parse_interval("invalid").is_err());
        assert!(parse_interval("m").is_err());
    }

    #[test]
    fn test_parse_interval_overflow_is_an_error() {
        let huge = format!("{}d", u64::MAX);
        assert!(parse_interval(&huge).unwrap_err().contains("too large"));
        assert!(parse_interval("99999999999999999h").is_err());
        assert_eq!(
            parse_interval(&u64::MAX.to_string()).unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(Duration::from_secs(3600)), "1h");
        assert_eq!(format_interval(Duration::from_secs(1800)), "30m");
        assert_eq!(format_interval(Duration::from_secs(86400)), "1d");
        assert_eq!(format_interval(Duration::from_secs(90)), "90s");
        assert_eq!(format_interval(Duration::from_secs(7200)), "2h");
    }
}
