//! `key: value` blocks and single-line field records.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::content;
use crate::error::ParseSkipped;

const DECODER: &str = "kv";

static LEADING_INT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+").expect("integer regex is valid"));

/// Split each line once on its first colon. A leading `- ` bullet is removed.
/// Later duplicates of a key win.
pub fn decode<S: AsRef<str>>(lines: &[S]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in content(lines) {
        let line = line.strip_prefix("- ").unwrap_or(line);
        match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => ParseSkipped::new(DECODER, line, "no key").log(),
        }
    }
    map
}

/// Leading integer of a value, ignoring any unit or annotation after it.
///
/// `"1000 ms"` and `"1000ms"` give 1000, `"-20 (dBm)"` gives -20.
pub fn numeric(value: &str) -> Option<i64> {
    LEADING_INT.find(value.trim_start())?.as_str().parse().ok()
}

/// [`decode`], keeping only values with a leading integer.
pub fn decode_numeric<S: AsRef<str>>(lines: &[S]) -> BTreeMap<String, i64> {
    decode(lines)
        .into_iter()
        .filter_map(|(key, value)| match numeric(&value) {
            Some(n) => Some((key, n)),
            None => {
                ParseSkipped::new(DECODER, &value, format!("{key} is not numeric")).log();
                None
            }
        })
        .collect()
}

/// Parse a one-line record such as
/// `instance:"my-service", name:"_ipps._udp", state:Registered, port:12345`.
///
/// Surrounding quotes are removed from values.
pub fn decode_fields(line: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for field in line.split(", ").map(str::trim).filter(|f| !f.is_empty()) {
        match field.split_once(':') {
            Some((key, value)) => {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                map.insert(key.trim().to_string(), value.to_string());
            }
            None => ParseSkipped::new(DECODER, field, "no key").log(),
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_link_metrics_report() {
        let lines = [
            "Received Link Metrics Report from: fe80:0:0:0:146e:a00:0:1",
            "- PDU Counter: 1 (Count/Summation)",
            "- LQI: 0 (Exponential Moving Average)",
            "- Margin: 80 (dB) (Exponential Moving Average)",
            "- RSSI: -20 (dBm) (Exponential Moving Average)",
        ];
        let map = decode(&lines);
        assert_eq!(
            map.get("Received Link Metrics Report from").map(String::as_str),
            Some("fe80:0:0:0:146e:a00:0:1")
        );
        assert_eq!(map.get("RSSI").map(String::as_str), Some("-20 (dBm) (Exponential Moving Average)"));

        let numbers = decode_numeric(&lines);
        assert_eq!(numbers.get("PDU Counter"), Some(&1));
        assert_eq!(numbers.get("Margin"), Some(&80));
        assert_eq!(numbers.get("RSSI"), Some(&-20));
        assert!(!numbers.contains_key("Received Link Metrics Report from"));
    }

    #[test]
    fn test_numeric() {
        assert_eq!(numeric("1000 ms"), Some(1000));
        assert_eq!(numeric("-20 (dBm)"), Some(-20));
        assert_eq!(numeric("42"), Some(42));
        assert_eq!(numeric("1000ms"), Some(1000));
        assert_eq!(numeric("-20dBm"), Some(-20));
        assert_eq!(numeric("-dBm"), None);
        assert_eq!(numeric("leader"), None);
        assert_eq!(numeric(""), None);
    }

    #[test]
    fn test_lines_without_key_are_skipped() {
        let map = decode(&["Done-ish", "Mode: rdn", ": orphan"]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("Mode").map(String::as_str), Some("rdn"));
    }

    #[test]
    fn test_decode_fields() {
        let line = r#"instance:"my-service", name:"_ipps._udp", state:ToAdd, port:12345, priority:0, weight:0"#;
        let fields = decode_fields(line);
        assert_eq!(fields.get("instance").map(String::as_str), Some("my-service"));
        assert_eq!(fields.get("name").map(String::as_str), Some("_ipps._udp"));
        assert_eq!(fields.get("state").map(String::as_str), Some("ToAdd"));
        assert_eq!(fields.get("port").map(String::as_str), Some("12345"));
        assert_eq!(fields.len(), 6);
    }

    #[test]
    fn test_empty_input() {
        let lines: [&str; 0] = [];
        assert!(decode(&lines).is_empty());
        assert!(decode_fields("").is_empty());
    }
}
