//! Counter blocks such as `trel counters` and `ba counters`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::content;
use crate::error::ParseSkipped;

const DECODER: &str = "counters";

static TRIPLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+):\D+(\d+)\D+(\d+)(?:\D+(\d+))?").expect("counter regex is valid")
});

static SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+): (\d+)").expect("counter regex is valid"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub packets: u64,
    pub bytes: u64,
    /// Absent when the line carries only two numbers.
    pub failures: Option<u64>,
}

/// Decode `name: <packets> <bytes> [<failures>]` lines.
///
/// Any non-digit text may separate the numbers, so
/// `Inbound:  Packets 10 Bytes 20` decodes the same as `Inbound: 10 20`.
pub fn decode<S: AsRef<str>>(lines: &[S]) -> BTreeMap<String, Counters> {
    let mut counters = BTreeMap::new();
    for line in content(lines) {
        let Some(caps) = TRIPLE.captures(line) else {
            ParseSkipped::new(DECODER, line, "not a counter line").log();
            continue;
        };
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
        match (number(2), number(3)) {
            (Some(packets), Some(bytes)) => {
                counters.insert(
                    caps[1].to_string(),
                    Counters {
                        packets,
                        bytes,
                        failures: number(4),
                    },
                );
            }
            _ => ParseSkipped::new(DECODER, line, "counter out of range").log(),
        }
    }
    counters
}

/// Decode `name: <value>` lines.
pub fn decode_single<S: AsRef<str>>(lines: &[S]) -> BTreeMap<String, u64> {
    let mut counters = BTreeMap::new();
    for line in content(lines) {
        match SINGLE
            .captures(line)
            .and_then(|caps| Some((caps[1].to_string(), caps[2].parse::<u64>().ok()?)))
        {
            Some((name, value)) => {
                counters.insert(name, value);
            }
            None => ParseSkipped::new(DECODER, line, "not a counter line").log(),
        }
    }
    counters
}
