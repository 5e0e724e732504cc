//! Decoders for the structured text a device CLI prints.
//!
//! Each decoder takes the body lines of a transaction and returns typed
//! records. Decoders are pure: malformed lines are skipped and logged as
//! [`ParseSkipped`](crate::error::ParseSkipped), and input with no content
//! yields an empty result.

pub mod block;
pub mod counters;
pub mod kv;
pub mod table;

pub use block::{BlockRecord, Value};
pub use counters::Counters;
pub use table::{Row, Table};

/// Trimmed, non-empty lines of `lines`.
fn content<S: AsRef<str>>(lines: &[S]) -> impl Iterator<Item = &str> {
    lines.iter().map(|l| l.as_ref().trim()).filter(|l| !l.is_empty())
}
