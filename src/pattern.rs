//! Line pattern matching over ordered alternatives.
//!
//! A [`PatternSet`] is an ordered list of [`Pattern`]s. Matching a line
//! returns the index of the first alternative that matches the *whole* line:
//! literals compare for equality and regular expressions are compiled
//! anchored at both ends. A pattern may itself be a nested set, which matches
//! if any of its members does.
//!
//! ```
//! use nodectl::PatternSet;
//!
//! let states = PatternSet::regexes(["detached", "child", "router", "leader"]).unwrap();
//! assert_eq!(states.matches("leader"), Some(3));
//! assert_eq!(states.matches("leaderish"), None);
//! ```

use regex::Regex;

/// A single alternative in a [`PatternSet`].
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches a line exactly equal to the text.
    Literal(String),
    /// Matches a line the expression matches in full.
    Regex(Regex),
    /// Matches if any nested alternative matches.
    Set(PatternSet),
}

impl Pattern {
    pub fn literal(text: impl Into<String>) -> Self {
        Pattern::Literal(text.into())
    }

    /// Compile `expr` as a full-line match.
    pub fn regex(expr: &str) -> Result<Self, regex::Error> {
        Ok(Pattern::Regex(Regex::new(&format!("^(?:{expr})$"))?))
    }

    fn is_match(&self, line: &str) -> bool {
        match self {
            Pattern::Literal(text) => line == text,
            Pattern::Regex(re) => re.is_match(line),
            Pattern::Set(set) => set.matches(line).is_some(),
        }
    }
}

impl From<PatternSet> for Pattern {
    fn from(set: PatternSet) -> Self {
        Pattern::Set(set)
    }
}

/// Ordered, immutable alternatives. Cheap to clone and safe to share.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self { patterns }
    }

    /// A set with one regular expression.
    pub fn regex(expr: &str) -> Result<Self, regex::Error> {
        Ok(Self::new(vec![Pattern::regex(expr)?]))
    }

    /// A set of regular expressions, tried in order.
    pub fn regexes<'a>(exprs: impl IntoIterator<Item = &'a str>) -> Result<Self, regex::Error> {
        let patterns = exprs
            .into_iter()
            .map(Pattern::regex)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(patterns))
    }

    /// A set of literal lines, tried in order.
    pub fn literals<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(Pattern::literal).collect())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Index of the first alternative matching `line`, if any.
    pub fn matches(&self, line: &str) -> Option<usize> {
        self.patterns.iter().position(|p| p.is_match(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_requires_full_line() {
        let set = PatternSet::literals(["Done"]);
        assert_eq!(set.matches("Done"), Some(0));
        assert_eq!(set.matches("Done!"), None);
        assert_eq!(set.matches("not Done"), None);
    }

    #[test]
    fn test_regex_is_anchored() {
        let set = PatternSet::regex(r"\d+").unwrap();
        assert_eq!(set.matches("240"), Some(0));
        assert_eq!(set.matches("240s"), None);
        assert_eq!(set.matches("x240"), None);
    }

    #[test]
    fn test_alternation_inside_regex_stays_anchored() {
        let set = PatternSet::regex(r"Done|Error 35: InvalidCommand").unwrap();
        assert_eq!(set.matches("Done"), Some(0));
        assert_eq!(set.matches("Error 35: InvalidCommand"), Some(0));
        assert_eq!(set.matches("Done Error 35: InvalidCommand"), None);
    }

    #[test]
    fn test_first_match_wins() {
        let set = PatternSet::regexes([r"\S+", "leader"]).unwrap();
        assert_eq!(set.matches("leader"), Some(0));
    }

    #[test]
    fn test_nested_sets_report_outer_index() {
        let roles = PatternSet::literals(["router", "leader"]);
        let set = PatternSet::new(vec![Pattern::literal("detached"), roles.into()]);
        assert_eq!(set.matches("detached"), Some(0));
        assert_eq!(set.matches("leader"), Some(1));
        assert_eq!(set.matches("child"), None);
    }

    #[test]
    fn test_invalid_regex_is_reported() {
        assert!(PatternSet::regex("(unclosed").is_err());
    }

    #[test]
    fn test_shared_across_threads() {
        let set = std::sync::Arc::new(PatternSet::regex(r"0x[0-9a-f]{4}").unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let set = set.clone();
                std::thread::spawn(move || set.matches("0xc801"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(0));
        }
    }
}
