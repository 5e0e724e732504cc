//! Script reader.
//!
//! A script holds one step per line: a keyword followed by bare words and
//! double-quoted strings. `#` outside a string starts a comment.
//!
//! ```text
//! send "ifconfig up"
//! send "thread start"
//! advance 10s
//! poll "state" "leader|router" within 30s every 1s   # role settles
//! rows "child table" 2
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result, bail, ensure};

use crate::step::Step;
use crate::steps::{Advance, Expect, ExpectResult, Poll, SendCommand, TableRows};

/// One lexical item of a script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Quoted(String),
}

/// The arguments after a step keyword, consumed front to back.
#[derive(Debug)]
pub struct Args {
    keyword: String,
    tokens: VecDeque<Token>,
}

impl Args {
    fn new(keyword: &str, tokens: impl IntoIterator<Item = Token>) -> Self {
        Self {
            keyword: keyword.to_string(),
            tokens: tokens.into_iter().collect(),
        }
    }

    /// Next argument, which must be a quoted string.
    pub fn quoted(&mut self, what: &str) -> Result<String> {
        match self.tokens.pop_front() {
            Some(Token::Quoted(text)) => Ok(text),
            Some(Token::Word(word)) => bail!("{}: expected quoted {what}, got {word:?}", self.keyword),
            None => bail!("{}: missing {what}", self.keyword),
        }
    }

    /// Next argument, which must be a bare word.
    pub fn word(&mut self, what: &str) -> Result<String> {
        match self.tokens.pop_front() {
            Some(Token::Word(word)) => Ok(word),
            Some(Token::Quoted(text)) => bail!("{}: expected {what}, got string {text:?}", self.keyword),
            None => bail!("{}: missing {what}", self.keyword),
        }
    }

    pub fn duration(&mut self, what: &str) -> Result<Duration> {
        let word = self.word(what)?;
        parse_duration(&word).with_context(|| format!("{}: bad {what}", self.keyword))
    }

    /// A trailing duration, if one is left.
    pub fn optional_duration(&mut self, what: &str) -> Result<Option<Duration>> {
        if self.tokens.is_empty() {
            return Ok(None);
        }
        self.duration(what).map(Some)
    }

    pub fn count(&mut self, what: &str) -> Result<usize> {
        let word = self.word(what)?;
        word.parse()
            .with_context(|| format!("{}: {what} must be a whole number, got {word:?}", self.keyword))
    }

    /// Consume `word` if it is next. Returns whether it was there.
    pub fn flag(&mut self, word: &str) -> bool {
        if matches!(self.tokens.front(), Some(Token::Word(w)) if w == word) {
            self.tokens.pop_front();
            true
        } else {
            false
        }
    }

    /// Like [`Args::flag`], but the word is mandatory.
    pub fn require(&mut self, word: &str) -> Result<()> {
        ensure!(self.flag(word), "{}: expected `{word}`", self.keyword);
        Ok(())
    }

    /// Arguments for `keyword` read from `rest` of a script line.
    #[cfg(test)]
    pub(crate) fn from_line(keyword: &str, rest: &str) -> Result<Self> {
        Ok(Self::new(keyword, tokenize(rest)?))
    }

    pub(crate) fn finish(self) -> Result<()> {
        ensure!(
            self.tokens.is_empty(),
            "{}: unexpected trailing arguments {:?}",
            self.keyword,
            self.tokens
        );
        Ok(())
    }
}

/// Parse a whole script.
///
/// # Example
///
/// ```
/// use nodectl::parse_str;
///
/// let steps = parse_str("send \"state\"\nexpect \"leader\" 2s\n").unwrap();
/// assert_eq!(steps.len(), 2);
/// ```
pub fn parse_str(content: &str) -> Result<Vec<Box<dyn Step>>> {
    let mut steps = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let step = parse_line(line).with_context(|| format!("line {}: {}", index + 1, line.trim()))?;
        steps.extend(step);
    }
    Ok(steps)
}

pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<Box<dyn Step>>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script file: {}", path.display()))?;
    parse_str(&content)
}

/// `None` for blank and comment-only lines.
fn parse_line(line: &str) -> Result<Option<Box<dyn Step>>> {
    let mut tokens = tokenize(line)?.into_iter();
    let keyword = match tokens.next() {
        None => return Ok(None),
        Some(Token::Word(word)) => word,
        Some(Token::Quoted(text)) => bail!("expected a step keyword, got string {text:?}"),
    };

    let mut args = Args::new(&keyword, tokens);
    let step: Box<dyn Step> = match keyword.as_str() {
        SendCommand::NAME => Box::new(SendCommand::parse(&mut args)?),
        Expect::NAME => Box::new(Expect::parse(&mut args)?),
        ExpectResult::NAME => Box::new(ExpectResult::parse(&mut args)?),
        Poll::NAME => Box::new(Poll::parse(&mut args)?),
        TableRows::NAME => Box::new(TableRows::parse(&mut args)?),
        Advance::NAME => Box::new(Advance::parse(&mut args)?),
        other => bail!("unknown step {other:?}"),
    };
    args.finish()?;
    Ok(Some(step))
}

/// Split a line into words and quoted strings, dropping any comment.
///
/// Inside quotes `\n`, `\t`, `\"` and `\\` are unescaped; any other
/// backslash sequence is kept as written so regex classes like `\d`
/// survive.
fn tokenize(line: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch == '#' {
            break;
        }
        if ch == '"' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some(c @ ('"' | '\\')) => text.push(c),
                        Some(c) => {
                            text.push('\\');
                            text.push(c);
                        }
                        None => bail!("unterminated string"),
                    },
                    Some(c) => text.push(c),
                    None => bail!("unterminated string"),
                }
            }
            tokens.push(Token::Quoted(text));
            continue;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '"' || c == '#' {
                break;
            }
            word.push(c);
            chars.next();
        }
        tokens.push(Token::Word(word));
    }
    Ok(tokens)
}

/// Parse `250us`, `500ms`, `1.5s` or `2m`.
pub(crate) fn parse_duration(text: &str) -> Result<Duration> {
    let split = text
        .find(|c: char| c.is_ascii_alphabetic())
        .with_context(|| format!("duration {text:?} has no unit"))?;
    let (number, unit) = text.split_at(split);
    let micros_per_unit: u64 = match unit {
        "us" => 1,
        "ms" => 1_000,
        "s" => 1_000_000,
        "m" => 60_000_000,
        _ => bail!("unknown unit {unit:?} in {text:?}"),
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(micros_per_unit)
            .map(Duration::from_micros)
            .with_context(|| format!("duration {text:?} out of range"));
    }
    let value: f64 = number
        .parse()
        .with_context(|| format!("invalid number in duration {text:?}"))?;
    Duration::try_from_secs_f64(value * micros_per_unit as f64 / 1e6)
        .with_context(|| format!("duration {text:?} out of range"))
}
