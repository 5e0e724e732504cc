//! `result "ipaddr" "fe80:.*"`

use anyhow::{Context as _, Result};
use async_trait::async_trait;

use crate::parser::Args;
use crate::pattern::PatternSet;
use crate::step::{Step, StepContext};

/// Runs a command and requires exactly one body line to match the pattern.
/// The matching line is printed.
pub struct ExpectResult {
    pub command: String,
    pub patterns: PatternSet,
}

impl ExpectResult {
    pub const NAME: &'static str = "result";
}

#[async_trait(?Send)]
impl Step for ExpectResult {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &mut Args) -> Result<Self> {
        let command = args.quoted("command")?;
        let pattern = args.quoted("pattern")?;
        let patterns = PatternSet::regex(&pattern).with_context(|| format!("result: bad pattern {pattern:?}"))?;
        Ok(Self { command, patterns })
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<()> {
        ctx.result(&self.command, &self.patterns).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(rest: &str) -> Result<ExpectResult> {
        ExpectResult::parse(&mut Args::from_line("result", rest)?)
    }

    #[test]
    fn test_parse() {
        let step = parse(r#""ipaddr" "fe80:.*""#).unwrap();
        assert_eq!(step.command, "ipaddr");
        assert!(step.patterns.matches("fe80:0:0:0:a8d3:7e39:26f6:8f4e").is_some());
    }

    #[test]
    fn test_pattern_is_required() {
        assert!(parse(r#""ipaddr""#).is_err());
        assert!(parse(r#""ipaddr" fe80"#).is_err());
    }
}
