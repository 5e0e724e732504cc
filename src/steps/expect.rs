//! `expect "Role .* -> leader" 30s`

use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;

use crate::parser::Args;
use crate::pattern::PatternSet;
use crate::step::{Step, StepContext};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Waits for a whole output line matching a regex.
///
/// Body lines left by the previous `send` are searched first and consumed up
/// to the match, so two `expect` steps never match the same line.
pub struct Expect {
    pub patterns: PatternSet,
    pub timeout: Duration,
}

impl Expect {
    pub const NAME: &'static str = "expect";
}

#[async_trait(?Send)]
impl Step for Expect {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &mut Args) -> Result<Self> {
        let pattern = args.quoted("pattern")?;
        let patterns = PatternSet::regex(&pattern).with_context(|| format!("expect: bad pattern {pattern:?}"))?;
        let timeout = args.optional_duration("timeout")?.unwrap_or(DEFAULT_TIMEOUT);
        Ok(Self { patterns, timeout })
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<()> {
        ctx.expect_line(&self.patterns, self.timeout).await?;
        Ok(())
    }
}
