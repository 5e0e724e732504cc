//! `poll "state" "leader|router" within 30s every 1s`

use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;

use crate::parser::Args;
use crate::pattern::PatternSet;
use crate::step::{Step, StepContext};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Re-runs a command until one of its body lines matches, advancing the
/// virtual clock between attempts. `every` defaults to one second.
pub struct Poll {
    pub command: String,
    pub patterns: PatternSet,
    pub budget: Duration,
    pub interval: Duration,
}

impl Poll {
    pub const NAME: &'static str = "poll";
}

#[async_trait(?Send)]
impl Step for Poll {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &mut Args) -> Result<Self> {
        let command = args.quoted("command")?;
        let pattern = args.quoted("pattern")?;
        let patterns = PatternSet::regex(&pattern).with_context(|| format!("poll: bad pattern {pattern:?}"))?;
        args.require("within")?;
        let budget = args.duration("budget")?;
        let interval = if args.flag("every") {
            args.duration("interval")?
        } else {
            DEFAULT_INTERVAL
        };
        Ok(Self {
            command,
            patterns,
            budget,
            interval,
        })
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<()> {
        ctx.poll(&self.command, &self.patterns, self.budget, self.interval)
            .await?;
        Ok(())
    }
}
