//! `advance 500ms`

use anyhow::Result;
use async_trait::async_trait;

use crate::clock::Ticks;
use crate::parser::Args;
use crate::step::{Step, StepContext};

/// Moves the shared virtual clock forward, letting scheduled device events
/// fire.
pub struct Advance {
    pub ticks: Ticks,
}

impl Advance {
    pub const NAME: &'static str = "advance";
}

#[async_trait(?Send)]
impl Step for Advance {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &mut Args) -> Result<Self> {
        let ticks = Ticks::from_duration(args.duration("duration")?);
        Ok(Self { ticks })
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<()> {
        ctx.advance(self.ticks).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let mut args = Args::from_line("advance", "2s").unwrap();
        assert_eq!(Advance::parse(&mut args).unwrap().ticks, Ticks::from_secs(2));

        let mut args = Args::from_line("advance", "soon").unwrap();
        assert!(Advance::parse(&mut args).is_err());
    }
}
