//! `send "ifconfig up"`

use anyhow::{Result, ensure};
use async_trait::async_trait;

use crate::parser::Args;
use crate::step::{Step, StepContext};

/// Runs a command and waits for its terminal marker. The body is printed
/// and kept for following `expect` steps.
pub struct SendCommand {
    pub command: String,
}

impl SendCommand {
    pub const NAME: &'static str = "send";
}

#[async_trait(?Send)]
impl Step for SendCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &mut Args) -> Result<Self> {
        let command = args.quoted("command")?;
        ensure!(
            !command.is_empty() && !command.contains(['\n', '\r']),
            "send: a device command is one non-empty line"
        );
        Ok(Self { command })
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<()> {
        ctx.send(&self.command).await
    }
}
