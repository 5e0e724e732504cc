//! `rows "child table" 2`

use anyhow::{Result, ensure};
use async_trait::async_trait;

use crate::parser::Args;
use crate::step::{Step, StepContext};

/// Runs a command, decodes its body as a column table and checks how many
/// data rows it has.
pub struct TableRows {
    pub command: String,
    pub expected: usize,
}

impl TableRows {
    pub const NAME: &'static str = "rows";
}

#[async_trait(?Send)]
impl Step for TableRows {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &mut Args) -> Result<Self> {
        let command = args.quoted("command")?;
        let expected = args.count("row count")?;
        Ok(Self { command, expected })
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<()> {
        let table = ctx.table(&self.command).await?;
        ensure!(
            table.len() == self.expected,
            "{:?} printed {} rows, expected {}",
            self.command,
            table.len(),
            self.expected
        );
        Ok(())
    }
}
