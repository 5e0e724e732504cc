//! The [`Step`] trait and the [`StepContext`] steps run against.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::clock::Ticks;
use crate::decode::Table;
use crate::parser::Args;
use crate::pattern::PatternSet;
use crate::session::Session;
use crate::transaction::{Outcome, TransactionOptions};

type OutputHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// What a running script sees: the session under control, where printed
/// lines go, and the response lines of the last `send` that no `expect`
/// has consumed yet.
pub struct StepContext {
    session: Arc<Session>,
    unread: VecDeque<String>,
    output_handler: OutputHandler,
}

impl StepContext {
    pub(crate) fn new(session: Arc<Session>, output_handler: OutputHandler) -> Self {
        Self {
            session,
            unread: VecDeque::new(),
            output_handler,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Print one line through the output handler.
    pub fn print(&self, line: &str) {
        (self.output_handler)(format!("{line}\n").as_bytes());
    }

    /// Run `command`, print its body and keep it for later `expect` steps.
    /// A device error line fails the step.
    pub async fn send(&mut self, command: &str) -> Result<()> {
        let result = self
            .session
            .execute_queued(command, TransactionOptions::default())
            .await?;

        for line in &result.body {
            self.print(line);
        }
        self.unread = result.body.into();

        match result.outcome {
            Outcome::Done => Ok(()),
            Outcome::Error { code, message } => Err(anyhow!(
                "{command:?} failed with device error {}: {message}",
                code.map_or_else(|| "?".to_string(), |c| c.to_string())
            )),
        }
    }

    /// Find a line matching `patterns`: unread body lines first, consumed up
    /// to and including the match, then live output for up to `timeout`.
    pub async fn expect_line(&mut self, patterns: &PatternSet, timeout: Duration) -> Result<String> {
        while let Some(line) = self.unread.pop_front() {
            if patterns.matches(&line).is_some() {
                return Ok(line);
            }
        }

        let (_, line) = self.session.expect_line(patterns, timeout).await?;
        self.print(&line);
        Ok(line)
    }

    /// The one body line of `command` matching `patterns`.
    pub async fn result(&mut self, command: &str, patterns: &PatternSet) -> Result<String> {
        self.unread.clear();
        let line = self.session.expect_result(command, patterns).await?;
        self.print(&line);
        Ok(line)
    }

    /// Re-run `command` every `interval` of virtual time until a body line
    /// matches `patterns`, for at most `budget`.
    pub async fn poll(
        &mut self,
        command: &str,
        patterns: &PatternSet,
        budget: Duration,
        interval: Duration,
    ) -> Result<String> {
        self.unread.clear();
        let session = &self.session;
        let what = format!("{command:?} to print a matching line");
        let line = session
            .verify_within(&what, budget, Ticks::from_duration(interval), move || async move {
                session
                    .command(command)
                    .await
                    .map(|body| body.into_iter().find(|line| patterns.matches(line).is_some()))
            })
            .await?;
        self.print(&line);
        Ok(line)
    }

    /// Run `command` and decode its body as a column table.
    pub async fn table(&mut self, command: &str) -> Result<Table> {
        self.unread.clear();
        let body = self.session.command(command).await?;
        for line in &body {
            self.print(line);
        }
        Ok(Table::decode(&body))
    }

    pub async fn advance(&self, ticks: Ticks) {
        self.session.clock().advance(ticks).await;
    }
}

/// A single script step.
///
/// A step owns its keyword through `NAME`, reads its arguments in
/// [`Step::parse`] and is wired into the keyword match in
/// [`crate::parser`].
#[async_trait(?Send)]
pub trait Step: 'static {
    fn name(&self) -> &'static str;

    /// Build the step from the arguments after its keyword. Arguments left
    /// unread are rejected by the parser.
    fn parse(args: &mut Args) -> Result<Self>
    where
        Self: Sized;

    async fn execute(&self, ctx: &mut StepContext) -> Result<()>;
}
