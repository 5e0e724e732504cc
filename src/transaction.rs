//! The transaction driver: one command, one response.
//!
//! A transaction writes a command, optionally advances the virtual clock,
//! consumes the device's echo of the command, then reads lines until a
//! terminal marker arrives. While nothing is readable the driver pumps the
//! clock with a zero advance, so a simulated device can make progress
//! without the scenario's time being pushed forward.
//!
//! Lines are trimmed and stripped of leading prompts before they are looked
//! at. Blank lines and device log lines never reach the response body.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::channel::{LineChannel, ReadLine};
use crate::clock::{Ticks, VirtualClock};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::pattern::PatternSet;
use crate::session::NodeId;

/// How the clock is advanced right after a command is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendAdvance {
    /// Follow the session configuration.
    #[default]
    Default,
    /// Do not touch the clock.
    Skip,
    /// Advance by exactly this much.
    By(Ticks),
}

/// Per-call knobs for a transaction. Unset fields follow the session config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub expect_echo: Option<bool>,
    pub timeout: Option<Duration>,
    pub advance: SendAdvance,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echo(mut self, expect_echo: bool) -> Self {
        self.expect_echo = Some(expect_echo);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn advance_by(mut self, ticks: Ticks) -> Self {
        self.advance = SendAdvance::By(ticks);
        self
    }

    pub fn no_advance(mut self) -> Self {
        self.advance = SendAdvance::Skip;
        self
    }
}

/// How a transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// The device printed an error line, e.g. `Error 35: InvalidCommand`.
    Error { code: Option<u32>, message: String },
}

/// Response to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    pub command: String,
    pub body: Vec<String>,
    pub outcome: Outcome,
}

impl TransactionResult {
    pub fn is_done(&self) -> bool {
        self.outcome == Outcome::Done
    }

    /// The body of a successful response, or the device's error.
    pub fn into_done(self, node: NodeId) -> SessionResult<Vec<String>> {
        match self.outcome {
            Outcome::Done => Ok(self.body),
            Outcome::Error { code, message } => Err(SessionError::DeviceError {
                node,
                code,
                message,
            }),
        }
    }
}

/// Split the text after the error prefix into code and message.
pub(crate) fn parse_error_line(rest: &str) -> (Option<u32>, String) {
    match rest.split_once(':') {
        Some((code, message)) => match code.trim().parse() {
            Ok(code) => (Some(code), message.trim().to_string()),
            Err(_) => (None, rest.trim().to_string()),
        },
        None => (None, rest.trim().to_string()),
    }
}

/// Remaining wait for one transaction.
#[derive(Debug)]
struct Budget {
    total: Duration,
    remaining: Duration,
    deadline: Instant,
}

impl Budget {
    fn new(total: Duration) -> Self {
        Self {
            total,
            remaining: total,
            deadline: Instant::now() + total,
        }
    }

    /// Length of the next read attempt, or `None` once exhausted.
    fn next_slice(&self, poll: Duration) -> Option<Duration> {
        let wall = self.deadline.saturating_duration_since(Instant::now());
        let slice = poll.min(self.remaining).min(wall);
        (!slice.is_zero()).then_some(slice)
    }

    fn missed(&mut self, poll: Duration) {
        self.remaining = self.remaining.saturating_sub(poll);
    }
}

/// Drives one exchange over a borrowed channel.
pub(crate) struct Driver<'a> {
    node: NodeId,
    channel: &'a mut dyn LineChannel,
    config: &'a SessionConfig,
    clock: &'a dyn VirtualClock,
}

impl<'a> Driver<'a> {
    pub(crate) fn new(
        node: NodeId,
        channel: &'a mut dyn LineChannel,
        config: &'a SessionConfig,
        clock: &'a dyn VirtualClock,
    ) -> Self {
        Self {
            node,
            channel,
            config,
            clock,
        }
    }

    /// Send `command` and collect its response.
    pub(crate) async fn run(
        &mut self,
        command: &str,
        options: &TransactionOptions,
    ) -> SessionResult<TransactionResult> {
        let mut budget = Budget::new(options.timeout.unwrap_or(self.config.command_timeout));
        self.send(command, options, &mut budget).await?;
        self.collect(command, &mut budget).await
    }

    /// Write `command`, advance the clock and consume its echo.
    pub(crate) async fn send_only(
        &mut self,
        command: &str,
        options: &TransactionOptions,
    ) -> SessionResult<()> {
        let mut budget = Budget::new(options.timeout.unwrap_or(self.config.command_timeout));
        self.send(command, options, &mut budget).await
    }

    /// Wait for a line matching `patterns`, discarding everything else.
    pub(crate) async fn expect_line(
        &mut self,
        patterns: &PatternSet,
        timeout: Duration,
    ) -> SessionResult<(usize, String)> {
        let mut budget = Budget::new(timeout);
        loop {
            let line = self.next_line(&mut budget, "matching line", false).await?;
            if let Some(idx) = patterns.matches(&line) {
                return Ok((idx, line));
            }
            trace!(node = self.node, line = %line, "ignored while expecting");
        }
    }

    async fn send(
        &mut self,
        command: &str,
        options: &TransactionOptions,
        budget: &mut Budget,
    ) -> SessionResult<()> {
        if command.trim().is_empty() || command.contains(['\n', '\r']) {
            return Err(SessionError::InvalidCommand(command.to_string()));
        }

        info!(node = self.node, "{command}");
        let mut data = command.as_bytes().to_vec();
        data.extend_from_slice(self.config.line_terminator.as_bytes());
        self.channel.write(&data).await.map_err(|e| self.write_failed(e))?;

        let advance = match options.advance {
            SendAdvance::Default if self.config.advance_on_send => Some(self.config.send_advance),
            SendAdvance::Default | SendAdvance::Skip => None,
            SendAdvance::By(ticks) => Some(ticks),
        };
        if let Some(ticks) = advance {
            self.clock.advance(ticks).await;
        }

        if options.expect_echo.unwrap_or(self.config.expect_echo) {
            self.expect_echo(command, budget).await?;
        }
        Ok(())
    }

    async fn expect_echo(&mut self, command: &str, budget: &mut Budget) -> SessionResult<()> {
        let command = command.trim();
        loop {
            let line = self.next_line(budget, &format!("echo of {command:?}"), true).await?;
            if line == command {
                return Ok(());
            }
            warn!(node = self.node, "expecting echo {command:?}, but read {line:?}");
        }
    }

    async fn collect(
        &mut self,
        command: &str,
        budget: &mut Budget,
    ) -> SessionResult<TransactionResult> {
        let config = self.config;
        let mut body = Vec::new();
        loop {
            let line = self.next_line(budget, &config.success_marker, true).await?;

            let outcome = if line == config.success_marker {
                Outcome::Done
            } else if let Some(rest) = line.strip_prefix(config.error_prefix.as_str()) {
                let (code, message) = parse_error_line(rest);
                Outcome::Error { code, message }
            } else {
                body.push(line);
                continue;
            };

            debug!(node = self.node, command, ?outcome, lines = body.len(), "command finished");
            return Ok(TransactionResult {
                command: command.to_string(),
                body,
                outcome,
            });
        }
    }

    /// Next non-blank line, with prompts stripped and log lines optionally dropped.
    async fn next_line(
        &mut self,
        budget: &mut Budget,
        waiting_for: &str,
        skip_logs: bool,
    ) -> SessionResult<String> {
        let poll = self.config.poll_interval;
        loop {
            let Some(slice) = budget.next_slice(poll) else {
                return Err(SessionError::timeout(self.node, waiting_for, budget.total));
            };

            match self.channel.read_line(slice).await {
                Ok(ReadLine::Line(raw)) => {
                    let line = self.config.strip_prompt(raw.trim());
                    if line.is_empty() {
                        continue;
                    }
                    if skip_logs && self.config.is_log_line(line) {
                        trace!(node = self.node, line, "device log");
                        continue;
                    }
                    trace!(node = self.node, line, "read");
                    return Ok(line.to_string());
                }
                Ok(ReadLine::Pending) => {
                    budget.missed(poll);
                    self.clock.advance(Ticks::ZERO).await;
                }
                Ok(ReadLine::Closed) => return Err(SessionError::ChannelClosed(self.node)),
                Err(e) => return Err(self.write_failed(e)),
            }
        }
    }

    fn write_failed(&self, err: std::io::Error) -> SessionError {
        if matches!(
            err.kind(),
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof
        ) {
            SessionError::ChannelClosed(self.node)
        } else {
            SessionError::Io(err)
        }
    }
}
