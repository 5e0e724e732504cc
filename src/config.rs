use std::time::Duration;

use crate::clock::Ticks;
use crate::launch::CommandSpec;

/// Per-session protocol and timing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Command prompt printed by the device. Leading copies are stripped from output lines.
    pub prompt: String,
    /// Line that ends a successful response.
    pub success_marker: String,
    /// Prefix of the line that ends a failed response.
    pub error_prefix: String,
    /// Prefixes of device log lines, which are never part of a response.
    pub log_prefixes: Vec<String>,
    /// Appended to every command written.
    pub line_terminator: String,
    /// Whether the device echoes commands back.
    pub expect_echo: bool,
    /// Granularity of the read loop.
    pub poll_interval: Duration,
    /// Default budget for one transaction.
    pub command_timeout: Duration,
    /// Whether to advance the clock right after sending a command.
    pub advance_on_send: bool,
    /// How far to advance the clock after sending a command.
    pub send_advance: Ticks,
    /// Total budget for the prompt handshake.
    pub handshake_budget: Duration,
    /// Per-attempt wait during the prompt handshake.
    pub handshake_step: Duration,
    /// No-op input sent on each handshake attempt.
    pub handshake_input: String,
    /// Command asking the device to exit; `None` closes its input instead.
    pub exit_command: Option<String>,
    /// How long teardown waits for a graceful exit before killing.
    pub teardown_grace: Duration,
    /// Whether a transaction timeout tears the session down.
    pub timeout_is_fatal: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt: "> ".to_string(),
            success_marker: "Done".to_string(),
            error_prefix: "Error ".to_string(),
            log_prefixes: ["[D]", "[I]", "[N]", "[W]", "[C]", "[-]"]
                .into_iter()
                .map(String::from)
                .collect(),
            line_terminator: "\n".to_string(),
            expect_echo: true,
            poll_interval: Duration::from_millis(100),
            command_timeout: Duration::from_secs(10),
            advance_on_send: true,
            send_advance: Ticks::from_millis(1),
            handshake_budget: Duration::from_millis(400),
            handshake_step: Duration::from_millis(100),
            handshake_input: "\r\n".to_string(),
            exit_command: Some("exit".to_string()),
            teardown_grace: Duration::from_secs(2),
            timeout_is_fatal: true,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_markers(mut self, success: impl Into<String>, error_prefix: impl Into<String>) -> Self {
        self.success_marker = success.into();
        self.error_prefix = error_prefix.into();
        self
    }

    pub fn with_log_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    pub fn with_echo(mut self, expect_echo: bool) -> Self {
        self.expect_echo = expect_echo;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_send_advance(mut self, enabled: bool, ticks: Ticks) -> Self {
        self.advance_on_send = enabled;
        self.send_advance = ticks;
        self
    }

    pub fn with_handshake(mut self, budget: Duration, step: Duration) -> Self {
        self.handshake_budget = budget;
        self.handshake_step = step;
        self
    }

    pub fn with_exit_command(mut self, command: Option<String>) -> Self {
        self.exit_command = command;
        self
    }

    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }

    pub fn with_fatal_timeouts(mut self, fatal: bool) -> Self {
        self.timeout_is_fatal = fatal;
        self
    }

    pub(crate) fn is_log_line(&self, line: &str) -> bool {
        self.log_prefixes.iter().any(|p| line.starts_with(p.as_str()))
    }

    /// Remove any number of leading prompts from `line`.
    pub(crate) fn strip_prompt<'a>(&self, mut line: &'a str) -> &'a str {
        let prompt = self.prompt.trim_end();
        if prompt.is_empty() {
            return line;
        }
        while let Some(rest) = line.strip_prefix(prompt) {
            line = rest.trim_start();
        }
        line
    }
}

/// Settings scoped to one test run, shared by every session in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// Offset separating concurrent runs on one host; exported to devices as `PORT_OFFSET`.
    pub port_offset: u16,
    /// Mirror device output and service logs to the terminal.
    pub verbose: bool,
    /// Session settings applied to every node unless overridden.
    pub session: SessionConfig,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `NODECTL_PORT_OFFSET` and `NODECTL_VERBOSE`, falling back to defaults.
    pub fn from_env() -> Self {
        let port_offset = std::env::var("NODECTL_PORT_OFFSET")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let verbose = std::env::var("NODECTL_VERBOSE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        Self {
            port_offset,
            verbose,
            ..Default::default()
        }
    }

    pub fn with_port_offset(mut self, offset: u16) -> Self {
        self.port_offset = offset;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Apply run-wide environment to a device command.
    pub fn apply(&self, spec: CommandSpec) -> CommandSpec {
        spec.env("PORT_OFFSET", self.port_offset.to_string())
    }
}
