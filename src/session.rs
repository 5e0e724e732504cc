//! Device sessions.
//!
//! A [`Session`] owns the console channel of one device for its whole life:
//! it is launched, confirmed with a prompt handshake, driven through
//! transactions and finally torn down exactly once.
//!
//! Only one transaction may be in flight per session. [`Session::execute`]
//! fails fast with [`SessionError::SessionBusy`] when another caller holds
//! the console; [`Session::execute_queued`] waits its turn instead.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::MutexGuard;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::channel::{LineChannel, ReadLine};
use crate::clock::{Ticks, VirtualClock};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::launch::Launcher;
use crate::pattern::PatternSet;
use crate::transaction::{Driver, TransactionOptions, TransactionResult};

/// Identifier of a device within one run.
pub type NodeId = u32;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Spawning,
    HandshakePending,
    Ready,
    Busy,
    Terminating,
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Spawning => "spawning",
            SessionState::HandshakePending => "handshake-pending",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Terminating => "terminating",
            SessionState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

type Console = Option<Box<dyn LineChannel>>;

/// A live control session with one device.
pub struct Session {
    id: NodeId,
    config: SessionConfig,
    clock: Arc<dyn VirtualClock>,
    state: Mutex<SessionState>,
    console: tokio::sync::Mutex<Console>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Launch the device for `id` and wait for its prompt.
    ///
    /// On any failure the channel is torn down before the error is returned,
    /// so no process outlives a failed open.
    pub async fn open(
        id: NodeId,
        launcher: &dyn Launcher,
        clock: Arc<dyn VirtualClock>,
        config: SessionConfig,
    ) -> SessionResult<Session> {
        let session = Session {
            id,
            config,
            clock,
            state: Mutex::new(SessionState::Uninitialized),
            console: tokio::sync::Mutex::new(None),
        };

        session.set_state(SessionState::Spawning);
        debug!(node = id, launcher = %launcher.describe(), "launching");
        let mut channel = match launcher.launch(id).await {
            Ok(channel) => channel,
            Err(e) => {
                session.set_state(SessionState::Destroyed);
                return Err(e);
            }
        };

        session.set_state(SessionState::HandshakePending);
        if let Err(e) = session.handshake(channel.as_mut()).await {
            warn!(node = id, error = %e, "handshake failed, tearing down");
            session.set_state(SessionState::Terminating);
            if let Err(close_err) = channel.close(session.config.teardown_grace).await {
                warn!(node = id, error = %close_err, "teardown after failed handshake");
            }
            session.set_state(SessionState::Destroyed);
            return Err(e);
        }

        info!(node = id, console = %channel.describe(), "session ready");
        {
            let mut console = session.console.lock().await;
            *console = Some(channel);
        }
        session.set_state(SessionState::Ready);
        Ok(session)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn VirtualClock> {
        &self.clock
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            debug!(node = self.id, from = %*state, to = %next, "session state");
            *state = next;
        }
    }

    /// Whether the console is still attached and the device still running.
    pub fn is_alive(&self) -> bool {
        match self.console.try_lock() {
            Ok(mut console) => console.as_mut().is_some_and(|c| c.is_alive()),
            // Held by an in-flight transaction, so not torn down.
            Err(_) => self.state() == SessionState::Busy,
        }
    }

    /// Run one command. Fails with [`SessionError::SessionBusy`] if another
    /// transaction is in flight.
    pub async fn execute(
        &self,
        command: &str,
        options: TransactionOptions,
    ) -> SessionResult<TransactionResult> {
        let console = self.console.try_lock().map_err(|_| {
            error!(node = self.id, command, "concurrent transaction on one session");
            SessionError::SessionBusy(self.id)
        })?;
        self.run_locked(console, command, &options).await
    }

    /// Run one command, waiting for any in-flight transaction to finish first.
    /// Waiters are served in arrival order.
    pub async fn execute_queued(
        &self,
        command: &str,
        options: TransactionOptions,
    ) -> SessionResult<TransactionResult> {
        let console = self.console.lock().await;
        self.run_locked(console, command, &options).await
    }

    /// Run `command` with default options and return its body, treating a
    /// device error line as an error.
    pub async fn command(&self, command: &str) -> SessionResult<Vec<String>> {
        self.execute(command, TransactionOptions::default())
            .await?
            .into_done(self.id)
    }

    /// Body lines of `command` that match `patterns`.
    pub async fn expect_results(
        &self,
        command: &str,
        patterns: &PatternSet,
    ) -> SessionResult<Vec<String>> {
        let body = self.command(command).await?;
        Ok(body
            .into_iter()
            .filter(|line| patterns.matches(line).is_some())
            .collect())
    }

    /// The single body line of `command` that matches `patterns`.
    pub async fn expect_result(&self, command: &str, patterns: &PatternSet) -> SessionResult<String> {
        let mut matched = self.expect_results(command, patterns).await?;
        if matched.len() != 1 {
            return Err(SessionError::UnexpectedOutput {
                node: self.id,
                command: command.to_string(),
                detail: format!("expected exactly one matching line, got {}", matched.len()),
            });
        }
        Ok(matched.remove(0))
    }

    /// Write `command` and consume its echo without waiting for a marker.
    ///
    /// For commands whose output arrives later, to be read with
    /// [`Session::expect_line`].
    pub async fn send_only(&self, command: &str, options: TransactionOptions) -> SessionResult<()> {
        let mut console = self.console.try_lock().map_err(|_| SessionError::SessionBusy(self.id))?;
        let result = match self.begin(&mut console) {
            Ok(channel) => {
                Driver::new(self.id, channel, &self.config, self.clock.as_ref())
                    .send_only(command, &options)
                    .await
            }
            Err(e) => return Err(e),
        };
        self.finish(&mut console, result).await
    }

    /// Wait for an output line matching `patterns`. Returns the index of the
    /// matching pattern and the line; lines before it are discarded.
    pub async fn expect_line(
        &self,
        patterns: &PatternSet,
        timeout: Duration,
    ) -> SessionResult<(usize, String)> {
        let mut console = self.console.try_lock().map_err(|_| SessionError::SessionBusy(self.id))?;
        let result = match self.begin(&mut console) {
            Ok(channel) => {
                Driver::new(self.id, channel, &self.config, self.clock.as_ref())
                    .expect_line(patterns, timeout)
                    .await
            }
            Err(e) => return Err(e),
        };
        self.finish(&mut console, result).await
    }

    /// Retry `check` until it yields a value, advancing the clock by
    /// `interval` between attempts. Fails with [`SessionError::Timeout`] once
    /// `budget` of virtual time has passed.
    ///
    /// `Ok(None)` and recoverable errors (device errors, unexpected output,
    /// non-fatal timeouts) count as a miss. Anything that leaves the session
    /// unusable is returned at once. A zero interval is treated as one
    /// millisecond.
    pub async fn verify_within<T, F, Fut>(
        &self,
        what: &str,
        budget: Duration,
        interval: Ticks,
        mut check: F,
    ) -> SessionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SessionResult<Option<T>>>,
    {
        let interval = if interval.is_zero() {
            Ticks::from_millis(1)
        } else {
            interval
        };
        let deadline = self.clock.now().saturating_add(Ticks::from_duration(budget));
        let mut attempts = 0u32;
        let mut last_miss = String::from("no attempt");

        loop {
            attempts += 1;
            match check().await {
                Ok(Some(value)) => {
                    debug!(node = self.id, what, attempts, "condition met");
                    return Ok(value);
                }
                Ok(None) => last_miss = "not yet".to_string(),
                Err(e) if is_retryable(&e) => last_miss = e.to_string(),
                Err(e) => return Err(e),
            }
            if self.clock.now() >= deadline {
                warn!(node = self.id, what, attempts, last = %last_miss, "condition not met");
                return Err(SessionError::timeout(
                    self.id,
                    format!("{what} ({attempts} attempts, last: {last_miss})"),
                    budget,
                ));
            }
            self.clock.advance(interval).await;
        }
    }

    async fn run_locked(
        &self,
        mut console: MutexGuard<'_, Console>,
        command: &str,
        options: &TransactionOptions,
    ) -> SessionResult<TransactionResult> {
        let result = match self.begin(&mut console) {
            Ok(channel) => {
                Driver::new(self.id, channel, &self.config, self.clock.as_ref())
                    .run(command, options)
                    .await
            }
            Err(e) => return Err(e),
        };
        self.finish(&mut console, result).await
    }

    /// Mark the session busy and lend out its channel.
    fn begin<'c>(
        &self,
        console: &'c mut Console,
    ) -> SessionResult<&'c mut (dyn LineChannel + 'static)> {
        let channel = console
            .as_deref_mut()
            .ok_or(SessionError::ChannelClosed(self.id))?;
        self.set_state(SessionState::Busy);
        Ok(channel)
    }

    /// Settle the session after a driver finished. A fatal error detaches the
    /// channel and returns at once; the device is shut down in the background.
    async fn finish<T>(&self, console: &mut Console, result: SessionResult<T>) -> SessionResult<T> {
        match &result {
            Err(e) if self.is_fatal(e) => {
                warn!(node = self.id, error = %e, "fatal session error, tearing down");
                if let Some(channel) = console.take() {
                    self.set_state(SessionState::Terminating);
                    tokio::spawn(shut_down(
                        self.id,
                        channel,
                        self.config.exit_command.clone(),
                        self.config.teardown_grace,
                    ));
                }
                self.set_state(SessionState::Destroyed);
            }
            _ => self.set_state(SessionState::Ready),
        }
        result
    }

    fn is_fatal(&self, err: &SessionError) -> bool {
        err.is_channel_fatal()
            || (self.config.timeout_is_fatal && matches!(err, SessionError::Timeout { .. }))
    }

    /// Terminate the device and release the channel, waiting for the device
    /// to go away. Idempotent.
    pub async fn close(&self) -> SessionResult<()> {
        let mut console = self.console.lock().await;
        if let Some(channel) = console.take() {
            self.set_state(SessionState::Terminating);
            shut_down(
                self.id,
                channel,
                self.config.exit_command.clone(),
                self.config.teardown_grace,
            )
            .await;
        }
        self.set_state(SessionState::Destroyed);
        Ok(())
    }

    /// Wait for the prompt, re-sending the no-op input every step.
    async fn handshake(&self, channel: &mut dyn LineChannel) -> SessionResult<()> {
        let prompt = self.config.prompt.trim_end();
        let mut remaining = self.config.handshake_budget;

        while !remaining.is_zero() {
            channel.write(self.config.handshake_input.as_bytes()).await?;
            let step = self.config.handshake_step.min(remaining);
            let step_end = Instant::now() + step;

            loop {
                if channel.partial().trim_start().starts_with(prompt) {
                    return Ok(());
                }
                let slice = step_end.saturating_duration_since(Instant::now());
                if slice.is_zero() {
                    break;
                }
                match channel.read_line(slice).await? {
                    ReadLine::Line(line) if line.trim_start().starts_with(prompt) => return Ok(()),
                    ReadLine::Line(line) => debug!(node = self.id, line = %line, "before prompt"),
                    ReadLine::Pending => {}
                    ReadLine::Closed => return Err(SessionError::ChannelClosed(self.id)),
                }
            }

            remaining = remaining.saturating_sub(step);
            self.clock.advance(Ticks::ZERO).await;
        }

        Err(SessionError::timeout(
            self.id,
            format!("prompt {:?}", self.config.prompt),
            self.config.handshake_budget,
        ))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(channel) = self.console.get_mut().take() else {
            return;
        };
        warn!(node = self.id, "session dropped without close");
        self.set_state(SessionState::Destroyed);
        // Without a runtime the channel's own drop kills the device.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(shut_down(
                self.id,
                channel,
                self.config.exit_command.clone(),
                self.config.teardown_grace,
            ));
        }
    }
}

fn is_retryable(err: &SessionError) -> bool {
    matches!(
        err,
        SessionError::DeviceError { .. }
            | SessionError::UnexpectedOutput { .. }
            | SessionError::Timeout { .. }
    )
}

/// Ask the device to exit, then close its channel within `grace`.
async fn shut_down(
    node: NodeId,
    mut channel: Box<dyn LineChannel>,
    exit_command: Option<String>,
    grace: Duration,
) {
    let exit = match &exit_command {
        Some(command) => channel.write_line(command).await,
        None => channel.send_eof().await,
    };
    if let Err(e) = exit {
        debug!(node, error = %e, "exit request not delivered");
    }
    if let Err(e) = channel.close(grace).await {
        warn!(node, error = %e, "error while closing console");
    }
    info!(node, "session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DeviceEnd, memory_pair};
    use crate::clock::LogicalClock;
    use crate::launch::MemoryLauncher;

    async fn open_with(device: impl FnOnce(DeviceEnd) + Send + 'static) -> SessionResult<Session> {
        let (console, end) = memory_pair("n1");
        device(end);
        Session::open(
            1,
            &MemoryLauncher::once(console),
            Arc::new(LogicalClock::new()),
            SessionConfig::default(),
        )
        .await
    }

    fn prompt_then_echo(mut device: DeviceEnd) {
        tokio::spawn(async move {
            while let Some(line) = device.recv_line().await {
                if line.is_empty() {
                    device.emit_raw("> ");
                    continue;
                }
                device.emit(&line);
                if line == "exit" {
                    device.emit("Done");
                    break;
                }
                device.emit("Done");
            }
        });
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let session = open_with(prompt_then_echo).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.is_alive());

        let body = session.command("ifconfig up").await.unwrap();
        assert!(body.is_empty());
        assert_eq!(session.state(), SessionState::Ready);

        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(!session.is_alive());

        // Closing twice is a no-op.
        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Destroyed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_fails_handshake() {
        let err = open_with(|device| {
            tokio::spawn(async move {
                let _keep = device;
                std::future::pending::<()>().await;
            });
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { node: 1, .. }), "got: {err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_timeout_returns_without_waiting_for_exit() {
        // Echoes everything, never answers, and ignores `exit`.
        let session = open_with(|mut device| {
            tokio::spawn(async move {
                while let Some(line) = device.recv_line().await {
                    if line.is_empty() {
                        device.emit_raw("> ");
                    } else {
                        device.emit(&line);
                    }
                }
                std::future::pending::<()>().await;
            });
        })
        .await
        .unwrap();

        let started = Instant::now();
        let err = session
            .execute("hang", TransactionOptions::new().timeout(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { node: 1, .. }), "got: {err}");
        assert!(
            started.elapsed() <= Duration::from_secs(1) + session.config().poll_interval,
            "elapsed {:?}",
            started.elapsed()
        );
        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(!session.is_alive());
    }

    /// A node that turns leader once the clock reaches 3s.
    async fn open_slow_leader() -> (Session, Arc<LogicalClock>) {
        let clock = Arc::new(LogicalClock::new());
        let (console, mut device) = memory_pair("n1");
        let device_clock = clock.clone();
        tokio::spawn(async move {
            while let Some(line) = device.recv_line().await {
                match line.as_str() {
                    "" => {
                        device.emit_raw("> ");
                        continue;
                    }
                    "state" => {
                        device.emit("state");
                        if device_clock.now() >= Ticks::from_secs(3) {
                            device.emit("leader");
                        } else {
                            device.emit("detached");
                        }
                        device.emit("Done");
                    }
                    other => {
                        device.emit(other);
                        device.emit("Error 35: InvalidCommand");
                    }
                }
                device.emit_raw("> ");
            }
        });
        let session = Session::open(
            1,
            &MemoryLauncher::once(console),
            clock.clone(),
            SessionConfig::default(),
        )
        .await
        .unwrap();
        (session, clock)
    }

    #[tokio::test]
    async fn test_verify_within_retries_until_condition_holds() {
        let (session, clock) = open_slow_leader().await;
        let node = &session;

        let role = node
            .verify_within("leader role", Duration::from_secs(10), Ticks::from_secs(1), move || async move {
                node.command("state")
                    .await
                    .map(|body| body.into_iter().find(|role| role == "leader"))
            })
            .await
            .unwrap();
        assert_eq!(role, "leader");
        assert!(clock.now() >= Ticks::from_secs(3));
        assert!(clock.now() < Ticks::from_secs(5));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_within_times_out_and_keeps_session() {
        let (session, clock) = open_slow_leader().await;
        let node = &session;

        let err = node
            .verify_within("router role", Duration::from_secs(2), Ticks::from_millis(500), move || async move {
                node.command("state")
                    .await
                    .map(|body| body.iter().any(|role| role == "router").then_some(()))
            })
            .await
            .unwrap_err();
        match err {
            SessionError::Timeout { node: 1, waiting_for, budget } => {
                assert!(waiting_for.starts_with("router role"), "got: {waiting_for}");
                assert_eq!(budget, Duration::from_secs(2));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(clock.now() >= Ticks::from_secs(2));
        assert_eq!(session.state(), SessionState::Ready);

        // Device errors are retried, a closed channel is not.
        session.close().await.unwrap();
        let err = node
            .verify_within("anything", Duration::from_secs(2), Ticks::from_millis(500), move || async move {
                node.command("state").await.map(Some)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ChannelClosed(1)), "got: {err}");
    }

    #[tokio::test]
    async fn test_commands_after_close_report_closed() {
        let session = open_with(prompt_then_echo).await.unwrap();
        session.close().await.unwrap();
        let err = session.command("state").await.unwrap_err();
        assert!(matches!(err, SessionError::ChannelClosed(1)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::HandshakePending.to_string(), "handshake-pending");
        assert_eq!(SessionState::Destroyed.to_string(), "destroyed");
    }
}
