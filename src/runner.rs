use std::io::Write;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::debug;

use crate::session::Session;
use crate::step::{Step, StepContext};

/// Executes parsed script steps against one session.
pub struct Runner {
    ctx: StepContext,
}

impl Runner {
    /// A runner that writes device output to stdout.
    pub fn new(session: Arc<Session>) -> Self {
        Self::with_handler(session, |data| {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(data);
            let _ = stdout.flush();
        })
    }

    /// A runner that passes device output to `handler`.
    pub fn with_handler<F>(session: Arc<Session>, handler: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        Self {
            ctx: StepContext::new(session, Arc::new(handler)),
        }
    }

    /// Run `steps` in order, stopping at the first failure.
    pub async fn execute(&mut self, steps: Vec<Box<dyn Step>>) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            debug!(step = index + 1, name = step.name(), "executing");
            step.execute(&mut self.ctx)
                .await
                .with_context(|| format!("Step {} ({}) failed", index + 1, step.name()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory_pair;
    use crate::clock::{LogicalClock, Ticks, VirtualClock};
    use crate::config::SessionConfig;
    use crate::launch::MemoryLauncher;
    use crate::parser::parse_str;
    use std::sync::Mutex;

    async fn session_with_state_device(clock: Arc<LogicalClock>) -> Arc<Session> {
        let (console, mut device) = memory_pair("n1");
        tokio::spawn(async move {
            while let Some(line) = device.recv_line().await {
                match line.as_str() {
                    "" => {
                        device.emit_raw("> ");
                        continue;
                    }
                    "state" => {
                        device.emit(&line);
                        device.emit("leader");
                        device.emit("Done");
                    }
                    "child table" => {
                        device.emit(&line);
                        device.emit("| ID  | RLOC16 |");
                        device.emit("+-----+--------+");
                        device.emit("|   1 | 0xc801 |");
                        device.emit("Done");
                    }
                    "exit" => break,
                    other => {
                        device.emit(other);
                        device.emit("Error 35: InvalidCommand");
                    }
                }
            }
        });

        let session = Session::open(1, &MemoryLauncher::once(console), clock, SessionConfig::default())
            .await
            .unwrap();
        Arc::new(session)
    }

    #[tokio::test]
    async fn test_script_runs_against_session() {
        let clock = Arc::new(LogicalClock::new());
        let session = session_with_state_device(clock.clone()).await;

        let captured = Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink = captured.clone();
        let mut runner = Runner::with_handler(session.clone(), move |data| {
            sink.lock().unwrap().extend_from_slice(data);
        });

        let script = r#"
send "state"
expect "leader"
advance 2s
result "state" "lead.*"
poll "state" "leader|router" within 5s
rows "child table" 1
"#;
        runner.execute(parse_str(script).unwrap()).await.unwrap();

        let output = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
        assert_eq!(
            output,
            "leader\nleader\nleader\n| ID  | RLOC16 |\n+-----+--------+\n|   1 | 0xc801 |\n"
        );
        // One tick per command plus the explicit advance.
        assert_eq!(clock.now(), Ticks::from_millis(4).saturating_add(Ticks::from_secs(2)));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_device_error_fails_step() {
        let session = session_with_state_device(Arc::new(LogicalClock::new())).await;
        let mut runner = Runner::with_handler(session.clone(), |_| {});

        let err = runner
            .execute(parse_str("send \"bogus\"").unwrap())
            .await
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("Step 1 (send)"), "got: {msg}");
        assert!(msg.contains("InvalidCommand"), "got: {msg}");

        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expect_consumes_matched_line() {
        let session = session_with_state_device(Arc::new(LogicalClock::new())).await;
        let mut runner = Runner::with_handler(session.clone(), |_| {});

        let err = runner
            .execute(parse_str("send \"state\"\nexpect \"leader\"\nexpect \"leader\" 1s").unwrap())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Step 3 (expect)"));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_gives_up_after_its_budget() {
        let clock = Arc::new(LogicalClock::new());
        let session = session_with_state_device(clock.clone()).await;
        let mut runner = Runner::with_handler(session.clone(), |_| {});

        let err = runner
            .execute(parse_str(r#"poll "state" "router" within 3s every 1s"#).unwrap())
            .await
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("Step 1 (poll)"), "got: {msg}");
        assert!(msg.contains("timed out"), "got: {msg}");
        assert!(clock.now() >= Ticks::from_secs(3));

        let err = runner
            .execute(parse_str(r#"rows "child table" 2"#).unwrap())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("printed 1 rows, expected 2"), "got: {err:#}");

        session.close().await.unwrap();
    }
}
