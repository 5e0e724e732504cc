use std::io::{self, Write};
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::{LineChannel, LineInbox, ReadLine, spawn_reader};
use crate::error::{SessionError, SessionResult};
use crate::launch::CommandSpec;

const EOF_BYTE: u8 = 0x04;
const EXIT_POLL: Duration = Duration::from_millis(10);

/// A device console running inside a PTY.
pub struct PtyChannel {
    label: String,
    #[allow(dead_code)]
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    inbox: LineInbox,
}

impl PtyChannel {
    /// Spawn `spec` in a fresh PTY and start forwarding its output.
    pub fn spawn(spec: &CommandSpec) -> SessionResult<Self> {
        let pty_system = portable_pty::native_pty_system();

        // Wide enough that table rows are never wrapped by the terminal.
        let pty_size = PtySize {
            rows: 24,
            cols: 512,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(pty_size)
            .map_err(|e| SessionError::spawn(&spec.program, io::Error::other(e.to_string())))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        for arg in &spec.args {
            cmd.arg(arg);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.working_directory {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::spawn(&spec.program, io::Error::other(e.to_string())))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::spawn(&spec.program, io::Error::other(e.to_string())))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::spawn(&spec.program, io::Error::other(e.to_string())))?;

        let (tx, inbox) = LineInbox::channel();
        spawn_reader(reader, tx);

        debug!(program = %spec.program, pid = ?child.process_id(), "spawned console in PTY");

        Ok(PtyChannel {
            label: format!("pty:{}", spec.display()),
            master: pair.master,
            child,
            writer,
            inbox,
        })
    }
}

#[async_trait]
impl LineChannel for PtyChannel {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    async fn read_line(&mut self, slice: Duration) -> io::Result<ReadLine> {
        Ok(self.inbox.read_line(slice).await)
    }

    fn partial(&self) -> String {
        self.inbox.partial()
    }

    fn is_alive(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    async fn send_eof(&mut self) -> io::Result<()> {
        self.write(&[EOF_BYTE]).await
    }

    async fn close(&mut self, grace: Duration) -> io::Result<()> {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.child.try_wait()?.is_some() {
                return Ok(());
            }
            sleep(EXIT_POLL).await;
        }

        warn!(console = %self.label, "console did not exit within {grace:?}, killing");
        self.child.kill()?;
        for _ in 0..100 {
            if self.child.try_wait()?.is_some() {
                return Ok(());
            }
            sleep(EXIT_POLL).await;
        }
        Err(io::Error::other(format!("{} survived kill", self.label)))
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = self.child.kill();
        }
    }
}
