use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::{LineChannel, LineInbox, ReadLine};
use crate::error::{SessionError, SessionResult};
use crate::launch::CommandSpec;

/// A device console driven over the stdin/stdout pipes of a subprocess.
///
/// This is the shape of attaching to a containerized console
/// (`docker exec -i <name> <cli>`), where no terminal is available.
pub struct ProcessChannel {
    label: String,
    child: Child,
    stdin: Option<ChildStdin>,
    inbox: LineInbox,
}

impl ProcessChannel {
    /// Spawn `spec` with piped stdio. Stderr is inherited when `show_stderr`.
    pub fn spawn(spec: &CommandSpec, show_stderr: bool) -> SessionResult<Self> {
        let mut cmd: Command = spec.to_command();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if show_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SessionError::spawn(&spec.program, e))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            SessionError::spawn(&spec.program, io::Error::other("failed to capture stdout"))
        })?;

        let (tx, inbox) = LineInbox::channel();
        spawn_async_reader(stdout, tx);

        debug!(program = %spec.program, pid = ?child.id(), "spawned console process");

        Ok(Self {
            label: format!("proc:{}", spec.display()),
            child,
            stdin,
            inbox,
        })
    }
}

fn spawn_async_reader<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    tx: UnboundedSender<Vec<u8>>,
) {
    tokio::spawn(async move {
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[async_trait]
impl LineChannel for ProcessChannel {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed"))?;
        stdin.write_all(data).await?;
        stdin.flush().await
    }

    async fn read_line(&mut self, slice: Duration) -> io::Result<ReadLine> {
        Ok(self.inbox.read_line(slice).await)
    }

    fn partial(&self) -> String {
        self.inbox.partial()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn send_eof(&mut self) -> io::Result<()> {
        // Dropping the pipe delivers EOF to the child.
        self.stdin.take();
        Ok(())
    }

    async fn close(&mut self, grace: Duration) -> io::Result<()> {
        self.stdin.take();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(console = %self.label, ?status, "console exited");
                Ok(())
            }
            Err(_) => {
                warn!(console = %self.label, "console did not exit within {grace:?}, killing");
                self.child.kill().await
            }
        }
    }
}
