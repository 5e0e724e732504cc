//! Line-oriented channels to a device console.
//!
//! A [`LineChannel`] is the only thing the transaction driver and the
//! session lifecycle know about a device. Variants:
//!
//! | Variant | Backing |
//! |---------|---------|
//! | [`PtyChannel`] | program under a pseudo-terminal |
//! | [`ProcessChannel`] | subprocess with piped stdin/stdout |
//! | [`MemoryChannel`] | in-process simulated device ([`DeviceEnd`]) |
//!
//! All variants feed raw output chunks into a [`LineInbox`], which splits
//! them into lines and keeps the unterminated tail (usually a prompt)
//! available through [`LineChannel::partial`].

mod memory;
mod process;
mod pty;

pub use memory::{DeviceEnd, MemoryChannel, memory_pair};
pub use process::ProcessChannel;
pub use pty::PtyChannel;

use std::io::{self, Read};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

/// Result of one bounded read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadLine {
    /// A complete line, without its terminator.
    Line(String),
    /// Nothing complete arrived within the time slice.
    Pending,
    /// The device side has gone away and no buffered lines remain.
    Closed,
}

/// Bidirectional line stream to one device console.
#[async_trait]
pub trait LineChannel: Send {
    /// Short human-readable description used in logs.
    fn describe(&self) -> String;

    /// Write raw bytes to the device.
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Write `text` followed by a newline.
    async fn write_line(&mut self, text: &str) -> io::Result<()> {
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        self.write(&data).await
    }

    /// Wait at most `slice` for one complete line.
    async fn read_line(&mut self, slice: Duration) -> io::Result<ReadLine>;

    /// Output received after the last line terminator.
    fn partial(&self) -> String;

    /// Whether the device side is still running.
    fn is_alive(&mut self) -> bool;

    /// Signal end of input to the device.
    async fn send_eof(&mut self) -> io::Result<()>;

    /// Wait up to `grace` for the device to exit, then force it down.
    async fn close(&mut self, grace: Duration) -> io::Result<()>;
}

/// Splits raw output chunks into lines.
#[derive(Debug)]
pub struct LineInbox {
    rx: UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
    closed: bool,
}

impl LineInbox {
    pub fn new(rx: UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            closed: false,
        }
    }

    /// Create an inbox together with the sender that feeds it.
    pub fn channel() -> (UnboundedSender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Whether the sending side has hung up.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn partial(&self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }

    fn take_line(&mut self) -> Option<String> {
        let idx = self.pending.iter().position(|&b| b == b'\n')?;
        let rest = self.pending.split_off(idx + 1);
        let mut line = std::mem::replace(&mut self.pending, rest);
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Wait at most `slice` for a complete line.
    ///
    /// Once the sender is gone, an unterminated tail is returned as a final
    /// line before [`ReadLine::Closed`] is reported.
    pub async fn read_line(&mut self, slice: Duration) -> ReadLine {
        let deadline = Instant::now() + slice;
        loop {
            if let Some(line) = self.take_line() {
                return ReadLine::Line(line);
            }
            if self.closed {
                if self.pending.is_empty() {
                    return ReadLine::Closed;
                }
                let rest = std::mem::take(&mut self.pending);
                return ReadLine::Line(String::from_utf8_lossy(&rest).trim_end().to_string());
            }
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(chunk)) => self.pending.extend_from_slice(&chunk),
                Ok(None) => self.closed = true,
                Err(_) => return ReadLine::Pending,
            }
        }
    }

    /// Wait without a bound for the next line. `None` once closed.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            match self.read_line(Duration::from_secs(3600)).await {
                ReadLine::Line(line) => return Some(line),
                ReadLine::Closed => return None,
                ReadLine::Pending => continue,
            }
        }
    }
}

/// Spawns a background thread that forwards everything read from `reader`.
pub(crate) fn spawn_reader<R: Read + Send + 'static>(mut reader: R, tx: UnboundedSender<Vec<u8>>) {
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break, // EOF
                Ok(n) => {
                    if tx.send(buffer[..n].to_vec()).is_err() {
                        break; // Receiver dropped
                    }
                }
                Err(_) => break,
            }
        }
    });
}
