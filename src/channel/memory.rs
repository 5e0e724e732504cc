use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use super::{LineChannel, LineInbox, ReadLine};

/// Create a connected console/device pair for an in-process simulated device.
///
/// The [`MemoryChannel`] is handed to a session; the [`DeviceEnd`] is driven
/// by the simulation, usually from its own task.
pub fn memory_pair(label: impl Into<String>) -> (MemoryChannel, DeviceEnd) {
    let (to_device, device_inbox) = LineInbox::channel();
    let (to_console, console_inbox) = LineInbox::channel();
    (
        MemoryChannel {
            label: label.into(),
            to_device: Some(to_device),
            inbox: console_inbox,
        },
        DeviceEnd {
            inbox: device_inbox,
            output: Some(to_console),
        },
    )
}

/// Console side of an in-memory pair.
#[derive(Debug)]
pub struct MemoryChannel {
    label: String,
    to_device: Option<UnboundedSender<Vec<u8>>>,
    inbox: LineInbox,
}

#[async_trait]
impl LineChannel for MemoryChannel {
    fn describe(&self) -> String {
        format!("mem:{}", self.label)
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.to_device
            .as_ref()
            .and_then(|tx| tx.send(data.to_vec()).ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "device end dropped"))
    }

    async fn read_line(&mut self, slice: Duration) -> io::Result<ReadLine> {
        Ok(self.inbox.read_line(slice).await)
    }

    fn partial(&self) -> String {
        self.inbox.partial()
    }

    fn is_alive(&mut self) -> bool {
        self.to_device.as_ref().is_some_and(|tx| !tx.is_closed()) && !self.inbox.is_closed()
    }

    async fn send_eof(&mut self) -> io::Result<()> {
        self.to_device.take();
        Ok(())
    }

    async fn close(&mut self, grace: Duration) -> io::Result<()> {
        self.to_device.take();
        // Let the device finish writing whatever it had in flight.
        let _ = tokio::time::timeout(grace, async {
            while !matches!(self.inbox.read_line(grace).await, ReadLine::Closed) {}
        })
        .await;
        Ok(())
    }
}

/// Device side of an in-memory pair.
#[derive(Debug)]
pub struct DeviceEnd {
    inbox: LineInbox,
    output: Option<UnboundedSender<Vec<u8>>>,
}

impl DeviceEnd {
    /// Next line written by the console. `None` once the console hung up.
    pub async fn recv_line(&mut self) -> Option<String> {
        self.inbox.next_line().await
    }

    /// Emit `line` followed by a newline.
    pub fn emit(&self, line: &str) -> bool {
        self.emit_raw(&format!("{line}\n"))
    }

    /// Emit text without a terminator, e.g. a prompt.
    pub fn emit_raw(&self, text: &str) -> bool {
        self.output
            .as_ref()
            .is_some_and(|tx| tx.send(text.as_bytes().to_vec()).is_ok())
    }

    /// Stop producing output; the console observes a closed channel.
    pub fn hang_up(&mut self) {
        self.output.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (mut console, mut device) = memory_pair("n1");
        console.write_line("state").await.unwrap();
        assert_eq!(device.recv_line().await.as_deref(), Some("state"));

        device.emit("leader");
        device.emit_raw("> ");
        let slice = Duration::from_millis(50);
        assert_eq!(
            console.read_line(slice).await.unwrap(),
            ReadLine::Line("leader".into())
        );
        assert_eq!(console.read_line(slice).await.unwrap(), ReadLine::Pending);
        assert_eq!(console.partial(), "> ");
    }

    #[tokio::test]
    async fn test_hang_up_closes_console() {
        let (mut console, mut device) = memory_pair("n1");
        assert!(console.is_alive());
        device.hang_up();
        assert_eq!(
            console.read_line(Duration::from_millis(50)).await.unwrap(),
            ReadLine::Closed
        );
        assert!(!console.is_alive());
    }

    #[tokio::test]
    async fn test_eof_reaches_device() {
        let (mut console, mut device) = memory_pair("n1");
        console.send_eof().await.unwrap();
        assert_eq!(device.recv_line().await, None);
        assert!(console.write_line("late").await.is_err());
    }
}
