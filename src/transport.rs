//! Transport abstraction over the Robofocus wire.
//!
//! Both the real serial link and the in-process simulator implement
//! [`Transport`]; the retry/backoff policy and async-event draining live
//! here once, shared by both.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::error::{Result, RobofocusError};
use crate::protocol::{AsyncEvent, Command, FrameOutcome, FrameSync, Packet};

/// Number of times a command is retried after a failed exchange: 3
/// attempts with a ~500ms backoff, flushing buffers between.
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff between retry attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Settling delay observed after an `F` (finished) event before the next
/// command is sent.
pub const SETTLING_DELAY: Duration = Duration::from_millis(150);

/// A byte-level connection to a Robofocus focuser.
///
/// Implementors only need to move bytes and report async events already
/// recognized between frames — [`Transport::send_command`] builds the
/// retry loop on top of [`Transport::exchange`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying connection (serial port, or simulator session).
    async fn connect(&self) -> Result<()>;

    /// Close the underlying connection.
    async fn disconnect(&self);

    /// Whether the transport currently believes it's connected.
    fn is_connected(&self) -> bool;

    /// Send one request frame and wait for its matching reply frame,
    /// discarding any async events observed while waiting (they are queued
    /// for [`Transport::drain_async`] to pick up separately).
    async fn exchange(&self, request: Packet, expected_prefix: [u8; 2]) -> Result<Packet>;

    /// Drain any async status bytes accumulated since the last call,
    /// without sending anything. Used by the motion monitor.
    async fn drain_async(&self) -> Vec<AsyncEvent>;

    /// Change which physical port `connect()` will open next time.
    ///
    /// Only meaningful for [`crate::serial::SerialTransport`]: the GUI's
    /// "connect to chosen port" operation calls this before
    /// `connect()`. [`crate::simulator::SimulatorTransport`] has no port
    /// concept and accepts the default no-op.
    async fn set_port(&self, _port: &str) -> Result<()> {
        Ok(())
    }
}

/// Send `command` over `transport`, retrying on failure up to
/// [`MAX_ATTEMPTS`] times with [`RETRY_BACKOFF`] between attempts.
pub async fn send_command(transport: &dyn Transport, command: Command) -> Result<Packet> {
    if !transport.is_connected() {
        return Err(RobofocusError::NotConnected);
    }

    let request = command.to_packet()?;
    let expected_prefix = command.expected_reply_prefix();

    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        debug!(
            command = command.to_packet().map(|p| p.command_str().to_string()).unwrap_or_default(),
            attempt, "sending command"
        );
        match transport.exchange(request, expected_prefix).await {
            Ok(reply) => {
                if reply.command == expected_prefix {
                    return Ok(reply);
                }
                warn!(
                    expected = ?std::str::from_utf8(&expected_prefix),
                    got = reply.command_str(),
                    attempt,
                    "reply prefix mismatch"
                );
                last_err = Some(RobofocusError::ProtocolError(format!(
                    "expected reply prefix {:?}, got {:?}",
                    std::str::from_utf8(&expected_prefix),
                    reply.command_str()
                )));
            }
            Err(e) => {
                warn!(error = %e, attempt, "command exchange failed");
                last_err = Some(e);
            }
        }
        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }
    Err(last_err.unwrap_or(RobofocusError::DriverError("exchange failed".into())))
}

/// Reassembles raw bytes from any `AsyncRead` half into frames and async
/// events via [`FrameSync`]. Shared by the real serial transport and the
/// in-process simulator so both sync on the wire the same way.
pub struct FrameReader<R> {
    reader: R,
    sync: FrameSync,
    pending_events: Vec<AsyncEvent>,
}

impl<R> FrameReader<R>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            sync: FrameSync::new(),
            pending_events: Vec::new(),
        }
    }

    /// Read bytes until a complete frame (or frame error) is produced,
    /// stashing any async events seen along the way.
    pub async fn read_frame(&mut self) -> Result<Packet> {
        let mut byte = [0u8; 1];
        loop {
            let n = self
                .reader
                .read(&mut byte)
                .await
                .map_err(RobofocusError::Io)?;
            if n == 0 {
                return Err(RobofocusError::SerialTimeout(
                    "connection closed while awaiting reply".into(),
                ));
            }
            for outcome in self.sync.push_byte(byte[0]) {
                match outcome {
                    FrameOutcome::Event(event) => self.pending_events.push(event),
                    FrameOutcome::Frame(packet) => return Ok(packet),
                    FrameOutcome::FrameError(e) => return Err(e),
                }
            }
        }
    }

    pub fn take_events(&mut self) -> Vec<AsyncEvent> {
        std::mem::take(&mut self.pending_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FlakyTransport {
        connected: std::sync::atomic::AtomicBool,
        fail_times: AtomicU32,
        reply: Packet,
        attempts: StdMutex<u32>,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn connect(&self) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn exchange(&self, _request: Packet, _expected_prefix: [u8; 2]) -> Result<Packet> {
            *self.attempts.lock().unwrap() += 1;
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(RobofocusError::SerialTimeout("simulated".into()));
            }
            Ok(self.reply)
        }
        async fn drain_async(&self) -> Vec<AsyncEvent> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn send_command_retries_then_succeeds() {
        let transport = FlakyTransport {
            connected: std::sync::atomic::AtomicBool::new(true),
            fail_times: AtomicU32::new(2),
            reply: Packet::new(*b"FV", 100).unwrap(),
            attempts: StdMutex::new(0),
        };
        let result = send_command(&transport, Command::FirmwareVersion).await;
        assert!(result.is_ok());
        assert_eq!(*transport.attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn send_command_exhausts_retries_and_fails() {
        let transport = FlakyTransport {
            connected: std::sync::atomic::AtomicBool::new(true),
            fail_times: AtomicU32::new(10),
            reply: Packet::new(*b"FV", 100).unwrap(),
            attempts: StdMutex::new(0),
        };
        let result = send_command(&transport, Command::FirmwareVersion).await;
        assert!(result.is_err());
        assert_eq!(*transport.attempts.lock().unwrap(), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn send_command_rejects_when_not_connected() {
        let transport = FlakyTransport {
            connected: std::sync::atomic::AtomicBool::new(false),
            fail_times: AtomicU32::new(0),
            reply: Packet::new(*b"FV", 100).unwrap(),
            attempts: StdMutex::new(0),
        };
        let result = send_command(&transport, Command::FirmwareVersion).await;
        assert!(matches!(result, Err(RobofocusError::NotConnected)));
    }
}
