//! Real serial-port transport using tokio-serial.
//!
//! Robofocus frames are fixed-width binary with no delimiter, so reading
//! happens one byte at a time through [`crate::transport::FrameReader`]
//! rather than via `read_until`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use crate::error::{Result, RobofocusError};
use crate::protocol::{AsyncEvent, Packet};
use crate::transport::{FrameReader, Transport};

/// Byte-level serial transport for a real Robofocus unit.
pub struct SerialTransport {
    port: RwLock<String>,
    baud_rate: u32,
    timeout: Duration,
    connected: AtomicBool,
    session: Mutex<Option<Session>>,
}

struct Session {
    writer: WriteHalf<SerialStream>,
    reader: FrameReader<ReadHalf<SerialStream>>,
}

impl SerialTransport {
    pub fn new(port: String, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port: RwLock::new(port),
            baud_rate,
            timeout,
            connected: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&self) -> Result<()> {
        let port = self.port.read().await.clone();
        debug!(port = %port, baud_rate = self.baud_rate, "opening serial port");
        let stream = tokio_serial::new(&port, self.baud_rate)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| RobofocusError::SerialPort(format!("failed to open {port}: {e}")))?;
        let (reader, writer) = tokio::io::split(stream);
        *self.session.lock().await = Some(Session {
            writer,
            reader: FrameReader::new(reader),
        });
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn set_port(&self, port: &str) -> Result<()> {
        *self.port.write().await = port.to_string();
        Ok(())
    }

    async fn disconnect(&self) {
        *self.session.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn exchange(&self, request: Packet, _expected_prefix: [u8; 2]) -> Result<Packet> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(RobofocusError::NotConnected)?;
        let frame = request.encode();
        session
            .writer
            .write_all(&frame)
            .await
            .map_err(RobofocusError::Io)?;
        session.writer.flush().await.map_err(RobofocusError::Io)?;
        session.reader.read_frame().await
    }

    async fn drain_async(&self) -> Vec<AsyncEvent> {
        let mut guard = self.session.lock().await;
        match guard.as_mut() {
            Some(session) => session.reader.take_events(),
            None => Vec::new(),
        }
    }
}
