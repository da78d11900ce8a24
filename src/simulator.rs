//! In-process Robofocus hardware simulator.
//!
//! Runs a real background task on the other end of a
//! [`tokio::io::duplex`] pair and speaks actual bytes, including emitting
//! standalone `I`/`O`/`F` async status bytes while a move is in progress,
//! so the same [`crate::transport::FrameReader`] sync logic used against
//! real hardware is exercised here too.
//!
//! Movement commands reply immediately with `FD` echoing the target
//! (matching the real hardware's behavior), then the simulated motor
//! "runs" in the background, emitting async `I`/`O` bytes per step and a
//! final lone `F` when it reaches the target — with no second reply frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, RobofocusError};
use crate::protocol::{self, AsyncEvent, Command, Packet};
use crate::transport::{FrameReader, Transport};

const DUPLEX_BUFFER: usize = 1024;

/// Tunable knobs for the simulated hardware's movement behavior and fault
/// injection, independent of the per-instrument [`crate::config::UserSettings`].
#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    /// How often the movement loop advances the position by one tick.
    pub tick_interval: Duration,
    /// Steps advanced per tick while moving.
    pub steps_per_tick: u32,
    /// Firmware value reported by `FV` (e.g. 113 for v1.13).
    pub firmware_value: u32,
    /// Raw ADC temperature reading reported by `FT`.
    pub temperature_raw: u32,
    /// Position the simulated motor starts at before any move or sync.
    pub initial_position: u32,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(20),
            steps_per_tick: 500,
            firmware_value: 113,
            temperature_raw: 586, // 586/2 - 273.15 = 19.85C
            initial_position: 0,
        }
    }
}

struct SimState {
    position: u32,
    max_travel: u32,
    backlash: i16,
    moving: bool,
    force_timeout: bool,
    force_checksum_error: bool,
    move_task: Option<JoinHandle<()>>,
}

impl SimState {
    fn new(max_travel: u32, initial_position: u32) -> Self {
        Self {
            position: initial_position,
            max_travel,
            backlash: 0,
            moving: false,
            force_timeout: false,
            force_checksum_error: false,
            move_task: None,
        }
    }
}

/// Shared hardware-side state: `state` guards the logical device, `writer`
/// guards the wire so both the command loop and a background move task can
/// emit bytes without interleaving them.
struct SimShared {
    state: Mutex<SimState>,
    writer: Mutex<WriteHalf<DuplexStream>>,
}

/// An in-process stand-in for a real Robofocus unit, wired through a pair
/// of in-memory duplex pipes instead of a serial port.
pub struct SimulatorTransport {
    connected: AtomicBool,
    client_reader: Mutex<Option<FrameReader<ReadHalf<DuplexStream>>>>,
    client_writer: Mutex<Option<WriteHalf<DuplexStream>>>,
    shared: Arc<SimShared>,
    options: SimulatorOptions,
}

impl SimulatorTransport {
    pub fn new(max_travel: u32, options: SimulatorOptions) -> Self {
        Self {
            connected: AtomicBool::new(false),
            client_reader: Mutex::new(None),
            client_writer: Mutex::new(None),
            shared: Arc::new(SimShared {
                state: Mutex::new(SimState::new(max_travel, options.initial_position)),
                // Replaced with the real duplex half on connect(); this
                // placeholder pipe is never used.
                writer: Mutex::new(tokio::io::split(tokio::io::duplex(1).0).1),
            }),
            options,
        }
    }

    /// Force the next command to time out (no reply ever sent), simulating
    /// a dropped cable or a wedged controller.
    pub async fn inject_timeout(&self) {
        self.shared.state.lock().await.force_timeout = true;
    }

    /// Force the next reply frame's checksum byte to be corrupted once.
    pub async fn inject_checksum_error(&self) {
        self.shared.state.lock().await.force_checksum_error = true;
    }

    async fn run_hardware(shared: Arc<SimShared>, options: SimulatorOptions, mut reader: ReadHalf<DuplexStream>) {
        loop {
            let mut frame = [0u8; protocol::FRAME_LEN];
            if reader.read_exact(&mut frame).await.is_err() {
                return; // client disconnected
            }
            let request = match Packet::decode(&frame) {
                Ok(p) => p,
                Err(_) => continue, // malformed request from the client; ignore
            };

            {
                let mut state = shared.state.lock().await;
                if state.force_timeout {
                    state.force_timeout = false;
                    continue; // never reply; the retry loop upstream will time out
                }
            }

            if let Err(e) = Self::handle_request(&shared, &options, request).await {
                debug!(error = %e, "simulator failed to reply, dropping request");
            }
        }
    }

    async fn handle_request(
        shared: &Arc<SimShared>,
        options: &SimulatorOptions,
        request: Packet,
    ) -> Result<()> {
        match &request.command {
            b"FV" => Self::reply(shared, *b"FV", options.firmware_value).await,
            b"FT" => Self::reply(shared, *b"FT", options.temperature_raw).await,
            b"FB" => {
                if request.value == 0 {
                    let backlash = shared.state.lock().await.backlash;
                    let encoded = protocol::encode_backlash(backlash)?;
                    Self::reply(shared, *b"FB", encoded).await
                } else {
                    let signed = protocol::decode_backlash(request.value);
                    shared.state.lock().await.backlash = signed;
                    Self::reply(shared, *b"FB", request.value).await
                }
            }
            b"FL" => {
                if request.value == 0 {
                    let max_travel = shared.state.lock().await.max_travel;
                    Self::reply(shared, *b"FL", max_travel).await
                } else {
                    shared.state.lock().await.max_travel = request.value;
                    Self::reply(shared, *b"FL", request.value).await
                }
            }
            b"FS" => {
                protocol::validate_sync_value(request.value)?;
                shared.state.lock().await.position = request.value;
                Self::reply(shared, *b"FD", request.value).await
            }
            b"FQ" => {
                let mut state = shared.state.lock().await;
                if let Some(task) = state.move_task.take() {
                    task.abort();
                }
                state.moving = false;
                let position = state.position;
                drop(state);
                Self::send_async(shared, AsyncEvent::Finished).await?;
                Self::reply(shared, *b"FD", position).await
            }
            b"FG" => Self::start_move(shared, options, request.value).await,
            b"FI" => {
                let current = shared.state.lock().await.position;
                let target = current.saturating_sub(request.value);
                Self::start_move(shared, options, target).await
            }
            b"FO" => {
                let (current, max_travel) = {
                    let state = shared.state.lock().await;
                    (state.position, state.max_travel)
                };
                let target = (current + request.value).min(max_travel);
                Self::start_move(shared, options, target).await
            }
            other => Err(RobofocusError::ProtocolError(format!(
                "simulator received unknown command {:?}",
                std::str::from_utf8(other)
            ))),
        }
    }

    /// Reply immediately with `FD` echoing `target`, then spawn a
    /// background task that walks the simulated position there one tick at
    /// a time, emitting an async byte per step and a lone `F` on arrival.
    async fn start_move(shared: &Arc<SimShared>, options: &SimulatorOptions, target: u32) -> Result<()> {
        {
            let mut state = shared.state.lock().await;
            if let Some(task) = state.move_task.take() {
                task.abort();
            }
            state.moving = true;
        }
        Self::reply(shared, *b"FD", target).await?;

        let shared = Arc::clone(shared);
        let options = options.clone();
        let handle = tokio::spawn(async move {
            loop {
                let still_moving = {
                    let mut state = shared.state.lock().await;
                    if state.position == target {
                        state.moving = false;
                        false
                    } else if state.position < target {
                        let step = options.steps_per_tick.min(target - state.position);
                        state.position += step;
                        drop(state);
                        let _ = Self::send_event_for(&shared, AsyncEvent::Outward, step).await;
                        true
                    } else {
                        let step = options.steps_per_tick.min(state.position - target);
                        state.position -= step;
                        drop(state);
                        let _ = Self::send_event_for(&shared, AsyncEvent::Inward, step).await;
                        true
                    }
                };
                if !still_moving {
                    let _ = Self::send_async(&shared, AsyncEvent::Finished).await;
                    return;
                }
                tokio::time::sleep(options.tick_interval).await;
            }
        });
        shared.state.lock().await.move_task = Some(handle);
        Ok(())
    }

    async fn send_event_for(shared: &Arc<SimShared>, event: AsyncEvent, count: u32) -> Result<()> {
        // one byte per physical step, matching real hardware's behavior of
        // emitting a single I/O byte for every microstep it takes.
        for _ in 0..count.max(1) {
            Self::send_async(shared, event).await?;
        }
        Ok(())
    }

    async fn send_async(shared: &Arc<SimShared>, event: AsyncEvent) -> Result<()> {
        let mut writer = shared.writer.lock().await;
        writer
            .write_all(&[event.to_byte()])
            .await
            .map_err(RobofocusError::Io)?;
        writer.flush().await.map_err(RobofocusError::Io)
    }

    async fn reply(shared: &Arc<SimShared>, command: [u8; 2], value: u32) -> Result<()> {
        let packet = Packet::new(command, value)?;
        let mut frame = packet.encode();
        let corrupt = {
            let mut state = shared.state.lock().await;
            std::mem::replace(&mut state.force_checksum_error, false)
        };
        if corrupt {
            frame[8] ^= 0xFF;
        }
        let mut writer = shared.writer.lock().await;
        writer.write_all(&frame).await.map_err(RobofocusError::Io)?;
        writer.flush().await.map_err(RobofocusError::Io)
    }
}

#[async_trait]
impl Transport for SimulatorTransport {
    async fn connect(&self) -> Result<()> {
        let (client_stream, hardware_stream) = tokio::io::duplex(DUPLEX_BUFFER);
        let (client_read, client_write) = tokio::io::split(client_stream);
        let (hw_read, hw_write) = tokio::io::split(hardware_stream);

        *self.shared.writer.lock().await = hw_write;

        let shared = Arc::clone(&self.shared);
        let options = self.options.clone();
        tokio::spawn(Self::run_hardware(shared, options, hw_read));

        *self.client_writer.lock().await = Some(client_write);
        *self.client_reader.lock().await = Some(FrameReader::new(client_read));
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        *self.client_writer.lock().await = None;
        *self.client_reader.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn exchange(&self, request: Packet, _expected_prefix: [u8; 2]) -> Result<Packet> {
        let frame = request.encode();
        {
            let mut guard = self.client_writer.lock().await;
            let writer = guard.as_mut().ok_or(RobofocusError::NotConnected)?;
            writer.write_all(&frame).await.map_err(RobofocusError::Io)?;
            writer.flush().await.map_err(RobofocusError::Io)?;
        }
        let mut guard = self.client_reader.lock().await;
        let reader = guard.as_mut().ok_or(RobofocusError::NotConnected)?;
        reader.read_frame().await
    }

    async fn drain_async(&self) -> Vec<AsyncEvent> {
        let mut guard = self.client_reader.lock().await;
        match guard.as_mut() {
            Some(reader) => reader.take_events(),
            None => Vec::new(),
        }
    }
}

/// Wire a [`Command`] straight through for tests that want to exercise the
/// simulator without going through the full retry-aware send path.
#[cfg(test)]
async fn exchange_command(transport: &SimulatorTransport, command: Command) -> Result<Packet> {
    let request = command.to_packet()?;
    transport.exchange(request, command.expected_reply_prefix()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_options() -> SimulatorOptions {
        SimulatorOptions {
            tick_interval: Duration::from_millis(1),
            steps_per_tick: 10_000,
            ..SimulatorOptions::default()
        }
    }

    #[tokio::test]
    async fn firmware_version_reply() {
        let sim = SimulatorTransport::new(64_000, fast_options());
        sim.connect().await.unwrap();
        let reply = exchange_command(&sim, Command::FirmwareVersion).await.unwrap();
        assert_eq!(reply.command, *b"FV");
        assert_eq!(reply.value, 113);
    }

    #[tokio::test]
    async fn goto_absolute_replies_immediately_with_target() {
        let sim = SimulatorTransport::new(64_000, fast_options());
        sim.connect().await.unwrap();
        let reply = exchange_command(&sim, Command::GotoAbsolute(30_000))
            .await
            .unwrap();
        assert_eq!(reply.command, *b"FD");
        assert_eq!(reply.value, 30_000);
    }

    #[tokio::test]
    async fn goto_absolute_eventually_emits_finished_event() {
        let sim = SimulatorTransport::new(64_000, fast_options());
        sim.connect().await.unwrap();
        exchange_command(&sim, Command::GotoAbsolute(30_000)).await.unwrap();

        let mut saw_finished = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if sim
                .drain_async()
                .await
                .iter()
                .any(|e| matches!(e, AsyncEvent::Finished))
            {
                saw_finished = true;
                break;
            }
        }
        assert!(saw_finished, "expected a Finished event after the move completed");
    }

    #[tokio::test]
    async fn backlash_round_trips_through_simulator() {
        let sim = SimulatorTransport::new(64_000, fast_options());
        sim.connect().await.unwrap();
        exchange_command(&sim, Command::SetBacklash(-20)).await.unwrap();
        let reply = exchange_command(&sim, Command::GetBacklash).await.unwrap();
        assert_eq!(protocol::decode_backlash(reply.value), -20);
    }

    #[tokio::test]
    async fn sync_rejects_values_below_two() {
        let sim = SimulatorTransport::new(64_000, fast_options());
        sim.connect().await.unwrap();
        let result = exchange_command(&sim, Command::SyncPosition(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn injected_timeout_drops_the_reply() {
        let sim = SimulatorTransport::new(64_000, fast_options());
        sim.connect().await.unwrap();
        sim.inject_timeout().await;
        let result = tokio::time::timeout(
            Duration::from_millis(200),
            exchange_command(&sim, Command::FirmwareVersion),
        )
        .await;
        assert!(result.is_err(), "expected the exchange to hang, but it returned");
    }

    #[tokio::test]
    async fn injected_checksum_error_is_detected_by_the_client() {
        let sim = SimulatorTransport::new(64_000, fast_options());
        sim.connect().await.unwrap();
        sim.inject_checksum_error().await;
        let result = exchange_command(&sim, Command::FirmwareVersion).await;
        assert!(matches!(result, Err(RobofocusError::ChecksumMismatch { .. })));
    }

    #[tokio::test]
    async fn halt_aborts_an_in_progress_move() {
        let sim = SimulatorTransport::new(64_000, SimulatorOptions {
            tick_interval: Duration::from_millis(50),
            steps_per_tick: 1,
            ..SimulatorOptions::default()
        });
        sim.connect().await.unwrap();
        exchange_command(&sim, Command::GotoAbsolute(30_000)).await.unwrap();
        let reply = exchange_command(&sim, Command::Halt).await.unwrap();
        assert_eq!(reply.command, *b"FD");
        assert!(reply.value < 30_000);
    }
}
