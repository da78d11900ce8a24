//! Focuser controller: owns the transport connection, the cached device
//! state, and the background motion monitor.
//!
//! A connection reference count lets multiple Alpaca clients share one
//! physical port, a command-serializing lock keeps at most one command
//! in flight, and a cached-state snapshot is refreshed by a background
//! task that drains async `I`/`O`/`F` bytes rather than polling on a
//! fixed interval.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{PollingConfig, UserSettings};
use crate::error::{Result, RobofocusError};
use crate::protocol::{self, AsyncEvent, Command};
use crate::transport::{send_command, Transport, SETTLING_DELAY};

/// Cached, live-refreshed snapshot of the focuser's state.
#[derive(Debug, Clone, Default)]
pub struct CachedState {
    pub position: Option<u32>,
    pub target: Option<u32>,
    pub is_moving: bool,
    pub firmware_value: Option<u32>,
    pub temperature_raw: Option<u32>,
    pub raw_max_travel: Option<u32>,
    pub backlash: Option<i16>,
    /// When `position` was last refreshed from hardware, used to decide
    /// if the last refresh is older than the idle-refresh interval.
    pub position_refreshed_at: Option<Instant>,
    /// When `temperature_raw` was last refreshed from hardware.
    pub temperature_refreshed_at: Option<Instant>,
    /// When the motion monitor last saw an async status byte, used by its
    /// safety net to detect a missed terminator.
    pub last_async_event_at: Option<Instant>,
}

/// Owns a [`Transport`] and the domain state layered on top of it.
pub struct FocuserController {
    transport: Arc<dyn Transport>,
    connection_count: Arc<AtomicU32>,
    available: Arc<AtomicBool>,
    cached_state: Arc<RwLock<CachedState>>,
    command_lock: Arc<Mutex<()>>,
    settings: Arc<RwLock<UserSettings>>,
    settings_path: PathBuf,
    polling: PollingConfig,
    command_timeout: Duration,
    monitor_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl FocuserController {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: Arc<RwLock<UserSettings>>,
        settings_path: PathBuf,
        polling: PollingConfig,
        command_timeout: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            transport,
            connection_count: Arc::new(AtomicU32::new(0)),
            available: Arc::new(AtomicBool::new(false)),
            cached_state: Arc::new(RwLock::new(CachedState::default())),
            command_lock: Arc::new(Mutex::new(())),
            settings,
            settings_path,
            polling,
            command_timeout,
            monitor_handle: Arc::new(Mutex::new(None)),
            shutdown_tx,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub async fn get_cached_state(&self) -> CachedState {
        self.cached_state.read().await.clone()
    }

    /// Connect to the focuser, incrementing the reference count. Only the
    /// first caller actually opens the transport and runs the handshake.
    pub async fn connect(&self) -> Result<()> {
        let count = self.connection_count.fetch_add(1, Ordering::SeqCst);
        if count == 0 {
            debug!("first client connecting, opening transport");
            self.transport.connect().await?;
            self.perform_handshake().await?;
            self.available.store(true, Ordering::SeqCst);
            self.start_monitor();
            info!("focuser connected");
        } else {
            debug!(connection_count = count + 1, "additional client connected");
        }
        Ok(())
    }

    /// Disconnect, decrementing the reference count. Only the last caller
    /// actually closes the transport.
    ///
    /// Refuses with `InvalidOperation` while a move is in progress;
    /// the caller must `halt()` first.
    pub async fn disconnect(&self) -> Result<()> {
        if self.cached_state.read().await.is_moving {
            return Err(RobofocusError::InvalidOperation(
                "cannot disconnect while moving".into(),
            ));
        }

        let prev = match self
            .connection_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                if c > 0 {
                    Some(c - 1)
                } else {
                    None
                }
            }) {
            Ok(prev) => prev,
            Err(_) => return Ok(()),
        };

        if prev == 1 {
            debug!("last client disconnecting, closing transport");
            self.available.store(false, Ordering::SeqCst);
            let _ = self.shutdown_tx.send(true);
            self.stop_monitor().await;
            if let Some(position) = self.cached_state.read().await.position {
                let mut settings = self.settings.write().await;
                settings.last_position = position;
                if let Err(e) = settings.save(&self.settings_path) {
                    warn!(error = %e, "failed to persist last known position");
                }
            }
            self.transport.disconnect().await;
            info!("focuser disconnected");
        } else {
            debug!(connection_count = prev - 1, "client disconnected");
        }
        Ok(())
    }

    /// Point the transport at a different physical port before the next
    /// `connect()`. Refused while connected, mirroring the "mode switch
    /// while connected" guard.
    pub async fn set_port(&self, port: String) -> Result<()> {
        if self.is_available() {
            return Err(RobofocusError::InvalidOperation(
                "cannot change port while connected".into(),
            ));
        }
        self.transport.set_port(&port).await?;
        let mut settings = self.settings.write().await;
        settings.last_port = Some(port);
        settings.save(&self.settings_path)
    }

    async fn perform_handshake(&self) -> Result<()> {
        let version = send_command(self.transport.as_ref(), Command::FirmwareVersion).await?;
        let temperature = send_command(self.transport.as_ref(), Command::ReadTemperature).await?;
        let backlash = send_command(self.transport.as_ref(), Command::GetBacklash).await?;
        let max_travel = send_command(self.transport.as_ref(), Command::GetMaxTravel).await?;

        // The hardware has no "report current position" command, so the
        // last position this driver saw is re-asserted with FS. A fresh
        // install (last_position 0/1) is below FS's minimum usable value,
        // so the position simply starts at 0 without syncing.
        let last_position = self.settings.read().await.last_position;
        let position = if protocol::validate_sync_value(last_position).is_ok() {
            let reply =
                send_command(self.transport.as_ref(), Command::SyncPosition(last_position))
                    .await?;
            reply.value
        } else {
            0
        };

        debug!(firmware = version.value, position, "handshake complete");

        let mut state = self.cached_state.write().await;
        state.firmware_value = Some(version.value);
        state.temperature_raw = Some(temperature.value);
        state.backlash = Some(protocol::decode_backlash(backlash.value));
        state.raw_max_travel = Some(max_travel.value);
        state.position = Some(position);
        Ok(())
    }

    fn ensure_available(&self) -> Result<()> {
        if !self.is_available() {
            return Err(RobofocusError::NotConnected);
        }
        Ok(())
    }

    pub async fn firmware_value(&self) -> Result<u32> {
        self.ensure_available()?;
        self.cached_state
            .read()
            .await
            .firmware_value
            .ok_or(RobofocusError::DriverError("firmware not yet known".into()))
    }

    /// Hardware-reported position, adjusted by the configured zero offset.
    ///
    /// The hardware has no standalone "report position" command, so a fresh
    /// read means re-issuing the last `FG` target. While
    /// idle and within `idle_refresh_interval` of the last refresh, the
    /// cached value is returned instead of round-tripping to hardware.
    pub async fn get_position(&self) -> Result<i32> {
        self.ensure_available()?;
        let needs_refresh = {
            let state = self.cached_state.read().await;
            state.position.is_none()
                || !state.is_moving
                    && state
                        .position_refreshed_at
                        .is_none_or(|t| t.elapsed() >= self.polling.idle_refresh_interval)
        };

        if needs_refresh && !self.cached_state.read().await.is_moving {
            let _guard = self.command_lock.lock().await;
            // The hardware has no standalone "report position" command; FG
            // always echoes its *target* in the FD reply rather than the
            // live position, so the only way to "refresh" without actually
            // moving is to re-issue FG with the position already cached —
            // a net-zero move: passing a literal 0 as the target would
            // drive the focuser home on every idle refresh instead.
            let current = self.cached_state.read().await.position.unwrap_or(0);
            let reply =
                send_command(self.transport.as_ref(), Command::GotoAbsolute(current)).await?;
            let mut state = self.cached_state.write().await;
            state.position = Some(reply.value);
            state.position_refreshed_at = Some(Instant::now());
        }

        let raw = {
            let state = self.cached_state.read().await;
            state
                .position
                .ok_or(RobofocusError::DriverError("position not yet known".into()))?
        };
        let offset = self.settings.read().await.zero_offset;
        Ok(raw as i32 - offset)
    }

    /// Hardware's physical maximum travel (`FL`), queried live and cached.
    pub async fn get_raw_max(&self) -> Result<u32> {
        self.ensure_available()?;
        let _guard = self.command_lock.lock().await;
        let reply = send_command(self.transport.as_ref(), Command::GetMaxTravel).await?;
        self.cached_state.write().await.raw_max_travel = Some(reply.value);
        Ok(reply.value)
    }

    /// Externally reported maximum: hardware max minus the zero offset,
    /// since `MaxStep` must track the same zero point as `Position`.
    pub async fn get_max(&self) -> Result<i32> {
        let raw_max = self.get_raw_max().await?;
        let offset = self.settings.read().await.zero_offset;
        Ok(raw_max as i32 - offset)
    }

    /// Driver-enforced soft maximum increment for a single move.
    pub async fn get_max_increment(&self) -> i32 {
        self.settings.read().await.max_increment as i32
    }

    pub async fn get_is_moving(&self) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.cached_state.read().await.is_moving)
    }

    /// Decoded temperature, refreshed from hardware at most once per
    /// `temperature_interval`.
    pub async fn get_temperature(&self) -> Result<f64> {
        self.ensure_available()?;
        let needs_refresh = {
            let state = self.cached_state.read().await;
            state.temperature_raw.is_none()
                || state
                    .temperature_refreshed_at
                    .is_none_or(|t| t.elapsed() >= self.polling.temperature_interval)
        };

        if needs_refresh {
            let _guard = self.command_lock.lock().await;
            let reply = send_command(self.transport.as_ref(), Command::ReadTemperature).await?;
            let mut state = self.cached_state.write().await;
            state.temperature_raw = Some(reply.value);
            state.temperature_refreshed_at = Some(Instant::now());
        }

        let raw = self
            .cached_state
            .read()
            .await
            .temperature_raw
            .ok_or(RobofocusError::DriverError("temperature not yet known".into()))?;
        Ok(protocol::decode_temperature(raw))
    }

    pub async fn get_backlash(&self) -> Result<i16> {
        self.ensure_available()?;
        // Avoid round-tripping to hardware while a move is in progress;
        // serve the cached value instead.
        if self.cached_state.read().await.is_moving {
            return self
                .cached_state
                .read()
                .await
                .backlash
                .ok_or(RobofocusError::DriverError("backlash not yet known".into()));
        }
        let _guard = self.command_lock.lock().await;
        let reply = send_command(self.transport.as_ref(), Command::GetBacklash).await?;
        let signed = protocol::decode_backlash(reply.value);
        self.cached_state.write().await.backlash = Some(signed);
        Ok(signed)
    }

    pub async fn set_backlash(&self, value: i16) -> Result<()> {
        self.ensure_available()?;
        let _guard = self.command_lock.lock().await;
        send_command(self.transport.as_ref(), Command::SetBacklash(value)).await?;
        self.cached_state.write().await.backlash = Some(value);
        let mut settings = self.settings.write().await;
        settings.backlash = value;
        settings.save(&self.settings_path)?;
        Ok(())
    }

    /// Move to an absolute position, clamped to `[min_position, max_travel]`.
    pub async fn move_absolute(&self, target: i32) -> Result<()> {
        self.ensure_available()?;
        let settings = self.settings.read().await.clone();
        let raw_max = self
            .cached_state
            .read()
            .await
            .raw_max_travel
            .unwrap_or(settings.max_travel);

        let absolute_target = target + settings.zero_offset;
        if absolute_target < settings.min_position as i32 || absolute_target as u32 > raw_max {
            return Err(RobofocusError::InvalidValue(format!(
                "target {target} out of range [{}, {}]",
                settings.min_position as i32 - settings.zero_offset,
                raw_max as i32 - settings.zero_offset
            )));
        }

        let current = self.cached_state.read().await.position.unwrap_or(0) as i32;
        let delta = (absolute_target - current).unsigned_abs();
        if delta > settings.max_increment {
            return Err(RobofocusError::InvalidValue(format!(
                "move of {delta} steps exceeds MaxIncrement {}",
                settings.max_increment
            )));
        }

        {
            let mut state = self.cached_state.write().await;
            state.target = Some(absolute_target as u32);
            state.is_moving = true;
            state.last_async_event_at = Some(Instant::now());
        }

        let _guard = self.command_lock.lock().await;
        send_command(
            self.transport.as_ref(),
            Command::GotoAbsolute(absolute_target as u32),
        )
        .await?;
        debug!(target = absolute_target, "move command sent");
        Ok(())
    }

    pub async fn halt(&self) -> Result<()> {
        self.ensure_available()?;
        let _guard = self.command_lock.lock().await;
        send_command(self.transport.as_ref(), Command::Halt).await?;
        let mut state = self.cached_state.write().await;
        state.is_moving = false;
        state.target = None;
        debug!("halt command sent");
        Ok(())
    }

    /// Relabel the current physical position as `logical_value` in the
    /// externally reported coordinate system, by solving
    /// `zero_offset = raw_position - logical_value`. Purely local: no
    /// command is sent to hardware.
    pub async fn set_zero(&self, logical_value: i32) -> Result<()> {
        self.ensure_available()?;
        let raw = self
            .cached_state
            .read()
            .await
            .position
            .ok_or(RobofocusError::DriverError("position not yet known".into()))?;
        let mut settings = self.settings.write().await;
        settings.zero_offset = raw as i32 - logical_value;
        settings.save(&self.settings_path)?;
        Ok(())
    }

    /// Current operating mode.
    pub async fn get_mode(&self) -> crate::config::OperatingMode {
        self.settings.read().await.mode
    }

    /// Switch operating mode. Refused while connected, since switching
    /// between the real transport and the simulator under a live connection
    /// would leave the open session pointed at the wrong backend.
    pub async fn set_mode(&self, mode: crate::config::OperatingMode) -> Result<()> {
        if self.is_available() {
            return Err(RobofocusError::InvalidOperation(
                "cannot change operating mode while connected".into(),
            ));
        }
        let mut settings = self.settings.write().await;
        settings.mode = mode;
        settings.save(&self.settings_path)
    }

    /// Tell the hardware to relabel its current physical position as
    /// `value` without moving (`FS`).
    pub async fn sync_position(&self, value: u32) -> Result<()> {
        self.ensure_available()?;
        let _guard = self.command_lock.lock().await;
        let reply = send_command(self.transport.as_ref(), Command::SyncPosition(value)).await?;
        self.cached_state.write().await.position = Some(reply.value);
        Ok(())
    }

    /// Change the hardware's physical max travel (`FL`).
    pub async fn set_max_travel(&self, value: u32) -> Result<()> {
        self.ensure_available()?;
        let _guard = self.command_lock.lock().await;
        send_command(self.transport.as_ref(), Command::SetMaxTravel(value)).await?;
        self.cached_state.write().await.raw_max_travel = Some(value);
        let mut settings = self.settings.write().await;
        settings.max_travel = value;
        settings.save(&self.settings_path)?;
        Ok(())
    }

    /// Change the driver's own soft cap on a single move (not sent to
    /// hardware — this is purely a driver-side limit).
    pub async fn set_max_increment(&self, value: u32) -> Result<()> {
        let mut settings = self.settings.write().await;
        settings.max_increment = value;
        settings.save(&self.settings_path)
    }

    /// Change the driver's soft minimum allowed position.
    pub async fn set_min_position(&self, value: u32) -> Result<()> {
        let mut settings = self.settings.write().await;
        settings.min_position = value;
        settings.save(&self.settings_path)
    }

    /// Spawn the background task that drains async status bytes and keeps
    /// `is_moving`/`position` current without the caller having to poll.
    /// Spawn the background task that drains async status bytes and keeps
    /// `is_moving`/`position` current without the caller having to poll.
    ///
    /// Sleeps on `monitor_active_interval` while a move is in flight and
    /// `monitor_idle_interval` otherwise, and carries a safety net: if no
    /// async byte has been seen for `command_timeout` while `is_moving` is
    /// set, the move is presumed to have finished without a trailing `F`
    /// ever arriving, and the same net-zero `FG` refresh used on a clean
    /// `Finished` is issued to resynchronize.
    fn start_monitor(&self) {
        let transport = Arc::clone(&self.transport);
        let cached_state = Arc::clone(&self.cached_state);
        let available = Arc::clone(&self.available);
        let command_lock = Arc::clone(&self.command_lock);
        let polling = self.polling.clone();
        let command_timeout = self.command_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                let sleep_for = if cached_state.read().await.is_moving {
                    polling.monitor_active_interval
                } else {
                    polling.monitor_idle_interval
                };
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = shutdown_rx.changed() => {
                        debug!("motion monitor stopping: shutdown signal received");
                        break;
                    }
                }
                if !available.load(Ordering::SeqCst) {
                    break;
                }

                let events = transport.drain_async().await;
                let mut finished = false;
                if !events.is_empty() {
                    let mut state = cached_state.write().await;
                    state.last_async_event_at = Some(Instant::now());
                    for event in events {
                        match event {
                            AsyncEvent::Inward => {
                                if let Some(pos) = state.position.as_mut() {
                                    *pos = pos.saturating_sub(1);
                                }
                            }
                            AsyncEvent::Outward => {
                                if let Some(pos) = state.position.as_mut() {
                                    *pos += 1;
                                }
                            }
                            AsyncEvent::Finished => finished = true,
                        }
                    }
                }

                if !finished {
                    // Safety net: a move that never emits a terminating `F`
                    // (e.g. dropped byte) would otherwise leave `is_moving`
                    // stuck forever.
                    let stale = {
                        let state = cached_state.read().await;
                        state.is_moving
                            && state
                                .last_async_event_at
                                .is_none_or(|t| t.elapsed() >= command_timeout)
                    };
                    if stale {
                        warn!("no async status byte for {command_timeout:?} while moving, forcing refresh");
                        finished = true;
                    }
                }

                if finished {
                    tokio::time::sleep(SETTLING_DELAY).await;
                    let was_moving = cached_state.read().await.is_moving;
                    if was_moving {
                        // Net-zero refresh FG: pass the
                        // position already tracked step-by-step above so
                        // the hardware doesn't actually move again.
                        let current = cached_state.read().await.position.unwrap_or(0);
                        let _guard = command_lock.lock().await;
                        match send_command(transport.as_ref(), Command::GotoAbsolute(current)).await
                        {
                            Ok(reply) => {
                                let mut state = cached_state.write().await;
                                state.position = Some(reply.value);
                                state.position_refreshed_at = Some(Instant::now());
                            }
                            Err(e) => warn!(error = %e, "failed to refresh position after move"),
                        }
                    }
                    let mut state = cached_state.write().await;
                    state.is_moving = false;
                    state.target = None;
                }
            }
        });

        tokio::spawn({
            let monitor_handle = Arc::clone(&self.monitor_handle);
            async move {
                *monitor_handle.lock().await = Some(handle);
            }
        });
    }

    async fn stop_monitor(&self) {
        let mut handle = self.monitor_handle.lock().await;
        if let Some(h) = handle.take() {
            match tokio::time::timeout(Duration::from_secs(5), h).await {
                Ok(_) => debug!("motion monitor stopped gracefully"),
                Err(_) => warn!("motion monitor did not stop within 5 seconds, dropping it"),
            }
        }
    }
}

impl std::fmt::Debug for FocuserController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocuserController")
            .field("connection_count", &self.connection_count)
            .field("available", &self.available)
            .finish_non_exhaustive()
    }
}
