//! World struct for Robofocus BDD tests

use std::sync::Arc;
use std::time::Duration;

use cucumber::World;
use robofocus_alpaca::config::{FocuserConfig, PollingConfig, UserSettings};
use robofocus_alpaca::simulator::{SimulatorOptions, SimulatorTransport};
use robofocus_alpaca::{FocuserController, RobofocusFocuserDevice, Transport};
use tokio::sync::RwLock;

fn fast_polling() -> PollingConfig {
    PollingConfig {
        idle_refresh_interval: Duration::from_millis(50),
        temperature_interval: Duration::from_millis(50),
        monitor_idle_interval: Duration::from_millis(10),
        monitor_active_interval: Duration::from_millis(5),
    }
}

#[derive(Default, World)]
pub struct RobofocusWorld {
    pub controller: Option<Arc<FocuserController>>,
    pub device: Option<Arc<RobofocusFocuserDevice>>,
    pub simulator: Option<Arc<SimulatorTransport>>,
    pub last_error: Option<String>,
    pub last_error_code: Option<u16>,
    settings_dir: Option<tempfile::TempDir>,
}

impl std::fmt::Debug for RobofocusWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobofocusWorld").finish_non_exhaustive()
    }
}

impl RobofocusWorld {
    /// Build a controller (and ASCOM device on top of it) wired to the
    /// in-process simulator, with a fast polling cadence so waits in
    /// scenarios don't need to sit through production-sized intervals.
    pub fn build_with_max_travel(&mut self, max_travel: u32) {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings_path = dir.path().join("settings.json");
        let simulator = Arc::new(SimulatorTransport::new(
            max_travel,
            SimulatorOptions {
                tick_interval: Duration::from_millis(5),
                steps_per_tick: 2000,
                ..SimulatorOptions::default()
            },
        ));
        let transport: Arc<dyn Transport> = Arc::clone(&simulator) as Arc<dyn Transport>;
        let settings = Arc::new(RwLock::new(UserSettings::default()));
        let controller = Arc::new(FocuserController::new(
            transport,
            settings,
            settings_path,
            fast_polling(),
            Duration::from_secs(2),
        ));
        let device = Arc::new(RobofocusFocuserDevice::new(
            FocuserConfig::default(),
            Arc::clone(&controller),
        ));
        self.simulator = Some(simulator);
        self.controller = Some(controller);
        self.device = Some(device);
        self.settings_dir = Some(dir);
    }

    pub fn controller(&self) -> &Arc<FocuserController> {
        self.controller.as_ref().expect("controller not built")
    }

    pub fn device(&self) -> &Arc<RobofocusFocuserDevice> {
        self.device.as_ref().expect("device not built")
    }

    pub fn simulator(&self) -> &Arc<SimulatorTransport> {
        self.simulator.as_ref().expect("simulator not built")
    }
}
