//! Robofocus Driver
//!
//! ASCOM Alpaca driver for Robofocus RS-232 electronic focusers.
//!
//! This driver exposes an ASCOM Focuser device for controlling a Robofocus
//! unit over a fixed-width binary serial protocol, plus a small JSON
//! control-panel surface ([`gui`]) for operations ASCOM has no verb for
//! (port selection, zero-point and travel-limit adjustment, log retrieval).

pub mod config;
pub mod controller;
pub mod error;
pub mod focuser_device;
pub mod gui;
pub mod logging;
pub mod protocol;
pub mod serial;
#[cfg(feature = "mock")]
pub mod simulator;
pub mod transport;

pub use config::{load_config, Config, FocuserConfig, GuiConfig, PollingConfig, ServerConfig, UserSettings};
pub use controller::FocuserController;
pub use error::{Result, RobofocusError};
pub use focuser_device::RobofocusFocuserDevice;
pub use transport::Transport;

#[cfg(feature = "mock")]
pub use simulator::{SimulatorOptions, SimulatorTransport};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use ascom_alpaca::api::CargoServerInfo;
use ascom_alpaca::Server;
use tokio::sync::RwLock;
use tracing::info;

use serial::SerialTransport;

/// Builder for the ASCOM Alpaca server and its backing [`FocuserController`].
///
/// Configures the focuser device and transport, then binds the server.
/// Returns the controller alongside the bound server so `main` can also
/// mount the driver-specific GUI router ([`gui::router`]) on the same
/// shared state.
pub struct ServerBuilder {
    config: Config,
    settings: UserSettings,
    settings_path: PathBuf,
    transport: Option<Arc<dyn Transport>>,
}

impl ServerBuilder {
    pub fn new(config: Config, settings: UserSettings, settings_path: PathBuf) -> Self {
        Self {
            config,
            settings,
            settings_path,
            transport: None,
        }
    }

    /// Inject a transport (the in-process simulator, or a test double)
    /// instead of opening a real serial port.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub async fn build(
        self,
    ) -> std::result::Result<(ascom_alpaca::BoundServer, Arc<FocuserController>), Box<dyn std::error::Error>>
    {
        let mut server = Server::new(CargoServerInfo!());
        server.listen_addr = SocketAddr::new(self.config.server.ip.parse()?, self.config.server.port);

        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(SerialTransport::new(
                self.config.serial.port.clone(),
                self.config.serial.baud_rate,
                self.config.serial.timeout,
            ))
        });

        let settings = Arc::new(RwLock::new(self.settings));
        let controller = Arc::new(FocuserController::new(
            transport,
            Arc::clone(&settings),
            self.settings_path,
            self.config.focuser.polling.clone(),
            self.config.serial.timeout,
        ));

        let focuser_device =
            RobofocusFocuserDevice::new(self.config.focuser.clone(), Arc::clone(&controller));
        server.devices.register(focuser_device);
        info!(
            "Registered Focuser device: {} (device number {})",
            self.config.focuser.name, self.config.focuser.device_number
        );

        info!(
            discovery_enabled = self.config.server.discovery_enabled,
            "Serial port: {}", self.config.serial.port
        );

        let bound = server.bind().await?;
        info!("Bound Alpaca server bound_addr={}", bound.listen_addr());
        Ok((bound, controller))
    }
}
