//! Robofocus device implementation
//!
//! Implements the ASCOM Alpaca Device and Focuser traits on top of
//! [`FocuserController`].

use std::fmt;
use std::sync::Arc;

use ascom_alpaca::api::{Device, Focuser};
use ascom_alpaca::{ASCOMError, ASCOMResult};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::FocuserConfig;
use crate::controller::FocuserController;
use crate::error::RobofocusError;

/// Guard macro that returns NOT_CONNECTED if the device is not connected.
macro_rules! ensure_connected {
    ($self:ident) => {
        if !$self.connected().await.is_ok_and(|connected| connected) {
            debug!("focuser device not connected");
            return Err(ASCOMError::NOT_CONNECTED);
        }
    };
}

/// Robofocus focuser device for ASCOM Alpaca
pub struct RobofocusFocuserDevice {
    config: FocuserConfig,
    requested_connection: Arc<RwLock<bool>>,
    controller: Arc<FocuserController>,
}

impl fmt::Debug for RobofocusFocuserDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RobofocusFocuserDevice")
            .field("config", &self.config)
            .field("requested_connection", &self.requested_connection)
            .finish_non_exhaustive()
    }
}

impl RobofocusFocuserDevice {
    pub fn new(config: FocuserConfig, controller: Arc<FocuserController>) -> Self {
        Self {
            config,
            requested_connection: Arc::new(RwLock::new(false)),
            controller,
        }
    }

    fn to_ascom_error(err: RobofocusError) -> ASCOMError {
        err.to_ascom_error()
    }
}

#[async_trait]
impl Device for RobofocusFocuserDevice {
    fn static_name(&self) -> &str {
        &self.config.name
    }

    fn unique_id(&self) -> &str {
        &self.config.unique_id
    }

    async fn description(&self) -> ASCOMResult<String> {
        Ok(self.config.description.clone())
    }

    async fn connected(&self) -> ASCOMResult<bool> {
        let requested = *self.requested_connection.read().await;
        Ok(requested && self.controller.is_available())
    }

    async fn set_connected(&self, connected: bool) -> ASCOMResult<()> {
        if self.connected().await? == connected {
            return Ok(());
        }
        match connected {
            true => {
                self.controller.connect().await.map_err(Self::to_ascom_error)?;
                *self.requested_connection.write().await = true;
                debug!("focuser device connected");
            }
            false => {
                self.controller
                    .disconnect()
                    .await
                    .map_err(Self::to_ascom_error)?;
                *self.requested_connection.write().await = false;
                debug!("focuser device disconnected");
            }
        }
        Ok(())
    }

    async fn driver_info(&self) -> ASCOMResult<String> {
        Ok("Robofocus driver - ASCOM Alpaca interface for RS-232 Robofocus focusers".to_string())
    }

    async fn driver_version(&self) -> ASCOMResult<String> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }
}

#[async_trait]
impl Focuser for RobofocusFocuserDevice {
    async fn absolute(&self) -> ASCOMResult<bool> {
        Ok(true)
    }

    async fn is_moving(&self) -> ASCOMResult<bool> {
        ensure_connected!(self);
        self.controller
            .get_is_moving()
            .await
            .map_err(Self::to_ascom_error)
    }

    async fn max_increment(&self) -> ASCOMResult<i32> {
        ensure_connected!(self);
        Ok(self.controller.get_max_increment().await)
    }

    async fn max_step(&self) -> ASCOMResult<i32> {
        ensure_connected!(self);
        self.controller.get_max().await.map_err(Self::to_ascom_error)
    }

    async fn position(&self) -> ASCOMResult<i32> {
        ensure_connected!(self);
        self.controller.get_position().await.map_err(Self::to_ascom_error)
    }

    async fn step_size(&self) -> ASCOMResult<f64> {
        Ok(self.config.step_size)
    }

    async fn temp_comp(&self) -> ASCOMResult<bool> {
        Ok(false)
    }

    async fn set_temp_comp(&self, _temp_comp: bool) -> ASCOMResult<()> {
        Err(ASCOMError::NOT_IMPLEMENTED)
    }

    async fn temp_comp_available(&self) -> ASCOMResult<bool> {
        Ok(false)
    }

    async fn temperature(&self) -> ASCOMResult<f64> {
        ensure_connected!(self);
        self.controller
            .get_temperature()
            .await
            .map_err(Self::to_ascom_error)
    }

    async fn halt(&self) -> ASCOMResult<()> {
        ensure_connected!(self);
        self.controller.halt().await.map_err(Self::to_ascom_error)
    }

    async fn move_(&self, position: i32) -> ASCOMResult<()> {
        ensure_connected!(self);
        self.controller
            .move_absolute(position)
            .await
            .map_err(Self::to_ascom_error)
    }

    /// Robofocus speaks ASCOM interface version 3; the crate default is 4.
    async fn interface_version(&self) -> ASCOMResult<i32> {
        Ok(3)
    }
}
