//! Integration tests for `FocuserController` against the in-process
//! simulator, covering the end-to-end scenarios.

#![cfg(feature = "mock")]

use std::sync::Arc;
use std::time::Duration;

use robofocus_alpaca::config::{PollingConfig, UserSettings};
use robofocus_alpaca::simulator::{SimulatorOptions, SimulatorTransport};
use robofocus_alpaca::FocuserController;
use tokio::sync::RwLock;

fn fast_polling() -> PollingConfig {
    PollingConfig {
        idle_refresh_interval: Duration::from_millis(50),
        temperature_interval: Duration::from_millis(50),
        monitor_idle_interval: Duration::from_millis(10),
        monitor_active_interval: Duration::from_millis(5),
    }
}

fn new_controller(max_travel: u32) -> (Arc<FocuserController>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    let transport = Arc::new(SimulatorTransport::new(
        max_travel,
        SimulatorOptions {
            tick_interval: Duration::from_millis(5),
            steps_per_tick: 2000,
            ..SimulatorOptions::default()
        },
    ));
    let settings = Arc::new(RwLock::new(UserSettings::default()));
    let controller = Arc::new(FocuserController::new(
        transport,
        settings,
        settings_path,
        fast_polling(),
        Duration::from_secs(2),
    ));
    (controller, dir)
}

#[tokio::test]
async fn handshake_populates_cached_state() {
    let (controller, _dir) = new_controller(64_000);
    controller.connect().await.unwrap();

    let state = controller.get_cached_state().await;
    assert!(state.firmware_value.is_some());
    assert!(state.temperature_raw.is_some());
    assert!(state.raw_max_travel.is_some());
    assert!(state.backlash.is_some());
}

#[tokio::test]
async fn move_within_bounds_completes_and_clears_moving_flag() {
    let (controller, _dir) = new_controller(64_000);
    controller.connect().await.unwrap();
    controller.set_max_increment(10_000).await.unwrap();

    controller.move_absolute(5_000).await.unwrap();
    assert!(controller.get_is_moving().await.unwrap());

    tokio::time::timeout(Duration::from_secs(2), async {
        while controller.get_is_moving().await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("move did not finish in time");

    let position = controller.get_position().await.unwrap();
    assert_eq!(position, 5_000);
}

#[tokio::test]
async fn halt_stops_a_move_in_progress() {
    let (controller, _dir) = new_controller(64_000);
    controller.connect().await.unwrap();
    controller.set_max_increment(60_000).await.unwrap();

    controller.move_absolute(50_000).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    controller.halt().await.unwrap();

    assert!(!controller.get_is_moving().await.unwrap());
}

#[tokio::test]
async fn backlash_round_trips_through_hardware() {
    let (controller, _dir) = new_controller(64_000);
    controller.connect().await.unwrap();

    controller.set_backlash(-120).await.unwrap();
    let read_back = controller.get_backlash().await.unwrap();
    assert_eq!(read_back, -120);
}

#[tokio::test]
async fn disconnect_refuses_while_moving() {
    let (controller, _dir) = new_controller(64_000);
    controller.connect().await.unwrap();
    controller.set_max_increment(60_000).await.unwrap();

    controller.move_absolute(50_000).await.unwrap();
    let result = controller.disconnect().await;
    assert!(result.is_err());

    controller.halt().await.unwrap();
    controller.disconnect().await.unwrap();
}

#[tokio::test]
async fn move_outside_max_increment_is_rejected() {
    let (controller, _dir) = new_controller(64_000);
    controller.connect().await.unwrap();
    controller.set_max_increment(100).await.unwrap();

    let result = controller.move_absolute(5_000).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn set_zero_shifts_reported_position() {
    let (controller, _dir) = new_controller(64_000);
    controller.connect().await.unwrap();
    controller.set_max_increment(10_000).await.unwrap();

    controller.move_absolute(5_000).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while controller.get_is_moving().await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    controller.set_zero(0).await.unwrap();
    let position = controller.get_position().await.unwrap();
    assert_eq!(position, 0);
}
