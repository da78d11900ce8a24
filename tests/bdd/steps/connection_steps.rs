//! Step definitions for connection_lifecycle.feature

use crate::world::RobofocusWorld;
use ascom_alpaca::api::Device;
use cucumber::{given, then, when};

#[given(expr = "a focuser wired to the simulator with {int} steps of travel")]
fn focuser_with_travel(world: &mut RobofocusWorld, max_travel: u32) {
    world.build_with_max_travel(max_travel);
}

#[when("I connect the device")]
async fn connect_device(world: &mut RobofocusWorld) {
    world.device().set_connected(true).await.unwrap();
}

#[when("I disconnect the device")]
async fn disconnect_device(world: &mut RobofocusWorld) {
    world.device().set_connected(false).await.unwrap();
}

#[when("I try to disconnect the device")]
async fn try_disconnect_device(world: &mut RobofocusWorld) {
    match world.device().set_connected(false).await {
        Ok(()) => world.last_error = None,
        Err(e) => world.last_error = Some(e.to_string()),
    }
}

#[then("the device should be connected")]
async fn device_connected(world: &mut RobofocusWorld) {
    assert!(world.device().connected().await.unwrap());
}

#[then("the device should be disconnected")]
async fn device_disconnected(world: &mut RobofocusWorld) {
    assert!(!world.device().connected().await.unwrap());
}

#[then("disconnecting should fail")]
fn disconnecting_should_fail(world: &mut RobofocusWorld) {
    assert!(
        world.last_error.is_some(),
        "expected disconnect to be refused"
    );
}

#[then("the cached firmware value should be known")]
async fn firmware_known(world: &mut RobofocusWorld) {
    let state = world.controller().get_cached_state().await;
    assert!(state.firmware_value.is_some());
}

#[then("the cached backlash should be known")]
async fn backlash_known(world: &mut RobofocusWorld) {
    let state = world.controller().get_cached_state().await;
    assert!(state.backlash.is_some());
}

#[then("the cached travel limit should be known")]
async fn raw_max_known(world: &mut RobofocusWorld) {
    let state = world.controller().get_cached_state().await;
    assert!(state.raw_max_travel.is_some());
}
