//! Step definitions for movement_control.feature

use std::time::Duration;

use crate::world::RobofocusWorld;
use cucumber::{given, then, when};

#[given(expr = "a connected focuser with max increment {int}")]
async fn connected_focuser_with_max_increment(world: &mut RobofocusWorld, max_increment: u32) {
    world.build_with_max_travel(64_000);
    world.controller().connect().await.unwrap();
    world
        .controller()
        .set_max_increment(max_increment)
        .await
        .unwrap();
}

#[when(expr = "I move the focuser to position {int}")]
async fn move_focuser(world: &mut RobofocusWorld, position: i32) {
    world.controller().move_absolute(position).await.unwrap();
}

#[when(expr = "I try to move the focuser to position {int}")]
async fn try_move_focuser(world: &mut RobofocusWorld, position: i32) {
    match world.controller().move_absolute(position).await {
        Ok(()) => world.last_error = None,
        Err(e) => world.last_error = Some(e.to_string()),
    }
}

#[when("I halt the focuser after a short delay")]
async fn halt_after_short_delay(world: &mut RobofocusWorld) {
    tokio::time::sleep(Duration::from_millis(20)).await;
    world.controller().halt().await.unwrap();
}

#[when("I wait for the focuser to stop moving")]
async fn wait_for_stop(world: &mut RobofocusWorld) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while world.controller().get_is_moving().await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("move did not finish in time");
}

#[then(expr = "the reported position should be {int}")]
async fn reported_position(world: &mut RobofocusWorld, expected: i32) {
    let position = world.controller().get_position().await.unwrap();
    assert_eq!(position, expected);
}

#[then("the focuser should not be moving")]
async fn not_moving(world: &mut RobofocusWorld) {
    assert!(!world.controller().get_is_moving().await.unwrap());
}

#[then("the move should be rejected")]
fn move_rejected(world: &mut RobofocusWorld) {
    assert!(world.last_error.is_some(), "expected move to be rejected");
}
