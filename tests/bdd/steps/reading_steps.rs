//! Step definitions for backlash.feature and other read/write properties.

use crate::world::RobofocusWorld;
use cucumber::{given, then, when};

#[given("a connected focuser")]
async fn connected_focuser(world: &mut RobofocusWorld) {
    world.build_with_max_travel(64_000);
    world.controller().connect().await.unwrap();
}

#[when(expr = "I set the backlash to {int}")]
async fn set_backlash(world: &mut RobofocusWorld, value: i64) {
    world
        .controller()
        .set_backlash(value as i16)
        .await
        .unwrap();
}

#[when(expr = "I set the zero point to {int}")]
async fn set_zero(world: &mut RobofocusWorld, value: i64) {
    world.controller().set_zero(value as i32).await.unwrap();
}

#[then(expr = "the reported backlash should be {int}")]
async fn reported_backlash(world: &mut RobofocusWorld, expected: i64) {
    let value = world.controller().get_backlash().await.unwrap();
    assert_eq!(value as i64, expected);
}

#[then("the reported temperature should be known")]
async fn temperature_known(world: &mut RobofocusWorld) {
    world.controller().get_temperature().await.unwrap();
}

#[then(expr = "the reported max step should be {int}")]
async fn reported_max_step(world: &mut RobofocusWorld, expected: i64) {
    let value = world.controller().get_max().await.unwrap();
    assert_eq!(value as i64, expected);
}
