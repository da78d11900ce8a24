//! Step definitions for checksum-retry resilience.

use crate::world::RobofocusWorld;
use cucumber::{given, then, when};

#[given("a connected focuser with a corrupted next reply")]
async fn connected_focuser_corrupted_reply(world: &mut RobofocusWorld) {
    world.build_with_max_travel(64_000);
    world.controller().connect().await.unwrap();
    world.simulator().inject_checksum_error().await;
}

#[when("I read the backlash")]
async fn read_backlash(world: &mut RobofocusWorld) {
    match world.controller().get_backlash().await {
        Ok(_) => world.last_error = None,
        Err(e) => world.last_error = Some(e.to_string()),
    }
}

#[then("the read should still succeed after a retry")]
fn read_succeeded(world: &mut RobofocusWorld) {
    assert!(
        world.last_error.is_none(),
        "expected the retried read to succeed, got: {:?}",
        world.last_error
    );
}
