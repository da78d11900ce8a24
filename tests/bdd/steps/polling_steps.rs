//! Step definitions for async character handling during an in-flight move.

use std::time::Duration;

use crate::world::RobofocusWorld;
use cucumber::{given, then, when};

#[given(expr = "a connected focuser with max increment {int} and slow movement")]
async fn connected_focuser_slow_movement(world: &mut RobofocusWorld, max_increment: u32) {
    world.build_with_max_travel(64_000);
    world.controller().connect().await.unwrap();
    world
        .controller()
        .set_max_increment(max_increment)
        .await
        .unwrap();
}

#[when(expr = "I move the focuser to position {int} and sample is-moving while it travels")]
async fn move_and_sample(world: &mut RobofocusWorld, position: i32) {
    world.controller().move_absolute(position).await.unwrap();
    let mut saw_moving = false;
    for _ in 0..20 {
        if world.controller().get_is_moving().await.unwrap() {
            saw_moving = true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(
        saw_moving,
        "expected at least one sample to observe the focuser moving"
    );
}

#[then(expr = "the focuser eventually reports position {int}")]
async fn eventually_at(world: &mut RobofocusWorld, expected: i32) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if !world.controller().get_is_moving().await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("move did not finish in time");
    let position = world.controller().get_position().await.unwrap();
    assert_eq!(position, expected);
}
