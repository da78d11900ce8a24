#[path = "connection_steps.rs"]
mod connection_steps;
#[path = "movement_steps.rs"]
mod movement_steps;
#[path = "polling_steps.rs"]
mod polling_steps;
#[path = "reading_steps.rs"]
mod reading_steps;
#[path = "resilience_steps.rs"]
mod resilience_steps;
