//! Lifecycle event channel

mod bus;
mod types;

pub use bus::{next_event, EventBus};
pub use types::*;
