//! Stream subscription state, broadcast fan-out, and idle reaping.

mod manager;
mod reaper;

pub use manager::{ChangeListener, SubscriptionManager};
pub use reaper::spawn_reaper;
