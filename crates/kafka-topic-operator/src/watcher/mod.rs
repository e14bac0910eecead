//! Change watchers
//!
//! Each watcher owns its view of one side and turns observed changes into
//! [`Trigger`](crate::controller::Trigger)s sent over the controller's
//! channel. No state is shared with the controller.

mod kafka;
mod resource;

pub use kafka::{KafkaTopicWatcher, KafkaView};
pub use resource::{ResourceView, ResourceWatcher};
