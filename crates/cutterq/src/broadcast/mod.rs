//! Real-time event streaming for queue observers.

pub mod queue_events;

pub use queue_events::{QueueEvent, QueueEventBroadcaster};
