//! Event plumbing
//!
//! Payload types live in `domain::events`. This module provides the
//! synchronous per-entity channels, the veto-capable voting channels and a
//! broadcast bus for async consumers.

pub mod channel;
pub mod entity_events;
pub mod event_bus;
pub mod voting;

pub use channel::{EventChannel, ListenerId};
pub use entity_events::EntityEvents;
pub use event_bus::{EventBus, EventSubscriber, SharedEventBus};
pub use voting::{MutationChannels, VotingChannel};
