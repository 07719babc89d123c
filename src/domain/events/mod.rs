//! Domain events
//!
//! Event payloads that describe what happened in the fleet. The channels that
//! carry them live in `application::events`.

pub mod types;

pub use types::{
    CommandCompletedEvent, CommandKind, CommandRequestedEvent, DataChangedEvent, EventMessage,
    FleetEvent, NewChargeDetailRecordEvent, NewReservationEvent, NewSessionEvent,
    ReservationCancelledEvent, StatusChangedEvent,
};
