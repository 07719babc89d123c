//! Fleet events
//!
//! Payloads published on the per-entity channels. Every payload names the
//! entity it originated from, the time it happened and the tracking id of the
//! request that caused it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::{EntityRef, EventTrackingId};
use crate::domain::reservation::{CancellationReason, Reservation};
use crate::domain::session::{ChargeDetailRecord, ChargingSession};
use crate::domain::status::{AdminStatusKind, StatusKind, Timestamped};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Reserve,
    CancelReservation,
    RemoteStart,
    RemoteStop,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reserve => "reserve",
            Self::CancelReservation => "cancel_reservation",
            Self::RemoteStart => "remote_start",
            Self::RemoteStop => "remote_stop",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangedEvent {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub entity: EntityRef,
    /// Dotted property path, e.g. `custom_data.tariff`
    pub property: String,
    pub old: Option<serde_json::Value>,
    pub new: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangedEvent<S> {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub entity: EntityRef,
    pub old: Timestamped<S>,
    pub new: Timestamped<S>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReservationEvent {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub entity: EntityRef,
    pub reservation: Reservation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationCancelledEvent {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub entity: EntityRef,
    pub reservation: Reservation,
    pub reason: CancellationReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSessionEvent {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub entity: EntityRef,
    pub session: ChargingSession,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChargeDetailRecordEvent {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub entity: EntityRef,
    pub record: ChargeDetailRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequestedEvent {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    /// Entity the command was issued to
    pub entity: EntityRef,
    pub command: CommandKind,
    /// Location, reservation or session the command addresses
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCompletedEvent {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    pub entity: EntityRef,
    pub command: CommandKind,
    pub target: String,
    pub outcome: String,
    pub runtime: Duration,
}

/// Any fleet event, for consumers that want a single stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FleetEvent {
    DataChanged(DataChangedEvent),
    StatusChanged(StatusChangedEvent<StatusKind>),
    AdminStatusChanged(StatusChangedEvent<AdminStatusKind>),
    NewReservation(NewReservationEvent),
    ReservationCancelled(ReservationCancelledEvent),
    NewSession(NewSessionEvent),
    NewChargeDetailRecord(NewChargeDetailRecordEvent),
    CommandRequested(CommandRequestedEvent),
    CommandCompleted(CommandCompletedEvent),
}

impl FleetEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            FleetEvent::DataChanged(_) => "data_changed",
            FleetEvent::StatusChanged(_) => "status_changed",
            FleetEvent::AdminStatusChanged(_) => "admin_status_changed",
            FleetEvent::NewReservation(_) => "new_reservation",
            FleetEvent::ReservationCancelled(_) => "reservation_cancelled",
            FleetEvent::NewSession(_) => "new_session",
            FleetEvent::NewChargeDetailRecord(_) => "new_charge_detail_record",
            FleetEvent::CommandRequested(_) => "command_requested",
            FleetEvent::CommandCompleted(_) => "command_completed",
        }
    }

    pub fn entity(&self) -> &EntityRef {
        match self {
            FleetEvent::DataChanged(e) => &e.entity,
            FleetEvent::StatusChanged(e) => &e.entity,
            FleetEvent::AdminStatusChanged(e) => &e.entity,
            FleetEvent::NewReservation(e) => &e.entity,
            FleetEvent::ReservationCancelled(e) => &e.entity,
            FleetEvent::NewSession(e) => &e.entity,
            FleetEvent::NewChargeDetailRecord(e) => &e.entity,
            FleetEvent::CommandRequested(e) => &e.entity,
            FleetEvent::CommandCompleted(e) => &e.entity,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            FleetEvent::DataChanged(e) => e.timestamp,
            FleetEvent::StatusChanged(e) => e.timestamp,
            FleetEvent::AdminStatusChanged(e) => e.timestamp,
            FleetEvent::NewReservation(e) => e.timestamp,
            FleetEvent::ReservationCancelled(e) => e.timestamp,
            FleetEvent::NewSession(e) => e.timestamp,
            FleetEvent::NewChargeDetailRecord(e) => e.timestamp,
            FleetEvent::CommandRequested(e) => e.timestamp,
            FleetEvent::CommandCompleted(e) => e.timestamp,
        }
    }
}

/// Wrapper for sending events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: FleetEvent,
}

impl EventMessage {
    pub fn new(event: FleetEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            received_at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fleet_event_serializes_with_type_tag() {
        let event = FleetEvent::CommandRequested(CommandRequestedEvent {
            timestamp: Utc::now(),
            event_tracking_id: EventTrackingId::generate(),
            entity: EntityRef::Station("DE*GEF*S1".parse().unwrap()),
            command: CommandKind::RemoteStart,
            target: "DE*GEF*E1*1".into(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CommandRequested");
        assert_eq!(json["data"]["command"], "remote_start");
        assert_eq!(event.event_type(), "command_requested");
    }
}
