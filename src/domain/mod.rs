//! Domain layer
//!
//! Pure fleet types: identifiers, status schedules, reservations, sessions,
//! command requests and results, events and back-end ports. Nothing in here
//! performs I/O.

pub mod custom_data;
pub mod events;
pub mod ids;
pub mod ports;
pub mod requests;
pub mod reservation;
pub mod results;
pub mod session;
pub mod status;

pub use custom_data::CustomData;
pub use ids::{
    AuthToken, BackendId, ChargingProductId, EntityId, EntityRef, EventTrackingId, NetworkId,
    OperatorId, PoolId, ProviderId, ReservationId, SessionId, StationId, SupplyPointId,
};
pub use requests::{
    AuthorizeStartRequest, AuthorizeStopRequest, CallContext, CancelReservationRequest,
    RemoteStartRequest, RemoteStopRequest, ReservationHandling, ReservationLocation,
    ReserveRequest, StatusUpdate, TransmissionMode,
};
pub use reservation::{CancellationReason, Reservation, ReservationLevel, ReservationStatus};
pub use results::{
    AuthStartResult, AuthStartResultKind, AuthStopResult, AuthStopResultKind,
    CancelReservationResult, CancelReservationResultKind, CommandOutcome, PushResult,
    PushResultKind, RemoteStartResult, RemoteStartResultKind, RemoteStopResult,
    RemoteStopResultKind, ReservationResult, ReservationResultKind, SendCdrResult,
    SendCdrResultKind,
};
pub use session::{ChargeDetailRecord, ChargingSession};
pub use status::{AdminStatusKind, StatusKind, Timestamped};

pub use crate::shared::errors::{DomainError, DomainResult};
