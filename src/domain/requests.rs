//! Command requests accepted by the hierarchy and forwarded to back-ends.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::ids::{
    AuthToken, ChargingProductId, EntityRef, EventTrackingId, OperatorId, PoolId, ProviderId,
    ReservationId, SessionId, StationId, SupplyPointId,
};
use crate::domain::reservation::{CancellationReason, ReservationLevel};
use crate::domain::status::Timestamped;

/// Per-call metadata: when, correlation id, and the limits of the remote leg.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub timestamp: DateTime<Utc>,
    pub event_tracking_id: EventTrackingId,
    /// Applies to the remote leg only
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl CallContext {
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            event_tracking_id: EventTrackingId::generate(),
            timeout: None,
            cancellation: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_event_tracking_id(mut self, id: EventTrackingId) -> Self {
        self.event_tracking_id = id;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::now()
    }
}

/// What a reservation is requested for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", content = "id", rename_all = "snake_case")]
pub enum ReservationLocation {
    SupplyPoint(SupplyPointId),
    Station(StationId),
    Pool(PoolId),
}

impl ReservationLocation {
    pub fn level(&self) -> ReservationLevel {
        match self {
            ReservationLocation::SupplyPoint(_) => ReservationLevel::SupplyPoint,
            ReservationLocation::Station(_) => ReservationLevel::Station,
            ReservationLocation::Pool(_) => ReservationLevel::Pool,
        }
    }

    pub fn operator_id(&self) -> OperatorId {
        match self {
            ReservationLocation::SupplyPoint(id) => id.operator_id(),
            ReservationLocation::Station(id) => id.operator_id(),
            ReservationLocation::Pool(id) => id.operator_id(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        match self {
            ReservationLocation::SupplyPoint(id) => EntityRef::SupplyPoint(id.clone()),
            ReservationLocation::Station(id) => EntityRef::Station(id.clone()),
            ReservationLocation::Pool(id) => EntityRef::Pool(id.clone()),
        }
    }
}

impl std::fmt::Display for ReservationLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.entity_ref())
    }
}

#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub location: ReservationLocation,
    /// Defaults to the call timestamp
    pub start_time: Option<DateTime<Utc>>,
    pub duration: Duration,
    /// Carry the id of an existing reservation to update it
    pub reservation_id: Option<ReservationId>,
    pub provider_id: Option<ProviderId>,
    pub account: Option<String>,
    pub product: Option<ChargingProductId>,
    pub auth_tokens: Vec<AuthToken>,
    pub accounts: Vec<String>,
    pub pins: Vec<String>,
    pub context: CallContext,
}

impl ReserveRequest {
    pub fn new(location: ReservationLocation, duration: Duration) -> Self {
        Self {
            location,
            start_time: None,
            duration,
            reservation_id: None,
            provider_id: None,
            account: None,
            product: None,
            auth_tokens: Vec::new(),
            accounts: Vec::new(),
            pins: Vec::new(),
            context: CallContext::now(),
        }
    }

    pub fn with_reservation_id(mut self, id: ReservationId) -> Self {
        self.reservation_id = Some(id);
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_provider(mut self, provider_id: ProviderId) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    pub fn with_auth_token(mut self, token: AuthToken) -> Self {
        self.auth_tokens.push(token);
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time.unwrap_or(self.context.timestamp)
    }
}

#[derive(Debug, Clone)]
pub struct CancelReservationRequest {
    pub reservation_id: ReservationId,
    pub reason: CancellationReason,
    pub context: CallContext,
}

impl CancelReservationRequest {
    pub fn new(reservation_id: ReservationId, reason: CancellationReason) -> Self {
        Self {
            reservation_id,
            reason,
            context: CallContext::now(),
        }
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RemoteStartRequest {
    pub supply_point_id: SupplyPointId,
    pub product: Option<ChargingProductId>,
    pub reservation_id: Option<ReservationId>,
    /// Session id proposed by the caller
    pub session_id: Option<SessionId>,
    pub provider_id: Option<ProviderId>,
    pub account: Option<String>,
    pub auth_token: Option<AuthToken>,
    pub context: CallContext,
}

impl RemoteStartRequest {
    pub fn new(supply_point_id: SupplyPointId) -> Self {
        Self {
            supply_point_id,
            product: None,
            reservation_id: None,
            session_id: None,
            provider_id: None,
            account: None,
            auth_token: None,
            context: CallContext::now(),
        }
    }

    pub fn with_reservation_id(mut self, id: ReservationId) -> Self {
        self.reservation_id = Some(id);
        self
    }

    pub fn with_session_id(mut self, id: SessionId) -> Self {
        self.session_id = Some(id);
        self
    }

    pub fn with_provider(mut self, provider_id: ProviderId) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_auth_token(mut self, token: AuthToken) -> Self {
        self.auth_token = Some(token);
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

/// What happens to a consumed reservation when its session stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReservationHandling {
    #[default]
    Close,
    /// Re-instate the reservation on the supply point for this long
    KeepAlive(Duration),
}

#[derive(Debug, Clone)]
pub struct RemoteStopRequest {
    pub session_id: SessionId,
    pub reservation_handling: ReservationHandling,
    pub provider_id: Option<ProviderId>,
    pub account: Option<String>,
    pub context: CallContext,
}

impl RemoteStopRequest {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            reservation_handling: ReservationHandling::Close,
            provider_id: None,
            account: None,
            context: CallContext::now(),
        }
    }

    pub fn with_reservation_handling(mut self, handling: ReservationHandling) -> Self {
        self.reservation_handling = handling;
        self
    }

    pub fn with_provider(mut self, provider_id: ProviderId) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizeStartRequest {
    pub auth_token: AuthToken,
    pub operator_id: Option<OperatorId>,
    pub supply_point_id: Option<SupplyPointId>,
    pub product: Option<ChargingProductId>,
    pub session_id: Option<SessionId>,
    pub context: CallContext,
}

impl AuthorizeStartRequest {
    pub fn new(auth_token: AuthToken) -> Self {
        Self {
            auth_token,
            operator_id: None,
            supply_point_id: None,
            product: None,
            session_id: None,
            context: CallContext::now(),
        }
    }

    pub fn at_supply_point(mut self, supply_point_id: SupplyPointId) -> Self {
        self.operator_id = Some(supply_point_id.operator_id());
        self.supply_point_id = Some(supply_point_id);
        self
    }

    pub fn with_session_id(mut self, id: SessionId) -> Self {
        self.session_id = Some(id);
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizeStopRequest {
    pub session_id: SessionId,
    pub auth_token: AuthToken,
    pub operator_id: Option<OperatorId>,
    pub supply_point_id: Option<SupplyPointId>,
    pub context: CallContext,
}

impl AuthorizeStopRequest {
    pub fn new(session_id: SessionId, auth_token: AuthToken) -> Self {
        Self {
            session_id,
            auth_token,
            operator_id: None,
            supply_point_id: None,
            context: CallContext::now(),
        }
    }
}

/// How pushed status updates reach a back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionMode {
    /// Each update is pushed as soon as it happens
    #[default]
    Direct,
    /// Updates are batched and flushed periodically
    Enqueue,
}

/// One status transition to push to a back-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate<S> {
    pub entity: EntityRef,
    pub old: Timestamped<S>,
    pub new: Timestamped<S>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_location_reports_level_and_operator() {
        let loc = ReservationLocation::Station("DE*GEF*S1".parse().unwrap());
        assert_eq!(loc.level(), ReservationLevel::Station);
        assert_eq!(loc.operator_id().as_str(), "DE*GEF");
    }

    #[test]
    fn reserve_start_time_defaults_to_call_timestamp() {
        let ctx = CallContext::at(Utc::now() - chrono::Duration::minutes(5));
        let ts = ctx.timestamp;
        let req = ReserveRequest::new(
            ReservationLocation::SupplyPoint("DE*GEF*E1*1".parse().unwrap()),
            Duration::from_secs(600),
        )
        .with_context(ctx);
        assert_eq!(req.start_time(), ts);
    }

    #[test]
    fn cancellation_is_observable_from_context() {
        let token = CancellationToken::new();
        let ctx = CallContext::now().with_cancellation(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
