//! Charging session domain entity

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::ids::{
    AuthToken, ChargingProductId, EntityRef, OperatorId, PoolId, ProviderId, ReservationId,
    SessionId, StationId, SupplyPointId,
};
use crate::domain::reservation::Reservation;

/// One active or completed charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingSession {
    pub id: SessionId,
    /// Entity that created or accepted the session, bound lazily
    pub owner: Option<EntityRef>,
    pub supply_point_id: Option<SupplyPointId>,
    pub station_id: Option<StationId>,
    pub pool_id: Option<PoolId>,
    pub operator_id: Option<OperatorId>,
    /// Reservation consumed by this session
    pub reservation: Option<Reservation>,
    pub provider_id: Option<ProviderId>,
    pub account: Option<String>,
    pub product: Option<ChargingProductId>,
    pub auth_token: Option<AuthToken>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Meter reading at start (kWh)
    pub meter_start_kwh: Decimal,
    /// Last meter reading (kWh)
    pub meter_last_kwh: Decimal,
}

impl ChargingSession {
    pub fn new(id: SessionId, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner: None,
            supply_point_id: None,
            station_id: None,
            pool_id: None,
            operator_id: None,
            reservation: None,
            provider_id: None,
            account: None,
            product: None,
            auth_token: None,
            started_at,
            stopped_at: None,
            meter_start_kwh: Decimal::ZERO,
            meter_last_kwh: Decimal::ZERO,
        }
    }

    /// Binds `owner` unless the session already carries one.
    pub fn bind_owner_if_unset(&mut self, owner: EntityRef) {
        if self.owner.is_none() {
            self.owner = Some(owner);
        }
    }

    pub fn is_active(&self) -> bool {
        self.stopped_at.is_none()
    }

    /// Record a cumulative meter reading. Readings below the last one are
    /// ignored.
    pub fn record_meter_value(&mut self, meter_kwh: Decimal) {
        if meter_kwh >= self.meter_last_kwh {
            self.meter_last_kwh = meter_kwh;
        }
    }

    pub fn energy_kwh(&self) -> Decimal {
        (self.meter_last_kwh - self.meter_start_kwh).max(Decimal::ZERO)
    }

    /// Close the session and produce its charge detail record.
    pub fn stop(&mut self, stopped_at: DateTime<Utc>) -> ChargeDetailRecord {
        self.stopped_at = Some(stopped_at);
        ChargeDetailRecord::from_session(self)
    }
}

/// Billing-relevant summary of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeDetailRecord {
    pub session_id: SessionId,
    pub supply_point_id: Option<SupplyPointId>,
    pub station_id: Option<StationId>,
    pub operator_id: Option<OperatorId>,
    pub provider_id: Option<ProviderId>,
    pub account: Option<String>,
    pub product: Option<ChargingProductId>,
    pub reservation_id: Option<ReservationId>,
    pub auth_token: Option<AuthToken>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub energy_kwh: Decimal,
}

impl ChargeDetailRecord {
    pub fn from_session(session: &ChargingSession) -> Self {
        Self {
            session_id: session.id.clone(),
            supply_point_id: session.supply_point_id.clone(),
            station_id: session.station_id.clone(),
            operator_id: session.operator_id.clone(),
            provider_id: session.provider_id.clone(),
            account: session.account.clone(),
            product: session.product.clone(),
            reservation_id: session.reservation.as_ref().map(|r| r.id.clone()),
            auth_token: session.auth_token.clone(),
            started_at: session.started_at,
            stopped_at: session.stopped_at.unwrap_or(session.started_at),
            energy_kwh: session.energy_kwh(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.stopped_at - self.started_at
    }
}
