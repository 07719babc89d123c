//! Reservation domain entity

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::{
    AuthToken, ChargingProductId, PoolId, ProviderId, ReservationId, StationId, SupplyPointId,
};

/// Scope a reservation was requested for. The reservation is always held by
/// one supply point; a wider level lets any supply point of the scope
/// consume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationLevel {
    SupplyPoint,
    Station,
    Pool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Held by a supply point
    Active,
    /// Used to start a charging session
    Consumed,
    Cancelled,
    /// `start_time + duration` elapsed
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Consumed => "consumed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    UserRequested,
    Expired,
    /// Replaced by a newer reservation
    Superseded,
    OperatorRequested,
    /// Holder was removed from the fleet
    Deleted,
    Aborted,
}

/// Time-bounded lock on the right to start a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub level: ReservationLevel,
    /// Supply point holding the reservation
    pub supply_point_id: SupplyPointId,
    pub station_id: StationId,
    pub pool_id: Option<PoolId>,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub auth_tokens: Vec<AuthToken>,
    pub accounts: Vec<String>,
    pub pins: Vec<String>,
    pub provider_id: Option<ProviderId>,
    pub account: Option<String>,
    pub product: Option<ChargingProductId>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        id: ReservationId,
        level: ReservationLevel,
        supply_point_id: SupplyPointId,
        station_id: StationId,
        start_time: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            id,
            level,
            supply_point_id,
            station_id,
            pool_id: None,
            start_time,
            duration,
            auth_tokens: Vec::new(),
            accounts: Vec::new(),
            pins: Vec::new(),
            provider_id: None,
            account: None,
            product: None,
            status: ReservationStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|d| self.start_time.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Natural expiry: the reservation window has fully elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Expired || now >= self.end_time()
    }

    pub fn cancel(&mut self) {
        self.status = ReservationStatus::Cancelled;
    }

    pub fn expire(&mut self) {
        self.status = ReservationStatus::Expired;
    }

    /// Mark as used by a charging session
    pub fn consume(&mut self) {
        self.status = ReservationStatus::Consumed;
    }

    /// Re-open a consumed reservation for `duration` starting at `now`.
    pub fn reinstate(&mut self, now: DateTime<Utc>, duration: Duration) {
        self.status = ReservationStatus::Active;
        self.start_time = now;
        self.duration = duration;
    }

    /// Whether a session at `supply_point_id` of `station_id`/`pool_id` may
    /// consume this reservation.
    pub fn covers(
        &self,
        supply_point_id: &SupplyPointId,
        station_id: &StationId,
        pool_id: &PoolId,
    ) -> bool {
        match self.level {
            ReservationLevel::SupplyPoint => &self.supply_point_id == supply_point_id,
            ReservationLevel::Station => &self.station_id == station_id,
            ReservationLevel::Pool => self.pool_id.as_ref() == Some(pool_id),
        }
    }

    pub fn is_authorized(&self, token: &AuthToken) -> bool {
        self.auth_tokens.is_empty() || self.auth_tokens.contains(token)
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reservation(start: DateTime<Utc>, minutes: u64) -> Reservation {
        Reservation::new(
            ReservationId::new("R-1").unwrap(),
            ReservationLevel::SupplyPoint,
            "DE*GEF*E1*1".parse().unwrap(),
            "DE*GEF*S1".parse().unwrap(),
            start,
            Duration::from_secs(minutes * 60),
        )
    }

    #[test]
    fn new_reservation_is_active() {
        let r = sample_reservation(Utc::now(), 30);
        assert!(r.is_active());
        assert!(!r.is_expired_at(Utc::now()));
        assert_eq!(r.status, ReservationStatus::Active);
    }

    #[test]
    fn expires_at_end_of_window() {
        let start = Utc::now();
        let r = sample_reservation(start, 10);
        assert_eq!(r.end_time(), start + chrono::Duration::minutes(10));
        assert!(!r.is_expired_at(start + chrono::Duration::minutes(9)));
        assert!(r.is_expired_at(start + chrono::Duration::minutes(10)));
    }

    #[test]
    fn transitions_leave_active() {
        let mut r = sample_reservation(Utc::now(), 30);
        r.consume();
        assert_eq!(r.status, ReservationStatus::Consumed);
        assert!(!r.is_active());

        let mut r = sample_reservation(Utc::now(), 30);
        r.cancel();
        assert_eq!(r.status, ReservationStatus::Cancelled);

        let mut r = sample_reservation(Utc::now(), 30);
        r.expire();
        assert!(r.is_expired_at(Utc::now() - chrono::Duration::hours(1)));
    }

    #[test]
    fn huge_duration_saturates_end_time() {
        let mut r = sample_reservation(Utc::now(), 1);
        r.duration = Duration::MAX;
        assert_eq!(r.end_time(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn wider_levels_cover_siblings() {
        let mut r = sample_reservation(Utc::now(), 30);
        let sibling: SupplyPointId = "DE*GEF*E1*2".parse().unwrap();
        let station: StationId = "DE*GEF*S1".parse().unwrap();
        let other_station: StationId = "DE*GEF*S2".parse().unwrap();
        let pool: PoolId = "DE*GEF*P1".parse().unwrap();
        r.pool_id = Some(pool.clone());

        assert!(!r.covers(&sibling, &station, &pool));
        r.level = ReservationLevel::Station;
        assert!(r.covers(&sibling, &station, &pool));
        assert!(!r.covers(&sibling, &other_station, &pool));
        r.level = ReservationLevel::Pool;
        assert!(r.covers(&sibling, &other_station, &pool));
    }

    #[test]
    fn reinstate_reopens_window() {
        let start = Utc::now() - chrono::Duration::hours(2);
        let mut r = sample_reservation(start, 30);
        r.consume();
        let now = Utc::now();
        r.reinstate(now, Duration::from_secs(600));
        assert!(r.is_active());
        assert_eq!(r.end_time(), now + chrono::Duration::minutes(10));
    }

    #[test]
    fn token_restriction() {
        let mut r = sample_reservation(Utc::now(), 30);
        let token = AuthToken::new("TAG-001").unwrap();
        assert!(r.is_authorized(&token));
        r.auth_tokens.push(AuthToken::new("TAG-002").unwrap());
        assert!(!r.is_authorized(&token));
    }
}
