//! Charging pool: a site grouping stations of one operator.

use std::ops::Deref;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::application::events::{EntityEvents, MutationChannels};
use crate::application::registry::{EntityRegistry, Mutation};
use crate::domain::ids::{
    EntityRef, EventTrackingId, OperatorId, PoolId, ReservationId, SessionId, StationId,
    SupplyPointId,
};
use crate::domain::requests::{
    CancelReservationRequest, RemoteStartRequest, RemoteStopRequest,
    ReservationLocation, ReserveRequest,
};
use crate::domain::reservation::{Reservation, ReservationLevel};
use crate::domain::results::{
    CancelReservationResult, CommandOutcome, RemoteStartResult, RemoteStopResult,
    ReservationResult,
};
use crate::domain::session::ChargingSession;
use crate::domain::status::{StatusAggregation, StatusKind};
use crate::shared::{DomainError, DomainResult};

use super::entity::EntityCore;
use super::scope::{
    discard_reservations, ensure_no_active_session, refuse_reservation, reserve_first_free,
    status_report,
};
use super::settings::FleetSettings;
use super::station::Station;
use super::supply_point::SupplyPoint;

pub struct Pool {
    core: EntityCore<PoolId>,
    settings: Arc<FleetSettings>,
    stations: EntityRegistry<StationId, Station>,
    station_channels: MutationChannels<Pool, Station>,
    supply_point_channels: MutationChannels<Station, SupplyPoint>,
}

impl Deref for Pool {
    type Target = EntityCore<PoolId>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

impl Pool {
    pub(crate) fn new(
        id: PoolId,
        settings: Arc<FleetSettings>,
        timestamp: DateTime<Utc>,
        events: EntityEvents,
        station_channels: MutationChannels<Pool, Station>,
        supply_point_channels: MutationChannels<Station, SupplyPoint>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Pool>| {
            let core = EntityCore::new(id, &settings, timestamp, StatusKind::Unspecified, events);

            let pool = weak.clone();
            core.events().status_changed.subscribe(move |event| {
                if !matches!(event.entity, EntityRef::Station(_)) {
                    return;
                }
                if let Some(pool) = pool.upgrade() {
                    pool.recompute_status(event.timestamp, &event.event_tracking_id);
                }
            });

            Self {
                core,
                settings,
                stations: EntityRegistry::new("station"),
                station_channels,
                supply_point_channels,
            }
        })
    }

    pub fn operator_id(&self) -> OperatorId {
        self.id().operator_id()
    }

    pub fn station_channels(&self) -> &MutationChannels<Pool, Station> {
        &self.station_channels
    }

    pub fn supply_point_channels(&self) -> &MutationChannels<Station, SupplyPoint> {
        &self.supply_point_channels
    }

    // ── Stations ───────────────────────────────────────────────

    pub fn create_station(
        &self,
        id: StationId,
        timestamp: DateTime<Utc>,
    ) -> DomainResult<Mutation<Arc<Station>>> {
        if id.operator_id() != self.operator_id() {
            return Err(DomainError::Validation(format!(
                "station {id} does not belong to operator {}",
                self.operator_id()
            )));
        }

        let station = Station::new(
            id.clone(),
            self.id().clone(),
            Arc::clone(&self.settings),
            timestamp,
            EntityEvents::chained_to(self.events()),
            MutationChannels::chained_to("supply_points", &self.supply_point_channels),
        );

        let result = self
            .stations
            .add(timestamp, self, id, station, &self.station_channels.addition)?;

        if let Mutation::Applied(station) = &result {
            info!(pool_id = %self.id(), station_id = %station.id(), "Station created");
            self.recompute_status(timestamp, &EventTrackingId::generate());
        }
        Ok(result)
    }

    /// Remove a station together with its supply points. Refused with
    /// `Conflict` while one of them is charging. Their active reservations
    /// are cancelled with reason `Deleted`.
    pub fn remove_station(
        &self,
        id: &StationId,
        timestamp: DateTime<Utc>,
    ) -> DomainResult<Mutation<Arc<Station>>> {
        if let Some(station) = self.stations.get(id) {
            ensure_no_active_session(&station.supply_points(), station.entity_ref())?;
        }

        let result = self
            .stations
            .remove(timestamp, self, id, &self.station_channels.removal)?;

        if let Mutation::Applied(station) = &result {
            discard_reservations(&station.supply_points(), timestamp);
            station.events().detach();
            info!(pool_id = %self.id(), station_id = %id, "Station removed");
            self.recompute_status(timestamp, &EventTrackingId::generate());
        }
        Ok(result)
    }

    pub fn station(&self, id: &StationId) -> Option<Arc<Station>> {
        self.stations.get(id)
    }

    pub fn stations(&self) -> Vec<Arc<Station>> {
        self.stations.values()
    }

    pub fn station_ids(&self) -> Vec<StationId> {
        self.stations.ids()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn supply_points(&self) -> Vec<Arc<SupplyPoint>> {
        self.stations
            .values()
            .iter()
            .flat_map(|station| station.supply_points())
            .collect()
    }

    pub fn find_supply_point(&self, id: &SupplyPointId) -> Option<Arc<SupplyPoint>> {
        self.stations
            .values()
            .iter()
            .find_map(|station| station.find_supply_point(id))
    }

    // ── Status roll-up ─────────────────────────────────────────

    pub fn set_status_aggregation(&self, delegate: Option<StatusAggregation>) {
        self.replace_status_aggregation(delegate);
        self.recompute_status(Utc::now(), &EventTrackingId::generate());
    }

    pub(crate) fn recompute_status(&self, timestamp: DateTime<Utc>, tracking: &EventTrackingId) {
        let report = status_report(&self.stations.values());
        self.aggregate(timestamp, &report, tracking);
    }

    // ── Lookups ────────────────────────────────────────────────

    pub(crate) fn find_reservation_holder(&self, id: &ReservationId) -> Option<Arc<SupplyPoint>> {
        self.stations
            .values()
            .iter()
            .find_map(|station| station.find_reservation_holder(id))
    }

    pub(crate) fn find_session_holder(&self, id: &SessionId) -> Option<Arc<SupplyPoint>> {
        self.stations
            .values()
            .iter()
            .find_map(|station| station.find_session_holder(id))
    }

    pub fn find_reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.find_reservation_holder(id)
            .and_then(|sp| sp.reservation())
    }

    pub fn find_session(&self, id: &SessionId) -> Option<ChargingSession> {
        self.find_session_holder(id).and_then(|sp| sp.session())
    }

    pub fn expire_reservations(&self, now: DateTime<Utc>) -> Vec<Reservation> {
        self.stations
            .values()
            .iter()
            .flat_map(|station| station.expire_reservations(now))
            .collect()
    }

    fn station_of_supply_point(&self, id: &SupplyPointId) -> Option<Arc<Station>> {
        self.stations
            .values()
            .into_iter()
            .find(|station| station.find_supply_point(id).is_some())
    }

    fn station_of_reservation(&self, id: &ReservationId) -> Option<Arc<Station>> {
        self.stations
            .values()
            .into_iter()
            .find(|station| station.find_reservation_holder(id).is_some())
    }

    fn station_of_session(&self, id: &SessionId) -> Option<Arc<Station>> {
        self.stations
            .values()
            .into_iter()
            .find(|station| station.find_session_holder(id).is_some())
    }

    // ── Local resolution ───────────────────────────────────────
    //
    // Requests are passed down to the station holding the target, each
    // level refusing with OutOfService when it is not operational.

    /// Pool-level reservation: bound to the first free supply point of any
    /// operational station of the pool.
    pub(crate) fn reserve_here(&self, request: &ReserveRequest) -> ReservationResult {
        let max_duration = self.settings.max_reservation_duration;
        if let Some(refused) = refuse_reservation(request, max_duration, self.is_operational()) {
            return refused;
        }

        let stations = self.stations.values();
        let candidates: Vec<Arc<SupplyPoint>> = stations
            .iter()
            .filter(|station| station.is_operational())
            .flat_map(|station| station.supply_points())
            .collect();
        if candidates.is_empty() && stations.iter().any(|s| s.supply_point_count() > 0) {
            return ReservationResult::out_of_service();
        }

        reserve_first_free(candidates, request, ReservationLevel::Pool, max_duration)
    }

    pub(crate) fn local_reserve(&self, request: &ReserveRequest) -> ReservationResult {
        let station = match &request.location {
            ReservationLocation::SupplyPoint(id) => self.station_of_supply_point(id),
            ReservationLocation::Station(id) => self.station(id),
            ReservationLocation::Pool(id) if id == self.id() => return self.reserve_here(request),
            ReservationLocation::Pool(_) => None,
        };
        let Some(station) = station else {
            return ReservationResult::unresolved();
        };
        refuse_reservation(
            request,
            self.settings.max_reservation_duration,
            self.is_operational(),
        )
        .unwrap_or_else(|| station.local_reserve(request))
    }

    pub(crate) fn local_cancel_reservation(
        &self,
        request: &CancelReservationRequest,
    ) -> CancelReservationResult {
        let Some(station) = self.station_of_reservation(&request.reservation_id) else {
            return CancelReservationResult::unresolved();
        };
        if !self.is_operational() {
            return CancelReservationResult::out_of_service();
        }
        station.local_cancel_reservation(request)
    }

    /// The reservation may be held anywhere in the pool; whether it covers
    /// the target is decided by the reservation's level.
    pub(crate) fn local_remote_start(
        &self,
        request: &RemoteStartRequest,
        owner: EntityRef,
    ) -> RemoteStartResult {
        let Some(station) = self.station_of_supply_point(&request.supply_point_id) else {
            return RemoteStartResult::unresolved();
        };
        let Some(target) = station.find_supply_point(&request.supply_point_id) else {
            return RemoteStartResult::unresolved();
        };
        if !self.is_operational() || !station.is_operational() {
            return RemoteStartResult::out_of_service();
        }
        let holder = request
            .reservation_id
            .as_ref()
            .and_then(|id| self.find_reservation_holder(id));
        target.start_session(request, Some(owner), holder.as_deref())
    }

    pub(crate) fn local_remote_stop(&self, request: &RemoteStopRequest) -> RemoteStopResult {
        let Some(station) = self.station_of_session(&request.session_id) else {
            return RemoteStopResult::unresolved();
        };
        if !self.is_operational() {
            return RemoteStopResult::out_of_service();
        }
        station.local_remote_stop(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reservation::CancellationReason;
    use crate::domain::results::{
        CancelReservationResultKind, RemoteStartResultKind, RemoteStopResultKind,
        ReservationResultKind,
    };
    use crate::domain::status::{worst_of, AdminStatusKind};
    use std::time::Duration;

    fn pool() -> Arc<Pool> {
        Pool::new(
            "DE*GEF*P1".parse().unwrap(),
            Arc::new(FleetSettings::default()),
            Utc::now(),
            EntityEvents::new(),
            MutationChannels::new("stations"),
            MutationChannels::new("supply_points"),
        )
    }

    fn station_with(pool: &Pool, station: &str, supply_point: &str) -> Arc<SupplyPoint> {
        let station = match pool.station(&station.parse().unwrap()) {
            Some(existing) => existing,
            None => pool
                .create_station(station.parse().unwrap(), Utc::now())
                .unwrap()
                .applied()
                .unwrap(),
        };
        station
            .create_supply_point(supply_point.parse().unwrap(), Utc::now())
            .unwrap()
            .applied()
            .unwrap()
    }

    #[test]
    fn worst_of_follows_charging_then_faulted() {
        let pool = pool();
        pool.set_status_aggregation(Some(Arc::new(worst_of)));
        let a = station_with(&pool, "DE*GEF*S1", "DE*GEF*E1*1");
        let b = station_with(&pool, "DE*GEF*S2", "DE*GEF*E2*1");
        for station in pool.stations() {
            station.set_status_aggregation(Some(Arc::new(worst_of)));
        }

        a.set_status(Utc::now(), StatusKind::Charging);
        b.set_status(Utc::now(), StatusKind::Available);
        assert_eq!(pool.status().value, StatusKind::Charging);

        b.set_status(Utc::now(), StatusKind::Faulted);
        assert_eq!(pool.status().value, StatusKind::Faulted);
    }

    #[test]
    fn pool_reservation_may_be_consumed_in_another_station() {
        let pool = pool();
        let first = station_with(&pool, "DE*GEF*S1", "DE*GEF*E1*1");
        let other = station_with(&pool, "DE*GEF*S2", "DE*GEF*E2*1");

        let result = pool.local_reserve(&ReserveRequest::new(
            ReservationLocation::Pool(pool.id().clone()),
            Duration::from_secs(600),
        ));
        assert_eq!(result.kind, ReservationResultKind::Success);
        let reservation = result.reservation.unwrap();
        assert_eq!(reservation.supply_point_id, *first.id());
        assert_eq!(reservation.level, ReservationLevel::Pool);

        let start = RemoteStartRequest::new(other.id().clone())
            .with_reservation_id(reservation.id.clone());
        let started = pool.local_remote_start(&start, pool.entity_ref());
        assert_eq!(started.kind, RemoteStartResultKind::Success);
        assert!(first.reservation().is_none());
    }

    #[test]
    fn station_reservation_stays_within_its_station() {
        let pool = pool();
        let first = station_with(&pool, "DE*GEF*S1", "DE*GEF*E1*1");
        let other = station_with(&pool, "DE*GEF*S2", "DE*GEF*E2*1");

        let reservation = pool
            .local_reserve(&ReserveRequest::new(
                ReservationLocation::Station(first.station_id().clone()),
                Duration::from_secs(600),
            ))
            .reservation
            .unwrap();

        let start = RemoteStartRequest::new(other.id().clone())
            .with_reservation_id(reservation.id.clone());
        let rejected = pool.local_remote_start(&start, pool.entity_ref());
        assert_eq!(rejected.kind, RemoteStartResultKind::InvalidReservationId);
        assert!(first.holds_reservation(&reservation.id));
    }

    #[test]
    fn removing_station_detaches_its_supply_points() {
        let pool = pool();
        let sp = station_with(&pool, "DE*GEF*S1", "DE*GEF*E1*1");
        assert!(pool.find_supply_point(sp.id()).is_some());

        pool.remove_station(sp.station_id(), Utc::now()).unwrap();
        assert!(pool.find_supply_point(sp.id()).is_none());
        assert!(pool
            .remove_station(sp.station_id(), Utc::now())
            .is_err());
    }

    #[test]
    fn out_of_service_station_blocks_commands_through_the_pool() {
        let pool = pool();
        let sp = station_with(&pool, "DE*GEF*S1", "DE*GEF*E1*1");
        let reservation = pool
            .local_reserve(&ReserveRequest::new(
                ReservationLocation::SupplyPoint(sp.id().clone()),
                Duration::from_secs(600),
            ))
            .reservation
            .unwrap();

        let station = pool.station(sp.station_id()).unwrap();
        station.set_admin_status(Utc::now(), AdminStatusKind::OutOfService);

        let start = pool.local_remote_start(&RemoteStartRequest::new(sp.id().clone()), pool.entity_ref());
        assert_eq!(start.kind, RemoteStartResultKind::OutOfService);

        let cancel = pool.local_cancel_reservation(&CancelReservationRequest::new(
            reservation.id.clone(),
            CancellationReason::UserRequested,
        ));
        assert_eq!(cancel.kind, CancelReservationResultKind::OutOfService);
        assert!(sp.holds_reservation(&reservation.id));

        let station_level = pool.local_reserve(&ReserveRequest::new(
            ReservationLocation::Station(station.id().clone()),
            Duration::from_secs(600),
        ));
        assert_eq!(station_level.kind, ReservationResultKind::OutOfService);
    }

    #[test]
    fn pool_reservation_skips_out_of_service_stations() {
        let pool = pool();
        let closed = station_with(&pool, "DE*GEF*S1", "DE*GEF*E1*1");
        let open = station_with(&pool, "DE*GEF*S2", "DE*GEF*E2*1");
        pool.station(closed.station_id())
            .unwrap()
            .set_admin_status(Utc::now(), AdminStatusKind::OutOfService);

        let location = ReservationLocation::Pool(pool.id().clone());
        let result = pool.local_reserve(&ReserveRequest::new(location.clone(), Duration::from_secs(600)));
        assert_eq!(result.reservation.unwrap().supply_point_id, *open.id());

        pool.station(open.station_id())
            .unwrap()
            .set_admin_status(Utc::now(), AdminStatusKind::OutOfService);
        let none_left = pool.reserve_here(&ReserveRequest::new(location, Duration::from_secs(600)));
        assert_eq!(none_left.kind, ReservationResultKind::OutOfService);
    }

    #[test]
    fn out_of_service_pool_reports_overlong_duration_first() {
        let pool = pool();
        station_with(&pool, "DE*GEF*S1", "DE*GEF*E1*1");
        pool.set_admin_status(Utc::now(), AdminStatusKind::OutOfService);

        let too_long = FleetSettings::default().max_reservation_duration + Duration::from_secs(1);
        let location = ReservationLocation::Pool(pool.id().clone());
        let result = pool.reserve_here(&ReserveRequest::new(location.clone(), too_long));
        assert_eq!(result.kind, ReservationResultKind::InvalidDuration);

        let result = pool.reserve_here(&ReserveRequest::new(location, Duration::from_secs(600)));
        assert_eq!(result.kind, ReservationResultKind::OutOfService);
    }

    #[test]
    fn station_with_running_session_cannot_be_removed() {
        let pool = pool();
        let sp = station_with(&pool, "DE*GEF*S1", "DE*GEF*E1*1");
        let session = pool
            .local_remote_start(&RemoteStartRequest::new(sp.id().clone()), pool.entity_ref())
            .session
            .unwrap();

        assert!(matches!(
            pool.remove_station(sp.station_id(), Utc::now()),
            Err(DomainError::Conflict(_))
        ));
        assert!(pool.find_session(&session.id).is_some());

        let stopped = pool.local_remote_stop(&RemoteStopRequest::new(session.id.clone()));
        assert_eq!(stopped.kind, RemoteStopResultKind::Success);
        assert!(pool.remove_station(sp.station_id(), Utc::now()).unwrap().is_applied());
    }
}
