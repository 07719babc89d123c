//! Charging station
//!
//! Owns its supply points and may have a remote back-end that commands are
//! tried against before they are resolved locally.

use std::ops::Deref;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;

use crate::application::dispatch::remote_then_local;
use crate::application::events::{EntityEvents, MutationChannels};
use crate::application::registry::{EntityRegistry, Mutation};
use crate::domain::events::CommandKind;
use crate::domain::ids::{
    EntityRef, EventTrackingId, OperatorId, PoolId, ReservationId, SessionId, StationId,
    SupplyPointId,
};
use crate::domain::ports::RemoteChargingBackend;
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
use super::supply_point::SupplyPoint;

pub struct Station {
    core: EntityCore<StationId>,
    pool_id: PoolId,
    settings: Arc<FleetSettings>,
    supply_points: EntityRegistry<SupplyPointId, SupplyPoint>,
    supply_point_channels: MutationChannels<Station, SupplyPoint>,
    remote: RwLock<Option<Arc<dyn RemoteChargingBackend>>>,
}

impl Deref for Station {
    type Target = EntityCore<StationId>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

impl Station {
    pub(crate) fn new(
        id: StationId,
        pool_id: PoolId,
        settings: Arc<FleetSettings>,
        timestamp: DateTime<Utc>,
        events: EntityEvents,
        supply_point_channels: MutationChannels<Station, SupplyPoint>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Station>| {
            let core = EntityCore::new(id, &settings, timestamp, StatusKind::Unspecified, events);

            let station = weak.clone();
            core.events().status_changed.subscribe(move |event| {
                if !matches!(event.entity, EntityRef::SupplyPoint(_)) {
                    return;
                }
                if let Some(station) = station.upgrade() {
                    station.recompute_status(event.timestamp, &event.event_tracking_id);
                }
            });

            Self {
                core,
                pool_id,
                settings,
                supply_points: EntityRegistry::new("supply point"),
                supply_point_channels,
                remote: RwLock::new(None),
            }
        })
    }

    pub fn pool_id(&self) -> &PoolId {
        &self.pool_id
    }

    pub fn operator_id(&self) -> OperatorId {
        self.id().operator_id()
    }

    pub fn supply_point_channels(&self) -> &MutationChannels<Station, SupplyPoint> {
        &self.supply_point_channels
    }

    pub fn remote_backend(&self) -> Option<Arc<dyn RemoteChargingBackend>> {
        self.remote.read().clone()
    }

    pub fn set_remote_backend(&self, backend: Option<Arc<dyn RemoteChargingBackend>>) {
        *self.remote.write() = backend;
    }

    // ── Supply points ──────────────────────────────────────────

    pub fn create_supply_point(
        &self,
        id: SupplyPointId,
        timestamp: DateTime<Utc>,
    ) -> DomainResult<Mutation<Arc<SupplyPoint>>> {
        if id.operator_id() != self.operator_id() {
            return Err(DomainError::Validation(format!(
                "supply point {id} does not belong to operator {}",
                self.operator_id()
            )));
        }

        let supply_point = Arc::new(SupplyPoint::new(
            id.clone(),
            self.id().clone(),
            self.pool_id.clone(),
            Arc::clone(&self.settings),
            timestamp,
            EntityEvents::chained_to(self.events()),
        ));

        let result = self.supply_points.add(
            timestamp,
            self,
            id,
            supply_point,
            &self.supply_point_channels.addition,
        )?;

        if let Mutation::Applied(sp) = &result {
            info!(station_id = %self.id(), supply_point_id = %sp.id(), "Supply point created");
            self.recompute_status(timestamp, &EventTrackingId::generate());
        }
        Ok(result)
    }

    /// Remove a supply point. Refused with `Conflict` while it is charging.
    /// Its active reservation is cancelled with reason `Deleted` and its
    /// events stop reaching this station.
    pub fn remove_supply_point(
        &self,
        id: &SupplyPointId,
        timestamp: DateTime<Utc>,
    ) -> DomainResult<Mutation<Arc<SupplyPoint>>> {
        if let Some(sp) = self.supply_points.get(id) {
            ensure_no_active_session(&[Arc::clone(&sp)], sp.entity_ref())?;
        }

        let result = self.supply_points.remove(
            timestamp,
            self,
            id,
            &self.supply_point_channels.removal,
        )?;

        if let Mutation::Applied(sp) = &result {
            discard_reservations(&[Arc::clone(sp)], timestamp);
            sp.events().detach();
            info!(station_id = %self.id(), supply_point_id = %id, "Supply point removed");
            self.recompute_status(timestamp, &EventTrackingId::generate());
        }
        Ok(result)
    }

    pub fn find_supply_point(&self, id: &SupplyPointId) -> Option<Arc<SupplyPoint>> {
        self.supply_points.get(id)
    }

    pub fn supply_points(&self) -> Vec<Arc<SupplyPoint>> {
        self.supply_points.values()
    }

    pub fn supply_point_ids(&self) -> Vec<SupplyPointId> {
        self.supply_points.ids()
    }

    pub fn supply_point_count(&self) -> usize {
        self.supply_points.len()
    }

    // ── Status roll-up ─────────────────────────────────────────

    /// Replace the roll-up delegate (`None` makes the status independent)
    /// and recompute immediately.
    pub fn set_status_aggregation(&self, delegate: Option<StatusAggregation>) {
        self.replace_status_aggregation(delegate);
        self.recompute_status(Utc::now(), &EventTrackingId::generate());
    }

    pub(crate) fn recompute_status(&self, timestamp: DateTime<Utc>, tracking: &EventTrackingId) {
        let report = status_report(&self.supply_points.values());
        self.aggregate(timestamp, &report, tracking);
    }

    // ── Lookups ────────────────────────────────────────────────

    pub(crate) fn find_reservation_holder(&self, id: &ReservationId) -> Option<Arc<SupplyPoint>> {
        self.supply_points
            .values()
            .into_iter()
            .find(|sp| sp.holds_reservation(id))
    }

    pub(crate) fn find_session_holder(&self, id: &SessionId) -> Option<Arc<SupplyPoint>> {
        self.supply_points
            .values()
            .into_iter()
            .find(|sp| sp.holds_session(id))
    }

    pub fn find_reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.find_reservation_holder(id)
            .and_then(|sp| sp.reservation())
    }

    pub fn find_session(&self, id: &SessionId) -> Option<ChargingSession> {
        self.find_session_holder(id).and_then(|sp| sp.session())
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.supply_points
            .values()
            .iter()
            .filter_map(|sp| sp.reservation())
            .collect()
    }

    pub fn sessions(&self) -> Vec<ChargingSession> {
        self.supply_points
            .values()
            .iter()
            .filter_map(|sp| sp.session())
            .collect()
    }

    /// Drop every reservation whose window elapsed at `now`.
    pub fn expire_reservations(&self, now: DateTime<Utc>) -> Vec<Reservation> {
        let tracking = EventTrackingId::generate();
        self.supply_points
            .values()
            .iter()
            .filter_map(|sp| sp.expire_reservation(now, &tracking))
            .collect()
    }

    // ── Local resolution ───────────────────────────────────────

    /// Station-level reservation: bound to the first free supply point.
    pub(crate) fn reserve_here(&self, request: &ReserveRequest) -> ReservationResult {
        let max_duration = self.settings.max_reservation_duration;
        if let Some(refused) = refuse_reservation(request, max_duration, self.is_operational()) {
            return refused;
        }
        reserve_first_free(
            self.supply_points.values(),
            request,
            ReservationLevel::Station,
            max_duration,
        )
    }

    // Resolvers below are also reached from the pool, operator and network,
    // which do not dispatch through this station; each checks its admin
    // status itself.

    pub(crate) fn local_reserve(&self, request: &ReserveRequest) -> ReservationResult {
        match &request.location {
            ReservationLocation::SupplyPoint(id) => match self.find_supply_point(id) {
                Some(sp) => refuse_reservation(
                    request,
                    self.settings.max_reservation_duration,
                    self.is_operational(),
                )
                .unwrap_or_else(|| sp.reserve(request, ReservationLevel::SupplyPoint)),
                None => ReservationResult::unresolved(),
            },
            ReservationLocation::Station(id) if id == self.id() => self.reserve_here(request),
            _ => ReservationResult::unresolved(),
        }
    }

    pub(crate) fn local_cancel_reservation(
        &self,
        request: &CancelReservationRequest,
    ) -> CancelReservationResult {
        let Some(sp) = self.find_reservation_holder(&request.reservation_id) else {
            return CancelReservationResult::unresolved();
        };
        if !self.is_operational() {
            return CancelReservationResult::out_of_service();
        }
        sp.cancel_reservation(&request.reservation_id, request.reason, &request.context)
    }

    pub(crate) fn local_remote_start(
        &self,
        request: &RemoteStartRequest,
        owner: EntityRef,
    ) -> RemoteStartResult {
        let Some(target) = self.find_supply_point(&request.supply_point_id) else {
            return RemoteStartResult::unresolved();
        };
        if !self.is_operational() {
            return RemoteStartResult::out_of_service();
        }
        let holder = request
            .reservation_id
            .as_ref()
            .and_then(|id| self.find_reservation_holder(id));
        target.start_session(request, Some(owner), holder.as_deref())
    }

    pub(crate) fn local_remote_stop(&self, request: &RemoteStopRequest) -> RemoteStopResult {
        let Some(sp) = self.find_session_holder(&request.session_id) else {
            return RemoteStopResult::unresolved();
        };
        if !self.is_operational() {
            return RemoteStopResult::out_of_service();
        }
        sp.remote_stop(request)
    }

    // ── Commands ───────────────────────────────────────────────

    pub async fn reserve(&self, request: &ReserveRequest) -> ReservationResult {
        let remote = self.remote_backend();
        remote_then_local(
            &self.core,
            CommandKind::Reserve,
            request.location.to_string(),
            &request.context,
            remote.as_ref().map(|backend| backend.reserve(request)),
            || self.local_reserve(request),
        )
        .await
    }

    pub async fn cancel_reservation(
        &self,
        request: &CancelReservationRequest,
    ) -> CancelReservationResult {
        let remote = self.remote_backend();
        remote_then_local(
            &self.core,
            CommandKind::CancelReservation,
            request.reservation_id.to_string(),
            &request.context,
            remote.as_ref().map(|backend| backend.cancel_reservation(request)),
            || self.local_cancel_reservation(request),
        )
        .await
    }

    pub async fn remote_start(&self, request: &RemoteStartRequest) -> RemoteStartResult {
        let remote = self.remote_backend();
        remote_then_local(
            &self.core,
            CommandKind::RemoteStart,
            request.supply_point_id.to_string(),
            &request.context,
            remote.as_ref().map(|backend| backend.remote_start(request)),
            || self.local_remote_start(request, self.entity_ref()),
        )
        .await
    }

    pub async fn remote_stop(&self, request: &RemoteStopRequest) -> RemoteStopResult {
        let remote = self.remote_backend();
        remote_then_local(
            &self.core,
            CommandKind::RemoteStop,
            request.session_id.to_string(),
            &request.context,
            remote.as_ref().map(|backend| backend.remote_stop(request)),
            || self.local_remote_stop(request),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reservation::CancellationReason;
    use crate::domain::results::{
        RemoteStartResultKind, RemoteStopResultKind, ReservationResultKind,
    };
    use crate::domain::status::{worst_of, AdminStatusKind};
    use std::time::Duration;

    fn station() -> Arc<Station> {
        Station::new(
            "DE*GEF*S1".parse().unwrap(),
            "DE*GEF*P1".parse().unwrap(),
            Arc::new(FleetSettings::default()),
            Utc::now(),
            EntityEvents::new(),
            MutationChannels::new("supply_points"),
        )
    }

    fn add(station: &Station, id: &str) -> Arc<SupplyPoint> {
        station
            .create_supply_point(id.parse().unwrap(), Utc::now())
            .unwrap()
            .applied()
            .unwrap()
    }

    #[test]
    fn rejects_supply_point_of_other_operator() {
        let station = station();
        assert!(matches!(
            station.create_supply_point("FR*XYZ*E1*1".parse().unwrap(), Utc::now()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn aggregates_worst_supply_point_status() {
        let station = station();
        station.set_status_aggregation(Some(Arc::new(worst_of)));
        let a = add(&station, "DE*GEF*E1*1");
        let b = add(&station, "DE*GEF*E1*2");
        assert_eq!(station.status().value, StatusKind::Available);

        a.set_status(Utc::now(), StatusKind::Charging);
        assert_eq!(station.status().value, StatusKind::Charging);

        b.set_admin_status(Utc::now(), AdminStatusKind::OutOfService);
        assert_eq!(station.status().value, StatusKind::OutOfService);

        station
            .remove_supply_point(b.id(), Utc::now())
            .unwrap();
        assert_eq!(station.status().value, StatusKind::Charging);
    }

    #[test]
    fn station_reservation_binds_first_free_supply_point() {
        let station = station();
        let first = add(&station, "DE*GEF*E1*1");
        let second = add(&station, "DE*GEF*E1*2");
        let location = ReservationLocation::Station(station.id().clone());

        let r1 = station.local_reserve(&ReserveRequest::new(location.clone(), Duration::from_secs(600)));
        assert_eq!(r1.kind, ReservationResultKind::Success);
        assert_eq!(r1.reservation.as_ref().unwrap().supply_point_id, *first.id());
        assert_eq!(r1.reservation.unwrap().level, ReservationLevel::Station);

        let r2 = station.local_reserve(&ReserveRequest::new(location.clone(), Duration::from_secs(600)));
        assert_eq!(r2.reservation.unwrap().supply_point_id, *second.id());

        let r3 = station.local_reserve(&ReserveRequest::new(location, Duration::from_secs(600)));
        assert_eq!(r3.kind, ReservationResultKind::AlreadyReserved);
    }

    #[test]
    fn station_reservation_consumed_at_sibling() {
        let station = station();
        let first = add(&station, "DE*GEF*E1*1");
        let second = add(&station, "DE*GEF*E1*2");
        let reservation = station
            .local_reserve(&ReserveRequest::new(
                ReservationLocation::Station(station.id().clone()),
                Duration::from_secs(600),
            ))
            .reservation
            .unwrap();
        assert_eq!(reservation.supply_point_id, *first.id());

        let request = RemoteStartRequest::new(second.id().clone())
            .with_reservation_id(reservation.id.clone());
        let result = station.local_remote_start(&request, station.entity_ref());

        assert_eq!(result.kind, RemoteStartResultKind::Success);
        assert!(first.reservation().is_none());
        assert_eq!(
            result.session.unwrap().reservation.unwrap().id,
            reservation.id
        );
    }

    #[tokio::test]
    async fn dispatch_without_backend_resolves_locally_and_binds_owner() {
        let station = station();
        let sp = add(&station, "DE*GEF*E1*1");

        let result = station
            .remote_start(&RemoteStartRequest::new(sp.id().clone()))
            .await;
        assert_eq!(result.kind, RemoteStartResultKind::Success);
        assert_eq!(
            result.session.unwrap().owner,
            Some(EntityRef::Station(station.id().clone()))
        );

        let unknown = station
            .remote_start(&RemoteStartRequest::new("DE*GEF*E9*9".parse().unwrap()))
            .await;
        assert_eq!(unknown.kind, RemoteStartResultKind::UnknownEVSE);
    }

    #[test]
    fn removing_supply_point_cancels_its_reservation() {
        let station = station();
        let sp = add(&station, "DE*GEF*E1*1");
        let reasons = Arc::new(std::sync::Mutex::new(Vec::new()));
        let r = Arc::clone(&reasons);
        station
            .events()
            .reservation_cancelled
            .subscribe(move |e| r.lock().unwrap().push(e.reason));

        station.local_reserve(&ReserveRequest::new(
            ReservationLocation::SupplyPoint(sp.id().clone()),
            Duration::from_secs(600),
        ));
        station.remove_supply_point(sp.id(), Utc::now()).unwrap();

        assert_eq!(*reasons.lock().unwrap(), vec![CancellationReason::Deleted]);
        assert_eq!(station.supply_point_count(), 0);
    }

    #[test]
    fn charging_supply_point_cannot_be_removed() {
        let station = station();
        let sp = add(&station, "DE*GEF*E1*1");
        let session = station
            .local_remote_start(&RemoteStartRequest::new(sp.id().clone()), station.entity_ref())
            .session
            .unwrap();

        assert!(matches!(
            station.remove_supply_point(sp.id(), Utc::now()),
            Err(DomainError::Conflict(_))
        ));
        assert_eq!(station.supply_point_count(), 1);
        assert!(station.find_session(&session.id).is_some());

        let stopped = station.local_remote_stop(&RemoteStopRequest::new(session.id.clone()));
        assert_eq!(stopped.kind, RemoteStopResultKind::Success);
        assert!(station.remove_supply_point(sp.id(), Utc::now()).unwrap().is_applied());
    }

    #[test]
    fn removed_supply_point_no_longer_reaches_station_listeners() {
        let station = station();
        let sp = add(&station, "DE*GEF*E1*1");
        let seen = Arc::new(std::sync::Mutex::new(0usize));
        let s = Arc::clone(&seen);
        station.events().status_changed.subscribe(move |e| {
            if matches!(e.entity, EntityRef::SupplyPoint(_)) {
                *s.lock().unwrap() += 1;
            }
        });

        station.remove_supply_point(sp.id(), Utc::now()).unwrap();
        sp.set_status(Utc::now(), StatusKind::Charging);

        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn out_of_service_station_refuses_local_resolution() {
        let station = station();
        let sp = add(&station, "DE*GEF*E1*1");
        station.set_admin_status(Utc::now(), AdminStatusKind::OutOfService);

        let start = station
            .local_remote_start(&RemoteStartRequest::new(sp.id().clone()), station.entity_ref());
        assert_eq!(start.kind, RemoteStartResultKind::OutOfService);

        let reserve = station.local_reserve(&ReserveRequest::new(
            ReservationLocation::SupplyPoint(sp.id().clone()),
            Duration::from_secs(600),
        ));
        assert_eq!(reserve.kind, ReservationResultKind::OutOfService);
        assert!(sp.session().is_none());
    }

    #[test]
    fn overlong_duration_is_reported_before_admin_status() {
        let station = station();
        add(&station, "DE*GEF*E1*1");
        station.set_admin_status(Utc::now(), AdminStatusKind::OutOfService);

        let too_long = FleetSettings::default().max_reservation_duration + Duration::from_secs(1);
        let result = station.reserve_here(&ReserveRequest::new(
            ReservationLocation::Station(station.id().clone()),
            too_long,
        ));
        assert_eq!(result.kind, ReservationResultKind::InvalidDuration);
    }
}
