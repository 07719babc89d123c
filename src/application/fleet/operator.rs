//! Charging station operator
//!
//! Owns pools and may have a remote back-end of its own. Commands addressed
//! to the operator are resolved against the pool that contains the target.

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
    EntityRef, EventTrackingId, NetworkId, OperatorId, PoolId, ReservationId, SessionId,
    StationId, SupplyPointId,
};
use crate::domain::ports::RemoteChargingBackend;
use crate::domain::requests::{
    CancelReservationRequest, RemoteStartRequest, RemoteStopRequest, ReservationLocation,
    ReserveRequest,
};
use crate::domain::reservation::Reservation;
use crate::domain::results::{
    CancelReservationResult, CommandOutcome, RemoteStartResult, RemoteStopResult,
    ReservationResult,
};
use crate::domain::session::ChargingSession;
use crate::domain::status::{StatusAggregation, StatusKind};
use crate::shared::{DomainError, DomainResult};

use super::entity::EntityCore;
use super::pool::Pool;
use super::scope::{
    discard_reservations, ensure_no_active_session, refuse_reservation, status_report,
};
use super::settings::FleetSettings;
use super::station::Station;
use super::supply_point::SupplyPoint;

pub struct Operator {
    core: EntityCore<OperatorId>,
    network_id: NetworkId,
    settings: Arc<FleetSettings>,
    pools: EntityRegistry<PoolId, Pool>,
    pool_channels: MutationChannels<Operator, Pool>,
    station_channels: MutationChannels<Pool, Station>,
    supply_point_channels: MutationChannels<Station, SupplyPoint>,
    remote: RwLock<Option<Arc<dyn RemoteChargingBackend>>>,
}

impl Deref for Operator {
    type Target = EntityCore<OperatorId>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

impl Operator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: OperatorId,
        network_id: NetworkId,
        settings: Arc<FleetSettings>,
        timestamp: DateTime<Utc>,
        events: EntityEvents,
        pool_channels: MutationChannels<Operator, Pool>,
        station_channels: MutationChannels<Pool, Station>,
        supply_point_channels: MutationChannels<Station, SupplyPoint>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Operator>| {
            let core = EntityCore::new(id, &settings, timestamp, StatusKind::Unspecified, events);

            let operator = weak.clone();
            core.events().status_changed.subscribe(move |event| {
                if !matches!(event.entity, EntityRef::Pool(_)) {
                    return;
                }
                if let Some(operator) = operator.upgrade() {
                    operator.recompute_status(event.timestamp, &event.event_tracking_id);
                }
            });

            Self {
                core,
                network_id,
                settings,
                pools: EntityRegistry::new("pool"),
                pool_channels,
                station_channels,
                supply_point_channels,
                remote: RwLock::new(None),
            }
        })
    }

    pub fn network_id(&self) -> &NetworkId {
        &self.network_id
    }

    pub fn pool_channels(&self) -> &MutationChannels<Operator, Pool> {
        &self.pool_channels
    }

    pub fn station_channels(&self) -> &MutationChannels<Pool, Station> {
        &self.station_channels
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

    // ── Pools ──────────────────────────────────────────────────

    pub fn create_pool(
        &self,
        id: PoolId,
        timestamp: DateTime<Utc>,
    ) -> DomainResult<Mutation<Arc<Pool>>> {
        if &id.operator_id() != self.id() {
            return Err(DomainError::Validation(format!(
                "pool {id} does not belong to operator {}",
                self.id()
            )));
        }

        let pool = Pool::new(
            id.clone(),
            Arc::clone(&self.settings),
            timestamp,
            EntityEvents::chained_to(self.events()),
            MutationChannels::chained_to("stations", &self.station_channels),
            MutationChannels::chained_to("supply_points", &self.supply_point_channels),
        );

        let result = self
            .pools
            .add(timestamp, self, id, pool, &self.pool_channels.addition)?;

        if let Mutation::Applied(pool) = &result {
            info!(operator_id = %self.id(), pool_id = %pool.id(), "Pool created");
            self.recompute_status(timestamp, &EventTrackingId::generate());
        }
        Ok(result)
    }

    /// Remove a pool with its stations. Refused with `Conflict` while a
    /// session runs in it. Its active reservations are cancelled with reason
    /// `Deleted`.
    pub fn remove_pool(
        &self,
        id: &PoolId,
        timestamp: DateTime<Utc>,
    ) -> DomainResult<Mutation<Arc<Pool>>> {
        if let Some(pool) = self.pools.get(id) {
            ensure_no_active_session(&pool.supply_points(), pool.entity_ref())?;
        }

        let result = self
            .pools
            .remove(timestamp, self, id, &self.pool_channels.removal)?;

        if let Mutation::Applied(pool) = &result {
            discard_reservations(&pool.supply_points(), timestamp);
            pool.events().detach();
            info!(operator_id = %self.id(), pool_id = %id, "Pool removed");
            self.recompute_status(timestamp, &EventTrackingId::generate());
        }
        Ok(result)
    }

    pub fn pool(&self, id: &PoolId) -> Option<Arc<Pool>> {
        self.pools.get(id)
    }

    pub fn pools(&self) -> Vec<Arc<Pool>> {
        self.pools.values()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn stations(&self) -> Vec<Arc<Station>> {
        self.pools
            .values()
            .iter()
            .flat_map(|pool| pool.stations())
            .collect()
    }

    pub fn supply_points(&self) -> Vec<Arc<SupplyPoint>> {
        self.pools
            .values()
            .iter()
            .flat_map(|pool| pool.supply_points())
            .collect()
    }

    pub fn find_station(&self, id: &StationId) -> Option<Arc<Station>> {
        self.pools
            .values()
            .iter()
            .find_map(|pool| pool.station(id))
    }

    pub fn find_supply_point(&self, id: &SupplyPointId) -> Option<Arc<SupplyPoint>> {
        self.pool_of_supply_point(id)
            .and_then(|pool| pool.find_supply_point(id))
    }

    fn pool_of_supply_point(&self, id: &SupplyPointId) -> Option<Arc<Pool>> {
        self.pools
            .values()
            .into_iter()
            .find(|pool| pool.find_supply_point(id).is_some())
    }

    fn pool_of_location(&self, location: &ReservationLocation) -> Option<Arc<Pool>> {
        match location {
            ReservationLocation::SupplyPoint(id) => self.pool_of_supply_point(id),
            ReservationLocation::Station(id) => self
                .pools
                .values()
                .into_iter()
                .find(|pool| pool.station(id).is_some()),
            ReservationLocation::Pool(id) => self.pool(id),
        }
    }

    fn pool_of_reservation(&self, id: &ReservationId) -> Option<Arc<Pool>> {
        self.pools
            .values()
            .into_iter()
            .find(|pool| pool.find_reservation_holder(id).is_some())
    }

    fn pool_of_session(&self, id: &SessionId) -> Option<Arc<Pool>> {
        self.pools
            .values()
            .into_iter()
            .find(|pool| pool.find_session_holder(id).is_some())
    }

    // ── Status roll-up ─────────────────────────────────────────

    pub fn set_status_aggregation(&self, delegate: Option<StatusAggregation>) {
        self.replace_status_aggregation(delegate);
        self.recompute_status(Utc::now(), &EventTrackingId::generate());
    }

    pub(crate) fn recompute_status(&self, timestamp: DateTime<Utc>, tracking: &EventTrackingId) {
        let report = status_report(&self.pools.values());
        self.aggregate(timestamp, &report, tracking);
    }

    // ── Lookups ────────────────────────────────────────────────

    pub(crate) fn find_reservation_holder(&self, id: &ReservationId) -> Option<Arc<SupplyPoint>> {
        self.pools
            .values()
            .iter()
            .find_map(|pool| pool.find_reservation_holder(id))
    }

    pub(crate) fn find_session_holder(&self, id: &SessionId) -> Option<Arc<SupplyPoint>> {
        self.pools
            .values()
            .iter()
            .find_map(|pool| pool.find_session_holder(id))
    }

    pub fn find_reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.find_reservation_holder(id)
            .and_then(|sp| sp.reservation())
    }

    pub fn find_session(&self, id: &SessionId) -> Option<ChargingSession> {
        self.find_session_holder(id).and_then(|sp| sp.session())
    }

    pub fn expire_reservations(&self, now: DateTime<Utc>) -> Vec<Reservation> {
        self.pools
            .values()
            .iter()
            .flat_map(|pool| pool.expire_reservations(now))
            .collect()
    }

    // ── Local resolution ───────────────────────────────────────

    // The network resolves through these without dispatching via the
    // operator, so each checks the operator's admin status.

    pub(crate) fn local_reserve(&self, request: &ReserveRequest) -> ReservationResult {
        let Some(pool) = self.pool_of_location(&request.location) else {
            return ReservationResult::unresolved();
        };
        refuse_reservation(
            request,
            self.settings.max_reservation_duration,
            self.is_operational(),
        )
        .unwrap_or_else(|| pool.local_reserve(request))
    }

    pub(crate) fn local_cancel_reservation(
        &self,
        request: &CancelReservationRequest,
    ) -> CancelReservationResult {
        let Some(pool) = self.pool_of_reservation(&request.reservation_id) else {
            return CancelReservationResult::unresolved();
        };
        if !self.is_operational() {
            return CancelReservationResult::out_of_service();
        }
        pool.local_cancel_reservation(request)
    }

    pub(crate) fn local_remote_start(
        &self,
        request: &RemoteStartRequest,
        owner: EntityRef,
    ) -> RemoteStartResult {
        let Some(pool) = self.pool_of_supply_point(&request.supply_point_id) else {
            return RemoteStartResult::unresolved();
        };
        if !self.is_operational() {
            return RemoteStartResult::out_of_service();
        }
        pool.local_remote_start(request, owner)
    }

    pub(crate) fn local_remote_stop(&self, request: &RemoteStopRequest) -> RemoteStopResult {
        let Some(pool) = self.pool_of_session(&request.session_id) else {
            return RemoteStopResult::unresolved();
        };
        if !self.is_operational() {
            return RemoteStopResult::out_of_service();
        }
        pool.local_remote_stop(request)
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
