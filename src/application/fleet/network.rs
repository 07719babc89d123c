//! Roaming network: root of the hierarchy
//!
//! Every event and every structural vote of the fleet ends up on the
//! network's channels. Commands are first offered to the remote back-end
//! the router assigns to the target's operator, then resolved locally.

use std::ops::Deref;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::application::dispatch::remote_then_local;
use crate::application::events::{EntityEvents, MutationChannels};
use crate::application::registry::{EntityRegistry, Mutation};
use crate::application::router::SharedRequestRouter;
use crate::domain::events::CommandKind;
use crate::domain::ids::{
    EntityRef, EventTrackingId, NetworkId, OperatorId, PoolId, ReservationId, SessionId,
    StationId, SupplyPointId,
};
use crate::domain::requests::{
    CancelReservationRequest, RemoteStartRequest, RemoteStopRequest, ReserveRequest,
};
use crate::domain::reservation::Reservation;
use crate::domain::results::{
    CancelReservationResult, CommandOutcome, RemoteStartResult, RemoteStopResult,
    ReservationResult,
};
use crate::domain::session::ChargingSession;
use crate::domain::status::{StatusAggregation, StatusKind};
use crate::shared::DomainResult;

use super::entity::EntityCore;
use super::operator::Operator;
use super::pool::Pool;
use super::scope::{discard_reservations, ensure_no_active_session, status_report};
use super::settings::FleetSettings;
use super::station::Station;
use super::supply_point::SupplyPoint;

pub struct Network {
    core: EntityCore<NetworkId>,
    settings: Arc<FleetSettings>,
    router: SharedRequestRouter,
    operators: EntityRegistry<OperatorId, Operator>,
    operator_channels: MutationChannels<Network, Operator>,
    pool_channels: MutationChannels<Operator, Pool>,
    station_channels: MutationChannels<Pool, Station>,
    supply_point_channels: MutationChannels<Station, SupplyPoint>,
}

impl Deref for Network {
    type Target = EntityCore<NetworkId>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

impl Network {
    pub fn new(id: NetworkId, settings: FleetSettings, router: SharedRequestRouter) -> Arc<Self> {
        let settings = Arc::new(settings);
        let timestamp = Utc::now();

        Arc::new_cyclic(|weak: &Weak<Network>| {
            let core = EntityCore::new(
                id,
                &settings,
                timestamp,
                StatusKind::Unspecified,
                EntityEvents::new(),
            );

            let network = weak.clone();
            core.events().status_changed.subscribe(move |event| {
                if !matches!(event.entity, EntityRef::Operator(_)) {
                    return;
                }
                if let Some(network) = network.upgrade() {
                    network.recompute_status(event.timestamp, &event.event_tracking_id);
                }
            });

            Self {
                core,
                settings,
                router,
                operators: EntityRegistry::new("operator"),
                operator_channels: MutationChannels::new("operators"),
                pool_channels: MutationChannels::new("pools"),
                station_channels: MutationChannels::new("stations"),
                supply_point_channels: MutationChannels::new("supply_points"),
            }
        })
    }

    pub fn settings(&self) -> &FleetSettings {
        &self.settings
    }

    pub fn router(&self) -> &SharedRequestRouter {
        &self.router
    }

    pub fn operator_channels(&self) -> &MutationChannels<Network, Operator> {
        &self.operator_channels
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

    // ── Operators ──────────────────────────────────────────────

    pub fn create_operator(
        &self,
        id: OperatorId,
        timestamp: DateTime<Utc>,
    ) -> DomainResult<Mutation<Arc<Operator>>> {
        let operator = Operator::new(
            id.clone(),
            self.id().clone(),
            Arc::clone(&self.settings),
            timestamp,
            EntityEvents::chained_to(self.events()),
            MutationChannels::chained_to("pools", &self.pool_channels),
            MutationChannels::chained_to("stations", &self.station_channels),
            MutationChannels::chained_to("supply_points", &self.supply_point_channels),
        );

        let result = self.operators.add(
            timestamp,
            self,
            id,
            operator,
            &self.operator_channels.addition,
        )?;

        if let Mutation::Applied(operator) = &result {
            info!(network_id = %self.id(), operator_id = %operator.id(), "Operator created");
            self.recompute_status(timestamp, &EventTrackingId::generate());
        }
        Ok(result)
    }

    /// Remove an operator with everything below it. Refused with
    /// `Conflict` while one of its supply points is charging. Its active
    /// reservations are cancelled with reason `Deleted`.
    pub fn remove_operator(
        &self,
        id: &OperatorId,
        timestamp: DateTime<Utc>,
    ) -> DomainResult<Mutation<Arc<Operator>>> {
        if let Some(operator) = self.operators.get(id) {
            ensure_no_active_session(&operator.supply_points(), operator.entity_ref())?;
        }

        let result = self.operators.remove(
            timestamp,
            self,
            id,
            &self.operator_channels.removal,
        )?;

        if let Mutation::Applied(operator) = &result {
            discard_reservations(&operator.supply_points(), timestamp);
            operator.events().detach();
            info!(network_id = %self.id(), operator_id = %id, "Operator removed");
            self.recompute_status(timestamp, &EventTrackingId::generate());
        }
        Ok(result)
    }

    pub fn operator(&self, id: &OperatorId) -> Option<Arc<Operator>> {
        self.operators.get(id)
    }

    pub fn operators(&self) -> Vec<Arc<Operator>> {
        let mut operators = self.operators.values();
        operators.sort_by(|a, b| a.id().cmp(b.id()));
        operators
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    pub fn pools(&self) -> Vec<Arc<Pool>> {
        self.operators
            .values()
            .iter()
            .flat_map(|operator| operator.pools())
            .collect()
    }

    pub fn stations(&self) -> Vec<Arc<Station>> {
        self.operators
            .values()
            .iter()
            .flat_map(|operator| operator.stations())
            .collect()
    }

    pub fn supply_points(&self) -> Vec<Arc<SupplyPoint>> {
        self.operators
            .values()
            .iter()
            .flat_map(|operator| operator.supply_points())
            .collect()
    }

    pub fn find_pool(&self, id: &PoolId) -> Option<Arc<Pool>> {
        self.operator(&id.operator_id())
            .and_then(|operator| operator.pool(id))
    }

    pub fn find_station(&self, id: &StationId) -> Option<Arc<Station>> {
        self.operator(&id.operator_id())
            .and_then(|operator| operator.find_station(id))
    }

    pub fn find_supply_point(&self, id: &SupplyPointId) -> Option<Arc<SupplyPoint>> {
        self.operator(&id.operator_id())
            .and_then(|operator| operator.find_supply_point(id))
    }

    // ── Status roll-up ─────────────────────────────────────────

    pub fn set_status_aggregation(&self, delegate: Option<StatusAggregation>) {
        self.replace_status_aggregation(delegate);
        self.recompute_status(Utc::now(), &EventTrackingId::generate());
    }

    pub(crate) fn recompute_status(&self, timestamp: DateTime<Utc>, tracking: &EventTrackingId) {
        let report = status_report(&self.operators.values());
        self.aggregate(timestamp, &report, tracking);
    }

    // ── Reservations & sessions ────────────────────────────────

    fn find_reservation_holder(&self, id: &ReservationId) -> Option<Arc<SupplyPoint>> {
        self.operators
            .values()
            .iter()
            .find_map(|operator| operator.find_reservation_holder(id))
    }

    fn find_session_holder(&self, id: &SessionId) -> Option<Arc<SupplyPoint>> {
        self.operators
            .values()
            .iter()
            .find_map(|operator| operator.find_session_holder(id))
    }

    pub fn find_reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.find_reservation_holder(id)
            .and_then(|sp| sp.reservation())
    }

    pub fn find_session(&self, id: &SessionId) -> Option<ChargingSession> {
        self.find_session_holder(id).and_then(|sp| sp.session())
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.supply_points()
            .iter()
            .filter_map(|sp| sp.reservation())
            .collect()
    }

    pub fn sessions(&self) -> Vec<ChargingSession> {
        self.supply_points()
            .iter()
            .filter_map(|sp| sp.session())
            .collect()
    }

    /// Drop every reservation whose window elapsed at `now`. Each one emits
    /// `ReservationCancelled` with reason `Expired`.
    pub fn expire_reservations(&self, now: DateTime<Utc>) -> Vec<Reservation> {
        let expired: Vec<Reservation> = self
            .operators
            .values()
            .iter()
            .flat_map(|operator| operator.expire_reservations(now))
            .collect();
        if !expired.is_empty() {
            info!(network_id = %self.id(), count = expired.len(), "Expired reservations released");
        }
        expired
    }

    // ── Commands ───────────────────────────────────────────────

    pub async fn reserve(&self, request: &ReserveRequest) -> ReservationResult {
        let operator_id = request.location.operator_id();
        let remote = self.router.remote_backend_for(&operator_id);
        remote_then_local(
            &self.core,
            CommandKind::Reserve,
            request.location.to_string(),
            &request.context,
            remote.as_ref().map(|backend| backend.reserve(request)),
            || match self.operator(&operator_id) {
                Some(operator) => operator.local_reserve(request),
                None => ReservationResult::unresolved(),
            },
        )
        .await
    }

    /// The responsible back-end is the one of the operator holding the
    /// reservation. Reservations unknown to the fleet are not offered to
    /// any back-end.
    pub async fn cancel_reservation(
        &self,
        request: &CancelReservationRequest,
    ) -> CancelReservationResult {
        let holder = self.find_reservation_holder(&request.reservation_id);
        let remote = holder
            .as_ref()
            .and_then(|sp| self.router.remote_backend_for(&sp.operator_id()));
        remote_then_local(
            &self.core,
            CommandKind::CancelReservation,
            request.reservation_id.to_string(),
            &request.context,
            remote.as_ref().map(|backend| backend.cancel_reservation(request)),
            || match holder.and_then(|sp| self.operator(&sp.operator_id())) {
                Some(operator) => operator.local_cancel_reservation(request),
                None => CancelReservationResult::unresolved(),
            },
        )
        .await
    }

    pub async fn remote_start(&self, request: &RemoteStartRequest) -> RemoteStartResult {
        let operator_id = request.supply_point_id.operator_id();
        let remote = self.router.remote_backend_for(&operator_id);
        remote_then_local(
            &self.core,
            CommandKind::RemoteStart,
            request.supply_point_id.to_string(),
            &request.context,
            remote.as_ref().map(|backend| backend.remote_start(request)),
            || match self.operator(&operator_id) {
                Some(operator) => operator.local_remote_start(request, self.entity_ref()),
                None => RemoteStartResult::unresolved(),
            },
        )
        .await
    }

    /// Like cancellation, routed by the operator running the session.
    pub async fn remote_stop(&self, request: &RemoteStopRequest) -> RemoteStopResult {
        let holder = self.find_session_holder(&request.session_id);
        let remote = holder
            .as_ref()
            .and_then(|sp| self.router.remote_backend_for(&sp.operator_id()));
        remote_then_local(
            &self.core,
            CommandKind::RemoteStop,
            request.session_id.to_string(),
            &request.context,
            remote.as_ref().map(|backend| backend.remote_stop(request)),
            || match holder.and_then(|sp| self.operator(&sp.operator_id())) {
                Some(operator) => operator.local_remote_stop(request),
                None => RemoteStopResult::unresolved(),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::router::RequestRouter;
    use crate::domain::ids::BackendId;
    use crate::domain::ports::{BackendResult, RemoteChargingBackend};
    use crate::domain::requests::ReservationLocation;
    use crate::domain::reservation::CancellationReason;
    use crate::domain::results::{
        CancelReservationResultKind, RemoteStartResultKind, RemoteStopResultKind,
        ReservationResultKind,
    };
    use crate::domain::status::{AdminStatusKind, AggregationStrategy, StatusReport};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Accepts starts itself and knows nothing else.
    struct StartingBackend {
        id: BackendId,
    }

    #[async_trait]
    impl RemoteChargingBackend for StartingBackend {
        fn id(&self) -> &BackendId {
            &self.id
        }

        async fn reserve(&self, _: &ReserveRequest) -> BackendResult<ReservationResult> {
            Ok(ReservationResult::unresolved())
        }

        async fn cancel_reservation(
            &self,
            _: &CancelReservationRequest,
        ) -> BackendResult<CancelReservationResult> {
            Ok(CancelReservationResult::unresolved())
        }

        async fn remote_start(&self, request: &RemoteStartRequest) -> BackendResult<RemoteStartResult> {
            Ok(RemoteStartResult::success(ChargingSession::new(
                SessionId::generate(),
                request.context.timestamp,
            )))
        }

        async fn remote_stop(&self, _: &RemoteStopRequest) -> BackendResult<RemoteStopResult> {
            Ok(RemoteStopResult::unresolved())
        }
    }

    fn network(aggregation: AggregationStrategy) -> Arc<Network> {
        let settings = FleetSettings {
            status_aggregation: aggregation,
            ..FleetSettings::default()
        };
        Network::new(
            "hubnet".parse().unwrap(),
            settings,
            Arc::new(RequestRouter::new()),
        )
    }

    fn build(network: &Network, supply_points: &[&str]) {
        let operator = network
            .create_operator("DE*GEF".parse().unwrap(), Utc::now())
            .unwrap()
            .applied()
            .unwrap();
        let pool = operator
            .create_pool("DE*GEF*P1".parse().unwrap(), Utc::now())
            .unwrap()
            .applied()
            .unwrap();
        let station = pool
            .create_station("DE*GEF*S1".parse().unwrap(), Utc::now())
            .unwrap()
            .applied()
            .unwrap();
        for id in supply_points {
            station
                .create_supply_point(id.parse().unwrap(), Utc::now())
                .unwrap();
        }
    }

    fn sp(id: &str) -> SupplyPointId {
        id.parse().unwrap()
    }

    #[test]
    fn veto_at_network_blocks_deep_addition() {
        let network = network(AggregationStrategy::None);
        let added = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&added);
        network
            .supply_point_channels()
            .addition
            .add_voter(|_, _, child: &SupplyPoint| !child.id().as_str().ends_with("*9"));
        network
            .supply_point_channels()
            .addition
            .add_listener(move |_, parent: &Station, child: &SupplyPoint| {
                a.lock().unwrap().push(format!("{}/{}", parent.id(), child.id()));
            });

        build(&network, &["DE*GEF*E1*1"]);
        let station = network.find_station(&"DE*GEF*S1".parse().unwrap()).unwrap();
        let vetoed = station
            .create_supply_point(sp("DE*GEF*E1*9"), Utc::now())
            .unwrap();

        assert!(!vetoed.is_applied());
        assert!(network.find_supply_point(&sp("DE*GEF*E1*9")).is_none());
        assert_eq!(*added.lock().unwrap(), vec!["DE*GEF*S1/DE*GEF*E1*1"]);
    }

    #[test]
    fn roll_up_reaches_network_in_the_same_call() {
        let network = network(AggregationStrategy::WorstOf);
        build(&network, &["DE*GEF*E1*1", "DE*GEF*E1*2"]);
        assert_eq!(network.status().value, StatusKind::Available);

        let a = network.find_supply_point(&sp("DE*GEF*E1*1")).unwrap();
        let b = network.find_supply_point(&sp("DE*GEF*E1*2")).unwrap();
        a.set_status(Utc::now(), StatusKind::Charging);
        assert_eq!(network.status().value, StatusKind::Charging);

        b.set_status(Utc::now(), StatusKind::Faulted);
        assert_eq!(network.status().value, StatusKind::Faulted);

        network.set_status_aggregation(Some(Arc::new(|_: &StatusReport| StatusKind::Offline)));
        assert_eq!(network.status().value, StatusKind::Offline);
    }

    #[test]
    fn admin_override_surfaces_as_out_of_service() {
        let network = network(AggregationStrategy::WorstOf);
        build(&network, &["DE*GEF*E1*1"]);
        let operator = network.operator(&"DE*GEF".parse().unwrap()).unwrap();

        operator.set_admin_status(Utc::now(), AdminStatusKind::OutOfService);
        assert_eq!(operator.status().value, StatusKind::OutOfService);
        assert_eq!(network.status().value, StatusKind::OutOfService);

        operator.set_admin_status(Utc::now(), AdminStatusKind::Operational);
        assert_eq!(operator.status().value, StatusKind::Available);
        assert_eq!(network.status().value, StatusKind::Available);
    }

    #[tokio::test]
    async fn reservation_lifecycle_through_network() {
        let network = network(AggregationStrategy::None);
        build(&network, &["DE*GEF*E1*1", "DE*GEF*E1*2"]);
        let cancelled = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&cancelled);
        network
            .events()
            .reservation_cancelled
            .subscribe(move |e| c.lock().unwrap().push(e.reason));

        let reserved = network
            .reserve(&ReserveRequest::new(
                ReservationLocation::Station("DE*GEF*S1".parse().unwrap()),
                Duration::from_secs(900),
            ))
            .await;
        assert_eq!(reserved.kind, ReservationResultKind::Success);
        let reservation = reserved.reservation.unwrap();
        assert!(network.find_reservation(&reservation.id).is_some());

        let cancel = network
            .cancel_reservation(&CancelReservationRequest::new(
                reservation.id.clone(),
                CancellationReason::UserRequested,
            ))
            .await;
        assert_eq!(cancel.kind, CancelReservationResultKind::Success);

        network
            .reserve(&ReserveRequest::new(
                ReservationLocation::SupplyPoint(sp("DE*GEF*E1*2")),
                Duration::from_secs(60),
            ))
            .await;
        let expired = network.expire_reservations(Utc::now() + chrono::Duration::minutes(2));
        assert_eq!(expired.len(), 1);
        assert!(network.reservations().is_empty());
        assert_eq!(
            *cancelled.lock().unwrap(),
            vec![CancellationReason::UserRequested, CancellationReason::Expired]
        );
    }

    #[tokio::test]
    async fn unknown_operator_is_unresolved() {
        let network = network(AggregationStrategy::None);
        build(&network, &["DE*GEF*E1*1"]);

        let result = network
            .remote_start(&RemoteStartRequest::new(sp("FR*XYZ*E1*1")))
            .await;
        assert_eq!(result.kind, RemoteStartResultKind::UnknownEVSE);

        let stop = network
            .remote_stop(&RemoteStopRequest::new(SessionId::generate()))
            .await;
        assert_eq!(stop.kind, RemoteStopResultKind::InvalidSessionId);
    }

    #[tokio::test]
    async fn remote_session_is_owned_by_network() {
        let network = network(AggregationStrategy::None);
        build(&network, &["DE*GEF*E1*1"]);
        network.router().register_remote_backend(
            "DE*GEF".parse().unwrap(),
            Arc::new(StartingBackend {
                id: BackendId::new("gef-backend").unwrap(),
            }),
        );

        let result = network
            .remote_start(&RemoteStartRequest::new(sp("DE*GEF*E1*1")))
            .await;
        assert_eq!(result.kind, RemoteStartResultKind::Success);
        assert_eq!(
            result.session.unwrap().owner,
            Some(EntityRef::Network(network.id().clone()))
        );
        // Started remotely, nothing changed locally.
        assert!(network.sessions().is_empty());
    }

    #[tokio::test]
    async fn out_of_service_ancestors_block_network_commands() {
        let network = network(AggregationStrategy::None);
        build(&network, &["DE*GEF*E1*1"]);
        let station = network.find_station(&"DE*GEF*S1".parse().unwrap()).unwrap();

        station.set_admin_status(Utc::now(), AdminStatusKind::OutOfService);
        let result = network
            .remote_start(&RemoteStartRequest::new(sp("DE*GEF*E1*1")))
            .await;
        assert_eq!(result.kind, RemoteStartResultKind::OutOfService);

        station.set_admin_status(Utc::now(), AdminStatusKind::Operational);
        let started = network
            .remote_start(&RemoteStartRequest::new(sp("DE*GEF*E1*1")))
            .await;
        assert_eq!(started.kind, RemoteStartResultKind::Success);
        let session = started.session.unwrap();

        let operator = network.operator(&"DE*GEF".parse().unwrap()).unwrap();
        operator.set_admin_status(Utc::now(), AdminStatusKind::OutOfService);
        let stop = network
            .remote_stop(&RemoteStopRequest::new(session.id.clone()))
            .await;
        assert_eq!(stop.kind, RemoteStopResultKind::OutOfService);

        let reserve = network
            .reserve(&ReserveRequest::new(
                ReservationLocation::Pool("DE*GEF*P1".parse().unwrap()),
                Duration::from_secs(600),
            ))
            .await;
        assert_eq!(reserve.kind, ReservationResultKind::OutOfService);
        assert!(network.find_session(&session.id).is_some());
    }

    #[tokio::test]
    async fn operator_removal_waits_for_sessions_and_drops_reservations() {
        let network = network(AggregationStrategy::None);
        build(&network, &["DE*GEF*E1*1", "DE*GEF*E1*2"]);
        let cancelled = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&cancelled);
        network
            .events()
            .reservation_cancelled
            .subscribe(move |e| c.lock().unwrap().push(e.reason));
        let records = Arc::new(Mutex::new(0usize));
        let r = Arc::clone(&records);
        network
            .events()
            .new_charge_detail_record
            .subscribe(move |_| *r.lock().unwrap() += 1);

        network
            .reserve(&ReserveRequest::new(
                ReservationLocation::SupplyPoint(sp("DE*GEF*E1*2")),
                Duration::from_secs(600),
            ))
            .await;
        let session = network
            .remote_start(&RemoteStartRequest::new(sp("DE*GEF*E1*1")))
            .await
            .session
            .unwrap();

        let operator_id: OperatorId = "DE*GEF".parse().unwrap();
        assert!(matches!(
            network.remove_operator(&operator_id, Utc::now()),
            Err(crate::shared::DomainError::Conflict(_))
        ));
        assert!(network.find_session(&session.id).is_some());

        network
            .remote_stop(&RemoteStopRequest::new(session.id.clone()))
            .await;
        assert_eq!(*records.lock().unwrap(), 1);

        let removed = network.remove_operator(&operator_id, Utc::now()).unwrap();
        assert!(removed.is_applied());
        assert_eq!(*cancelled.lock().unwrap(), vec![CancellationReason::Deleted]);

        let admin_changes = Arc::new(Mutex::new(0usize));
        let a = Arc::clone(&admin_changes);
        network
            .events()
            .admin_status_changed
            .subscribe(move |_| *a.lock().unwrap() += 1);
        let detached = removed.applied().unwrap();
        detached.set_admin_status(Utc::now(), AdminStatusKind::OutOfService);
        assert_eq!(*admin_changes.lock().unwrap(), 0);
    }
}
