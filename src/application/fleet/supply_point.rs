//! Supply point (EVSE)
//!
//! The leaf of the hierarchy and the only entity holding exclusive resources:
//! one reservation slot and one charging-session slot. Both slots are only
//! mutated through the methods below, which keep the status schedule and the
//! emitted events consistent with the slot contents.
//!
//! Lock order is reservation slot, then session slot. Neither is held while
//! events are published or while another supply point is touched.

use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::application::events::EntityEvents;
use crate::domain::events::{
    NewChargeDetailRecordEvent, NewReservationEvent, NewSessionEvent, ReservationCancelledEvent,
};
use crate::domain::ids::{
    AuthToken, EntityRef, EventTrackingId, OperatorId, PoolId, ReservationId, SessionId,
    StationId, SupplyPointId,
};
use crate::domain::requests::{
    CallContext, RemoteStartRequest, RemoteStopRequest, ReservationHandling, ReserveRequest,
};
use crate::domain::reservation::{CancellationReason, Reservation, ReservationLevel};
use crate::domain::results::{
    CancelReservationResult, CommandOutcome, RemoteStartResult, RemoteStartResultKind,
    RemoteStopResult, RemoteStopResultKind, ReservationResult, ReservationResultKind,
};
use crate::domain::session::{ChargeDetailRecord, ChargingSession};
use crate::domain::status::StatusKind;

use super::entity::EntityCore;
use super::settings::FleetSettings;

pub struct SupplyPoint {
    core: EntityCore<SupplyPointId>,
    station_id: StationId,
    pool_id: PoolId,
    settings: Arc<FleetSettings>,
    reservation: Mutex<Option<Reservation>>,
    session: Mutex<Option<ChargingSession>>,
}

impl Deref for SupplyPoint {
    type Target = EntityCore<SupplyPointId>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

/// Why a session could not be opened, plus a borrowed sibling reservation
/// that has to be handed back.
struct StartRejection {
    kind: RemoteStartResultKind,
    message: String,
    borrowed: Option<Reservation>,
}

impl SupplyPoint {
    pub(crate) fn new(
        id: SupplyPointId,
        station_id: StationId,
        pool_id: PoolId,
        settings: Arc<FleetSettings>,
        timestamp: DateTime<Utc>,
        events: EntityEvents,
    ) -> Self {
        Self {
            core: EntityCore::new(id, &settings, timestamp, StatusKind::Available, events),
            station_id,
            pool_id,
            settings,
            reservation: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    pub fn station_id(&self) -> &StationId {
        &self.station_id
    }

    pub fn pool_id(&self) -> &PoolId {
        &self.pool_id
    }

    pub fn operator_id(&self) -> OperatorId {
        self.id().operator_id()
    }

    /// Active reservation, if any. Does not apply expiry.
    pub fn reservation(&self) -> Option<Reservation> {
        self.reservation.lock().clone().filter(Reservation::is_active)
    }

    pub fn session(&self) -> Option<ChargingSession> {
        self.session.lock().clone().filter(ChargingSession::is_active)
    }

    pub fn holds_reservation(&self, id: &ReservationId) -> bool {
        self.reservation
            .lock()
            .as_ref()
            .is_some_and(|r| r.is_active() && &r.id == id)
    }

    pub fn holds_session(&self, id: &SessionId) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| s.is_active() && &s.id == id)
    }

    /// Operational with neither a reservation nor a session.
    pub fn is_free(&self) -> bool {
        self.is_operational() && self.reservation().is_none() && self.session().is_none()
    }

    // ── Reservations ───────────────────────────────────────────

    /// Create, or update when `reservation_id` names the one already held.
    pub fn reserve(&self, request: &ReserveRequest, level: ReservationLevel) -> ReservationResult {
        let ctx = &request.context;
        let now = ctx.timestamp;

        if request.duration > self.settings.max_reservation_duration {
            return ReservationResult::new(ReservationResultKind::InvalidDuration).with_message(
                format!(
                    "duration {:?} exceeds the maximum of {:?}",
                    request.duration, self.settings.max_reservation_duration
                ),
            );
        }
        if !self.is_operational() {
            return ReservationResult::out_of_service();
        }

        self.expire_reservation(now, &ctx.event_tracking_id);

        let reservation = {
            let mut slot = self.reservation.lock();
            if self.session.lock().as_ref().is_some_and(|s| s.is_active()) {
                return ReservationResult::new(ReservationResultKind::AlreadyInUse)
                    .with_message(format!("supply point {} is charging", self.id()));
            }

            let existing = slot.as_ref().filter(|r| r.is_active());
            let (id, created_at) = match (existing, &request.reservation_id) {
                (Some(current), Some(id)) if &current.id == id => (id.clone(), current.created_at),
                (Some(current), _) => {
                    return ReservationResult::new(ReservationResultKind::AlreadyReserved)
                        .with_message(format!("held by reservation {}", current.id));
                }
                (None, Some(id)) => (id.clone(), now),
                (None, None) => (ReservationId::generate(), now),
            };

            let mut reservation = Reservation::new(
                id,
                level,
                self.id().clone(),
                self.station_id.clone(),
                request.start_time(),
                request.duration,
            );
            reservation.pool_id = Some(self.pool_id.clone());
            reservation.auth_tokens = request.auth_tokens.clone();
            reservation.accounts = request.accounts.clone();
            reservation.pins = request.pins.clone();
            reservation.provider_id = request.provider_id.clone();
            reservation.account = request.account.clone();
            reservation.product = request.product.clone();
            reservation.created_at = created_at;

            *slot = Some(reservation.clone());
            reservation
        };

        info!(
            supply_point_id = %self.id(),
            reservation_id = %reservation.id,
            level = ?level,
            "Reservation stored"
        );

        self.advance_status(now, StatusKind::Reserved, &ctx.event_tracking_id);
        self.events().new_reservation.publish(&NewReservationEvent {
            timestamp: now,
            event_tracking_id: ctx.event_tracking_id.clone(),
            entity: self.entity_ref(),
            reservation: reservation.clone(),
        });

        ReservationResult::success(reservation)
    }

    pub fn cancel_reservation(
        &self,
        id: &ReservationId,
        reason: CancellationReason,
        ctx: &CallContext,
    ) -> CancelReservationResult {
        if !self.is_operational() {
            return CancelReservationResult::out_of_service();
        }

        self.expire_reservation(ctx.timestamp, &ctx.event_tracking_id);

        let cancelled = {
            let mut slot = self.reservation.lock();
            match slot.take() {
                Some(mut r) if r.is_active() && &r.id == id => {
                    r.cancel();
                    r
                }
                other => {
                    *slot = other;
                    return CancelReservationResult::unresolved()
                        .with_message(format!("no active reservation {id} here"));
                }
            }
        };

        info!(
            supply_point_id = %self.id(),
            reservation_id = %id,
            reason = ?reason,
            "Reservation cancelled"
        );
        self.release_reservation(ctx.timestamp, &ctx.event_tracking_id, &cancelled, reason);

        CancelReservationResult::success(cancelled, reason)
    }

    /// Cancel the held reservation with reason `Deleted` regardless of the
    /// admin status. Used when the supply point leaves the hierarchy.
    pub(crate) fn discard_reservation(&self, ctx: &CallContext) -> Option<Reservation> {
        let discarded = {
            let mut slot = self.reservation.lock();
            match slot.take() {
                Some(mut r) if r.is_active() => {
                    r.cancel();
                    r
                }
                other => {
                    *slot = other;
                    return None;
                }
            }
        };

        info!(
            supply_point_id = %self.id(),
            reservation_id = %discarded.id,
            "Reservation discarded on removal"
        );
        self.release_reservation(
            ctx.timestamp,
            &ctx.event_tracking_id,
            &discarded,
            CancellationReason::Deleted,
        );

        Some(discarded)
    }

    /// Drop the reservation when its window elapsed at `now`. Returns the
    /// expired reservation.
    pub fn expire_reservation(
        &self,
        now: DateTime<Utc>,
        tracking: &EventTrackingId,
    ) -> Option<Reservation> {
        let expired = {
            let mut slot = self.reservation.lock();
            match slot.take() {
                Some(mut r) if r.is_active() && r.is_expired_at(now) => {
                    r.expire();
                    r
                }
                other => {
                    *slot = other;
                    return None;
                }
            }
        };

        info!(
            supply_point_id = %self.id(),
            reservation_id = %expired.id,
            "Reservation expired"
        );
        self.release_reservation(now, tracking, &expired, CancellationReason::Expired);

        Some(expired)
    }

    fn release_reservation(
        &self,
        timestamp: DateTime<Utc>,
        tracking: &EventTrackingId,
        reservation: &Reservation,
        reason: CancellationReason,
    ) {
        if self.session().is_none() {
            self.advance_status(timestamp, StatusKind::Available, tracking);
        }
        self.events()
            .reservation_cancelled
            .publish(&ReservationCancelledEvent {
                timestamp,
                event_tracking_id: tracking.clone(),
                entity: self.entity_ref(),
                reservation: reservation.clone(),
                reason,
            });
    }

    /// Hand over reservation `id` to a session opening at `target`, a
    /// sibling within the reservation's scope.
    fn take_for_consumption(
        &self,
        id: &ReservationId,
        target: &SupplyPoint,
        token: Option<&AuthToken>,
        ctx: &CallContext,
    ) -> Result<Reservation, StartRejection> {
        let taken = {
            let mut slot = self.reservation.lock();
            match slot.take() {
                Some(r)
                    if r.is_active()
                        && &r.id == id
                        && r.covers(target.id(), &target.station_id, &target.pool_id) =>
                {
                    if token.is_some_and(|t| !r.is_authorized(t)) {
                        *slot = Some(r);
                        return Err(StartRejection {
                            kind: RemoteStartResultKind::Reserved,
                            message: format!("token not authorized for reservation {id}"),
                            borrowed: None,
                        });
                    }
                    r
                }
                other => {
                    *slot = other;
                    return Err(StartRejection {
                        kind: RemoteStartResultKind::InvalidReservationId,
                        message: format!("reservation {id} does not cover {}", target.id()),
                        borrowed: None,
                    });
                }
            }
        };

        debug!(
            holder = %self.id(),
            target = %target.id(),
            reservation_id = %id,
            "Reservation handed to sibling"
        );
        self.advance_status(ctx.timestamp, StatusKind::Available, &ctx.event_tracking_id);
        Ok(taken)
    }

    /// Put back a reservation borrowed by a sibling whose start failed.
    fn restore_reservation(&self, reservation: Reservation, ctx: &CallContext) {
        {
            let mut slot = self.reservation.lock();
            if slot.as_ref().is_some_and(|r| r.is_active()) {
                return;
            }
            *slot = Some(reservation);
        }
        self.advance_status(ctx.timestamp, StatusKind::Reserved, &ctx.event_tracking_id);
    }

    // ── Sessions ───────────────────────────────────────────────

    /// Open a session here. A matching reservation held by this supply point
    /// is consumed and kept as the session's provenance.
    pub fn remote_start(
        &self,
        request: &RemoteStartRequest,
        owner: Option<EntityRef>,
    ) -> RemoteStartResult {
        self.start_session(request, owner, None)
    }

    /// Like [`remote_start`](Self::remote_start), but the reservation may be
    /// held by `holder`, a sibling inside the reservation's station or pool.
    pub(crate) fn start_session(
        &self,
        request: &RemoteStartRequest,
        owner: Option<EntityRef>,
        holder: Option<&SupplyPoint>,
    ) -> RemoteStartResult {
        let ctx = &request.context;
        let now = ctx.timestamp;

        if !self.is_operational() {
            return RemoteStartResult::out_of_service();
        }

        self.expire_reservation(now, &ctx.event_tracking_id);

        let borrowed = match (&request.reservation_id, holder) {
            (Some(id), Some(holder))
                if !std::ptr::eq(holder, self) && !self.holds_reservation(id) =>
            {
                if self.session().is_some() {
                    return RemoteStartResult::new(RemoteStartResultKind::AlreadyInUse);
                }
                holder.expire_reservation(now, &ctx.event_tracking_id);
                match holder.take_for_consumption(id, self, request.auth_token.as_ref(), ctx) {
                    Ok(reservation) => Some(reservation),
                    Err(rejection) => {
                        return RemoteStartResult::new(rejection.kind)
                            .with_message(rejection.message)
                    }
                }
            }
            _ => None,
        };

        let opened = self.open_session(request, owner, borrowed);

        let session = match opened {
            Ok(session) => session,
            Err(rejection) => {
                if let (Some(reservation), Some(holder)) = (rejection.borrowed, holder) {
                    holder.restore_reservation(reservation, ctx);
                }
                return RemoteStartResult::new(rejection.kind).with_message(rejection.message);
            }
        };

        info!(
            supply_point_id = %self.id(),
            session_id = %session.id,
            reservation_id = ?session.reservation.as_ref().map(|r| r.id.as_str()),
            "Charging session started"
        );

        self.advance_status(now, StatusKind::Charging, &ctx.event_tracking_id);
        self.events().new_session.publish(&NewSessionEvent {
            timestamp: now,
            event_tracking_id: ctx.event_tracking_id.clone(),
            entity: self.entity_ref(),
            session: session.clone(),
        });

        RemoteStartResult::success(session)
    }

    fn open_session(
        &self,
        request: &RemoteStartRequest,
        owner: Option<EntityRef>,
        borrowed: Option<Reservation>,
    ) -> Result<ChargingSession, StartRejection> {
        let mut reservation_slot = self.reservation.lock();
        let mut session_slot = self.session.lock();

        let reject = |kind, message: String, borrowed| StartRejection {
            kind,
            message,
            borrowed,
        };

        if session_slot.as_ref().is_some_and(|s| s.is_active()) {
            return Err(reject(
                RemoteStartResultKind::AlreadyInUse,
                format!("supply point {} is charging", self.id()),
                borrowed,
            ));
        }

        let own_active = reservation_slot.as_ref().is_some_and(|r| r.is_active());
        let consumed = match (borrowed, &request.reservation_id) {
            (Some(reservation), _) if own_active => {
                return Err(reject(
                    RemoteStartResultKind::Reserved,
                    format!("supply point {} holds another reservation", self.id()),
                    Some(reservation),
                ));
            }
            (Some(reservation), _) => Some(reservation),
            (None, Some(id)) => match reservation_slot.take() {
                Some(r) if r.is_active() && &r.id == id => {
                    if request
                        .auth_token
                        .as_ref()
                        .is_some_and(|t| !r.is_authorized(t))
                    {
                        *reservation_slot = Some(r);
                        return Err(reject(
                            RemoteStartResultKind::Reserved,
                            format!("token not authorized for reservation {id}"),
                            None,
                        ));
                    }
                    Some(r)
                }
                other => {
                    *reservation_slot = other;
                    let kind = if own_active {
                        RemoteStartResultKind::Reserved
                    } else {
                        RemoteStartResultKind::InvalidReservationId
                    };
                    return Err(reject(kind, format!("reservation {id} not held here"), None));
                }
            },
            (None, None) if own_active => {
                return Err(reject(
                    RemoteStartResultKind::Reserved,
                    format!("supply point {} is reserved", self.id()),
                    None,
                ));
            }
            (None, None) => None,
        };

        let session_id = request.session_id.clone().unwrap_or_else(SessionId::generate);
        let mut session = ChargingSession::new(session_id, request.context.timestamp);
        session.owner = owner;
        session.supply_point_id = Some(self.id().clone());
        session.station_id = Some(self.station_id.clone());
        session.pool_id = Some(self.pool_id.clone());
        session.operator_id = Some(self.operator_id());
        session.auth_token = request.auth_token.clone();
        session.provider_id = request
            .provider_id
            .clone()
            .or_else(|| consumed.as_ref().and_then(|r| r.provider_id.clone()));
        session.account = request
            .account
            .clone()
            .or_else(|| consumed.as_ref().and_then(|r| r.account.clone()));
        session.product = request
            .product
            .clone()
            .or_else(|| consumed.as_ref().and_then(|r| r.product.clone()));
        session.reservation = consumed.map(|mut r| {
            r.consume();
            r
        });

        *session_slot = Some(session.clone());
        Ok(session)
    }

    /// Close the session, emit its charge detail record exactly once and
    /// apply the requested reservation handling.
    pub fn remote_stop(&self, request: &RemoteStopRequest) -> RemoteStopResult {
        let ctx = &request.context;
        let now = ctx.timestamp;

        if !self.is_operational() {
            return RemoteStopResult::out_of_service();
        }

        let (record, reinstated) = {
            let mut reservation_slot = self.reservation.lock();
            let mut session_slot = self.session.lock();

            let mut session = match session_slot.take() {
                Some(s) if s.is_active() && s.id == request.session_id => s,
                other => {
                    *session_slot = other;
                    return RemoteStopResult::new(RemoteStopResultKind::InvalidSessionId)
                        .with_message(format!("no active session {} here", request.session_id));
                }
            };

            let record = session.stop(now);
            let reinstated = match request.reservation_handling {
                ReservationHandling::Close => None,
                ReservationHandling::KeepAlive(duration) if reservation_slot.is_none()
                    || reservation_slot.as_ref().is_some_and(|r| !r.is_active()) =>
                {
                    session.reservation.clone().map(|mut r| {
                        r.reinstate(now, duration.min(self.settings.max_reservation_duration));
                        r
                    })
                }
                ReservationHandling::KeepAlive(_) => None,
            };
            if let Some(reservation) = &reinstated {
                *reservation_slot = Some(reservation.clone());
            }
            (record, reinstated)
        };

        info!(
            supply_point_id = %self.id(),
            session_id = %record.session_id,
            energy_kwh = %record.energy_kwh,
            "Charging session stopped"
        );

        let status = if reinstated.is_some() {
            StatusKind::Reserved
        } else {
            StatusKind::Available
        };
        self.advance_status(now, status, &ctx.event_tracking_id);

        self.publish_charge_detail_record(&record, ctx);
        if let Some(reservation) = reinstated {
            self.events().new_reservation.publish(&NewReservationEvent {
                timestamp: now,
                event_tracking_id: ctx.event_tracking_id.clone(),
                entity: self.entity_ref(),
                reservation,
            });
        }

        RemoteStopResult::success(record.session_id.clone(), Some(record))
    }

    fn publish_charge_detail_record(&self, record: &ChargeDetailRecord, ctx: &CallContext) {
        self.events()
            .new_charge_detail_record
            .publish(&NewChargeDetailRecordEvent {
                timestamp: ctx.timestamp,
                event_tracking_id: ctx.event_tracking_id.clone(),
                entity: self.entity_ref(),
                record: record.clone(),
            });
    }

    /// Cumulative meter reading for the running session. Returns `false` when
    /// `session_id` is not charging here.
    pub fn record_meter_value(&self, session_id: &SessionId, meter_kwh: Decimal) -> bool {
        let mut slot = self.session.lock();
        match slot.as_mut() {
            Some(session) if session.is_active() && &session.id == session_id => {
                session.record_meter_value(meter_kwh);
                true
            }
            _ => false,
        }
    }

    /// Set the meter reading the session's energy is measured from.
    pub fn set_meter_start(&self, session_id: &SessionId, meter_kwh: Decimal) -> bool {
        let mut slot = self.session.lock();
        match slot.as_mut() {
            Some(session) if session.is_active() && &session.id == session_id => {
                session.meter_start_kwh = meter_kwh;
                session.meter_last_kwh = session.meter_last_kwh.max(meter_kwh);
                true
            }
            _ => false,
        }
    }
}
