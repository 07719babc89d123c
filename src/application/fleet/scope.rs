//! Helpers shared by the parent levels of the hierarchy.

use std::fmt::Display;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::ids::EntityId;
use crate::domain::requests::{CallContext, ReserveRequest};
use crate::domain::reservation::ReservationLevel;
use crate::domain::results::{CommandOutcome, ReservationResult, ReservationResultKind};
use crate::domain::status::StatusReport;
use crate::shared::{DomainError, DomainResult};

use super::entity::EntityCore;
use super::supply_point::SupplyPoint;

/// Snapshot of the children's effective statuses.
pub(crate) fn status_report<Id, T>(children: &[Arc<T>]) -> StatusReport
where
    Id: EntityId,
    T: Deref<Target = EntityCore<Id>>,
{
    StatusReport::new(
        children
            .iter()
            .map(|child| (child.entity_ref(), child.status().value))
            .collect(),
    )
}

/// `InvalidDuration` when the request asks for more than `max_duration`.
/// Checked ahead of any admin status.
pub(crate) fn invalid_duration(
    request: &ReserveRequest,
    max_duration: Duration,
) -> Option<ReservationResult> {
    (request.duration > max_duration).then(|| {
        ReservationResult::new(ReservationResultKind::InvalidDuration).with_message(format!(
            "duration {:?} exceeds the maximum of {max_duration:?}",
            request.duration
        ))
    })
}

/// Refusal of a reservation by the level resolving it: the duration cap
/// first, then that level's admin status.
pub(crate) fn refuse_reservation(
    request: &ReserveRequest,
    max_duration: Duration,
    operational: bool,
) -> Option<ReservationResult> {
    invalid_duration(request, max_duration)
        .or_else(|| (!operational).then(ReservationResult::out_of_service))
}

/// A subtree cannot be removed while one of its supply points is charging:
/// the session would be lost without a charge detail record.
pub(crate) fn ensure_no_active_session(
    supply_points: &[Arc<SupplyPoint>],
    subject: impl Display,
) -> DomainResult<()> {
    match supply_points.iter().find_map(|sp| sp.session()) {
        Some(session) => Err(DomainError::Conflict(format!(
            "{subject} has an active charging session {}",
            session.id
        ))),
        None => Ok(()),
    }
}

/// Cancel every reservation of a removed subtree with reason `Deleted`.
pub(crate) fn discard_reservations(supply_points: &[Arc<SupplyPoint>], timestamp: DateTime<Utc>) {
    let ctx = CallContext::at(timestamp);
    for sp in supply_points {
        sp.discard_reservation(&ctx);
    }
}

/// Bind a station- or pool-level reservation to the first free supply point
/// of `candidates` (ordered by id). A request naming a reservation already
/// held in scope updates it in place.
pub(crate) fn reserve_first_free(
    mut candidates: Vec<Arc<SupplyPoint>>,
    request: &ReserveRequest,
    level: ReservationLevel,
    max_duration: Duration,
) -> ReservationResult {
    if let Some(invalid) = invalid_duration(request, max_duration) {
        return invalid;
    }
    if candidates.is_empty() {
        return ReservationResult::unresolved()
            .with_message(format!("no supply points at {}", request.location));
    }

    candidates.sort_by(|a, b| a.id().cmp(b.id()));

    for sp in &candidates {
        sp.expire_reservation(request.context.timestamp, &request.context.event_tracking_id);
    }

    if let Some(id) = &request.reservation_id {
        if let Some(holder) = candidates.iter().find(|sp| sp.holds_reservation(id)) {
            return holder.reserve(request, level);
        }
    }

    for sp in candidates.iter().filter(|sp| sp.is_free()) {
        let result = sp.reserve(request, level);
        match result.kind {
            // Lost a race for this one, try the next.
            ReservationResultKind::AlreadyReserved | ReservationResultKind::AlreadyInUse => continue,
            _ => return result,
        }
    }

    if candidates.iter().all(|sp| !sp.is_operational()) {
        return ReservationResult::out_of_service();
    }
    if candidates.iter().any(|sp| sp.reservation().is_some()) {
        ReservationResult::new(ReservationResultKind::AlreadyReserved)
            .with_message(format!("every supply point at {} is reserved", request.location))
    } else {
        ReservationResult::new(ReservationResultKind::AlreadyInUse)
            .with_message(format!("every supply point at {} is in use", request.location))
    }
}
