//! The set of event channels every fleet entity owns.

use std::sync::Arc;

use crate::domain::events::{
    CommandCompletedEvent, CommandRequestedEvent, DataChangedEvent, FleetEvent,
    NewChargeDetailRecordEvent, NewReservationEvent, NewSessionEvent, ReservationCancelledEvent,
    StatusChangedEvent,
};
use crate::domain::status::{AdminStatusKind, StatusKind};

use super::channel::{EventChannel, ListenerId};

pub struct EntityEvents {
    pub data_changed: Arc<EventChannel<DataChangedEvent>>,
    pub status_changed: Arc<EventChannel<StatusChangedEvent<StatusKind>>>,
    pub admin_status_changed: Arc<EventChannel<StatusChangedEvent<AdminStatusKind>>>,
    pub new_reservation: Arc<EventChannel<NewReservationEvent>>,
    pub reservation_cancelled: Arc<EventChannel<ReservationCancelledEvent>>,
    pub new_session: Arc<EventChannel<NewSessionEvent>>,
    pub new_charge_detail_record: Arc<EventChannel<NewChargeDetailRecordEvent>>,
    pub command_requested: Arc<EventChannel<CommandRequestedEvent>>,
    pub command_completed: Arc<EventChannel<CommandCompletedEvent>>,
}

impl EntityEvents {
    /// Root bundle (network level).
    pub fn new() -> Self {
        Self {
            data_changed: Arc::new(EventChannel::new("data_changed")),
            status_changed: Arc::new(EventChannel::new("status_changed")),
            admin_status_changed: Arc::new(EventChannel::new("admin_status_changed")),
            new_reservation: Arc::new(EventChannel::new("new_reservation")),
            reservation_cancelled: Arc::new(EventChannel::new("reservation_cancelled")),
            new_session: Arc::new(EventChannel::new("new_session")),
            new_charge_detail_record: Arc::new(EventChannel::new("new_charge_detail_record")),
            command_requested: Arc::new(EventChannel::new("command_requested")),
            command_completed: Arc::new(EventChannel::new("command_completed")),
        }
    }

    /// Bundle whose channels all forward to the same-kind channel of `parent`.
    pub fn chained_to(parent: &EntityEvents) -> Self {
        Self {
            data_changed: chain("data_changed", &parent.data_changed),
            status_changed: chain("status_changed", &parent.status_changed),
            admin_status_changed: chain("admin_status_changed", &parent.admin_status_changed),
            new_reservation: chain("new_reservation", &parent.new_reservation),
            reservation_cancelled: chain("reservation_cancelled", &parent.reservation_cancelled),
            new_session: chain("new_session", &parent.new_session),
            new_charge_detail_record: chain(
                "new_charge_detail_record",
                &parent.new_charge_detail_record,
            ),
            command_requested: chain("command_requested", &parent.command_requested),
            command_completed: chain("command_completed", &parent.command_completed),
        }
    }

    /// Cut every channel from its parent. Used when the owning entity is
    /// removed from the hierarchy.
    pub fn detach(&self) {
        self.data_changed.detach();
        self.status_changed.detach();
        self.admin_status_changed.detach();
        self.new_reservation.detach();
        self.reservation_cancelled.detach();
        self.new_session.detach();
        self.new_charge_detail_record.detach();
        self.command_requested.detach();
        self.command_completed.detach();
    }

    /// Subscribe one callback to every channel, receiving the events wrapped
    /// in [`FleetEvent`].
    pub fn subscribe_all<F>(&self, listener: F) -> Vec<ListenerId>
    where
        F: Fn(FleetEvent) + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);
        let mut ids = Vec::with_capacity(9);

        macro_rules! forward {
            ($channel:ident, $variant:ident) => {{
                let l = Arc::clone(&listener);
                ids.push(
                    self.$channel
                        .subscribe(move |e| l(FleetEvent::$variant(e.clone()))),
                );
            }};
        }

        forward!(data_changed, DataChanged);
        forward!(status_changed, StatusChanged);
        forward!(admin_status_changed, AdminStatusChanged);
        forward!(new_reservation, NewReservation);
        forward!(reservation_cancelled, ReservationCancelled);
        forward!(new_session, NewSession);
        forward!(new_charge_detail_record, NewChargeDetailRecord);
        forward!(command_requested, CommandRequested);
        forward!(command_completed, CommandCompleted);

        ids
    }

    /// Undo [`subscribe_all`](Self::subscribe_all).
    pub fn unsubscribe_all(&self, ids: &[ListenerId]) {
        for id in ids {
            // Each id lives in exactly one channel.
            let _ = self.data_changed.unsubscribe(*id)
                || self.status_changed.unsubscribe(*id)
                || self.admin_status_changed.unsubscribe(*id)
                || self.new_reservation.unsubscribe(*id)
                || self.reservation_cancelled.unsubscribe(*id)
                || self.new_session.unsubscribe(*id)
                || self.new_charge_detail_record.unsubscribe(*id)
                || self.command_requested.unsubscribe(*id)
                || self.command_completed.unsubscribe(*id);
        }
    }
}

impl Default for EntityEvents {
    fn default() -> Self {
        Self::new()
    }
}

fn chain<T>(name: &'static str, parent: &Arc<EventChannel<T>>) -> Arc<EventChannel<T>> {
    Arc::new(EventChannel::chained_to(name, Arc::clone(parent)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{EntityRef, EventTrackingId};
    use crate::domain::status::Timestamped;
    use chrono::Utc;
    use std::sync::Mutex;

    fn status_event() -> StatusChangedEvent<StatusKind> {
        let now = Utc::now();
        StatusChangedEvent {
            timestamp: now,
            event_tracking_id: EventTrackingId::generate(),
            entity: EntityRef::SupplyPoint("DE*GEF*E1*1".parse().unwrap()),
            old: Timestamped::new(now, StatusKind::Available),
            new: Timestamped::new(now, StatusKind::Charging),
        }
    }

    #[test]
    fn chained_bundle_forwards_to_parent() {
        let parent = EntityEvents::new();
        let child = EntityEvents::chained_to(&parent);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        parent.subscribe_all(move |e| s.lock().unwrap().push(e.event_type()));

        child.status_changed.publish(&status_event());

        assert_eq!(*seen.lock().unwrap(), vec!["status_changed"]);
    }

    #[test]
    fn detached_bundle_no_longer_reaches_parent() {
        let parent = EntityEvents::new();
        let child = EntityEvents::chained_to(&parent);
        let seen = Arc::new(Mutex::new(0usize));
        let s = Arc::clone(&seen);
        parent.subscribe_all(move |_| *s.lock().unwrap() += 1);

        child.detach();
        child.status_changed.publish(&status_event());

        assert_eq!(*seen.lock().unwrap(), 0);
        assert!(!child.new_session.is_chained());
    }

    #[test]
    fn unsubscribe_all_detaches_every_channel() {
        let events = EntityEvents::new();
        let seen = Arc::new(Mutex::new(0usize));
        let s = Arc::clone(&seen);
        let ids = events.subscribe_all(move |_| *s.lock().unwrap() += 1);
        assert_eq!(ids.len(), 9);

        events.unsubscribe_all(&ids);
        events.status_changed.publish(&status_event());
        assert_eq!(*seen.lock().unwrap(), 0);
        assert_eq!(events.status_changed.listener_count(), 0);
    }
}
