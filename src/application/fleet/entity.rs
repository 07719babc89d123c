//! State every fleet entity carries: status and admin-status schedules,
//! custom data and the entity's event channels.
//!
//! `status()` is the *effective* status. While the admin status is not
//! operational it is forced to `OutOfService`, whatever the schedule holds.
//! Status events always describe the effective status.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use crate::application::events::EntityEvents;
use crate::domain::custom_data::CustomData;
use crate::domain::events::{DataChangedEvent, StatusChangedEvent};
use crate::domain::ids::{EntityId, EntityRef, EventTrackingId};
use crate::domain::status::{
    AdminStatusKind, ChangeMethod, StatusAggregation, StatusChange, StatusKind, StatusReport,
    StatusSchedule, Timestamped,
};

use super::settings::FleetSettings;

pub struct EntityCore<Id> {
    id: Id,
    status: RwLock<StatusSchedule<StatusKind>>,
    admin_status: RwLock<StatusSchedule<AdminStatusKind>>,
    custom_data: RwLock<CustomData>,
    aggregation: RwLock<Option<StatusAggregation>>,
    events: EntityEvents,
}

impl<Id: EntityId> EntityCore<Id> {
    pub fn new(
        id: Id,
        settings: &FleetSettings,
        timestamp: DateTime<Utc>,
        initial_status: StatusKind,
        events: EntityEvents,
    ) -> Self {
        Self {
            id,
            status: RwLock::new(StatusSchedule::new(
                settings.max_status_list_size,
                Timestamped::new(timestamp, initial_status),
            )),
            admin_status: RwLock::new(StatusSchedule::new(
                settings.max_admin_status_list_size,
                Timestamped::new(timestamp, AdminStatusKind::Operational),
            )),
            custom_data: RwLock::new(CustomData::new()),
            aggregation: RwLock::new(settings.status_aggregation.delegate()),
            events,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn entity_ref(&self) -> EntityRef {
        self.id.entity_ref()
    }

    pub fn events(&self) -> &EntityEvents {
        &self.events
    }

    // ── Status ─────────────────────────────────────────────────

    /// Effective status
    pub fn status(&self) -> Timestamped<StatusKind> {
        let admin = self.admin_status.read().current();
        if admin.value.is_operational() {
            self.status.read().current()
        } else {
            Timestamped::new(admin.timestamp, StatusKind::OutOfService)
        }
    }

    /// Schedule head, ignoring the admin override
    pub fn raw_status(&self) -> Timestamped<StatusKind> {
        self.status.read().current()
    }

    pub fn status_history(&self, n: usize) -> Vec<Timestamped<StatusKind>> {
        self.status.read().history(n)
    }

    pub fn set_status(
        &self,
        timestamp: DateTime<Utc>,
        value: StatusKind,
    ) -> Option<StatusChange<StatusKind>> {
        self.update_status(timestamp, value, &EventTrackingId::generate())
    }

    pub(crate) fn update_status(
        &self,
        timestamp: DateTime<Utc>,
        value: StatusKind,
        tracking: &EventTrackingId,
    ) -> Option<StatusChange<StatusKind>> {
        let before = self.status();
        let change = self.status.write().insert(timestamp, value);
        if change.is_some() {
            self.publish_effective_change(timestamp, before, tracking);
        }
        change
    }

    /// Status derived from the entity's own state (slots, children). Never
    /// lands behind the schedule head, so it always becomes current.
    pub(crate) fn advance_status(
        &self,
        timestamp: DateTime<Utc>,
        value: StatusKind,
        tracking: &EventTrackingId,
    ) -> Option<StatusChange<StatusKind>> {
        let before = self.status();
        let change = {
            let mut schedule = self.status.write();
            let timestamp = timestamp.max(schedule.current().timestamp);
            schedule.insert(timestamp, value)
        };
        if let Some(change) = &change {
            self.publish_effective_change(change.timestamp, before, tracking);
        }
        change
    }

    pub fn merge_status(
        &self,
        entries: &[Timestamped<StatusKind>],
        method: ChangeMethod,
    ) -> Option<StatusChange<StatusKind>> {
        let before = self.status();
        let change = self.status.write().merge(entries, method);
        if let Some(change) = &change {
            self.publish_effective_change(change.timestamp, before, &EventTrackingId::generate());
        }
        change
    }

    // ── Admin status ───────────────────────────────────────────

    pub fn admin_status(&self) -> Timestamped<AdminStatusKind> {
        self.admin_status.read().current()
    }

    pub fn is_operational(&self) -> bool {
        self.admin_status().value.is_operational()
    }

    pub fn admin_status_history(&self, n: usize) -> Vec<Timestamped<AdminStatusKind>> {
        self.admin_status.read().history(n)
    }

    pub fn set_admin_status(
        &self,
        timestamp: DateTime<Utc>,
        value: AdminStatusKind,
    ) -> Option<StatusChange<AdminStatusKind>> {
        self.update_admin_status(timestamp, value, &EventTrackingId::generate())
    }

    pub(crate) fn update_admin_status(
        &self,
        timestamp: DateTime<Utc>,
        value: AdminStatusKind,
        tracking: &EventTrackingId,
    ) -> Option<StatusChange<AdminStatusKind>> {
        let before = self.status();
        let change = self.admin_status.write().insert(timestamp, value);
        if let Some(change) = &change {
            self.publish_admin_change(change, tracking);
            self.publish_effective_change(timestamp, before, tracking);
        }
        change
    }

    pub fn merge_admin_status(
        &self,
        entries: &[Timestamped<AdminStatusKind>],
        method: ChangeMethod,
    ) -> Option<StatusChange<AdminStatusKind>> {
        let before = self.status();
        let change = self.admin_status.write().merge(entries, method);
        if let Some(change) = &change {
            let tracking = EventTrackingId::generate();
            self.publish_admin_change(change, &tracking);
            self.publish_effective_change(change.timestamp, before, &tracking);
        }
        change
    }

    fn publish_admin_change(
        &self,
        change: &StatusChange<AdminStatusKind>,
        tracking: &EventTrackingId,
    ) {
        self.events.admin_status_changed.publish(&StatusChangedEvent {
            timestamp: change.timestamp,
            event_tracking_id: tracking.clone(),
            entity: self.entity_ref(),
            old: change.old,
            new: change.new,
        });
    }

    fn publish_effective_change(
        &self,
        timestamp: DateTime<Utc>,
        before: Timestamped<StatusKind>,
        tracking: &EventTrackingId,
    ) {
        let after = self.status();
        if before.value == after.value {
            return;
        }
        self.events.status_changed.publish(&StatusChangedEvent {
            timestamp,
            event_tracking_id: tracking.clone(),
            entity: self.entity_ref(),
            old: before,
            new: after,
        });
    }

    // ── Aggregation ────────────────────────────────────────────

    pub fn status_aggregation(&self) -> Option<StatusAggregation> {
        self.aggregation.read().clone()
    }

    pub(crate) fn replace_status_aggregation(&self, delegate: Option<StatusAggregation>) {
        *self.aggregation.write() = delegate;
    }

    /// Apply the aggregation delegate, if any, to `report`.
    pub(crate) fn aggregate(
        &self,
        timestamp: DateTime<Utc>,
        report: &StatusReport,
        tracking: &EventTrackingId,
    ) -> Option<StatusChange<StatusKind>> {
        let delegate = self.status_aggregation()?;
        let value = delegate(report);
        self.advance_status(timestamp, value, tracking)
    }

    // ── Custom data ────────────────────────────────────────────

    pub fn custom_data(&self) -> CustomData {
        self.custom_data.read().clone()
    }

    pub fn with_custom_data<R>(&self, f: impl FnOnce(&CustomData) -> R) -> R {
        f(&self.custom_data.read())
    }

    /// Returns the previous value. Emits a data-changed event when the value
    /// actually changed.
    pub fn set_custom_data(&self, key: &str, value: impl Into<Value>) -> Option<Value> {
        let value = value.into();
        let old = self.custom_data.write().set(key, value.clone());
        if old.as_ref() != Some(&value) {
            self.publish_data_change(key, old.clone(), Some(value));
        }
        old
    }

    pub fn remove_custom_data(&self, key: &str) -> Option<Value> {
        let old = self.custom_data.write().remove(key);
        if old.is_some() {
            self.publish_data_change(key, old.clone(), None);
        }
        old
    }

    fn publish_data_change(&self, key: &str, old: Option<Value>, new: Option<Value>) {
        self.events.data_changed.publish(&DataChangedEvent {
            timestamp: Utc::now(),
            event_tracking_id: EventTrackingId::generate(),
            entity: self.entity_ref(),
            property: format!("custom_data.{key}"),
            old,
            new,
        });
    }
}
