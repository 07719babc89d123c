//! Status vocabularies shared by every level of the hierarchy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed or derived operability of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Available,
    PartiallyAvailable,
    Reserved,
    Charging,
    Faulted,
    Offline,
    OutOfService,
    Unspecified,
}

impl StatusKind {
    /// Rank used by worst-of aggregation, higher is worse.
    pub fn severity(self) -> u8 {
        match self {
            StatusKind::Unspecified => 0,
            StatusKind::Available => 1,
            StatusKind::PartiallyAvailable => 2,
            StatusKind::Reserved => 3,
            StatusKind::Charging => 4,
            StatusKind::Offline => 5,
            StatusKind::Faulted => 6,
            StatusKind::OutOfService => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::Available => "available",
            StatusKind::PartiallyAvailable => "partially_available",
            StatusKind::Reserved => "reserved",
            StatusKind::Charging => "charging",
            StatusKind::Faulted => "faulted",
            StatusKind::Offline => "offline",
            StatusKind::OutOfService => "out_of_service",
            StatusKind::Unspecified => "unspecified",
        }
    }
}

impl Default for StatusKind {
    fn default() -> Self {
        Self::Unspecified
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-declared intent for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminStatusKind {
    Operational,
    OutOfService,
    InternalUse,
    Planned,
    Unspecified,
}

impl AdminStatusKind {
    /// Whether commands may be dispatched and the observed status is
    /// meaningful.
    pub fn is_operational(self) -> bool {
        matches!(self, AdminStatusKind::Operational | AdminStatusKind::InternalUse)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AdminStatusKind::Operational => "operational",
            AdminStatusKind::OutOfService => "out_of_service",
            AdminStatusKind::InternalUse => "internal_use",
            AdminStatusKind::Planned => "planned",
            AdminStatusKind::Unspecified => "unspecified",
        }
    }
}

impl Default for AdminStatusKind {
    fn default() -> Self {
        Self::Operational
    }
}

impl fmt::Display for AdminStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value together with the moment it became effective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamped<T> {
    pub timestamp: DateTime<Utc>,
    pub value: T,
}

impl<T> Timestamped<T> {
    pub fn new(timestamp: DateTime<Utc>, value: T) -> Self {
        Self { timestamp, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_worse_statuses_higher() {
        assert!(StatusKind::Faulted.severity() > StatusKind::Charging.severity());
        assert!(StatusKind::Charging.severity() > StatusKind::Available.severity());
        assert!(StatusKind::OutOfService.severity() > StatusKind::Faulted.severity());
        assert_eq!(StatusKind::Unspecified.severity(), 0);
    }

    #[test]
    fn only_operational_and_internal_use_are_operational() {
        assert!(AdminStatusKind::Operational.is_operational());
        assert!(AdminStatusKind::InternalUse.is_operational());
        assert!(!AdminStatusKind::OutOfService.is_operational());
        assert!(!AdminStatusKind::Planned.is_operational());
        assert!(!AdminStatusKind::Unspecified.is_operational());
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let json = serde_json::to_string(&StatusKind::PartiallyAvailable).unwrap();
        assert_eq!(json, "\"partially_available\"");
        let parsed: AdminStatusKind = serde_json::from_str("\"internal_use\"").unwrap();
        assert_eq!(parsed, AdminStatusKind::InternalUse);
    }
}
