//! Child status snapshots and the delegates that roll them up.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::kinds::StatusKind;
use crate::domain::ids::EntityRef;
use crate::shared::DomainError;

/// Immutable snapshot of the effective statuses of a parent's children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    entries: Vec<(EntityRef, StatusKind)>,
}

impl StatusReport {
    pub fn new(entries: Vec<(EntityRef, StatusKind)>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[(EntityRef, StatusKind)] {
        &self.entries
    }

    pub fn statuses(&self) -> impl Iterator<Item = StatusKind> + '_ {
        self.entries.iter().map(|(_, status)| *status)
    }

    pub fn count(&self, kind: StatusKind) -> usize {
        self.statuses().filter(|s| *s == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Computes a parent status from its children.
pub type StatusAggregation = Arc<dyn Fn(&StatusReport) -> StatusKind + Send + Sync>;

/// The most severe child status, `Unspecified` without children.
pub fn worst_of(report: &StatusReport) -> StatusKind {
    report
        .statuses()
        .max_by_key(|s| s.severity())
        .unwrap_or(StatusKind::Unspecified)
}

/// `Available` when every child is available, `PartiallyAvailable` when at
/// least one is, otherwise the worst of the remaining statuses.
pub fn availability(report: &StatusReport) -> StatusKind {
    if report.is_empty() {
        return StatusKind::Unspecified;
    }
    let available = report.count(StatusKind::Available);
    if available == report.len() {
        StatusKind::Available
    } else if available > 0 {
        StatusKind::PartiallyAvailable
    } else {
        worst_of(report)
    }
}

/// Named aggregation strategies selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Parent status is set manually; child changes are only surfaced as events.
    #[default]
    None,
    WorstOf,
    Availability,
}

impl AggregationStrategy {
    pub fn delegate(self) -> Option<StatusAggregation> {
        match self {
            AggregationStrategy::None => None,
            AggregationStrategy::WorstOf => Some(Arc::new(worst_of)),
            AggregationStrategy::Availability => Some(Arc::new(availability)),
        }
    }
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationStrategy::None => write!(f, "none"),
            AggregationStrategy::WorstOf => write!(f, "worst_of"),
            AggregationStrategy::Availability => write!(f, "availability"),
        }
    }
}

impl FromStr for AggregationStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "worst_of" => Ok(Self::WorstOf),
            "availability" => Ok(Self::Availability),
            other => Err(DomainError::Validation(format!(
                "unknown aggregation strategy '{other}'"
            ))),
        }
    }
}
