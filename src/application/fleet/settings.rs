//! Settings shared by every entity of one network.

use std::time::Duration;

use crate::domain::status::{AggregationStrategy, DEFAULT_MAX_STATUS_LIST_SIZE};

pub const DEFAULT_MAX_RESERVATION_DURATION: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetSettings {
    pub max_status_list_size: usize,
    pub max_admin_status_list_size: usize,
    /// Hard upper bound on a reservation's duration (inclusive)
    pub max_reservation_duration: Duration,
    /// Initial roll-up strategy for every parent entity
    pub status_aggregation: AggregationStrategy,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            max_status_list_size: DEFAULT_MAX_STATUS_LIST_SIZE,
            max_admin_status_list_size: DEFAULT_MAX_STATUS_LIST_SIZE,
            max_reservation_duration: DEFAULT_MAX_RESERVATION_DURATION,
            status_aggregation: AggregationStrategy::None,
        }
    }
}
