pub mod kinds;
pub mod report;
pub mod schedule;

pub use kinds::{AdminStatusKind, StatusKind, Timestamped};
pub use report::{availability, worst_of, AggregationStrategy, StatusAggregation, StatusReport};
pub use schedule::{ChangeMethod, StatusChange, StatusSchedule, DEFAULT_MAX_STATUS_LIST_SIZE};
