//! Charging sessions and their charge detail records

pub mod model;

pub use model::{ChargeDetailRecord, ChargingSession};
