//! The charging fleet hierarchy
//!
//! `Network → Operator → Pool → Station → SupplyPoint`. Each level owns its
//! children in a per-parent registry, rolls their statuses up through an
//! optional aggregation delegate and chains its event and voting channels to
//! its parent. Children only know their parent's id.

mod entity;
mod network;
mod operator;
mod pool;
mod scope;
mod settings;
mod station;
mod supply_point;

pub use entity::EntityCore;
pub use network::Network;
pub use operator::Operator;
pub use pool::Pool;
pub use settings::{FleetSettings, DEFAULT_MAX_RESERVATION_DURATION};
pub use station::Station;
pub use supply_point::SupplyPoint;
