//! # E-mobility fleet
//!
//! Coordination engine for a fleet of EV charging infrastructure. A network
//! holds operators, their charging pools, stations and supply points. Status
//! changes roll up the hierarchy, structural changes pass through veto-capable
//! voting channels, and reservations and remote start/stop commands are
//! dispatched to remote back-ends before falling back to the local hierarchy.
//!
//! ## Architecture
//!
//! - **domain**: identifiers, status schedules, reservations, sessions, command
//!   requests and results, events and back-end ports
//! - **application**: the entity hierarchy, event and voting channels, command
//!   dispatch, the request router and background services
//! - **infrastructure**: topology loading and the local authorization service
//! - **runtime**: wiring of everything above for the service binary

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod runtime;
pub mod shared;
pub mod telemetry;

pub use application::{
    EntityEvents, EventBus, FleetSettings, Network, Operator, Pool, RequestRouter,
    SharedEventBus, SharedRequestRouter, Station, SupplyPoint,
};
pub use config::{default_config_path, resolve_config_path, AppConfig};
pub use runtime::FleetRuntime;
pub use shared::{DomainError, DomainResult};
