//! Domain ports
//!
//! Trait contracts for the back-ends the fleet talks to. Implementations live
//! in `infrastructure` or in the embedding application.

pub mod authorization;
pub mod backend;

pub use authorization::{AuthorizationService, ProviderSettings};
pub use backend::{BackendError, BackendResult, RemoteChargingBackend};
