//! Infrastructure layer - external concerns

pub mod backends;
pub mod topology;

pub use backends::{LocalAuthorizationService, TokenState};
pub use topology::{Topology, TopologySummary};
