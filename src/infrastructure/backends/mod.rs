//! Back-ends shipped with the service

mod local_authorization;

pub use local_authorization::{LocalAuthorizationService, TokenState};
