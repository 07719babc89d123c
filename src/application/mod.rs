//! Application layer: the entity hierarchy, its channels and the services
//! coordinating commands across back-ends.

pub mod dispatch;
pub mod events;
pub mod fleet;
pub mod registry;
pub mod router;
pub mod services;

pub use events::{
    EntityEvents, EventBus, EventChannel, EventSubscriber, ListenerId, MutationChannels,
    SharedEventBus, VotingChannel,
};
pub use fleet::{EntityCore, FleetSettings, Network, Operator, Pool, Station, SupplyPoint};
pub use registry::{EntityRegistry, Mutation};
pub use router::{RequestRouter, SharedRequestRouter};
pub use services::{start_reservation_expiry_task, StatusPushConfig, StatusPushService};
