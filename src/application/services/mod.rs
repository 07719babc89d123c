//! Background services of the fleet runtime

mod reservation_expiry;
mod status_push;

pub use reservation_expiry::{start_reservation_expiry_task, DEFAULT_EXPIRY_CHECK_INTERVAL};
pub use status_push::{
    StatusPushConfig, StatusPushService, StatusPushTask, DEFAULT_FLUSH_INTERVAL,
};
