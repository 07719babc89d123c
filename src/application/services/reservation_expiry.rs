//! Background task that periodically releases overdue reservations.
//!
//! Supply points already expire reservations lazily whenever they are
//! touched. The sweep makes idle supply points report their expiry too.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::fleet::Network;
use crate::shared::ShutdownSignal;

pub const DEFAULT_EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Start the expiry sweep. It runs every `check_interval` until `shutdown`
/// fires.
pub fn start_reservation_expiry_task(
    network: Arc<Network>,
    shutdown: ShutdownSignal,
    check_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            network_id = %network.id(),
            check_interval_secs = check_interval.as_secs_f64(),
            "📅 Reservation expiry task started"
        );

        let mut interval = tokio::time::interval(check_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let expired = network.expire_reservations(Utc::now());
                    debug!(count = expired.len(), "Reservation expiry sweep finished");
                }
                _ = shutdown.wait() => {
                    info!("📅 Reservation expiry task shutting down");
                    break;
                }
            }
        }

        info!("📅 Reservation expiry task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fleet::FleetSettings;
    use crate::application::router::RequestRouter;
    use crate::domain::requests::{CallContext, ReservationLocation, ReserveRequest};
    use crate::domain::reservation::{CancellationReason, ReservationLevel};
    use crate::domain::results::ReservationResultKind;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn sweep_expires_idle_reservations_and_stops_on_shutdown() {
        let network = Network::new(
            "net".parse().unwrap(),
            FleetSettings::default(),
            Arc::new(RequestRouter::new()),
        );
        let operator = network
            .create_operator("DE*GEF".parse().unwrap(), Utc::now())
            .unwrap()
            .applied()
            .unwrap();
        let pool = operator
            .create_pool("DE*GEF*P1".parse().unwrap(), Utc::now())
            .unwrap()
            .applied()
            .unwrap();
        let station = pool
            .create_station("DE*GEF*S1".parse().unwrap(), Utc::now())
            .unwrap()
            .applied()
            .unwrap();
        let sp = station
            .create_supply_point("DE*GEF*E1*1".parse().unwrap(), Utc::now())
            .unwrap()
            .applied()
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        network.events().reservation_cancelled.subscribe(move |e| {
            let _ = tx.send(e.reason);
        });

        let past = CallContext::at(Utc::now() - chrono::Duration::minutes(10));
        let request = ReserveRequest::new(
            ReservationLocation::SupplyPoint(sp.id().clone()),
            Duration::from_secs(60),
        )
        .with_context(past);
        assert_eq!(
            sp.reserve(&request, ReservationLevel::SupplyPoint).kind,
            ReservationResultKind::Success
        );

        let shutdown = ShutdownSignal::new();
        let handle = start_reservation_expiry_task(
            Arc::clone(&network),
            shutdown.clone(),
            Duration::from_millis(10),
        );

        let reason = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("sweep did not run")
            .expect("channel closed");
        assert_eq!(reason, CancellationReason::Expired);
        assert!(sp.reservation().is_none());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task did not stop")
            .expect("task panicked");
    }
}
