//! Fleet service runtime.
//!
//! [`FleetRuntime`] wires a network from the configuration: the request
//! router with the local authorization service, the topology, the
//! reservation expiry sweep, the status push worker, fleet event logging and
//! forwarding of charge detail records to the router. The CLI binary is a
//! thin shell around it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::events::{EventBus, ListenerId, SharedEventBus};
use crate::application::fleet::Network;
use crate::application::router::{RequestRouter, SharedRequestRouter};
use crate::application::services::{
    start_reservation_expiry_task, StatusPushService, StatusPushTask,
};
use crate::config::AppConfig;
use crate::domain::requests::CallContext;
use crate::domain::session::ChargeDetailRecord;
use crate::infrastructure::backends::LocalAuthorizationService;
use crate::infrastructure::topology::{Topology, TopologySummary};
use crate::shared::{DomainResult, ShutdownSignal};

/// Handle to a running fleet.
pub struct FleetRuntime {
    pub network: Arc<Network>,
    pub router: SharedRequestRouter,
    /// Broadcast of every fleet event, for async consumers
    pub event_bus: SharedEventBus,
    pub local_authorization: Option<Arc<LocalAuthorizationService>>,
    pub topology: TopologySummary,
    pub config: AppConfig,

    shutdown: ShutdownSignal,
    bus_listeners: Vec<ListenerId>,
    cdr_listener: ListenerId,
    push: Option<StatusPushTask>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl FleetRuntime {
    /// Build the fleet and start its background tasks. Must be called from
    /// within a Tokio runtime.
    pub fn start(config: AppConfig, topology: Option<&Topology>) -> DomainResult<Self> {
        info!("Starting e-mobility fleet service...");

        let router: SharedRequestRouter = Arc::new(RequestRouter::new());
        let local_authorization = register_local_authorization(&config, &router)?;

        let network = Network::new(config.network_id()?, config.fleet_settings(), Arc::clone(&router));
        info!(
            network_id = %network.id(),
            aggregation = %config.fleet.status_aggregation,
            "Network created"
        );

        let shutdown = ShutdownSignal::new();
        let mut tasks = Vec::new();

        // Attach the consumers before the topology so they see it appear.
        let event_bus: SharedEventBus = Arc::new(EventBus::new());
        let bus_listeners = event_bus.attach(network.events());
        tasks.push(("event log", spawn_event_log(&event_bus, shutdown.clone())));

        let push = if config.status_push.enabled {
            let service = Arc::new(StatusPushService::new(
                Arc::clone(&router),
                config.status_push_config()?,
            ));
            info!(mode = ?service.transmission_mode(), "Status push enabled");
            Some(service.start(network.events(), shutdown.clone()))
        } else {
            None
        };

        let (cdr_tx, cdr_rx) = mpsc::unbounded_channel::<ChargeDetailRecord>();
        let cdr_listener = network.events().new_charge_detail_record.subscribe(move |event| {
            let _ = cdr_tx.send(event.record.clone());
        });
        tasks.push((
            "record forwarding",
            spawn_cdr_forwarding(Arc::clone(&router), cdr_rx, shutdown.clone()),
        ));

        let summary = match topology {
            Some(topology) => topology.apply(&network, Utc::now())?,
            None => TopologySummary::default(),
        };

        tasks.push((
            "reservation expiry",
            start_reservation_expiry_task(
                Arc::clone(&network),
                shutdown.clone(),
                config.expiry_check_interval(),
            ),
        ));

        info!(
            operators = summary.operators,
            supply_points = summary.supply_points,
            "🚀 Fleet service started"
        );

        Ok(Self {
            network,
            router,
            event_bus,
            local_authorization,
            topology: summary,
            config,
            shutdown,
            bus_listeners,
            cdr_listener,
            push,
            tasks,
        })
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_triggered()
    }

    /// Stop every background task and detach from the network.
    pub async fn shutdown(self) {
        info!("🛑 Shutting down fleet service...");
        self.shutdown.trigger();

        let events = self.network.events();
        events.unsubscribe_all(&self.bus_listeners);
        events.new_charge_detail_record.unsubscribe(self.cdr_listener);

        if let Some(push) = self.push {
            push.detach(events);
            if let Err(e) = push.handle.await {
                error!("Status push task panicked: {}", e);
            }
        }

        for (name, handle) in self.tasks {
            match handle.await {
                Ok(()) => debug!(task = name, "Task stopped"),
                Err(e) => error!(task = name, "Task panicked: {}", e),
            }
        }

        info!("👋 Fleet service shutdown complete");
    }
}

fn register_local_authorization(
    config: &AppConfig,
    router: &RequestRouter,
) -> DomainResult<Option<Arc<LocalAuthorizationService>>> {
    let auth = &config.authorization;
    if !auth.enabled {
        return Ok(None);
    }

    let backend_id = auth.backend_id()?;
    let (allowed, blocked) = auth.tokens()?;
    let service = Arc::new(LocalAuthorizationService::with_tokens(
        backend_id.clone(),
        allowed,
        blocked,
    ));

    let settings = config
        .providers
        .iter()
        .find(|p| p.id == auth.backend_id)
        .map(|p| p.settings)
        .unwrap_or_default();
    router.register_authorization_service(auth.priority, service.clone(), settings)?;

    info!(
        %backend_id,
        tokens = service.token_count(),
        "Local authorization service registered"
    );
    Ok(Some(service))
}

fn spawn_event_log(bus: &EventBus, shutdown: ShutdownSignal) -> JoinHandle<()> {
    let mut subscriber = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                message = subscriber.recv() => {
                    let Some(message) = message else { break };
                    debug!(
                        event_id = %message.id,
                        event_type = message.event.event_type(),
                        entity = %message.event.entity(),
                        "Fleet event"
                    );
                }
                _ = shutdown.wait() => break,
            }
        }
    })
}

/// Hand every charge detail record produced in the network to the router.
fn spawn_cdr_forwarding(
    router: SharedRequestRouter,
    mut records: mpsc::UnboundedReceiver<ChargeDetailRecord>,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                record = records.recv() => {
                    let Some(record) = record else { break };
                    let result = router
                        .send_charge_detail_record(&record, &CallContext::now())
                        .await;
                    if !result.is_forwarded() {
                        warn!(
                            session_id = %record.session_id,
                            outcome = result.kind.as_str(),
                            "Charge detail record was not accepted by any service"
                        );
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::ids::AuthToken;
    use crate::domain::requests::{AuthorizeStartRequest, RemoteStartRequest, RemoteStopRequest};
    use crate::domain::results::{RemoteStartResultKind, RemoteStopResultKind};
    use crate::domain::status::StatusKind;

    const TOPOLOGY: &str = r#"
[[operators]]
id = "DE*GEF"

[[operators.pools]]
id = "DE*GEF*P1"

[[operators.pools.stations]]
id = "DE*GEF*S1"

[[operators.pools.stations.supply_points]]
id = "DE*GEF*E1*1"
"#;

    fn config() -> AppConfig {
        AppConfig::parse(
            r#"
[fleet]
status_aggregation = "worst_of"

[authorization]
local_tokens = ["RFID-1"]
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn starts_with_topology_and_shuts_down() {
        let topology = Topology::parse(TOPOLOGY).unwrap();
        let runtime = FleetRuntime::start(config(), Some(&topology)).unwrap();

        assert_eq!(runtime.topology.supply_points, 1);
        assert_eq!(runtime.network.status().value, StatusKind::Available);
        assert_eq!(runtime.router.authorization_services().len(), 1);
        assert!(runtime.is_running());

        tokio::time::timeout(Duration::from_secs(2), runtime.shutdown())
            .await
            .expect("shutdown hung");
    }

    #[tokio::test]
    async fn completed_sessions_reach_the_local_service() {
        let topology = Topology::parse(TOPOLOGY).unwrap();
        let runtime = FleetRuntime::start(config(), Some(&topology)).unwrap();

        let auth = runtime
            .router
            .authorize_start(&AuthorizeStartRequest::new(AuthToken::new("RFID-1").unwrap()))
            .await;
        let session_id = auth.session_id.clone().unwrap();

        let started = runtime
            .network
            .remote_start(
                &RemoteStartRequest::new("DE*GEF*E1*1".parse().unwrap())
                    .with_session_id(session_id.clone()),
            )
            .await;
        assert_eq!(started.kind, RemoteStartResultKind::Success);

        let stopped = runtime
            .network
            .remote_stop(&RemoteStopRequest::new(session_id.clone()))
            .await;
        assert_eq!(stopped.kind, RemoteStopResultKind::Success);

        let local = runtime.local_authorization.clone().unwrap();
        let mut received = None;
        for _ in 0..50 {
            received = local.record(&session_id);
            if received.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(received.is_some());

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_authorization_registers_nothing() {
        let mut config = config();
        config.authorization.enabled = false;
        config.status_push.enabled = false;

        let runtime = FleetRuntime::start(config, None).unwrap();
        assert!(runtime.local_authorization.is_none());
        assert!(runtime.router.authorization_services().is_empty());
        runtime.shutdown().await;
    }
}
