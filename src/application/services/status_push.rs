//! Pushes status and admin-status changes to the remote back-ends.
//!
//! Entity channels are synchronous, so the listeners only hand updates to a
//! worker task. In `Direct` mode the worker pushes every update as soon as
//! it arrives; in `Enqueue` mode it batches them and flushes on an interval
//! (and once more on shutdown).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::events::{EntityEvents, ListenerId};
use crate::application::router::SharedRequestRouter;
use crate::domain::ids::ProviderId;
use crate::domain::ports::{BackendError, BackendResult, ProviderSettings, RemoteChargingBackend};
use crate::domain::requests::{CallContext, StatusUpdate, TransmissionMode};
use crate::domain::results::{PushResult, PushResultKind};
use crate::domain::status::{AdminStatusKind, StatusKind};
use crate::shared::{retry_with_backoff, RetryConfig, ShutdownSignal};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct StatusPushConfig {
    pub transmission_mode: TransmissionMode,
    /// Batch flush period in `Enqueue` mode
    pub flush_interval: Duration,
    pub retry: RetryConfig,
    pub providers: HashMap<ProviderId, ProviderSettings>,
}

impl Default for StatusPushConfig {
    fn default() -> Self {
        Self {
            transmission_mode: TransmissionMode::Direct,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retry: RetryConfig::default(),
            providers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum PendingUpdate {
    Status(StatusUpdate<StatusKind>),
    Admin(StatusUpdate<AdminStatusKind>),
}

#[derive(Default)]
struct Batch {
    status: Vec<StatusUpdate<StatusKind>>,
    admin: Vec<StatusUpdate<AdminStatusKind>>,
}

impl Batch {
    fn add(&mut self, update: PendingUpdate) {
        match update {
            PendingUpdate::Status(u) => self.status.push(u),
            PendingUpdate::Admin(u) => self.admin.push(u),
        }
    }

    fn is_empty(&self) -> bool {
        self.status.is_empty() && self.admin.is_empty()
    }
}

/// Running push worker and the listeners feeding it.
pub struct StatusPushTask {
    pub listeners: Vec<ListenerId>,
    pub handle: JoinHandle<()>,
}

impl StatusPushTask {
    /// Stop feeding the worker from `events`.
    pub fn detach(&self, events: &EntityEvents) {
        for id in &self.listeners {
            events.status_changed.unsubscribe(*id);
            events.admin_status_changed.unsubscribe(*id);
        }
    }
}

pub struct StatusPushService {
    router: SharedRequestRouter,
    config: StatusPushConfig,
}

impl StatusPushService {
    pub fn new(router: SharedRequestRouter, config: StatusPushConfig) -> Self {
        Self { router, config }
    }

    pub fn transmission_mode(&self) -> TransmissionMode {
        self.config.transmission_mode
    }

    fn settings_for(&self, backend: &dyn RemoteChargingBackend) -> ProviderSettings {
        backend
            .provider_id()
            .and_then(|id| self.config.providers.get(id).copied())
            .unwrap_or_default()
    }

    /// Push status updates to every remote back-end. Back-ends whose
    /// provider disabled status pushes answer `OutOfService` without being
    /// contacted.
    pub async fn push_status(&self, updates: &[StatusUpdate<StatusKind>]) -> Vec<PushResult> {
        if updates.is_empty() {
            return Vec::new();
        }
        let mode = self.config.transmission_mode;
        let mut results = Vec::new();

        for backend in self.router.remote_backends() {
            let start = Instant::now();
            if self.settings_for(backend.as_ref()).disable_push_status {
                results.push(disabled(backend.as_ref(), start));
                continue;
            }
            let ctx = CallContext::now();
            let outcome = retry_with_backoff(
                &self.config.retry,
                || backend.update_status(updates, mode, &ctx),
                is_transient,
                "update_status",
            )
            .await;
            results.push(finish(backend.as_ref(), outcome, start));
        }
        results
    }

    pub async fn push_admin_status(
        &self,
        updates: &[StatusUpdate<AdminStatusKind>],
    ) -> Vec<PushResult> {
        if updates.is_empty() {
            return Vec::new();
        }
        let mode = self.config.transmission_mode;
        let mut results = Vec::new();

        for backend in self.router.remote_backends() {
            let start = Instant::now();
            if self.settings_for(backend.as_ref()).disable_push_admin_status {
                results.push(disabled(backend.as_ref(), start));
                continue;
            }
            let ctx = CallContext::now();
            let outcome = retry_with_backoff(
                &self.config.retry,
                || backend.update_admin_status(updates, mode, &ctx),
                is_transient,
                "update_admin_status",
            )
            .await;
            results.push(finish(backend.as_ref(), outcome, start));
        }
        results
    }

    async fn push_batch(&self, batch: &mut Batch) {
        if batch.is_empty() {
            return;
        }
        let status = std::mem::take(&mut batch.status);
        let admin = std::mem::take(&mut batch.admin);
        debug!(
            status_updates = status.len(),
            admin_updates = admin.len(),
            "Pushing status updates"
        );
        log_failures(&self.push_status(&status).await);
        log_failures(&self.push_admin_status(&admin).await);
    }

    /// Subscribe to `events` (normally the network bundle) and start the
    /// worker. It runs until `shutdown` fires.
    pub fn start(self: Arc<Self>, events: &EntityEvents, shutdown: ShutdownSignal) -> StatusPushTask {
        let (tx, mut rx) = mpsc::unbounded_channel::<PendingUpdate>();

        let status_tx = tx.clone();
        let status_listener = events.status_changed.subscribe(move |e| {
            let _ = status_tx.send(PendingUpdate::Status(StatusUpdate {
                entity: e.entity.clone(),
                old: e.old,
                new: e.new,
            }));
        });
        let admin_listener = events.admin_status_changed.subscribe(move |e| {
            let _ = tx.send(PendingUpdate::Admin(StatusUpdate {
                entity: e.entity.clone(),
                old: e.old,
                new: e.new,
            }));
        });

        let mode = self.config.transmission_mode;
        let flush_every = self.config.flush_interval;
        let service = self;

        let handle = tokio::spawn(async move {
            info!(mode = ?mode, "📤 Status push service started");
            let mut batch = Batch::default();
            let mut flush =
                tokio::time::interval_at(tokio::time::Instant::now() + flush_every, flush_every);

            loop {
                tokio::select! {
                    Some(update) = rx.recv() => {
                        batch.add(update);
                        if mode == TransmissionMode::Direct {
                            service.push_batch(&mut batch).await;
                        }
                    }
                    _ = flush.tick(), if mode == TransmissionMode::Enqueue => {
                        service.push_batch(&mut batch).await;
                    }
                    _ = shutdown.wait() => {
                        while let Ok(update) = rx.try_recv() {
                            batch.add(update);
                        }
                        service.push_batch(&mut batch).await;
                        info!("📤 Status push service shutting down");
                        break;
                    }
                }
            }
        });

        StatusPushTask {
            listeners: vec![status_listener, admin_listener],
            handle,
        }
    }
}

fn is_transient(outcome: &BackendResult<PushResult>) -> bool {
    matches!(outcome, Err(e) if e.is_transient())
}

fn disabled(backend: &dyn RemoteChargingBackend, start: Instant) -> PushResult {
    debug!(backend_id = %backend.id(), "Status push disabled for provider");
    let mut result = PushResult::new(PushResultKind::OutOfService)
        .with_message("push disabled for this provider");
    result.backend_id = Some(backend.id().clone());
    result.runtime = start.elapsed();
    result
}

fn finish(
    backend: &dyn RemoteChargingBackend,
    outcome: Result<PushResult, BackendError>,
    start: Instant,
) -> PushResult {
    let mut result = match outcome {
        Ok(result) => result,
        Err(e) => PushResult::new(PushResultKind::Error).with_message(e.to_string()),
    };
    result.backend_id = Some(backend.id().clone());
    result.runtime = start.elapsed();
    result
}

fn log_failures(results: &[PushResult]) {
    for result in results.iter().filter(|r| r.kind == PushResultKind::Error) {
        warn!(
            backend_id = ?result.backend_id,
            detail = result.message.as_deref().unwrap_or_default(),
            "Status push failed"
        );
    }
}
