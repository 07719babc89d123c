//! Request router
//!
//! Fans authorization requests and charge detail records out to the
//! registered authorization services in priority order, remembers which
//! service authorized a session, and maps operators to the remote back-end
//! responsible for their infrastructure.
//!
//! All tables sit behind one mutex. It is only held to read or update the
//! tables, never while a service is called.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::domain::ids::{BackendId, OperatorId, SessionId};
use crate::domain::ports::{
    AuthorizationService, BackendResult, ProviderSettings, RemoteChargingBackend,
};
use crate::domain::requests::{AuthorizeStartRequest, AuthorizeStopRequest, CallContext};
use crate::domain::results::{
    AuthStartResult, AuthStartResultKind, AuthStopResult, AuthStopResultKind, SendCdrResult,
    SendCdrResultKind,
};
use crate::domain::session::ChargeDetailRecord;
use crate::shared::{DomainError, DomainResult};

#[derive(Clone)]
struct AuthEntry {
    priority: u32,
    sequence: u64,
    service: Arc<dyn AuthorizationService>,
    settings: ProviderSettings,
}

#[derive(Default)]
struct RouterTables {
    services: Vec<AuthEntry>,
    next_sequence: u64,
    session_affinity: HashMap<SessionId, BackendId>,
    remote_backends: HashMap<OperatorId, Arc<dyn RemoteChargingBackend>>,
}

impl RouterTables {
    /// Services in call order, the affine one first when it is still
    /// registered.
    fn call_order(&self, affine: Option<&BackendId>) -> Vec<AuthEntry> {
        let mut order = self.services.clone();
        if let Some(affine) = affine {
            if let Some(pos) = order.iter().position(|e| e.service.id() == affine) {
                let first = order.remove(pos);
                order.insert(0, first);
            }
        }
        order
    }
}

#[derive(Default)]
pub struct RequestRouter {
    tables: Mutex<RouterTables>,
}

pub type SharedRequestRouter = Arc<RequestRouter>;

impl RequestRouter {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Registration ───────────────────────────────────────────

    /// Register an authorization service. Lower `priority` is asked first;
    /// equal priorities keep registration order.
    pub fn register_authorization_service(
        &self,
        priority: u32,
        service: Arc<dyn AuthorizationService>,
        settings: ProviderSettings,
    ) -> DomainResult<()> {
        let mut tables = self.tables.lock();
        if tables.services.iter().any(|e| e.service.id() == service.id()) {
            return Err(DomainError::Conflict(format!(
                "authorization service '{}' already registered",
                service.id()
            )));
        }

        let sequence = tables.next_sequence;
        tables.next_sequence += 1;
        info!(backend_id = %service.id(), priority, "Authorization service registered");
        tables.services.push(AuthEntry {
            priority,
            sequence,
            service,
            settings,
        });
        tables
            .services
            .sort_by_key(|e| (e.priority, e.sequence));
        Ok(())
    }

    pub fn unregister_authorization_service(&self, id: &BackendId) -> bool {
        let mut tables = self.tables.lock();
        let before = tables.services.len();
        tables.services.retain(|e| e.service.id() != id);
        tables.session_affinity.retain(|_, backend| backend != id);
        before != tables.services.len()
    }

    /// Registered services in call order.
    pub fn authorization_services(&self) -> Vec<BackendId> {
        self.tables
            .lock()
            .services
            .iter()
            .map(|e| e.service.id().clone())
            .collect()
    }

    pub fn set_provider_settings(&self, id: &BackendId, settings: ProviderSettings) -> bool {
        let mut tables = self.tables.lock();
        match tables.services.iter_mut().find(|e| e.service.id() == id) {
            Some(entry) => {
                entry.settings = settings;
                true
            }
            None => false,
        }
    }

    pub fn register_remote_backend(
        &self,
        operator_id: OperatorId,
        backend: Arc<dyn RemoteChargingBackend>,
    ) {
        info!(%operator_id, backend_id = %backend.id(), "Remote back-end registered");
        self.tables
            .lock()
            .remote_backends
            .insert(operator_id, backend);
    }

    pub fn remove_remote_backend(
        &self,
        operator_id: &OperatorId,
    ) -> Option<Arc<dyn RemoteChargingBackend>> {
        self.tables.lock().remote_backends.remove(operator_id)
    }

    /// Remote back-end responsible for `operator_id`.
    pub fn remote_backend_for(
        &self,
        operator_id: &OperatorId,
    ) -> Option<Arc<dyn RemoteChargingBackend>> {
        self.tables.lock().remote_backends.get(operator_id).cloned()
    }

    /// Every distinct remote back-end, in back-end id order.
    pub fn remote_backends(&self) -> Vec<Arc<dyn RemoteChargingBackend>> {
        let mut backends: Vec<Arc<dyn RemoteChargingBackend>> = Vec::new();
        for backend in self.tables.lock().remote_backends.values() {
            if !backends.iter().any(|b| b.id() == backend.id()) {
                backends.push(Arc::clone(backend));
            }
        }
        backends.sort_by(|a, b| a.id().cmp(b.id()));
        backends
    }

    /// Service that authorized `session_id`, while its record is pending.
    pub fn session_backend(&self, session_id: &SessionId) -> Option<BackendId> {
        self.tables.lock().session_affinity.get(session_id).cloned()
    }

    fn remember_session(&self, session_id: SessionId, backend: BackendId) {
        debug!(%session_id, backend_id = %backend, "Session affinity recorded");
        self.tables
            .lock()
            .session_affinity
            .insert(session_id, backend);
    }

    fn forget_session(&self, session_id: &SessionId) {
        self.tables.lock().session_affinity.remove(session_id);
    }

    // ── Routing ────────────────────────────────────────────────

    /// Ask each service in priority order. The first `Authorized` answer
    /// wins and its session is pinned to that service; `Blocked` ends the
    /// search.
    pub async fn authorize_start(&self, request: &AuthorizeStartRequest) -> AuthStartResult {
        let start = Instant::now();
        let order = self.tables.lock().call_order(None);
        let mut contacted = 0usize;

        for entry in order {
            if entry.settings.disable_authentication {
                debug!(backend_id = %entry.service.id(), "Authentication disabled, skipping");
                continue;
            }
            if request.context.is_cancelled() {
                let result = AuthStartResult::new(AuthStartResultKind::Error)
                    .with_message("operation cancelled");
                return finish_start(result, start);
            }
            contacted += 1;

            let backend_id = entry.service.id().clone();
            let Some(mut result) = call_service(
                &backend_id,
                "authorize_start",
                entry.service.authorize_start(request),
                &request.context,
            )
            .await
            else {
                continue;
            };

            match result.kind {
                AuthStartResultKind::Authorized => {
                    let session_id = result
                        .session_id
                        .clone()
                        .or_else(|| request.session_id.clone())
                        .unwrap_or_else(SessionId::generate);
                    self.remember_session(session_id.clone(), backend_id.clone());
                    info!(
                        backend_id = %backend_id,
                        session_id = %session_id,
                        "Charging authorized"
                    );
                    result.session_id = Some(session_id);
                    result.backend_id = Some(backend_id);
                    return finish_start(result, start);
                }
                AuthStartResultKind::Blocked => {
                    info!(backend_id = %backend_id, "Authentication token blocked");
                    result.backend_id = Some(backend_id);
                    return finish_start(result, start);
                }
                _ => {}
            }
        }

        let result = if contacted == 0 && !self.tables.lock().services.is_empty() {
            AuthStartResult::new(AuthStartResultKind::OutOfService)
                .with_message("authentication disabled for every service")
        } else {
            AuthStartResult::not_authorized()
        };
        finish_start(result, start)
    }

    /// The service that authorized the start is asked first, the others
    /// afterwards in priority order.
    pub async fn authorize_stop(&self, request: &AuthorizeStopRequest) -> AuthStopResult {
        let start = Instant::now();
        let affine = self.session_backend(&request.session_id);
        let order = self.tables.lock().call_order(affine.as_ref());
        let mut contacted = 0usize;

        for entry in order {
            if entry.settings.disable_authentication {
                continue;
            }
            if request.context.is_cancelled() {
                let result = AuthStopResult::new(AuthStopResultKind::Error, request.session_id.clone())
                    .with_message("operation cancelled");
                return finish_stop(result, start);
            }
            contacted += 1;

            let backend_id = entry.service.id().clone();
            let Some(mut result) = call_service(
                &backend_id,
                "authorize_stop",
                entry.service.authorize_stop(request),
                &request.context,
            )
            .await
            else {
                continue;
            };

            if result.is_authorized() {
                if affine.as_ref() != Some(&backend_id) {
                    self.remember_session(request.session_id.clone(), backend_id.clone());
                }
                result.backend_id = Some(backend_id);
                return finish_stop(result, start);
            }
        }

        let kind = if contacted == 0 && !self.tables.lock().services.is_empty() {
            AuthStopResultKind::OutOfService
        } else {
            AuthStopResultKind::NotAuthorized
        };
        finish_stop(AuthStopResult::new(kind, request.session_id.clone()), start)
    }

    /// Deliver a record to the service that authorized its session, then to
    /// the others. Delivery ends the session's affinity.
    pub async fn send_charge_detail_record(
        &self,
        record: &ChargeDetailRecord,
        context: &CallContext,
    ) -> SendCdrResult {
        let start = Instant::now();
        let session_id = &record.session_id;
        let affine = self.session_backend(session_id);
        let order = self.tables.lock().call_order(affine.as_ref());
        let mut contacted = 0usize;

        for entry in order {
            if entry.settings.disable_send_charge_detail_records {
                debug!(backend_id = %entry.service.id(), "Record forwarding disabled, skipping");
                continue;
            }
            if context.is_cancelled() {
                let result = SendCdrResult::new(SendCdrResultKind::Error, session_id.clone())
                    .with_message("operation cancelled");
                return finish_cdr(result, start);
            }
            contacted += 1;

            let backend_id = entry.service.id().clone();
            let Some(mut result) = call_service(
                &backend_id,
                "send_charge_detail_record",
                entry.service.send_charge_detail_record(record, context),
                context,
            )
            .await
            else {
                continue;
            };

            if result.is_forwarded() {
                self.forget_session(session_id);
                info!(backend_id = %backend_id, %session_id, "Charge detail record forwarded");
                result.backend_id = Some(backend_id);
                return finish_cdr(result, start);
            }
        }

        let kind = if contacted == 0 && !self.tables.lock().services.is_empty() {
            SendCdrResultKind::OutOfService
        } else {
            SendCdrResultKind::NotForwarded
        };
        warn!(%session_id, outcome = kind.as_str(), "Charge detail record not forwarded");
        finish_cdr(SendCdrResult::new(kind, session_id.clone()), start)
    }
}

/// Await a service call within the caller's limits. Failures are logged and
/// turn into `None` so the router moves on to the next service.
async fn call_service<T, F>(
    backend_id: &BackendId,
    operation: &'static str,
    call: F,
    context: &CallContext,
) -> Option<T>
where
    F: Future<Output = BackendResult<T>>,
{
    let guarded = AssertUnwindSafe(call).catch_unwind();
    let outcome = match context.timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%backend_id, operation, timeout_ms = limit.as_millis() as u64, "Service timed out");
                return None;
            }
        },
        None => guarded.await,
    };

    match outcome {
        Ok(Ok(result)) => Some(result),
        Ok(Err(e)) => {
            warn!(%backend_id, operation, error = %e, "Service call failed");
            None
        }
        Err(_) => {
            warn!(%backend_id, operation, "Service panicked");
            None
        }
    }
}

fn finish_start(mut result: AuthStartResult, start: Instant) -> AuthStartResult {
    result.runtime = start.elapsed();
    result
}

fn finish_stop(mut result: AuthStopResult, start: Instant) -> AuthStopResult {
    result.runtime = start.elapsed();
    result
}

fn finish_cdr(mut result: SendCdrResult, start: Instant) -> SendCdrResult {
    result.runtime = start.elapsed();
    result
}
