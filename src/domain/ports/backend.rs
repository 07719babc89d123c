//! Remote charging back-end port
//!
//! A back-end that can act on charging infrastructure on behalf of a station
//! or an operator. Dispatch tries it first and falls back to the local
//! hierarchy when it cannot resolve the target.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ids::{BackendId, ProviderId};
use crate::domain::requests::{
    CallContext, CancelReservationRequest, RemoteStartRequest, RemoteStopRequest, ReserveRequest,
    StatusUpdate, TransmissionMode,
};
use crate::domain::results::{
    CancelReservationResult, PushResult, PushResultKind, RemoteStartResult, RemoteStopResult,
    ReservationResult,
};
use crate::domain::session::ChargeDetailRecord;
use crate::domain::status::{AdminStatusKind, StatusKind};

/// Failure talking to a back-end.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("backend timed out")]
    Timeout,

    #[error("backend error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait RemoteChargingBackend: Send + Sync {
    fn id(&self) -> &BackendId;

    /// Provider whose kill-switches apply to pushes towards this back-end.
    fn provider_id(&self) -> Option<&ProviderId> {
        None
    }

    async fn reserve(&self, request: &ReserveRequest) -> BackendResult<ReservationResult>;

    async fn cancel_reservation(
        &self,
        request: &CancelReservationRequest,
    ) -> BackendResult<CancelReservationResult>;

    async fn remote_start(&self, request: &RemoteStartRequest) -> BackendResult<RemoteStartResult>;

    async fn remote_stop(&self, request: &RemoteStopRequest) -> BackendResult<RemoteStopResult>;

    async fn send_charge_detail_records(
        &self,
        _records: &[ChargeDetailRecord],
        _context: &CallContext,
    ) -> BackendResult<PushResult> {
        Ok(PushResult::new(PushResultKind::NoOperation))
    }

    async fn update_status(
        &self,
        _updates: &[StatusUpdate<StatusKind>],
        _mode: TransmissionMode,
        _context: &CallContext,
    ) -> BackendResult<PushResult> {
        Ok(PushResult::new(PushResultKind::NoOperation))
    }

    async fn update_admin_status(
        &self,
        _updates: &[StatusUpdate<AdminStatusKind>],
        _mode: TransmissionMode,
        _context: &CallContext,
    ) -> BackendResult<PushResult> {
        Ok(PushResult::new(PushResultKind::NoOperation))
    }
}
