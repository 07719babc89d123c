//! Discriminated command outcomes. Every public command returns one of
//! these; none of them is an `Err`.

use std::time::Duration;

use serde::Serialize;

use crate::domain::ids::{BackendId, EntityRef, SessionId};
use crate::domain::reservation::{CancellationReason, Reservation};
use crate::domain::session::{ChargeDetailRecord, ChargingSession};

/// Classification shared by the remote-then-local dispatcher.
pub trait CommandOutcome: Sized {
    /// Back-end failure, timeout, or cancellation.
    fn error(message: impl Into<String>) -> Self;
    /// Target entity is administratively disabled.
    fn out_of_service() -> Self;
    /// Target could not be resolved locally.
    fn unresolved() -> Self;
    /// Remote answer that warrants trying the local path.
    fn allows_local_fallback(&self) -> bool;
    fn is_success(&self) -> bool;
    fn outcome(&self) -> &'static str;
    fn message(&self) -> Option<&str>;
    fn set_runtime(&mut self, runtime: Duration);

    /// Give a returned session an owner when it has none yet.
    fn bind_session_owner(&mut self, _owner: &EntityRef) {}

    fn with_runtime(mut self, runtime: Duration) -> Self {
        self.set_runtime(runtime);
        self
    }
}

macro_rules! result_kind {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

result_kind!(ReservationResultKind {
    Success => "success",
    UnknownLocation => "unknown_location",
    AlreadyReserved => "already_reserved",
    AlreadyInUse => "already_in_use",
    InvalidDuration => "invalid_duration",
    OutOfService => "out_of_service",
    Error => "error",
});

result_kind!(CancelReservationResultKind {
    Success => "success",
    UnknownReservationId => "unknown_reservation_id",
    OutOfService => "out_of_service",
    Error => "error",
});

result_kind!(RemoteStartResultKind {
    Success => "success",
    UnknownEVSE => "unknown_evse",
    InvalidReservationId => "invalid_reservation_id",
    Reserved => "reserved",
    AlreadyInUse => "already_in_use",
    OutOfService => "out_of_service",
    Error => "error",
});

result_kind!(RemoteStopResultKind {
    Success => "success",
    UnknownEVSE => "unknown_evse",
    InvalidSessionId => "invalid_session_id",
    OutOfService => "out_of_service",
    Error => "error",
});

result_kind!(AuthStartResultKind {
    Authorized => "authorized",
    NotAuthorized => "not_authorized",
    Blocked => "blocked",
    OutOfService => "out_of_service",
    Error => "error",
});

result_kind!(AuthStopResultKind {
    Authorized => "authorized",
    NotAuthorized => "not_authorized",
    InvalidSessionId => "invalid_session_id",
    OutOfService => "out_of_service",
    Error => "error",
});

result_kind!(SendCdrResultKind {
    Forwarded => "forwarded",
    NotForwarded => "not_forwarded",
    OutOfService => "out_of_service",
    Error => "error",
});

result_kind!(PushResultKind {
    Success => "success",
    NoOperation => "no_operation",
    OutOfService => "out_of_service",
    Error => "error",
});

// ── Reservation ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationResult {
    pub kind: ReservationResultKind,
    pub reservation: Option<Reservation>,
    pub message: Option<String>,
    pub runtime: Duration,
}

impl ReservationResult {
    pub fn new(kind: ReservationResultKind) -> Self {
        Self {
            kind,
            reservation: None,
            message: None,
            runtime: Duration::ZERO,
        }
    }

    pub fn success(reservation: Reservation) -> Self {
        Self {
            reservation: Some(reservation),
            ..Self::new(ReservationResultKind::Success)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl CommandOutcome for ReservationResult {
    fn error(message: impl Into<String>) -> Self {
        Self::new(ReservationResultKind::Error).with_message(message)
    }

    fn out_of_service() -> Self {
        Self::new(ReservationResultKind::OutOfService)
    }

    fn unresolved() -> Self {
        Self::new(ReservationResultKind::UnknownLocation)
    }

    fn allows_local_fallback(&self) -> bool {
        matches!(
            self.kind,
            ReservationResultKind::UnknownLocation | ReservationResultKind::Error
        )
    }

    fn is_success(&self) -> bool {
        self.kind == ReservationResultKind::Success
    }

    fn outcome(&self) -> &'static str {
        self.kind.as_str()
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn set_runtime(&mut self, runtime: Duration) {
        self.runtime = runtime;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelReservationResult {
    pub kind: CancelReservationResultKind,
    pub reservation: Option<Reservation>,
    pub reason: Option<CancellationReason>,
    pub message: Option<String>,
    pub runtime: Duration,
}

impl CancelReservationResult {
    pub fn new(kind: CancelReservationResultKind) -> Self {
        Self {
            kind,
            reservation: None,
            reason: None,
            message: None,
            runtime: Duration::ZERO,
        }
    }

    pub fn success(reservation: Reservation, reason: CancellationReason) -> Self {
        Self {
            reservation: Some(reservation),
            reason: Some(reason),
            ..Self::new(CancelReservationResultKind::Success)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl CommandOutcome for CancelReservationResult {
    fn error(message: impl Into<String>) -> Self {
        Self::new(CancelReservationResultKind::Error).with_message(message)
    }

    fn out_of_service() -> Self {
        Self::new(CancelReservationResultKind::OutOfService)
    }

    fn unresolved() -> Self {
        Self::new(CancelReservationResultKind::UnknownReservationId)
    }

    fn allows_local_fallback(&self) -> bool {
        matches!(
            self.kind,
            CancelReservationResultKind::UnknownReservationId | CancelReservationResultKind::Error
        )
    }

    fn is_success(&self) -> bool {
        self.kind == CancelReservationResultKind::Success
    }

    fn outcome(&self) -> &'static str {
        self.kind.as_str()
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn set_runtime(&mut self, runtime: Duration) {
        self.runtime = runtime;
    }
}

// ── Sessions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteStartResult {
    pub kind: RemoteStartResultKind,
    pub session: Option<ChargingSession>,
    pub message: Option<String>,
    pub runtime: Duration,
}

impl RemoteStartResult {
    pub fn new(kind: RemoteStartResultKind) -> Self {
        Self {
            kind,
            session: None,
            message: None,
            runtime: Duration::ZERO,
        }
    }

    pub fn success(session: ChargingSession) -> Self {
        Self {
            session: Some(session),
            ..Self::new(RemoteStartResultKind::Success)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl CommandOutcome for RemoteStartResult {
    fn error(message: impl Into<String>) -> Self {
        Self::new(RemoteStartResultKind::Error).with_message(message)
    }

    fn out_of_service() -> Self {
        Self::new(RemoteStartResultKind::OutOfService)
    }

    fn unresolved() -> Self {
        Self::new(RemoteStartResultKind::UnknownEVSE)
    }

    fn allows_local_fallback(&self) -> bool {
        matches!(
            self.kind,
            RemoteStartResultKind::UnknownEVSE | RemoteStartResultKind::Error
        )
    }

    fn is_success(&self) -> bool {
        self.kind == RemoteStartResultKind::Success
    }

    fn outcome(&self) -> &'static str {
        self.kind.as_str()
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn set_runtime(&mut self, runtime: Duration) {
        self.runtime = runtime;
    }

    fn bind_session_owner(&mut self, owner: &EntityRef) {
        if let Some(session) = self.session.as_mut() {
            session.bind_owner_if_unset(owner.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteStopResult {
    pub kind: RemoteStopResultKind,
    pub session_id: Option<SessionId>,
    pub charge_detail_record: Option<ChargeDetailRecord>,
    pub message: Option<String>,
    pub runtime: Duration,
}

impl RemoteStopResult {
    pub fn new(kind: RemoteStopResultKind) -> Self {
        Self {
            kind,
            session_id: None,
            charge_detail_record: None,
            message: None,
            runtime: Duration::ZERO,
        }
    }

    pub fn success(session_id: SessionId, record: Option<ChargeDetailRecord>) -> Self {
        Self {
            session_id: Some(session_id),
            charge_detail_record: record,
            ..Self::new(RemoteStopResultKind::Success)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl CommandOutcome for RemoteStopResult {
    fn error(message: impl Into<String>) -> Self {
        Self::new(RemoteStopResultKind::Error).with_message(message)
    }

    fn out_of_service() -> Self {
        Self::new(RemoteStopResultKind::OutOfService)
    }

    fn unresolved() -> Self {
        Self::new(RemoteStopResultKind::InvalidSessionId)
    }

    fn allows_local_fallback(&self) -> bool {
        matches!(
            self.kind,
            RemoteStopResultKind::UnknownEVSE
                | RemoteStopResultKind::InvalidSessionId
                | RemoteStopResultKind::Error
        )
    }

    fn is_success(&self) -> bool {
        self.kind == RemoteStopResultKind::Success
    }

    fn outcome(&self) -> &'static str {
        self.kind.as_str()
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn set_runtime(&mut self, runtime: Duration) {
        self.runtime = runtime;
    }
}

// ── Authorization & forwarding ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStartResult {
    pub kind: AuthStartResultKind,
    pub session_id: Option<SessionId>,
    pub backend_id: Option<BackendId>,
    pub message: Option<String>,
    pub runtime: Duration,
}

impl AuthStartResult {
    pub fn new(kind: AuthStartResultKind) -> Self {
        Self {
            kind,
            session_id: None,
            backend_id: None,
            message: None,
            runtime: Duration::ZERO,
        }
    }

    pub fn authorized(session_id: Option<SessionId>) -> Self {
        Self {
            session_id,
            ..Self::new(AuthStartResultKind::Authorized)
        }
    }

    pub fn not_authorized() -> Self {
        Self::new(AuthStartResultKind::NotAuthorized)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_authorized(&self) -> bool {
        self.kind == AuthStartResultKind::Authorized
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStopResult {
    pub kind: AuthStopResultKind,
    pub session_id: SessionId,
    pub backend_id: Option<BackendId>,
    pub message: Option<String>,
    pub runtime: Duration,
}

impl AuthStopResult {
    pub fn new(kind: AuthStopResultKind, session_id: SessionId) -> Self {
        Self {
            kind,
            session_id,
            backend_id: None,
            message: None,
            runtime: Duration::ZERO,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_authorized(&self) -> bool {
        self.kind == AuthStopResultKind::Authorized
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendCdrResult {
    pub kind: SendCdrResultKind,
    pub session_id: SessionId,
    pub backend_id: Option<BackendId>,
    pub message: Option<String>,
    pub runtime: Duration,
}

impl SendCdrResult {
    pub fn new(kind: SendCdrResultKind, session_id: SessionId) -> Self {
        Self {
            kind,
            session_id,
            backend_id: None,
            message: None,
            runtime: Duration::ZERO,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_forwarded(&self) -> bool {
        self.kind == SendCdrResultKind::Forwarded
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushResult {
    pub kind: PushResultKind,
    pub backend_id: Option<BackendId>,
    /// Number of updates the back-end accepted
    pub pushed: usize,
    pub message: Option<String>,
    pub runtime: Duration,
}

impl PushResult {
    pub fn new(kind: PushResultKind) -> Self {
        Self {
            kind,
            backend_id: None,
            pushed: 0,
            message: None,
            runtime: Duration::ZERO,
        }
    }

    pub fn success(pushed: usize) -> Self {
        Self {
            pushed,
            ..Self::new(PushResultKind::Success)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
