//! Token whitelist authorization service
//!
//! Answers authorization requests from an in-memory token list and accepts
//! the charge detail records of the sessions it authorized. Useful as the
//! lowest-priority service of a router or as the only one of a standalone
//! deployment.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::domain::ids::{AuthToken, BackendId, SessionId};
use crate::domain::ports::{AuthorizationService, BackendResult};
use crate::domain::requests::{AuthorizeStartRequest, AuthorizeStopRequest, CallContext};
use crate::domain::results::{
    AuthStartResult, AuthStartResultKind, AuthStopResult, AuthStopResultKind, SendCdrResult,
    SendCdrResultKind,
};
use crate::domain::session::ChargeDetailRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Allowed,
    Blocked,
}

pub struct LocalAuthorizationService {
    id: BackendId,
    tokens: DashMap<AuthToken, TokenState>,
    /// Sessions authorized here and the token that started them
    sessions: DashMap<SessionId, AuthToken>,
    records: DashMap<SessionId, ChargeDetailRecord>,
}

impl LocalAuthorizationService {
    pub fn new(id: BackendId) -> Self {
        Self {
            id,
            tokens: DashMap::new(),
            sessions: DashMap::new(),
            records: DashMap::new(),
        }
    }

    pub fn with_tokens(
        id: BackendId,
        allowed: impl IntoIterator<Item = AuthToken>,
        blocked: impl IntoIterator<Item = AuthToken>,
    ) -> Self {
        let service = Self::new(id);
        for token in allowed {
            service.allow_token(token);
        }
        for token in blocked {
            service.block_token(token);
        }
        service
    }

    pub fn allow_token(&self, token: AuthToken) {
        self.tokens.insert(token, TokenState::Allowed);
    }

    pub fn block_token(&self, token: AuthToken) {
        self.tokens.insert(token, TokenState::Blocked);
    }

    pub fn remove_token(&self, token: &AuthToken) -> bool {
        self.tokens.remove(token).is_some()
    }

    pub fn token_state(&self, token: &AuthToken) -> Option<TokenState> {
        self.tokens.get(token).map(|state| *state)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Charge detail record received for `session_id`, if any.
    pub fn record(&self, session_id: &SessionId) -> Option<ChargeDetailRecord> {
        self.records.get(session_id).map(|r| r.clone())
    }
}

#[async_trait]
impl AuthorizationService for LocalAuthorizationService {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn authorize_start(
        &self,
        request: &AuthorizeStartRequest,
    ) -> BackendResult<AuthStartResult> {
        match self.token_state(&request.auth_token) {
            Some(TokenState::Allowed) => {
                let session_id = request
                    .session_id
                    .clone()
                    .unwrap_or_else(SessionId::generate);
                self.sessions
                    .insert(session_id.clone(), request.auth_token.clone());
                debug!(backend_id = %self.id, %session_id, "Local token accepted");
                Ok(AuthStartResult::authorized(Some(session_id)))
            }
            Some(TokenState::Blocked) => {
                info!(backend_id = %self.id, token = %request.auth_token, "Blocked token presented");
                Ok(AuthStartResult::new(AuthStartResultKind::Blocked)
                    .with_message("token is blocked"))
            }
            None => Ok(AuthStartResult::not_authorized().with_message("unknown token")),
        }
    }

    /// Only the token that started a session may stop it.
    async fn authorize_stop(&self, request: &AuthorizeStopRequest) -> BackendResult<AuthStopResult> {
        let session_id = request.session_id.clone();
        let Some(started_with) = self.sessions.get(&session_id).map(|t| t.clone()) else {
            return Ok(AuthStopResult::new(AuthStopResultKind::InvalidSessionId, session_id));
        };

        let kind = if started_with == request.auth_token
            && self.token_state(&request.auth_token) == Some(TokenState::Allowed)
        {
            AuthStopResultKind::Authorized
        } else {
            AuthStopResultKind::NotAuthorized
        };
        Ok(AuthStopResult::new(kind, session_id))
    }

    async fn send_charge_detail_record(
        &self,
        record: &ChargeDetailRecord,
        _context: &CallContext,
    ) -> BackendResult<SendCdrResult> {
        let session_id = record.session_id.clone();
        if self.sessions.remove(&session_id).is_none() {
            return Ok(SendCdrResult::new(SendCdrResultKind::NotForwarded, session_id)
                .with_message("session was not authorized here"));
        }

        info!(
            backend_id = %self.id,
            %session_id,
            energy_kwh = %record.energy_kwh,
            "Charge detail record accepted"
        );
        self.records.insert(session_id.clone(), record.clone());
        Ok(SendCdrResult::new(SendCdrResultKind::Forwarded, session_id))
    }
}
