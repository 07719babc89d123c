//! Authorization service port
//!
//! E-mobility providers that authorize charging and receive charge detail
//! records. The request router consults them in priority order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ids::BackendId;
use crate::domain::ports::backend::BackendResult;
use crate::domain::requests::{AuthorizeStartRequest, AuthorizeStopRequest, CallContext};
use crate::domain::results::{AuthStartResult, AuthStopResult, SendCdrResult};
use crate::domain::session::ChargeDetailRecord;

#[async_trait]
pub trait AuthorizationService: Send + Sync {
    fn id(&self) -> &BackendId;

    async fn authorize_start(&self, request: &AuthorizeStartRequest)
        -> BackendResult<AuthStartResult>;

    async fn authorize_stop(&self, request: &AuthorizeStopRequest) -> BackendResult<AuthStopResult>;

    async fn send_charge_detail_record(
        &self,
        record: &ChargeDetailRecord,
        context: &CallContext,
    ) -> BackendResult<SendCdrResult>;
}

/// Per-provider kill-switches. A disabled operation is answered locally with
/// `OutOfService` and the provider is never contacted for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub disable_push_status: bool,
    pub disable_push_admin_status: bool,
    pub disable_authentication: bool,
    pub disable_send_charge_detail_records: bool,
}
