//! Remote-then-local command dispatch
//!
//! Station, operator and network share one strategy for reserve,
//! cancel-reservation, remote-start and remote-stop:
//!
//! 1. a non-operational dispatcher answers `OutOfService` without dispatching;
//! 2. a configured remote back-end is asked first, bounded by the caller's
//!    timeout and cancellation token;
//! 3. without a back-end, or when it could not resolve the target or failed,
//!    the command is resolved locally;
//! 4. a returned session without an owner is bound to the dispatcher.
//!
//! Cancellation ends the command with an `Error` result and no local
//! fallback. Every dispatch publishes a request and a completion event and
//! records latency metrics.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use chrono::Utc;
use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::application::fleet::EntityCore;
use crate::domain::events::{CommandCompletedEvent, CommandKind, CommandRequestedEvent};
use crate::domain::ids::EntityId;
use crate::domain::ports::BackendResult;
use crate::domain::requests::CallContext;
use crate::domain::results::CommandOutcome;

fn record_dispatch(command: CommandKind, outcome: &'static str, start: Instant) {
    let duration = start.elapsed().as_secs_f64();
    metrics::histogram!(
        "fleet_dispatch_latency_seconds",
        "command" => command.as_str(),
        "outcome" => outcome
    )
    .record(duration);
    metrics::counter!(
        "fleet_dispatch_total",
        "command" => command.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

enum RemoteOutcome<R> {
    Answered(R),
    Cancelled,
}

/// Await a back-end call with the caller's limits. Errors, panics and
/// timeouts all become `Error` results.
async fn call_remote<R, F>(call: F, context: &CallContext) -> RemoteOutcome<R>
where
    R: CommandOutcome,
    F: Future<Output = BackendResult<R>>,
{
    let guarded = AssertUnwindSafe(call).catch_unwind();
    let bounded = async {
        match context.timeout {
            Some(limit) => tokio::time::timeout(limit, guarded).await.ok(),
            None => Some(guarded.await),
        }
    };

    let finished = match &context.cancellation {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => return RemoteOutcome::Cancelled,
            finished = bounded => finished,
        },
        None => bounded.await,
    };

    let result = match finished {
        None => R::error(format!(
            "remote call timed out after {:?}",
            context.timeout.unwrap_or_default()
        )),
        Some(Err(_panic)) => R::error("remote back-end panicked"),
        Some(Ok(Err(e))) => R::error(e.to_string()),
        Some(Ok(Ok(result))) => result,
    };
    RemoteOutcome::Answered(result)
}

pub(crate) async fn remote_then_local<Id, R, F, L>(
    dispatcher: &EntityCore<Id>,
    command: CommandKind,
    target: String,
    context: &CallContext,
    remote: Option<F>,
    local: L,
) -> R
where
    Id: EntityId,
    R: CommandOutcome,
    F: Future<Output = BackendResult<R>>,
    L: FnOnce() -> R,
{
    let start = Instant::now();
    let entity = dispatcher.entity_ref();

    dispatcher
        .events()
        .command_requested
        .publish(&CommandRequestedEvent {
            timestamp: context.timestamp,
            event_tracking_id: context.event_tracking_id.clone(),
            entity: entity.clone(),
            command,
            target: target.clone(),
        });

    let mut result = if !dispatcher.is_operational() {
        R::out_of_service()
    } else if context.is_cancelled() {
        R::error("operation cancelled")
    } else {
        match remote {
            Some(call) => match call_remote(call, context).await {
                RemoteOutcome::Cancelled => {
                    debug!(%entity, %command, %target, "Dispatch cancelled");
                    R::error("operation cancelled")
                }
                RemoteOutcome::Answered(answer) if answer.allows_local_fallback() => {
                    debug!(
                        %entity,
                        %command,
                        %target,
                        remote_outcome = answer.outcome(),
                        "Remote back-end declined, resolving locally"
                    );
                    local()
                }
                RemoteOutcome::Answered(answer) => answer,
            },
            None => local(),
        }
    };

    if result.is_success() {
        result.bind_session_owner(&entity);
    } else if let Some(message) = result.message() {
        warn!(
            %entity,
            %command,
            %target,
            outcome = result.outcome(),
            detail = message,
            "Command failed"
        );
    }

    let runtime = start.elapsed();
    result.set_runtime(runtime);

    dispatcher
        .events()
        .command_completed
        .publish(&CommandCompletedEvent {
            timestamp: Utc::now().max(context.timestamp),
            event_tracking_id: context.event_tracking_id.clone(),
            entity,
            command,
            target,
            outcome: result.outcome().to_string(),
            runtime,
        });
    record_dispatch(command, result.outcome(), start);

    result
}
