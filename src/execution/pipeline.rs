//! Execution pipeline: stage what the request needs, run it, normalize the outcome.
//!
//! Exclusivity is enforced by the session that owns the handle; by the time
//! a request gets here it has the runtime to itself.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ExecutionRequest, ExecutionResult, TierRequirement};
use crate::artifact;
use crate::error::HarnessError;
use crate::runtime::{GuestEngine, RuntimeHandle};
use crate::staging::{self, PackageTier, TierPlan};

/// Per-request progress, reported so the session can expose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Staging(PackageTier),
    Executing,
}

fn needs_on_demand(request: &ExecutionRequest, plan: &TierPlan) -> bool {
    match request.tiers {
        TierRequirement::Auto => plan.needs_on_demand(&request.source),
        TierRequirement::BaselineOnly => false,
        TierRequirement::OnDemand => true,
    }
}

/// Run `request` against the runtime behind `handle`.
///
/// Never fails: staging errors, guest faults and timeouts all come back as
/// [`ExecutionResult::Failure`].
pub async fn execute<E: GuestEngine>(
    handle: &mut RuntimeHandle<E>,
    plan: &TierPlan,
    request: &ExecutionRequest,
    timeout: Option<Duration>,
    mut progress: impl FnMut(Step),
) -> ExecutionResult {
    if needs_on_demand(request, plan) && !handle.is_staged(PackageTier::OnDemand) {
        progress(Step::Staging(PackageTier::OnDemand));
        if let Err(err) = staging::stage(handle, PackageTier::OnDemand, plan).await {
            warn!(target: "guestrun::execution", error = %err, "execution aborted by staging failure");
            return err.into();
        }
    }

    progress(Step::Executing);
    info!(target: "guestrun::execution", bytes = request.source.len(), expectation = ?request.expectation, "running guest program");

    let run = handle.engine_mut().run(&request.source);
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(target: "guestrun::execution", ?limit, "guest program timed out");
                return HarnessError::Timeout(limit).into();
            }
        },
        None => run.await,
    };

    match outcome {
        Ok(value) => {
            debug!(target: "guestrun::execution", ?value, "guest program finished");
            ExecutionResult::Success { artifact: artifact::normalize(value, request.expectation) }
        }
        Err(fault) => {
            info!(target: "guestrun::execution", fault = %fault.description, "guest program faulted");
            HarnessError::GuestExecution(fault.description).into()
        }
    }
}
