//! Session state controller: owns the runtime handle and enforces the
//! load / stage / execute state machine.
//!
//! Runtime axis: `Unloaded -> Loading -> BaselineStaging -> Ready`. A failed
//! load drops back to `Unloaded` for good; the only retry is a new session.
//! Request axis (from `Ready` only): `Idle -> Staging -> Executing -> Idle`.
//! At most one guest operation is in flight; a second one gets
//! [`HarnessError::Busy`] instead of queueing.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{info, warn};

use crate::artifact::Artifact;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::execution::pipeline::{self, Step};
use crate::execution::{ExecutionRequest, ExecutionResult};
use crate::runtime::{loader, EngineLauncher, RuntimeHandle};
use crate::staging::{self, PackageTier, StageOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimePhase {
    #[default]
    Unloaded,
    Loading,
    BaselineStaging,
    Ready,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "activity", content = "tier", rename_all = "snake_case")]
pub enum Activity {
    #[default]
    Idle,
    Staging(PackageTier),
    Executing,
}

/// Snapshot of everything a host needs to render the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub phase: RuntimePhase,
    pub activity: Activity,
    pub runtime_ready: bool,
    pub staging_in_flight: bool,
    pub execution_in_flight: bool,
    pub last_result: Option<ExecutionResult>,
    /// Set once the loader failed; the session never becomes ready after that.
    pub load_error: Option<String>,
}

impl SessionState {
    fn set_activity(&mut self, activity: Activity) {
        self.activity = activity;
        self.staging_in_flight = matches!(activity, Activity::Staging(_));
        self.execution_in_flight = activity == Activity::Executing;
    }
}

/// What the host should show right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    NotLoaded,
    Loading,
    /// The runtime failed to come up; nothing will run in this session.
    Unavailable(String),
    Busy(Activity),
    Failed(String),
    Showing(Artifact),
    Idle,
}

pub struct Session<L: EngineLauncher> {
    config: HarnessConfig,
    launcher: L,
    runtime: OnceCell<AsyncMutex<RuntimeHandle<L::Engine>>>,
    state: Mutex<SessionState>,
}

/// Claim on the session's single operation slot; releases it on drop.
struct OperationSlot<'a> {
    state: &'a Mutex<SessionState>,
}

impl OperationSlot<'_> {
    fn set(&self, activity: Activity) {
        lock(self.state).set_activity(activity);
    }
}

impl Drop for OperationSlot<'_> {
    fn drop(&mut self) {
        lock(self.state).set_activity(Activity::Idle);
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<L: EngineLauncher> Session<L> {
    pub fn new(launcher: L, config: HarnessConfig) -> Self {
        Self {
            config,
            launcher,
            runtime: OnceCell::new(),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn snapshot(&self) -> SessionState {
        lock(&self.state).clone()
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.state).runtime_ready
    }

    pub fn last_result(&self) -> Option<ExecutionResult> {
        lock(&self.state).last_result.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let state = lock(&self.state);
        if let Some(err) = &state.load_error {
            return SessionStatus::Unavailable(err.clone());
        }
        match state.phase {
            RuntimePhase::Unloaded => return SessionStatus::NotLoaded,
            RuntimePhase::Loading | RuntimePhase::BaselineStaging => return SessionStatus::Loading,
            RuntimePhase::Ready => {}
        }
        if state.activity != Activity::Idle {
            return SessionStatus::Busy(state.activity);
        }
        match &state.last_result {
            Some(ExecutionResult::Success { artifact }) => SessionStatus::Showing(artifact.clone()),
            Some(ExecutionResult::Failure { description, .. }) => SessionStatus::Failed(description.clone()),
            None => SessionStatus::Idle,
        }
    }

    /// Bring the runtime up: launch the engine and stage the baseline tier.
    ///
    /// Concurrent callers share one load. After success this returns
    /// immediately; after a failure it returns the recorded error without
    /// launching again.
    pub async fn load(&self) -> Result<()> {
        self.runtime.get_or_try_init(|| self.bootstrap()).await.map(|_| ())
    }

    async fn bootstrap(&self) -> Result<AsyncMutex<RuntimeHandle<L::Engine>>> {
        {
            let mut state = lock(&self.state);
            if let Some(err) = &state.load_error {
                return Err(HarnessError::RuntimeInitialization(err.clone()));
            }
            state.phase = RuntimePhase::Loading;
        }

        let mut handle = match loader::load(&self.launcher, &self.config.location).await {
            Ok(handle) => handle,
            Err(err) => return Err(self.fail_load(err)),
        };

        {
            let mut state = lock(&self.state);
            state.phase = RuntimePhase::BaselineStaging;
            state.set_activity(Activity::Staging(PackageTier::Baseline));
        }
        if let Err(err) = staging::stage(&mut handle, PackageTier::Baseline, &self.config.tiers).await {
            return Err(self.fail_load(err));
        }

        {
            let mut state = lock(&self.state);
            state.phase = RuntimePhase::Ready;
            state.runtime_ready = true;
            state.set_activity(Activity::Idle);
        }
        info!(target: "guestrun::session", "guest runtime ready");
        Ok(AsyncMutex::new(handle))
    }

    fn fail_load(&self, err: HarnessError) -> HarnessError {
        warn!(target: "guestrun::session", error = %err, "session will stay unavailable");
        let mut state = lock(&self.state);
        state.phase = RuntimePhase::Unloaded;
        state.set_activity(Activity::Idle);
        state.load_error = Some(err.to_string());
        err
    }

    fn claim(&self, activity: Activity) -> Result<OperationSlot<'_>> {
        let mut state = lock(&self.state);
        if !state.runtime_ready {
            return Err(HarnessError::NotReady);
        }
        if state.activity != Activity::Idle {
            info!(target: "guestrun::session", current = ?state.activity, "rejecting overlapping operation");
            return Err(HarnessError::Busy);
        }
        state.set_activity(activity);
        Ok(OperationSlot { state: &self.state })
    }

    /// Stage `tier` ahead of time, e.g. to pre-warm the on-demand packages.
    pub async fn stage(&self, tier: PackageTier) -> Result<StageOutcome> {
        let runtime = self.runtime.get().ok_or(HarnessError::NotReady)?;
        let _slot = self.claim(Activity::Staging(tier))?;
        let mut handle = runtime.try_lock().map_err(|_| HarnessError::Busy)?;
        staging::stage(&mut handle, tier, &self.config.tiers).await
    }

    /// Run one request. `Err` is reserved for `NotReady` and `Busy`, neither
    /// of which touches the guest runtime; everything else, including guest
    /// faults, comes back as an [`ExecutionResult`] and becomes the last result.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let runtime = self.runtime.get().ok_or(HarnessError::NotReady)?;
        let slot = self.claim(Activity::Executing)?;
        let mut handle = runtime.try_lock().map_err(|_| HarnessError::Busy)?;

        let result = pipeline::execute(
            &mut handle,
            &self.config.tiers,
            &request,
            self.config.execution_timeout,
            |step| match step {
                Step::Staging(tier) => slot.set(Activity::Staging(tier)),
                Step::Executing => slot.set(Activity::Executing),
            },
        )
        .await;
        drop(handle);

        lock(&self.state).last_result = Some(result.clone());
        drop(slot);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::scripted::ScriptedLauncher;
    use crate::runtime::EngineLocation;
    use crate::staging::TierPlan;

    fn session(launcher: ScriptedLauncher) -> Session<ScriptedLauncher> {
        let config = HarnessConfig::new(EngineLocation::new("scripted"), TierPlan::new(["numeric-lib"], ["plotting-lib"]));
        Session::new(launcher, config)
    }

    #[tokio::test]
    async fn starts_unloaded() {
        let session = session(ScriptedLauncher::new());
        let state = session.snapshot();
        assert_eq!(state.phase, RuntimePhase::Unloaded);
        assert!(!state.runtime_ready);
        assert_eq!(session.status(), SessionStatus::NotLoaded);
    }

    #[tokio::test]
    async fn load_reaches_ready_and_stages_baseline() {
        let launcher = ScriptedLauncher::new();
        let session = session(launcher.clone());
        session.load().await.unwrap();

        let state = session.snapshot();
        assert_eq!(state.phase, RuntimePhase::Ready);
        assert!(state.runtime_ready);
        assert_eq!(state.activity, Activity::Idle);
        assert_eq!(launcher.probe().installs(), vec!["numeric-lib"]);
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn baseline_failure_is_fatal_to_readiness() {
        let launcher = ScriptedLauncher::new().break_package("numeric-lib");
        let session = session(launcher.clone());

        let err = session.load().await.unwrap_err();
        assert!(matches!(err, HarnessError::PackageStaging { .. }));

        launcher.repair_package("numeric-lib");
        let err = session.load().await.unwrap_err();
        assert!(matches!(err, HarnessError::RuntimeInitialization(_)));
        assert_eq!(launcher.probe().launches(), 1);
        assert!(matches!(session.status(), SessionStatus::Unavailable(_)));
    }

    #[tokio::test]
    async fn stage_requires_ready_runtime() {
        let session = session(ScriptedLauncher::new());
        assert_eq!(session.stage(PackageTier::OnDemand).await.unwrap_err(), HarnessError::NotReady);
    }

    #[tokio::test]
    async fn prewarm_makes_later_execution_skip_staging() {
        let launcher = ScriptedLauncher::new();
        let session = session(launcher.clone());
        session.load().await.unwrap();

        assert_eq!(session.stage(PackageTier::OnDemand).await.unwrap(), StageOutcome::Installed(1));
        let result = session.execute(ExecutionRequest::new("import plotting_lib\n'ok'")).await.unwrap();
        assert!(result.is_success());
        assert_eq!(launcher.probe().install_count("plotting-lib"), 1);
    }

    #[tokio::test]
    async fn failure_replaces_previous_success() {
        let session = session(ScriptedLauncher::new());
        session.load().await.unwrap();

        session.execute(ExecutionRequest::new("'first'")).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Showing(Artifact::text("first")));

        session.execute(ExecutionRequest::new("raise ValueError: bad")).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Failed("ValueError: bad".into()));
        assert!(session.is_ready());
    }
}
