use std::time::Duration;

use guestrun::runtime::scripted::ScriptedLauncher;
use guestrun::{
    Activity, Artifact, EngineLocation, ExecutionRequest, ExecutionResult, FailureKind, HarnessConfig,
    HarnessError, PackageTier, RuntimePhase, Session, SessionStatus, TierPlan,
};

// 1x1 transparent PNG
const PIXEL: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

fn config() -> HarnessConfig {
    HarnessConfig::new(
        EngineLocation::new("scripted"),
        TierPlan::new(["numeric-lib"], ["plotting-lib"]),
    )
}

fn session(launcher: &ScriptedLauncher) -> Session<ScriptedLauncher> {
    Session::new(launcher.clone(), config())
}

async fn ready_session(launcher: &ScriptedLauncher) -> Session<ScriptedLauncher> {
    let session = session(launcher);
    session.load().await.expect("load");
    session
}

#[tokio::test]
async fn execute_before_ready_fails_fast() {
    let launcher = ScriptedLauncher::new();
    let session = session(&launcher);

    let err = session.execute(ExecutionRequest::new("'hello'")).await.unwrap_err();

    assert_eq!(err, HarnessError::NotReady);
    assert_eq!(launcher.probe().launches(), 0);
    assert_eq!(launcher.probe().runs(), 0);
    assert!(session.last_result().is_none());
}

#[tokio::test]
async fn concurrent_loads_share_one_launch() {
    let launcher = ScriptedLauncher::new().launch_delay(Duration::from_millis(30));
    let session = session(&launcher);

    let (a, b) = tokio::join!(session.load(), session.load());
    assert!(a.is_ok() && b.is_ok());
    session.load().await.unwrap();

    assert_eq!(launcher.probe().launches(), 1);
    assert_eq!(launcher.probe().install_count("numeric-lib"), 1);
}

#[tokio::test]
async fn overlapping_executions_get_busy() {
    let launcher = ScriptedLauncher::new();
    let session = ready_session(&launcher).await;

    let (first, second) = tokio::join!(
        session.execute(ExecutionRequest::new("sleep 50\n'first'")),
        session.execute(ExecutionRequest::new("'second'")),
    );

    assert_eq!(first.unwrap(), ExecutionResult::Success { artifact: Artifact::text("first") });
    assert_eq!(second.unwrap_err(), HarnessError::Busy);
    assert_eq!(launcher.probe().runs(), 1);

    // The slot is free again once the first run resolved.
    let third = session.execute(ExecutionRequest::new("'third'")).await.unwrap();
    assert!(third.is_success());
}

#[tokio::test]
async fn text_and_image_round_trip() {
    let launcher = ScriptedLauncher::new();
    let session = ready_session(&launcher).await;

    let text = session.execute(ExecutionRequest::new("'hello'")).await.unwrap();
    assert_eq!(text, ExecutionResult::Success { artifact: Artifact::text("hello") });

    let source = format!("plot_data = '{}'\nplot_data", PIXEL);
    let image = session.execute(ExecutionRequest::new(source).expect_image()).await.unwrap();
    assert_eq!(
        image,
        ExecutionResult::Success {
            artifact: Artifact::BinaryImage { mime_type: "image/png".into(), payload: PIXEL.into() }
        }
    );
}

#[tokio::test]
async fn guest_fault_is_a_failure_and_keeps_runtime_ready() {
    let launcher = ScriptedLauncher::new();
    let session = ready_session(&launcher).await;

    let result = session.execute(ExecutionRequest::new("x = 1\nundefined_name")).await.unwrap();

    let (kind, description) = result.failure().expect("failure");
    assert_eq!(kind, FailureKind::GuestExecution);
    assert!(!description.is_empty());
    assert!(session.is_ready());
    assert_eq!(session.snapshot().phase, RuntimePhase::Ready);
    assert!(matches!(session.status(), SessionStatus::Failed(_)));
}

#[tokio::test]
async fn on_demand_tier_is_staged_once_on_first_use() {
    let launcher = ScriptedLauncher::new();
    let session = ready_session(&launcher).await;
    assert!(session.is_ready());
    assert_eq!(launcher.probe().installs(), vec!["numeric-lib"]);

    let plot = "import plotting_lib.pyplot as plt\n'drawn'";
    let first = session.execute(ExecutionRequest::new(plot)).await.unwrap();
    assert!(first.is_success());
    assert_eq!(launcher.probe().installs(), vec!["numeric-lib", "plotting-lib"]);

    let second = session.execute(ExecutionRequest::new(plot)).await.unwrap();
    assert!(second.is_success());
    assert_eq!(launcher.probe().install_count("plotting-lib"), 1);
}

#[tokio::test]
async fn programs_without_plotting_imports_skip_on_demand_staging() {
    let launcher = ScriptedLauncher::new();
    let session = ready_session(&launcher).await;

    session.execute(ExecutionRequest::new("import numeric_lib\n'ok'")).await.unwrap();

    assert_eq!(launcher.probe().install_count("plotting-lib"), 0);
}

#[tokio::test]
async fn loader_failure_leaves_session_unavailable() {
    let launcher = ScriptedLauncher::new().fail_launch("simulated network failure");
    let session = session(&launcher);

    let err = session.load().await.unwrap_err();
    assert!(matches!(err, HarnessError::RuntimeInitialization(_)));

    let state = session.snapshot();
    assert_eq!(state.phase, RuntimePhase::Unloaded);
    assert!(!state.runtime_ready);
    assert!(state.load_error.as_deref().unwrap_or_default().contains("simulated network failure"));

    assert_eq!(session.execute(ExecutionRequest::new("'x'")).await.unwrap_err(), HarnessError::NotReady);
    assert_eq!(session.stage(PackageTier::OnDemand).await.unwrap_err(), HarnessError::NotReady);
    assert!(session.load().await.is_err());

    assert_eq!(launcher.probe().launches(), 1);
    assert!(launcher.probe().installs().is_empty());
    assert_eq!(launcher.probe().runs(), 0);
    assert!(matches!(session.status(), SessionStatus::Unavailable(_)));
}

#[tokio::test]
async fn staging_failure_aborts_run_and_retries_next_time() {
    let launcher = ScriptedLauncher::new().break_package("plotting-lib");
    let session = ready_session(&launcher).await;
    let plot = "import plotting_lib\n'drawn'";

    let failed = session.execute(ExecutionRequest::new(plot)).await.unwrap();
    assert_eq!(failed.failure().map(|(k, _)| k), Some(FailureKind::PackageStaging));
    assert_eq!(launcher.probe().runs(), 0);
    assert!(session.is_ready());
    assert_eq!(session.last_result(), Some(failed));

    launcher.repair_package("plotting-lib");
    let retried = session.execute(ExecutionRequest::new(plot)).await.unwrap();
    assert_eq!(retried, ExecutionResult::Success { artifact: Artifact::text("drawn") });
    assert_eq!(launcher.probe().install_count("plotting-lib"), 2);
}

#[tokio::test(start_paused = true)]
async fn timeout_is_reported_and_runtime_survives() {
    let launcher = ScriptedLauncher::new();
    let config = config().with_timeout(Some(Duration::from_secs(2)));
    let session = Session::new(launcher.clone(), config);
    session.load().await.unwrap();

    let slow = session.execute(ExecutionRequest::new("sleep 60000\n'late'")).await.unwrap();
    assert_eq!(slow.failure().map(|(k, _)| k), Some(FailureKind::Timeout));
    assert!(session.is_ready());

    let quick = session.execute(ExecutionRequest::new("'quick'")).await.unwrap();
    assert!(quick.is_success());
}

#[tokio::test(start_paused = true)]
async fn snapshot_reports_execution_in_flight() {
    let launcher = ScriptedLauncher::new();
    let session = ready_session(&launcher).await;

    let (result, during) = tokio::join!(
        session.execute(ExecutionRequest::new("sleep 1000\n'done'")),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            (session.snapshot(), session.status())
        }
    );

    let (state, status) = during;
    assert!(state.execution_in_flight);
    assert!(!state.staging_in_flight);
    assert_eq!(status, SessionStatus::Busy(Activity::Executing));
    assert!(result.unwrap().is_success());

    let after = session.snapshot();
    assert!(!after.execution_in_flight);
    assert_eq!(session.status(), SessionStatus::Showing(Artifact::text("done")));
}

#[tokio::test]
async fn state_snapshot_serializes_for_hosts() {
    let launcher = ScriptedLauncher::new();
    let session = ready_session(&launcher).await;
    session.execute(ExecutionRequest::new("'hello'")).await.unwrap();

    let json = serde_json::to_value(session.snapshot()).unwrap();
    assert_eq!(json["phase"], "ready");
    assert_eq!(json["runtime_ready"], true);
    assert_eq!(json["last_result"]["status"], "success");
    assert_eq!(json["last_result"]["artifact"]["text"], "hello");
}
