//! guestrun: run editable data-analysis snippets inside an embedded guest interpreter.
//!
//! A [`Session`] owns the single guest runtime of a host. It launches the
//! engine once, stages the baseline packages before reporting ready, stages
//! the heavier on-demand packages the first time a program needs them, and
//! runs one program at a time, returning a serializable [`ExecutionResult`].

pub mod artifact;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod printer;
pub mod process;
pub mod runtime;
pub mod session;
pub mod snippets;
pub mod staging;

pub use artifact::{Artifact, ArtifactExpectation};
pub use config::{Config, HarnessConfig};
pub use error::HarnessError;
pub use execution::python::{PythonEngine, PythonLauncher};
pub use execution::{ExecutionRequest, ExecutionResult, FailureKind, TierRequirement};
pub use runtime::{EngineLauncher, EngineLocation, GuestEngine, GuestFault, GuestValue, RuntimeHandle};
pub use session::{Activity, RuntimePhase, Session, SessionState, SessionStatus};
pub use staging::{PackageTier, StageOutcome, TierPlan};
