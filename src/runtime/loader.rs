//! Guest runtime loader: one launch attempt, mapped onto the harness taxonomy.

use tracing::{info, warn};

use super::{EngineLauncher, EngineLocation, RuntimeHandle};
use crate::error::{HarnessError, Result};

/// Launch the engine at `location` and wrap it in a fresh handle.
///
/// This performs exactly one launch. Once-per-session semantics are the
/// session's job.
pub async fn load<L: EngineLauncher>(
    launcher: &L,
    location: &EngineLocation,
) -> Result<RuntimeHandle<L::Engine>> {
    info!(target: "guestrun::loader", program = %location.program, "launching guest runtime");
    match launcher.launch(location).await {
        Ok(engine) => {
            info!(target: "guestrun::loader", "guest runtime launched");
            Ok(RuntimeHandle::new(engine))
        }
        Err(err) => {
            warn!(target: "guestrun::loader", error = %format!("{:#}", err), "guest runtime failed to launch");
            Err(HarnessError::RuntimeInitialization(format!("{:#}", err)))
        }
    }
}
