//! Package stager: installs a tier's packages into the guest runtime, once per handle.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};
use crate::runtime::{GuestEngine, RuntimeHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageTier {
    /// Installed during load, before the runtime is reported ready.
    Baseline,
    /// Installed by the first execution that needs it.
    OnDemand,
}

impl std::fmt::Display for PackageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageTier::Baseline => f.write_str("baseline"),
            PackageTier::OnDemand => f.write_str("on-demand"),
        }
    }
}

/// Ordered package lists per tier. Later packages may assume earlier ones are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPlan {
    pub baseline: Vec<String>,
    pub on_demand: Vec<String>,
}

impl TierPlan {
    pub fn new<S: Into<String>>(
        baseline: impl IntoIterator<Item = S>,
        on_demand: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            baseline: baseline.into_iter().map(Into::into).collect(),
            on_demand: on_demand.into_iter().map(Into::into).collect(),
        }
    }

    pub fn packages(&self, tier: PackageTier) -> &[String] {
        match tier {
            PackageTier::Baseline => &self.baseline,
            PackageTier::OnDemand => &self.on_demand,
        }
    }

    /// Whether `source` imports any module provided by the on-demand tier.
    pub fn needs_on_demand(&self, source: &str) -> bool {
        let imported = imported_modules(source);
        self.on_demand
            .iter()
            .any(|p| imported.contains(&module_name(p).to_ascii_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Installed(usize),
    AlreadyStaged,
}

const MODULE_ALIASES: &[(&str, &str)] = &[
    ("scikit-learn", "sklearn"),
    ("scikit-image", "skimage"),
    ("pillow", "PIL"),
    ("beautifulsoup4", "bs4"),
    ("pyyaml", "yaml"),
    ("python-dateutil", "dateutil"),
    ("opencv-python", "cv2"),
];

/// Import name of a package identifier.
pub fn module_name(package: &str) -> String {
    let lower = package.trim().to_ascii_lowercase();
    MODULE_ALIASES
        .iter()
        .find(|(pkg, _)| *pkg == lower)
        .map(|(_, module)| (*module).to_string())
        .unwrap_or_else(|| lower.replace('-', "_"))
}

/// Top-level module names named by `import` / `from ... import` statements in `source`.
pub fn imported_modules(source: &str) -> BTreeSet<String> {
    let mut modules = BTreeSet::new();
    for statement in source.lines().flat_map(|line| line.split(';')) {
        let statement = statement.trim();
        if let Some(rest) = statement.strip_prefix("import ") {
            for item in rest.split(',') {
                if let Some(root) = root_module(item) {
                    modules.insert(root);
                }
            }
        } else if let Some(rest) = statement.strip_prefix("from ") {
            if let Some(root) = root_module(rest) {
                modules.insert(root);
            }
        }
    }
    modules
}

fn root_module(fragment: &str) -> Option<String> {
    let path = fragment.split_whitespace().next()?;
    let root = path.split('.').next()?;
    if root.is_empty() {
        None
    } else {
        Some(root.to_ascii_lowercase())
    }
}

/// Install every package of `tier` into the runtime behind `handle`.
///
/// A tier that already staged on this handle is a no-op. On failure the tier
/// stays unstaged, so the next call retries all of it.
pub async fn stage<E: GuestEngine>(
    handle: &mut RuntimeHandle<E>,
    tier: PackageTier,
    plan: &TierPlan,
) -> Result<StageOutcome> {
    if handle.is_staged(tier) {
        debug!(target: "guestrun::staging", %tier, "tier already staged");
        return Ok(StageOutcome::AlreadyStaged);
    }

    let packages = plan.packages(tier);
    info!(target: "guestrun::staging", %tier, count = packages.len(), "staging tier");
    for package in packages {
        let module = module_name(package);
        debug!(target: "guestrun::staging", %package, %module, "installing package");
        if let Err(err) = handle.engine_mut().install(package, &module).await {
            warn!(target: "guestrun::staging", %tier, %package, error = %format!("{:#}", err), "package install failed");
            return Err(HarnessError::PackageStaging {
                package: package.clone(),
                reason: format!("{:#}", err),
            });
        }
    }

    handle.mark_staged(tier);
    info!(target: "guestrun::staging", %tier, "tier staged");
    Ok(StageOutcome::Installed(packages.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::loader;
    use crate::runtime::scripted::ScriptedLauncher;
    use crate::runtime::EngineLocation;

    fn plan() -> TierPlan {
        TierPlan::new(["numeric-lib"], ["plotting-lib", "stats-lib"])
    }

    #[test]
    fn module_names_follow_import_conventions() {
        assert_eq!(module_name("numeric-lib"), "numeric_lib");
        assert_eq!(module_name("Matplotlib"), "matplotlib");
        assert_eq!(module_name("scikit-learn"), "sklearn");
    }

    #[test]
    fn finds_imported_modules() {
        let src = "import numpy as np\nimport os, matplotlib.pyplot as plt\nfrom seaborn import regplot\nx = 1";
        let found = imported_modules(src);
        assert!(found.contains("numpy"));
        assert!(found.contains("os"));
        assert!(found.contains("matplotlib"));
        assert!(found.contains("seaborn"));
        assert_eq!(found.len(), 4);

        let found = imported_modules("import numpy as np; import matplotlib.pyplot as plt");
        assert!(found.contains("matplotlib"));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn on_demand_detection() {
        let plan = plan();
        assert!(plan.needs_on_demand("import plotting_lib.pyplot as plt"));
        assert!(plan.needs_on_demand("from stats_lib import fit"));
        assert!(!plan.needs_on_demand("import numeric_lib\n'plotting_lib'"));
        assert!(plan.needs_on_demand("x = 1; from plotting_lib import pyplot"));
    }

    #[tokio::test]
    async fn staging_twice_installs_once() {
        let launcher = ScriptedLauncher::new();
        let mut handle = loader::load(&launcher, &EngineLocation::new("scripted")).await.unwrap();

        let first = stage(&mut handle, PackageTier::OnDemand, &plan()).await.unwrap();
        let second = stage(&mut handle, PackageTier::OnDemand, &plan()).await.unwrap();

        assert_eq!(first, StageOutcome::Installed(2));
        assert_eq!(second, StageOutcome::AlreadyStaged);
        assert_eq!(launcher.probe().installs(), vec!["plotting-lib", "stats-lib"]);
    }

    #[tokio::test]
    async fn failed_tier_is_retried_in_full() {
        let launcher = ScriptedLauncher::new().break_package("stats-lib");
        let mut handle = loader::load(&launcher, &EngineLocation::new("scripted")).await.unwrap();

        let err = stage(&mut handle, PackageTier::OnDemand, &plan()).await.unwrap_err();
        assert!(matches!(err, HarnessError::PackageStaging { ref package, .. } if package == "stats-lib"));
        assert!(!handle.is_staged(PackageTier::OnDemand));

        launcher.repair_package("stats-lib");
        let outcome = stage(&mut handle, PackageTier::OnDemand, &plan()).await.unwrap();
        assert_eq!(outcome, StageOutcome::Installed(2));
        assert_eq!(
            launcher.probe().installs(),
            vec!["plotting-lib", "stats-lib", "plotting-lib", "stats-lib"]
        );
    }

    #[tokio::test]
    async fn empty_tier_stages_trivially() {
        let launcher = ScriptedLauncher::new();
        let mut handle = loader::load(&launcher, &EngineLocation::new("scripted")).await.unwrap();
        let outcome = stage(&mut handle, PackageTier::Baseline, &TierPlan::default()).await.unwrap();
        assert_eq!(outcome, StageOutcome::Installed(0));
        assert!(handle.is_staged(PackageTier::Baseline));
    }
}
