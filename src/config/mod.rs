use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::Duration,
};

use directories::BaseDirs;

use crate::execution::python::PythonLauncher;
use crate::runtime::EngineLocation;
use crate::staging::TierPlan;

pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_BASELINE_PACKAGES: &[&str] = &["numpy", "pandas"];
pub const DEFAULT_ON_DEMAND_PACKAGES: &[&str] = &["matplotlib", "seaborn"];

/// Everything a session needs, frozen at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub location: EngineLocation,
    pub tiers: TierPlan,
    /// `None` lets a guest program run for as long as it likes.
    pub execution_timeout: Option<Duration>,
}

impl HarnessConfig {
    pub fn new(location: EngineLocation, tiers: TierPlan) -> Self {
        Self { location, tiers, execution_timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout = timeout;
        self
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new(
            EngineLocation::new(DEFAULT_PYTHON),
            TierPlan::new(
                DEFAULT_BASELINE_PACKAGES.iter().copied(),
                DEFAULT_ON_DEMAND_PACKAGES.iter().copied(),
            ),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(default_config_path())
    }

    pub fn load_from(config_path: PathBuf) -> Self {
        let mut map = default_map();

        // Read .guestrunrc if exists
        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(Result::ok) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        // ENV first
        if let Ok(v) = env::var(key) {
            return Some(v);
        }
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Comma-separated list; blank entries are dropped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).filter(|v| !v.is_empty()).map(PathBuf::from)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        match self.get_u64("GUESTRUN_EXECUTION_TIMEOUT") {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        }
    }

    pub fn harness(&self) -> HarnessConfig {
        let program = self.get("GUESTRUN_PYTHON").unwrap_or_else(|| DEFAULT_PYTHON.to_string());
        let location = EngineLocation {
            program,
            args: Vec::new(),
            working_dir: self.get_path("GUESTRUN_WORKDIR"),
        };
        let tiers = TierPlan::new(
            self.get_list("GUESTRUN_BASELINE_PACKAGES"),
            self.get_list("GUESTRUN_ONDEMAND_PACKAGES"),
        );
        HarnessConfig::new(location, tiers).with_timeout(self.execution_timeout())
    }

    pub fn python_launcher(&self) -> PythonLauncher {
        let mut launcher = PythonLauncher {
            pip_install: self.get_bool("GUESTRUN_PIP_INSTALL"),
            ..PythonLauncher::default()
        };
        if let Some(secs) = self.get_u64("GUESTRUN_STARTUP_TIMEOUT").filter(|s| *s > 0) {
            launcher.startup_timeout = Duration::from_secs(secs);
        }
        launcher
    }
}

fn is_config_key(k: &str) -> bool {
    // Accept known keys or GUESTRUN_* for forward-compat
    const KEYS: &[&str] = &["DEFAULT_COLOR"];

    KEYS.contains(&k) || k.starts_with("GUESTRUN_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("guestrun").join(".guestrunrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    // Engine
    m.insert("GUESTRUN_PYTHON".into(), DEFAULT_PYTHON.into());
    m.insert("GUESTRUN_WORKDIR".into(), String::new());

    // Package tiers
    m.insert("GUESTRUN_BASELINE_PACKAGES".into(), DEFAULT_BASELINE_PACKAGES.join(","));
    m.insert("GUESTRUN_ONDEMAND_PACKAGES".into(), DEFAULT_ON_DEMAND_PACKAGES.join(","));

    // Numbers (seconds, 0 = no limit)
    m.insert("GUESTRUN_EXECUTION_TIMEOUT".into(), "0".into());
    m.insert("GUESTRUN_STARTUP_TIMEOUT".into(), "60".into());

    // Strings
    m.insert("DEFAULT_COLOR".into(), "cyan".into());

    // Bools as strings
    m.insert("GUESTRUN_PIP_INSTALL".into(), "false".into());

    m
}

/// Read a snippet file for execution.
pub fn read_snippet(path: &Path) -> anyhow::Result<String> {
    if !path.is_file() {
        anyhow::bail!("snippet file '{}' does not exist", path.display());
    }
    fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read snippet '{}': {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rc(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".guestrunrc");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_match_compiled_in_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(dir.path().join("missing"));
        if env::vars().any(|(k, _)| k.starts_with("GUESTRUN_")) {
            return;
        }
        assert_eq!(cfg.harness(), HarnessConfig::default());
        assert!(!cfg.python_launcher().pip_install);
    }

    #[test]
    fn rc_file_overrides_defaults() {
        let (_dir, path) = rc(
            "# local setup\nGUESTRUN_ONDEMAND_PACKAGES = matplotlib, , scikit-learn\nGUESTRUN_EXECUTION_TIMEOUT=30\nGUESTRUN_PIP_INSTALL=TRUE\n",
        );
        let cfg = Config::load_from(path);
        if env::vars().any(|(k, _)| k.starts_with("GUESTRUN_")) {
            return;
        }
        let harness = cfg.harness();
        assert_eq!(harness.tiers.on_demand, vec!["matplotlib", "scikit-learn"]);
        assert_eq!(harness.tiers.baseline, vec!["numpy", "pandas"]);
        assert_eq!(harness.execution_timeout, Some(Duration::from_secs(30)));
        assert!(cfg.python_launcher().pip_install);
    }

    #[test]
    fn zero_timeout_means_none() {
        let (_dir, path) = rc("GUESTRUN_EXECUTION_TIMEOUT=0\n");
        let cfg = Config::load_from(path);
        if env::var("GUESTRUN_EXECUTION_TIMEOUT").is_ok() {
            return;
        }
        assert_eq!(cfg.execution_timeout(), None);
    }

    #[test]
    fn missing_snippet_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_snippet(&dir.path().join("nope.py")).is_err());
        let (_dir, path) = rc("'hello'\n");
        assert_eq!(read_snippet(&path).unwrap(), "'hello'\n");
    }
}
