//! In-memory guest engine driven by a tiny line-oriented script language.
//!
//! Hosts and tests use it to exercise the harness without a real
//! interpreter. Each non-empty line is one statement:
//!
//! - `sleep <ms>` suspends the run
//! - `raise <message>` faults with `message`
//! - `import m` / `from m import ...` faults unless `m` was installed
//! - `name = <expr>` binds a value
//! - `<expr>` evaluates; the last one is the program's trailing value
//!
//! Expressions are string literals, `None`, numbers, or bound names.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{EngineLauncher, EngineLocation, GuestEngine, GuestFault, GuestValue};

/// Counters shared between a launcher, its engines and the test observing them.
#[derive(Debug, Default)]
pub struct Probe {
    launches: AtomicUsize,
    runs: AtomicUsize,
    installs: Mutex<Vec<String>>,
}

impl Probe {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Every install attempt, in order, including failed ones.
    pub fn installs(&self) -> Vec<String> {
        self.installs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn install_count(&self, package: &str) -> usize {
        self.installs().iter().filter(|p| p.as_str() == package).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedLauncher {
    probe: Arc<Probe>,
    launch_failure: Option<String>,
    launch_delay: Option<Duration>,
    broken: Arc<Mutex<HashSet<String>>>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every launch fails with `reason`.
    pub fn fail_launch(mut self, reason: impl Into<String>) -> Self {
        self.launch_failure = Some(reason.into());
        self
    }

    pub fn launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    /// Installing `package` fails until [`ScriptedLauncher::repair_package`] is called.
    pub fn break_package(self, package: impl Into<String>) -> Self {
        self.broken.lock().unwrap_or_else(PoisonError::into_inner).insert(package.into());
        self
    }

    pub fn repair_package(&self, package: &str) {
        self.broken.lock().unwrap_or_else(PoisonError::into_inner).remove(package);
    }

    pub fn probe(&self) -> Arc<Probe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait]
impl EngineLauncher for ScriptedLauncher {
    type Engine = ScriptedEngine;

    async fn launch(&self, _location: &EngineLocation) -> Result<ScriptedEngine> {
        self.probe.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.launch_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.launch_failure {
            bail!("{}", reason);
        }
        Ok(ScriptedEngine {
            probe: Arc::clone(&self.probe),
            broken: Arc::clone(&self.broken),
            modules: HashSet::new(),
            vars: HashMap::new(),
        })
    }
}

pub struct ScriptedEngine {
    probe: Arc<Probe>,
    broken: Arc<Mutex<HashSet<String>>>,
    modules: HashSet<String>,
    vars: HashMap<String, GuestValue>,
}

impl ScriptedEngine {
    fn require(&self, module: &str) -> Result<(), GuestFault> {
        let root = module.split('.').next().unwrap_or(module);
        if self.modules.contains(root) {
            Ok(())
        } else {
            Err(GuestFault::new(format!("ModuleNotFoundError: No module named '{}'", root)))
        }
    }

    fn eval(&self, expr: &str, lineno: usize) -> Result<GuestValue, GuestFault> {
        let quoted = expr.len() >= 2
            && ((expr.starts_with('"') && expr.ends_with('"'))
                || (expr.starts_with('\'') && expr.ends_with('\'')));
        if quoted {
            return Ok(GuestValue::Str(expr[1..expr.len() - 1].to_string()));
        }
        if expr == "None" {
            return Ok(GuestValue::None);
        }
        if expr.parse::<f64>().is_ok() {
            return Ok(GuestValue::Repr(expr.to_string()));
        }
        if is_identifier(expr) {
            return self
                .vars
                .get(expr)
                .cloned()
                .ok_or_else(|| GuestFault::new(format!("NameError: name '{}' is not defined", expr)));
        }
        Err(GuestFault::new(format!("SyntaxError: invalid syntax (line {})", lineno + 1)))
    }
}

#[async_trait]
impl GuestEngine for ScriptedEngine {
    async fn install(&mut self, package: &str, module: &str) -> Result<()> {
        self.probe
            .installs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(package.to_string());
        let broken = self.broken.lock().unwrap_or_else(PoisonError::into_inner).contains(package);
        if broken {
            return Err(anyhow!("no matching distribution found for {}", package));
        }
        self.modules.insert(module.to_string());
        Ok(())
    }

    async fn run(&mut self, source: &str) -> Result<GuestValue, GuestFault> {
        self.probe.runs.fetch_add(1, Ordering::SeqCst);
        let mut last = GuestValue::None;
        for (lineno, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            last = GuestValue::None;
            if let Some(ms) = line.strip_prefix("sleep ") {
                let ms = ms
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| GuestFault::new(format!("ValueError: bad sleep on line {}", lineno + 1)))?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
            } else if let Some(message) = line.strip_prefix("raise ") {
                return Err(GuestFault::new(message.trim()));
            } else if let Some(rest) = line.strip_prefix("import ") {
                self.require(rest.split_whitespace().next().unwrap_or_default())?;
            } else if let Some(rest) = line.strip_prefix("from ") {
                self.require(rest.split_whitespace().next().unwrap_or_default())?;
            } else if let Some((name, expr)) = line.split_once(" = ") {
                let value = self.eval(expr.trim(), lineno)?;
                self.vars.insert(name.trim().to_string(), value);
            } else {
                last = self.eval(line, lineno)?;
            }
        }
        Ok(last)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}
