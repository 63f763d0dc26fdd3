//! Guest engine seam and the runtime handle that owns the single engine instance.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::staging::PackageTier;

pub mod loader;
pub mod scripted;

/// Trailing value of a guest program, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum GuestValue {
    /// The program ended with a string expression.
    Str(String),
    /// Any other value, rendered by the guest's own repr.
    Repr(String),
    None,
}

/// A fault raised inside the guest while running a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestFault {
    pub description: String,
}

impl GuestFault {
    pub fn new(description: impl Into<String>) -> Self {
        Self { description: description.into() }
    }
}

impl From<anyhow::Error> for GuestFault {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

/// Where the guest engine distribution lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl EngineLocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), working_dir: None }
    }
}

/// Fetches and instantiates a guest engine.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    type Engine: GuestEngine;

    async fn launch(&self, location: &EngineLocation) -> Result<Self::Engine>;
}

/// A running guest interpreter.
///
/// `run` may be dropped mid-flight when an execution times out; an engine
/// must stay usable afterwards (late replies are its own business).
#[async_trait]
pub trait GuestEngine: Send {
    /// Install `package`, importable as `module`, into the running interpreter.
    async fn install(&mut self, package: &str, module: &str) -> Result<()>;

    /// Run `source` as a whole program and report its trailing value.
    async fn run(&mut self, source: &str) -> Result<GuestValue, GuestFault>;
}

/// The one engine instance of a session plus the tiers already staged on it.
pub struct RuntimeHandle<E> {
    engine: E,
    staged: HashSet<PackageTier>,
}

impl<E: GuestEngine> RuntimeHandle<E> {
    pub(crate) fn new(engine: E) -> Self {
        Self { engine, staged: HashSet::new() }
    }

    pub fn is_staged(&self, tier: PackageTier) -> bool {
        self.staged.contains(&tier)
    }

    pub(crate) fn mark_staged(&mut self, tier: PackageTier) {
        self.staged.insert(tier);
    }

    pub(crate) fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

impl<E> std::fmt::Debug for RuntimeHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle").field("staged", &self.staged).finish_non_exhaustive()
    }
}
