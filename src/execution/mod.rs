//! Execution engine: request and result types.

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactExpectation};
use crate::error::HarnessError;

pub mod pipeline;
pub mod python;

/// Which package tiers a request needs staged before it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierRequirement {
    /// Stage the on-demand tier if the source imports one of its modules.
    #[default]
    Auto,
    BaselineOnly,
    OnDemand,
}

/// One user-triggered run of guest source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source: String,
    #[serde(default)]
    pub expectation: ArtifactExpectation,
    #[serde(default)]
    pub tiers: TierRequirement,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            expectation: ArtifactExpectation::Text,
            tiers: TierRequirement::Auto,
        }
    }

    pub fn expect(mut self, expectation: ArtifactExpectation) -> Self {
        self.expectation = expectation;
        self
    }

    pub fn expect_image(self) -> Self {
        self.expect(ArtifactExpectation::Image)
    }

    pub fn tiers(mut self, tiers: TierRequirement) -> Self {
        self.tiers = tiers;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PackageStaging,
    GuestExecution,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success { artifact: Artifact },
    Failure { kind: FailureKind, description: String },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            ExecutionResult::Success { artifact } => Some(artifact),
            ExecutionResult::Failure { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<(FailureKind, &str)> {
        match self {
            ExecutionResult::Failure { kind, description } => Some((*kind, description.as_str())),
            ExecutionResult::Success { .. } => None,
        }
    }
}

impl From<HarnessError> for ExecutionResult {
    fn from(err: HarnessError) -> Self {
        let kind = match err {
            HarnessError::PackageStaging { .. } => FailureKind::PackageStaging,
            HarnessError::Timeout(_) => FailureKind::Timeout,
            _ => FailureKind::GuestExecution,
        };
        let mut description = err.to_string();
        if description.trim().is_empty() {
            description = "guest program failed without a description".to_string();
        }
        ExecutionResult::Failure { kind, description }
    }
}
