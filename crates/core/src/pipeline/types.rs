//! Types for pipeline results.

use serde::Serialize;

use crate::batch::{StageSummary, StageVerdict};

/// Outcome of one stage within a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub summary: StageSummary,
    pub verdict: StageVerdict,
    pub elapsed_ms: u64,
}

/// Outcome of a whole pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    /// Stages that ran, in order.
    pub stages: Vec<StageReport>,
    /// Stage whose unacceptable verdict stopped the run.
    pub halted_at: Option<String>,
}

impl PipelineReport {
    /// Whether every stage that ran was acceptable.
    pub fn all_acceptable(&self) -> bool {
        self.stages.iter().all(|s| s.verdict.acceptable)
    }

    pub fn halted(&self) -> bool {
        self.halted_at.is_some()
    }

    /// Names of stages with an unacceptable verdict.
    pub fn unacceptable_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| !s.verdict.acceptable)
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }
}
