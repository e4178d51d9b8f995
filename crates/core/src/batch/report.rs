//! Stage outcome reporting and acceptability verdicts.

use serde::Serialize;
use std::fmt::Debug;

use crate::stage_log::{LogEntry, LogHandle};

use super::types::StageSummary;

/// The pass/fail signal handed to the pipeline driver after a stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageVerdict {
    pub stage: String,
    pub acceptable: bool,
    /// Measured ratio, `None` when nothing was measured.
    pub ratio: Option<f64>,
    /// Maximum tolerated ratio, `None` for policies without one.
    pub threshold: Option<f64>,
    pub policy: String,
}

/// Decides whether a finished stage is good enough to proceed.
pub trait AcceptabilityPolicy: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn evaluate(&self, stage: &str, summary: &StageSummary) -> StageVerdict;
}

/// Accepts every stage; failures are only logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAcceptable;

impl AcceptabilityPolicy for AlwaysAcceptable {
    fn name(&self) -> &str {
        "always"
    }

    fn evaluate(&self, stage: &str, summary: &StageSummary) -> StageVerdict {
        StageVerdict {
            stage: stage.to_string(),
            acceptable: true,
            ratio: summary.failure_ratio(),
            threshold: None,
            policy: self.name().to_string(),
        }
    }
}

/// A quantity measured from a summary as `numerator / denominator`.
pub trait RatioMetric: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Returns `(numerator, denominator)`.
    fn measure(&self, summary: &StageSummary) -> (usize, usize);
}

/// Failed items over all items.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureRatio;

impl RatioMetric for FailureRatio {
    fn name(&self) -> &str {
        "failure_ratio"
    }

    fn measure(&self, summary: &StageSummary) -> (usize, usize) {
        (summary.failed, summary.total)
    }
}

/// Accepts a stage while its metric stays at or below `max_ratio`.
///
/// A zero denominator means there is no evidence of failure, so the stage is
/// accepted without dividing.
#[derive(Debug, Clone)]
pub struct RatioThreshold<M: RatioMetric = FailureRatio> {
    metric: M,
    max_ratio: f64,
}

impl<M: RatioMetric> RatioThreshold<M> {
    pub fn new(metric: M, max_ratio: f64) -> Self {
        Self { metric, max_ratio }
    }

    pub fn max_ratio(&self) -> f64 {
        self.max_ratio
    }
}

impl RatioThreshold<FailureRatio> {
    /// Tolerates up to `max_ratio` of the items failing.
    pub fn max_failure_ratio(max_ratio: f64) -> Self {
        Self::new(FailureRatio, max_ratio)
    }

    /// Rejects any failure at all.
    pub fn no_failures() -> Self {
        Self::new(FailureRatio, 0.0)
    }
}

impl<M: RatioMetric> AcceptabilityPolicy for RatioThreshold<M> {
    fn name(&self) -> &str {
        self.metric.name()
    }

    fn evaluate(&self, stage: &str, summary: &StageSummary) -> StageVerdict {
        let (numerator, denominator) = self.metric.measure(summary);
        let ratio = (denominator > 0).then(|| numerator as f64 / denominator as f64);
        StageVerdict {
            stage: stage.to_string(),
            acceptable: ratio.map_or(true, |r| r <= self.max_ratio),
            ratio,
            threshold: Some(self.max_ratio),
            policy: self.name().to_string(),
        }
    }
}

/// Turns a stage summary into log lines and a verdict.
#[derive(Debug, Clone, Default)]
pub struct OutcomeReporter {
    log: Option<LogHandle>,
}

impl OutcomeReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also writes the summary record to the stage log.
    pub fn with_log(mut self, log: Option<LogHandle>) -> Self {
        self.log = log;
        self
    }

    /// Logs every failure and the aggregate counts, then evaluates `policy`.
    pub async fn report(
        &self,
        stage: &str,
        summary: &StageSummary,
        policy: &dyn AcceptabilityPolicy,
    ) -> StageVerdict {
        for failure in &summary.failures {
            tracing::warn!(
                stage = %stage,
                item = %failure.item,
                kind = %failure.kind,
                exit_code = ?failure.exit_code,
                diagnostics = %failure.diagnostics,
                "Item failed"
            );
        }

        tracing::info!(
            stage = %stage,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Stage finished"
        );

        let verdict = policy.evaluate(stage, summary);
        if !verdict.acceptable {
            tracing::error!(
                stage = %stage,
                policy = %verdict.policy,
                "Stage unacceptable: {:.1}% of items failed, limit is {:.1}%",
                verdict.ratio.unwrap_or(0.0) * 100.0,
                verdict.threshold.unwrap_or(0.0) * 100.0
            );
        }

        if let Some(log) = &self.log {
            log.emit(stage, LogEntry::summary(summary, &verdict)).await;
        }

        verdict
    }
}
