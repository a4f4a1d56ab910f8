use std::time::Duration;

use itertools::Itertools;

use super::CorrelationId;
use crate::binder::BindError;
use crate::executor::ExecutorError;
use crate::parser::ParseError;
use crate::planner::PlannerError;
use crate::BoxError;

/// The one terminal error of a failed pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("parse error: {0}")]
    Parse(
        #[source]
        #[from]
        ParseError,
    ),
    #[error("bind error: {0}")]
    Bind(
        #[source]
        #[from]
        BindError,
    ),
    #[error("planner error: {0}")]
    Plan(
        #[source]
        #[from]
        PlannerError,
    ),
    #[error("executor error: {0}")]
    Execute(
        #[source]
        #[from]
        ExecutorError,
    ),
    #[error("final query failed: {source}")]
    FinalQuery {
        #[source]
        source: BoxError,
    },
    #[error("pipeline {correlation_id} was cancelled")]
    Cancelled { correlation_id: CorrelationId },
    #[error("pipeline {correlation_id} timed out after {after:?}")]
    Timeout {
        correlation_id: CorrelationId,
        after: Duration,
    },
    #[error("cleanup failed: {}", .0.iter().join("; "))]
    Cleanup(Vec<CleanupError>),
}

impl PipelineError {
    /// Errors raised before any engine call was made.
    pub fn is_validation(&self) -> bool {
        matches!(self, PipelineError::Parse(_) | PipelineError::Bind(_))
    }

    /// Name of the stage the failure belongs to, when it belongs to one.
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::Bind(BindError::DanglingStageReference { stage, .. }) => Some(stage.as_str()),
            PipelineError::Plan(PlannerError::Rewrite { stage, .. }) => Some(stage.as_str()),
            PipelineError::Execute(e) => e.stage(),
            _ => None,
        }
    }
}

/// Failure to drop one relation during teardown.
#[derive(thiserror::Error, Debug)]
#[error("failed to drop {relation}: {source}")]
pub struct CleanupError {
    pub relation: String,
    #[source]
    pub source: BoxError,
}
