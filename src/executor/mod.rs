mod evaluator;
mod materializer;

use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
pub use evaluator::*;
pub use materializer::*;

use crate::planner::SemanticCall;
use crate::BoxError;

/// The external service that actually evaluates semantic operators.
#[async_trait::async_trait]
pub trait SemanticBackend: Send + Sync {
    /// Evaluates every call of `batch` over its rows. Returns one array per call, in call
    /// order, each exactly `batch.num_rows()` long. Predicate calls return booleans.
    async fn evaluate(&self, batch: &EvaluationBatch) -> Result<Vec<ArrayRef>, BoxError>;
}

/// A bounded slice of one stage's structural rows, dispatched to the backend as one unit.
#[derive(Debug, Clone)]
pub struct EvaluationBatch {
    pub stage_name: String,
    /// 0-based position of this batch within the stage
    pub batch_index: usize,
    pub rows: RecordBatch,
    pub calls: Arc<[SemanticCall]>,
}

impl EvaluationBatch {
    pub fn num_rows(&self) -> usize {
        self.rows.num_rows()
    }

    /// The argument columns of `call`, in argument order.
    pub fn arguments(&self, call: &SemanticCall) -> Result<Vec<ArrayRef>, ArrowError> {
        let schema = self.rows.schema();
        call.argument_columns()
            .iter()
            .map(|name| Ok(self.rows.column(schema.index_of(name)?).clone()))
            .collect()
    }
}

/// The error type of stage execution.
#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error("stage {stage} failed to execute: {source}")]
    StageExecution {
        stage: String,
        #[source]
        source: BoxError,
    },
    #[error("semantic evaluation of stage {stage} failed in batch {batch_index}: {source}")]
    SemanticEvaluation {
        stage: String,
        batch_index: usize,
        #[source]
        source: BoxError,
    },
    #[error("Arrow error: {0}")]
    Arrow(
        #[from]
        #[source]
        ArrowError,
    ),
}

impl ExecutorError {
    /// Name of the stage the error belongs to, when it belongs to one.
    pub fn stage(&self) -> Option<&str> {
        match self {
            ExecutorError::StageExecution { stage, .. }
            | ExecutorError::SemanticEvaluation { stage, .. } => Some(stage.as_str()),
            ExecutorError::Arrow(_) => None,
        }
    }
}
