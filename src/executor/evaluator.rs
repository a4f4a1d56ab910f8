use std::ops::Range;
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef};
use arrow::compute::concat;
use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use derive_new::new;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::debug;

use super::{EvaluationBatch, ExecutorError, SemanticBackend};
use crate::planner::SemanticCall;
use crate::BoxError;

/// Concurrency and batching for one stage's semantic evaluation.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorConfig {
    /// Maximum number of batches in flight at once
    pub parallel: usize,
    /// Maximum number of rows per batch
    pub batch_size: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            parallel: 4,
            batch_size: 32,
        }
    }
}

/// Splits `num_rows` rows into consecutive ranges of at most `batch_size` rows.
pub fn partition(num_rows: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..num_rows)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(num_rows))
        .collect()
}

/// Semantic results for every row of a stage, in row order.
#[derive(Debug, Clone)]
pub struct EvaluatedRows {
    /// One array per semantic call, in call order
    pub columns: Vec<ArrayRef>,
    /// Number of batches dispatched
    pub batches: usize,
}

/// Evaluates the semantic calls of one eligible stage over its structural rows, batch by
/// batch, with a bounded number of batches in flight.
///
/// Failure is fail-fast: the first failed batch ends the evaluation. Batches still in flight
/// are dropped, queued batches are never dispatched and no partial result is returned.
#[derive(new)]
pub struct ParallelScalarEvaluator {
    backend: Arc<dyn SemanticBackend>,
    config: EvaluatorConfig,
    correlation_id: String,
}

impl ParallelScalarEvaluator {
    pub async fn evaluate(
        &self,
        stage_name: &str,
        rows: &RecordBatch,
        calls: &[SemanticCall],
    ) -> Result<EvaluatedRows, ExecutorError> {
        let ranges = partition(rows.num_rows(), self.config.batch_size);
        let total = ranges.len();
        let parallel = self.config.parallel.max(1);
        let calls: Arc<[SemanticCall]> = Arc::from(calls.to_vec());
        debug!(
            "[{}] stage {}: {} rows in {} batches, parallel {}",
            self.correlation_id,
            stage_name,
            rows.num_rows(),
            total,
            parallel
        );

        let mut queued = ranges.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut completed: Vec<Option<Vec<ArrayRef>>> = vec![None; total];
        loop {
            while in_flight.len() < parallel {
                let Some((batch_index, range)) = queued.next() else {
                    break;
                };
                let batch = EvaluationBatch {
                    stage_name: stage_name.to_string(),
                    batch_index,
                    rows: rows.slice(range.start, range.len()),
                    calls: calls.clone(),
                };
                debug!(
                    "[{}] stage {}: dispatching batch {} with {} rows",
                    self.correlation_id,
                    stage_name,
                    batch_index,
                    batch.num_rows()
                );
                let backend = self.backend.clone();
                in_flight.push(async move {
                    let result = backend.evaluate(&batch).await;
                    (batch, result)
                });
            }

            let Some((batch, result)) = in_flight.next().await else {
                break;
            };
            let columns = result
                .and_then(|columns| check_batch_result(&batch, columns))
                .map_err(|source| ExecutorError::SemanticEvaluation {
                    stage: stage_name.to_string(),
                    batch_index: batch.batch_index,
                    source,
                })?;
            debug!(
                "[{}] stage {}: batch {} done",
                self.correlation_id, stage_name, batch.batch_index
            );
            completed[batch.batch_index] = Some(columns);
        }

        let completed = completed.into_iter().flatten().collect::<Vec<_>>();
        let columns = calls
            .iter()
            .enumerate()
            .map(|(idx, call)| {
                if completed.is_empty() {
                    return Ok(new_null_array(&call.empty_result_type(), 0));
                }
                let parts = completed
                    .iter()
                    .map(|columns| columns[idx].as_ref())
                    .collect::<Vec<&dyn Array>>();
                concat(&parts)
            })
            .collect::<Result<Vec<_>, ArrowError>>()?;
        Ok(EvaluatedRows {
            columns,
            batches: total,
        })
    }
}

fn check_batch_result(
    batch: &EvaluationBatch,
    columns: Vec<ArrayRef>,
) -> Result<Vec<ArrayRef>, BoxError> {
    if columns.len() != batch.calls.len() {
        return Err(format!(
            "backend returned {} result columns for {} semantic calls",
            columns.len(),
            batch.calls.len()
        )
        .into());
    }
    for (call, column) in batch.calls.iter().zip(columns.iter()) {
        if column.len() != batch.num_rows() {
            return Err(format!(
                "backend returned {} results for {} rows of {}",
                column.len(),
                batch.num_rows(),
                call.sql
            )
            .into());
        }
        if call.is_predicate() && column.data_type() != &DataType::Boolean {
            return Err(format!(
                "filter {} returned {} instead of booleans",
                call.sql,
                column.data_type()
            )
            .into());
        }
    }
    Ok(columns)
}
