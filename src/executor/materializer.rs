use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::array::{ArrayRef, BooleanArray};
use arrow::compute::{and, filter_record_batch};
use arrow::datatypes::{Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use derive_new::new;
use log::debug;

use super::{EvaluatorConfig, ExecutorError, ParallelScalarEvaluator, SemanticBackend};
use crate::engine::RelationalEngine;
use crate::parser::Stage;
use crate::planner::{CallPosition, Eligibility, PlannedStage, SemanticCall};

/// A stage whose output has been written to its temp relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedStage {
    pub stage: Stage,
    pub relation_name: String,
    pub row_count: usize,
    pub elapsed: Duration,
    pub eligible: bool,
    /// Evaluation batches dispatched, 0 for pass-through stages
    pub batches: usize,
}

/// Executes one planned stage into its relation. Ineligible stages are handed to the engine
/// whole. Eligible stages run their structural query on the engine, get their semantic calls
/// evaluated in parallel, and have the merged rows written back.
#[derive(new)]
pub struct StageMaterializer {
    engine: Arc<dyn RelationalEngine>,
    backend: Arc<dyn SemanticBackend>,
    correlation_id: String,
}

impl StageMaterializer {
    pub async fn materialize(&self, planned: &PlannedStage) -> Result<MaterializedStage, ExecutorError> {
        let start = Instant::now();
        let stage_name = planned.stage.name.as_str();
        let stage_execution = |source| ExecutorError::StageExecution {
            stage: stage_name.to_string(),
            source,
        };

        let (row_count, batches) = match &planned.eligibility {
            Eligibility::NotEligible(reason) => {
                debug!(
                    "[{}] stage {} runs as a single statement: {}",
                    self.correlation_id, stage_name, reason
                );
                let row_count = self
                    .engine
                    .create_temp_table_as(&planned.relation_name, &planned.rewritten_sql)
                    .await
                    .map_err(stage_execution)?;
                (row_count, 0)
            }
            Eligibility::Eligible(split) => {
                let structural = self
                    .engine
                    .execute(&split.structural_sql)
                    .await
                    .map_err(stage_execution)?;
                let evaluated = self
                    .evaluator(planned.config)
                    .evaluate(stage_name, &structural, &split.calls)
                    .await?;
                let merged = merge_semantic_results(&structural, &split.calls, &evaluated.columns)?;
                self.engine
                    .create_temp_table_from_rows(&planned.relation_name, &merged)
                    .await
                    .map_err(stage_execution)?;
                (merged.num_rows(), evaluated.batches)
            }
        };

        Ok(MaterializedStage {
            stage: planned.stage.clone(),
            relation_name: planned.relation_name.clone(),
            row_count,
            elapsed: start.elapsed(),
            eligible: planned.eligibility.is_eligible(),
            batches,
        })
    }

    fn evaluator(&self, config: EvaluatorConfig) -> ParallelScalarEvaluator {
        ParallelScalarEvaluator::new(self.backend.clone(), config, self.correlation_id.clone())
    }
}

/// Puts semantic results back into the structural rows. Each projection result takes the
/// place of its call's argument columns; predicate results filter rows, a null counting as
/// false. Remaining hidden columns are removed and row order is kept.
pub fn merge_semantic_results(
    rows: &RecordBatch,
    calls: &[SemanticCall],
    results: &[ArrayRef],
) -> Result<RecordBatch, ArrowError> {
    let mut projected_at: HashMap<String, &SemanticCall> = HashMap::new();
    let mut hidden: HashSet<String> = HashSet::new();
    for call in calls {
        if !call.is_predicate() {
            projected_at.insert(call.argument_column(0), call);
        }
        hidden.extend(call.argument_columns());
    }

    let schema = rows.schema();
    let mut fields = vec![];
    let mut columns = vec![];
    for (idx, field) in schema.fields().iter().enumerate() {
        if let Some(call) = projected_at.get(field.name()) {
            let result = results.get(call.index).ok_or_else(|| {
                ArrowError::InvalidArgumentError(format!("no result for {}", call.sql))
            })?;
            let name = match &call.position {
                CallPosition::Projection { output_name } => output_name.as_str(),
                CallPosition::Predicate => call.operator.as_str(),
            };
            fields.push(Field::new(name, result.data_type().clone(), true));
            columns.push(result.clone());
        } else if !hidden.contains(field.name()) {
            fields.push(field.clone());
            columns.push(rows.column(idx).clone());
        }
    }
    let merged = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

    let mut mask: Option<BooleanArray> = None;
    for call in calls.iter().filter(|c| c.is_predicate()) {
        let result = results
            .get(call.index)
            .and_then(|r| r.as_any().downcast_ref::<BooleanArray>())
            .ok_or_else(|| {
                ArrowError::InvalidArgumentError(format!("{} has no boolean result", call.sql))
            })?;
        mask = Some(match mask {
            Some(mask) => and(&mask, result)?,
            None => result.clone(),
        });
    }
    match mask {
        Some(mask) if merged.num_rows() > 0 => filter_record_batch(&merged, &mask),
        _ => Ok(merged),
    }
}
