use arrow::record_batch::RecordBatch;

use super::{CorrelationId, QueryMetrics, StageMetrics};
use crate::executor::MaterializedStage;

/// Outcome of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub correlation_id: CorrelationId,
    /// Rows returned by the final query
    pub batch: RecordBatch,
    pub stages: Vec<StageMetrics>,
    pub final_query: QueryMetrics,
    /// Relations left in place for the caller, empty unless the run was asked to retain
    /// them. Dropping them is then up to the caller.
    pub retained: Vec<MaterializedStage>,
}

impl PipelineResult {
    pub fn retained_relations(&self) -> Vec<&str> {
        self.retained
            .iter()
            .map(|stage| stage.relation_name.as_str())
            .collect()
    }
}
