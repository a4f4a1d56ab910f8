use std::time::Duration;

use log::info;

use super::CorrelationId;

/// Emitted once per stage, after it has been materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMetrics {
    pub correlation_id: CorrelationId,
    pub stage_name: String,
    pub relation_name: String,
    pub row_count: usize,
    pub elapsed: Duration,
    pub eligible: bool,
    pub batches: usize,
}

/// Emitted once per run, after the final query returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMetrics {
    pub correlation_id: CorrelationId,
    pub row_count: usize,
    pub elapsed: Duration,
}

pub trait RunObserver: Send + Sync {
    fn on_stage(&self, metrics: &StageMetrics);

    fn on_final_query(&self, metrics: &QueryMetrics);
}

/// Writes run records through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn on_stage(&self, metrics: &StageMetrics) {
        info!(
            "[{}] stage {} materialized into {}: {} rows in {:?}, {} batches{}",
            metrics.correlation_id,
            metrics.stage_name,
            metrics.relation_name,
            metrics.row_count,
            metrics.elapsed,
            metrics.batches,
            if metrics.eligible { "" } else { " (pass-through)" }
        );
    }

    fn on_final_query(&self, metrics: &QueryMetrics) {
        info!(
            "[{}] final query returned {} rows in {:?}",
            metrics.correlation_id, metrics.row_count, metrics.elapsed
        );
    }
}
