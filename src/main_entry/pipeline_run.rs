use std::fmt;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use log::{debug, info, warn};
use tokio::runtime::Handle;

use super::{CleanupError, CorrelationId, PipelineError, PipelineResult, QueryMetrics, StageMetrics};
use crate::engine::RelationalEngine;
use crate::executor::MaterializedStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Splitting,
    Validating,
    /// Materializing stage `k`, 1-based
    Executing(usize),
    RunningFinalQuery,
    CleaningUp,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Splitting => write!(f, "Splitting"),
            PipelineState::Validating => write!(f, "Validating"),
            PipelineState::Executing(k) => write!(f, "Executing({})", k),
            PipelineState::RunningFinalQuery => write!(f, "RunningFinalQuery"),
            PipelineState::CleaningUp => write!(f, "CleaningUp"),
            PipelineState::Done => write!(f, "Done"),
            PipelineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Owns the temp relations of one pipeline run.
///
/// A relation is registered before it is created, so a creation interrupted half way is
/// still dropped. `finish` drops everything the run owns unless the run succeeded and was
/// asked to retain its relations. If the run is dropped before `finish`, the drops are
/// spawned onto the current tokio runtime instead.
pub struct PipelineRun {
    engine: Arc<dyn RelationalEngine>,
    correlation_id: CorrelationId,
    retain: bool,
    state: PipelineState,
    /// Registered relation names, in creation order
    owned: Vec<String>,
    stages: Vec<MaterializedStage>,
    metrics: Vec<StageMetrics>,
}

impl PipelineRun {
    pub fn new(engine: Arc<dyn RelationalEngine>, correlation_id: CorrelationId, retain: bool) -> Self {
        Self {
            engine,
            correlation_id,
            retain,
            state: PipelineState::Splitting,
            owned: vec![],
            stages: vec![],
            metrics: vec![],
        }
    }

    pub fn retaining(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn transition(&mut self, state: PipelineState) {
        debug!("[{}] {} -> {}", self.correlation_id, self.state, state);
        self.state = state;
    }

    /// Takes ownership of `relation` ahead of its creation.
    pub fn register(&mut self, relation: &str) {
        self.owned.push(relation.to_string());
    }

    pub fn record(&mut self, stage: MaterializedStage, metrics: StageMetrics) {
        self.stages.push(stage);
        self.metrics.push(metrics);
    }

    /// Drops every owned relation, newest first. A failed drop does not stop the others.
    pub async fn cleanup(&mut self) -> Vec<CleanupError> {
        let mut errors = vec![];
        while let Some(relation) = self.owned.pop() {
            match self.engine.drop_table(&relation).await {
                Ok(()) => debug!("[{}] dropped {}", self.correlation_id, relation),
                Err(source) => {
                    warn!(
                        "[{}] failed to drop {}: {}",
                        self.correlation_id, relation, source
                    );
                    errors.push(CleanupError { relation, source });
                }
            }
        }
        errors
    }

    /// Ends the run. On success with `retain` set, the relations are handed to the caller;
    /// otherwise they are all dropped. A cleanup failure never replaces the error that ended
    /// the run, but turns an otherwise successful run into `PipelineError::Cleanup`.
    pub async fn finish(
        mut self,
        outcome: Result<(RecordBatch, QueryMetrics), PipelineError>,
    ) -> Result<PipelineResult, PipelineError> {
        if outcome.is_err() {
            self.transition(PipelineState::Failed);
        }
        self.transition(PipelineState::CleaningUp);

        let keep = self.retain && outcome.is_ok();
        let cleanup_errors = if keep {
            info!(
                "[{}] retaining relations {}",
                self.correlation_id,
                self.owned.iter().join(", ")
            );
            self.owned.clear();
            vec![]
        } else {
            self.cleanup().await
        };

        match outcome {
            Ok((batch, final_query)) if cleanup_errors.is_empty() => {
                self.transition(PipelineState::Done);
                let stages = std::mem::take(&mut self.stages);
                Ok(PipelineResult {
                    correlation_id: self.correlation_id.clone(),
                    batch,
                    stages: std::mem::take(&mut self.metrics),
                    final_query,
                    retained: if keep { stages } else { vec![] },
                })
            }
            Ok(_) => {
                self.transition(PipelineState::Failed);
                Err(PipelineError::Cleanup(cleanup_errors))
            }
            Err(e) => {
                if !cleanup_errors.is_empty() {
                    warn!(
                        "[{}] {} relations could not be dropped after: {}",
                        self.correlation_id,
                        cleanup_errors.len(),
                        e
                    );
                }
                Err(e)
            }
        }
    }
}

impl Drop for PipelineRun {
    fn drop(&mut self) {
        if self.owned.is_empty() {
            return;
        }
        let owned = std::mem::take(&mut self.owned);
        let correlation_id = self.correlation_id.clone();
        match Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "[{}] run abandoned, dropping {} relations in the background",
                    correlation_id,
                    owned.len()
                );
                let engine = self.engine.clone();
                handle.spawn(async move {
                    for relation in owned.iter().rev() {
                        if let Err(e) = engine.drop_table(relation).await {
                            warn!("[{}] failed to drop {}: {}", correlation_id, relation, e);
                        }
                    }
                });
            }
            Err(_) => warn!(
                "[{}] run abandoned outside a runtime, relations left behind: {:?}",
                correlation_id, owned
            ),
        }
    }
}
