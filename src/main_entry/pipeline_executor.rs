use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use log::{debug, info, log_enabled, Level};

use super::{
    CancellationToken, CorrelationId, LogObserver, PipelineError, PipelineOptions,
    PipelineResult, PipelineRun, PipelineState, QueryMetrics, RunObserver, StageMetrics,
};
use crate::binder::validate_references;
use crate::engine::RelationalEngine;
use crate::executor::{SemanticBackend, StageMaterializer};
use crate::function::{PassthroughRewriter, SemanticOperatorRegistry, SugarRewriter};
use crate::parser::PipelineRequest;
use crate::planner::{plan_pipeline, PipelinePlan, StagePlanner};
use crate::util::pretty_batches_string;

/// Entry point: runs pipeline blocks against a relational engine and a semantic backend.
///
/// Stages are materialized strictly in order, each into its own temp relation named after
/// the run's correlation id. The final query then reads from those relations, and every
/// relation is dropped again when the run ends, whether it succeeded or not.
pub struct PipelineExecutor {
    engine: Arc<dyn RelationalEngine>,
    backend: Arc<dyn SemanticBackend>,
    rewriter: Arc<dyn SugarRewriter>,
    registry: Arc<SemanticOperatorRegistry>,
    observer: Arc<dyn RunObserver>,
    options: PipelineOptions,
}

impl PipelineExecutor {
    pub fn new(engine: Arc<dyn RelationalEngine>, backend: Arc<dyn SemanticBackend>) -> Self {
        Self {
            engine,
            backend,
            rewriter: Arc::new(PassthroughRewriter),
            registry: Arc::new(SemanticOperatorRegistry::default()),
            observer: Arc::new(LogObserver),
            options: PipelineOptions::default(),
        }
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn SugarRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn with_registry(mut self, registry: SemanticOperatorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub async fn run(&self, text: &str) -> Result<PipelineResult, PipelineError> {
        self.run_with_cancel(text, &CancellationToken::new()).await
    }

    /// Runs `text`, stopping early once `cancel` fires or the configured timeout elapses.
    /// Parse and reference errors are raised before the engine is touched.
    pub async fn run_with_cancel(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let correlation_id = CorrelationId::new();
        let mut run = PipelineRun::new(self.engine.clone(), correlation_id.clone(), false);

        let request = PipelineRequest::parse(text)?;
        let options = self.options.with_hints(&request.hints);
        run.transition(PipelineState::Validating);
        validate_references(&request)?;
        info!(
            "[{}] running pipeline with {} stages",
            correlation_id,
            request.stages.len()
        );

        let mut run = run.retaining(options.retain);
        let outcome = {
            let execution = self.execute(&request, &options, &mut run);
            let bounded = async {
                match options.timeout {
                    Some(after) => match tokio::time::timeout(after, execution).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(PipelineError::Timeout {
                            correlation_id: correlation_id.clone(),
                            after,
                        }),
                    },
                    None => execution.await,
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::Cancelled {
                    correlation_id: correlation_id.clone(),
                }),
                outcome = bounded => outcome,
            }
        };
        if let Err(e) = &outcome {
            info!("[{}] pipeline failed: {}", correlation_id, e);
        }
        run.finish(outcome).await
    }

    async fn execute(
        &self,
        request: &PipelineRequest,
        options: &PipelineOptions,
        run: &mut PipelineRun,
    ) -> Result<(RecordBatch, QueryMetrics), PipelineError> {
        let correlation_id = run.correlation_id().clone();
        let materializer = StageMaterializer::new(
            self.engine.clone(),
            self.backend.clone(),
            correlation_id.to_string(),
        );
        let mut planner = StagePlanner::new(self.rewriter.as_ref(), self.registry.as_ref());

        for (idx, stage) in request.stages.iter().enumerate() {
            let k = idx + 1;
            run.transition(PipelineState::Executing(k));
            let planned = planner.plan_stage(
                stage,
                correlation_id.relation_name(k),
                options.evaluator_config(&stage.hints),
            )?;
            run.register(&planned.relation_name);
            let materialized = materializer.materialize(&planned).await?;

            let metrics = StageMetrics {
                correlation_id: correlation_id.clone(),
                stage_name: materialized.stage.name.clone(),
                relation_name: materialized.relation_name.clone(),
                row_count: materialized.row_count,
                elapsed: materialized.elapsed,
                eligible: materialized.eligible,
                batches: materialized.batches,
            };
            self.observer.on_stage(&metrics);
            planner.bind(stage, &materialized.relation_name);
            run.record(materialized, metrics);
        }

        run.transition(PipelineState::RunningFinalQuery);
        let final_sql = planner.resolve_final_query(&request.final_query)?;
        let start = Instant::now();
        let batch = self
            .engine
            .execute(&final_sql)
            .await
            .map_err(|source| PipelineError::FinalQuery { source })?;
        let metrics = QueryMetrics {
            correlation_id: correlation_id.clone(),
            row_count: batch.num_rows(),
            elapsed: start.elapsed(),
        };
        self.observer.on_final_query(&metrics);

        if log_enabled!(Level::Debug) {
            if let Ok(table) = pretty_batches_string(&[batch.clone()]) {
                debug!("[{}] final query result:\n{}", correlation_id, table);
            }
        }
        Ok((batch, metrics))
    }

    /// Plans `text` the way `run` would and returns the plan without executing anything.
    /// Only the sugar rewriter is called.
    pub fn explain(&self, text: &str) -> Result<PipelinePlan, PipelineError> {
        let request = PipelineRequest::parse(text)?;
        let options = self.options.with_hints(&request.hints);
        validate_references(&request)?;
        let plan = plan_pipeline(
            &request,
            options,
            CorrelationId::new(),
            self.rewriter.as_ref(),
            self.registry.as_ref(),
        )?;
        Ok(plan)
    }
}
