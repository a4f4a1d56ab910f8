use std::fmt;

use super::{PlannedStage, PlannerError, StagePlanner};
use crate::function::{SemanticOperatorRegistry, SugarRewriter};
use crate::main_entry::{CorrelationId, PipelineOptions};
use crate::parser::PipelineRequest;
use crate::util::tree_render::TreeRender;

/// The decomposed form of a pipeline, as it would run, without running it.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub correlation_id: CorrelationId,
    /// Caller options with block-level hints applied
    pub options: PipelineOptions,
    pub stages: Vec<PlannedStage>,
    /// Final query with every stage reference resolved
    pub final_query: String,
}

/// Plans every stage of `request` as a run would, binding each stage after planning it.
/// Only the rewriter is called.
pub fn plan_pipeline(
    request: &PipelineRequest,
    options: PipelineOptions,
    correlation_id: CorrelationId,
    rewriter: &dyn SugarRewriter,
    registry: &SemanticOperatorRegistry,
) -> Result<PipelinePlan, PlannerError> {
    let mut planner = StagePlanner::new(rewriter, registry);
    let mut stages = Vec::with_capacity(request.stages.len());
    for (idx, stage) in request.stages.iter().enumerate() {
        let relation_name = correlation_id.relation_name(idx + 1);
        let planned =
            planner.plan_stage(stage, relation_name, options.evaluator_config(&stage.hints))?;
        planner.bind(stage, &planned.relation_name);
        stages.push(planned);
    }
    let final_query = planner.resolve_final_query(&request.final_query)?;
    Ok(PipelinePlan {
        correlation_id,
        options,
        stages,
        final_query,
    })
}

impl fmt::Display for PipelinePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", TreeRender::pipeline_plan_tree(self))
    }
}
