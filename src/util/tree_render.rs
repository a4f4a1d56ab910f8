use derive_new::new;

use crate::planner::{CallPosition, Eligibility, PipelinePlan, PlannedStage, SemanticCall};

#[derive(new)]
pub struct TreeRender;

impl TreeRender {
    fn semantic_call_to_string(call: &SemanticCall) -> String {
        match &call.position {
            CallPosition::Projection { output_name } => {
                format!("Projection[{}]: {} AS {}", call.index, call.sql, output_name)
            }
            CallPosition::Predicate => format!("Predicate[{}]: {}", call.index, call.sql),
        }
    }

    fn planned_stage_tree_internal(
        stage: &PlannedStage,
        ordinal: usize,
        level: usize,
        lines: &mut Vec<(usize, String)>,
    ) {
        lines.push((
            level,
            format!(
                "Stage {}: {} -> {}",
                ordinal, stage.stage.declared_name, stage.relation_name
            ),
        ));
        match &stage.eligibility {
            Eligibility::Eligible(split) => {
                lines.push((
                    level + 1,
                    format!(
                        "Eligible: parallel[{}], batch_size[{}]",
                        stage.config.parallel, stage.config.batch_size
                    ),
                ));
                lines.push((level + 2, format!("Structural: {}", split.structural_sql)));
                for call in split.calls.iter() {
                    lines.push((level + 2, Self::semantic_call_to_string(call)));
                }
            }
            Eligibility::NotEligible(reason) => {
                lines.push((level + 1, format!("NotEligible: {}", reason)));
                lines.push((level + 2, format!("PassThrough: {}", stage.rewritten_sql)));
            }
        }
    }

    pub fn pipeline_plan_tree(plan: &PipelinePlan) -> String {
        let mut lines = vec![(
            0,
            format!(
                "Pipeline: {} parallel[{}], batch_size[{}], retain[{}]",
                plan.correlation_id,
                plan.options.parallel,
                plan.options.batch_size,
                plan.options.retain
            ),
        )];
        for (idx, stage) in plan.stages.iter().enumerate() {
            Self::planned_stage_tree_internal(stage, idx + 1, 1, &mut lines);
        }
        lines.push((1, format!("FinalQuery: {}", plan.final_query)));
        lines
            .into_iter()
            .map(|(level, line)| format!("{}{}", " ".repeat(level * 2), line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
