mod eligibility;
mod plan;
mod scalar_split;

pub use eligibility::*;
pub use plan::*;
pub use scalar_split::*;

use crate::binder::{BindError, ReferenceResolver};
use crate::executor::EvaluatorConfig;
use crate::function::{SemanticOperatorRegistry, SugarRewriter};
use crate::parser::{FinalQuery, Stage};
use crate::BoxError;

/// A stage ready to materialize: references resolved, sugar rewritten, eligibility decided.
#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub stage: Stage,
    pub relation_name: String,
    pub resolved_sql: String,
    pub rewritten_sql: String,
    pub eligibility: Eligibility,
    pub config: EvaluatorConfig,
}

/// Plans stages one at a time. A stage's relation becomes visible to later stages and the
/// final query only through `bind`, once the stage has been materialized.
pub struct StagePlanner<'a> {
    rewriter: &'a dyn SugarRewriter,
    classifier: EligibilityClassifier<'a>,
    resolver: ReferenceResolver,
}

impl<'a> StagePlanner<'a> {
    pub fn new(rewriter: &'a dyn SugarRewriter, registry: &'a SemanticOperatorRegistry) -> Self {
        Self {
            rewriter,
            classifier: EligibilityClassifier::new(registry),
            resolver: ReferenceResolver::new(),
        }
    }

    pub fn plan_stage(
        &self,
        stage: &Stage,
        relation_name: String,
        config: EvaluatorConfig,
    ) -> Result<PlannedStage, PlannerError> {
        let resolved_sql = self.resolver.resolve(&stage.raw_sql)?;
        let rewritten_sql =
            self.rewriter
                .rewrite(&resolved_sql)
                .map_err(|source| PlannerError::Rewrite {
                    stage: stage.name.clone(),
                    source,
                })?;
        let eligibility = self.classifier.classify(&rewritten_sql);
        Ok(PlannedStage {
            stage: stage.clone(),
            relation_name,
            resolved_sql,
            rewritten_sql,
            eligibility,
            config,
        })
    }

    pub fn bind(&mut self, stage: &Stage, relation_name: &str) {
        self.resolver.bind(&stage.name, relation_name);
    }

    pub fn resolve_final_query(&self, final_query: &FinalQuery) -> Result<String, PlannerError> {
        Ok(self.resolver.resolve(&final_query.sql)?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PlannerError {
    #[error("bind error: {0}")]
    Bind(
        #[from]
        #[source]
        BindError,
    ),
    #[error("rewriting stage {stage} failed: {source}")]
    Rewrite {
        stage: String,
        #[source]
        source: BoxError,
    },
}
