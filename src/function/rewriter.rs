use crate::BoxError;

/// Turns semantic sugar in a stage body into plain function calls. Called once per stage,
/// after stage references are resolved and before eligibility is decided.
pub trait SugarRewriter: Send + Sync {
    fn rewrite(&self, stage_sql: &str) -> Result<String, BoxError>;
}

/// Rewriter for stage bodies that already use function-call syntax.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughRewriter;

impl SugarRewriter for PassthroughRewriter {
    fn rewrite(&self, stage_sql: &str) -> Result<String, BoxError> {
        Ok(stage_sql.to_string())
    }
}
