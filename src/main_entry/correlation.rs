use std::fmt;

use uuid::Uuid;

const CORRELATION_PREFIX: &str = "pipeline_";

/// Identifier shared by every stage and the final query of one pipeline run. It doubles as
/// the namespace of the run's temp relations, so it is a valid unquoted SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(format!("{}{}", CORRELATION_PREFIX, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relation name of stage `k`, 1-based.
    pub fn relation_name(&self, k: usize) -> String {
        format!("{}_stage_{}", self.0, k)
    }

    /// Prefix shared by every relation of this run.
    pub fn relation_prefix(&self) -> String {
        format!("{}_stage_", self.0)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
