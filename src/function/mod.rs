mod rewriter;

use std::collections::HashMap;

use lazy_static::lazy_static;
pub use rewriter::*;
use strum_macros::{Display, EnumString};

/// Prefix the sugar rewriter gives to the function calls it produces.
pub const SEMANTIC_PREFIX: &str = "semantic_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum OperatorKind {
    /// Evaluated independently for each input row
    Scalar,
    /// Result depends on many rows at once
    Aggregate,
    /// Groups rows by meaning
    Grouping,
    /// Semantic join or distinct
    Structural,
    /// Carries the semantic prefix but is not registered
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticOperator {
    pub name: String,
    pub kind: OperatorKind,
}

lazy_static! {
    static ref BUILTIN_OPERATORS: HashMap<&'static str, OperatorKind> = {
        use OperatorKind::*;
        [
            ("aligns", Scalar),
            ("means", Scalar),
            ("about", Scalar),
            ("implies", Scalar),
            ("contradicts", Scalar),
            ("sentiment", Scalar),
            ("classify", Scalar),
            ("ask", Scalar),
            ("summarize", Aggregate),
            ("consensus", Aggregate),
            ("themes", Aggregate),
            ("meaning", Grouping),
            ("topics", Grouping),
            ("cluster", Grouping),
            ("semantic_join", Structural),
            ("semantic_distinct", Structural),
            ("dedupe", Structural),
        ]
        .into_iter()
        .collect()
    };
}

/// Names of the semantic operators the classifier knows about, keyed case-insensitively.
#[derive(Debug, Clone)]
pub struct SemanticOperatorRegistry {
    operators: HashMap<String, OperatorKind>,
}

impl Default for SemanticOperatorRegistry {
    fn default() -> Self {
        Self {
            operators: BUILTIN_OPERATORS
                .iter()
                .map(|(name, kind)| (name.to_string(), *kind))
                .collect(),
        }
    }
}

impl SemanticOperatorRegistry {
    pub fn empty() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, kind: OperatorKind) {
        self.operators.insert(name.to_lowercase(), kind);
    }

    pub fn with_operator(mut self, name: &str, kind: OperatorKind) -> Self {
        self.register(name, kind);
        self
    }

    /// Resolves a function name to a semantic operator. `semantic_<op>` resolves like `<op>`;
    /// an unregistered name with the semantic prefix is `Unrecognized`, any other unknown
    /// name is an ordinary SQL function and yields `None`.
    pub fn lookup(&self, function_name: &str) -> Option<SemanticOperator> {
        let name = function_name.to_lowercase();
        let found = self.operators.get(&name).copied().or_else(|| {
            name.strip_prefix(SEMANTIC_PREFIX)
                .and_then(|bare| self.operators.get(bare).copied())
        });
        match found {
            Some(kind) => Some(SemanticOperator { name, kind }),
            None if name.starts_with(SEMANTIC_PREFIX) => Some(SemanticOperator {
                name,
                kind: OperatorKind::Unrecognized,
            }),
            None => None,
        }
    }
}
