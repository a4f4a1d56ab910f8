use std::fmt;

use super::ScalarSplit;
use crate::function::{OperatorKind, SemanticOperatorRegistry};
use crate::parser::{SqlTokens, TokenKind};

/// Words that may directly precede `(` without aggregating or windowing rows: SQL keywords
/// and common row-scalar functions. Any other non-semantic call could be an aggregate or a
/// window function, and a semantic filter cannot be lifted out of a query that has one.
const ROW_SCALAR_CALLS: [&str; 86] = [
    // keywords
    "select", "from", "where", "and", "or", "not", "in", "exists", "any", "all", "some", "on",
    "using", "as", "join", "lateral", "values", "when", "then", "else", "case", "is", "like",
    "ilike", "between", "with", "row", "array", "cast", "try_cast", "interval", "date",
    "timestamp", "time",
    // row-scalar functions
    "coalesce", "nullif", "greatest", "least", "upper", "lower", "length", "char_length",
    "character_length", "octet_length", "substring", "substr", "trim", "ltrim", "rtrim",
    "btrim", "replace", "concat", "concat_ws", "position", "strpos", "left", "right", "lpad",
    "rpad", "split_part", "regexp_replace", "regexp_match", "starts_with", "initcap",
    "reverse", "repeat", "md5", "abs", "round", "ceil", "ceiling", "floor", "sqrt", "power",
    "pow", "mod", "ln", "log", "exp", "sign", "trunc", "extract", "date_part", "date_trunc",
    "to_char", "to_date",
];

/// Keywords closing a GROUP BY list at the depth it was opened on.
const GROUP_BY_TERMINATORS: [&str; 11] = [
    "HAVING", "ORDER", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT", "WINDOW", "QUALIFY",
    "FETCH", "FOR",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IneligibleReason {
    NoSemanticOperators,
    SemanticAggregate(String),
    SemanticGroupingKey(String),
    SemanticStructural(String),
    UnrecognizedOperator(String),
    UnsupportedShape(String),
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::NoSemanticOperators => write!(f, "no semantic operators"),
            IneligibleReason::SemanticAggregate(op) => write!(f, "semantic aggregate {}", op),
            IneligibleReason::SemanticGroupingKey(op) => write!(f, "semantic grouping key {}", op),
            IneligibleReason::SemanticStructural(op) => {
                write!(f, "semantic structural operator {}", op)
            }
            IneligibleReason::UnrecognizedOperator(op) => {
                write!(f, "unrecognized semantic operator {}", op)
            }
            IneligibleReason::UnsupportedShape(detail) => write!(f, "unsupported shape: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// Every semantic call is row-scalar and the stage splits into a structural query
    Eligible(ScalarSplit),
    NotEligible(IneligibleReason),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible(_))
    }

    pub fn reason(&self) -> Option<&IneligibleReason> {
        match self {
            Eligibility::Eligible(_) => None,
            Eligibility::NotEligible(reason) => Some(reason),
        }
    }
}

/// Decides whether a stage's semantic work can be batch-evaluated in parallel. Anything not
/// known to be row-scalar makes the stage ineligible.
pub struct EligibilityClassifier<'a> {
    registry: &'a SemanticOperatorRegistry,
}

impl<'a> EligibilityClassifier<'a> {
    pub fn new(registry: &'a SemanticOperatorRegistry) -> Self {
        Self { registry }
    }

    pub fn classify(&self, sql: &str) -> Eligibility {
        let tokens = match SqlTokens::new(sql) {
            Ok(tokens) => tokens,
            Err(e) => {
                return Eligibility::NotEligible(IneligibleReason::UnsupportedShape(e.to_string()))
            }
        };
        let in_group_by = group_by_tokens(&tokens);

        let mut semantic_calls = 0;
        let may_aggregate = may_aggregate(&tokens, self.registry);
        for site in tokens.call_sites() {
            let Some(operator) = self.registry.lookup(&site.name) else {
                continue;
            };
            let reason = match operator.kind {
                OperatorKind::Scalar if in_group_by[site.name_token] => {
                    Some(IneligibleReason::SemanticGroupingKey(operator.name))
                }
                OperatorKind::Scalar => None,
                OperatorKind::Aggregate => Some(IneligibleReason::SemanticAggregate(operator.name)),
                OperatorKind::Grouping => {
                    Some(IneligibleReason::SemanticGroupingKey(operator.name))
                }
                OperatorKind::Structural => {
                    Some(IneligibleReason::SemanticStructural(operator.name))
                }
                OperatorKind::Unrecognized => {
                    Some(IneligibleReason::UnrecognizedOperator(operator.name))
                }
            };
            if let Some(reason) = reason {
                return Eligibility::NotEligible(reason);
            }
            semantic_calls += 1;
        }

        if semantic_calls == 0 {
            return Eligibility::NotEligible(IneligibleReason::NoSemanticOperators);
        }
        match ScalarSplit::decompose(sql, self.registry, semantic_calls, may_aggregate) {
            Ok(split) => Eligibility::Eligible(split),
            Err(detail) => Eligibility::NotEligible(IneligibleReason::UnsupportedShape(detail)),
        }
    }
}

pub fn classify(sql: &str, registry: &SemanticOperatorRegistry) -> Eligibility {
    EligibilityClassifier::new(registry).classify(sql)
}

/// Whether `sql` calls anything besides semantic operators and known row-scalar functions.
pub(crate) fn may_aggregate(sql: &SqlTokens, registry: &SemanticOperatorRegistry) -> bool {
    sql.call_sites().iter().any(|site| {
        registry.lookup(&site.name).is_none() && !ROW_SCALAR_CALLS.contains(&site.name.as_str())
    })
}

/// Marks every token that belongs to a GROUP BY list, nested expressions included.
fn group_by_tokens(sql: &SqlTokens) -> Vec<bool> {
    let source = sql.source();
    let significant = sql.significant();
    let mut inside = vec![false; sql.tokens().len()];
    // depths of the currently open GROUP BY lists
    let mut open: Vec<usize> = vec![];

    for (pos, &idx) in significant.iter().enumerate() {
        let token = &sql.tokens()[idx];
        while let Some(&depth) = open.last() {
            let closes = token.depth < depth
                || (token.depth == depth
                    && (token.kind == TokenKind::Semicolon
                        || token.is_any_keyword(source, &GROUP_BY_TERMINATORS)));
            if !closes {
                break;
            }
            open.pop();
        }

        let opens_group_by = token.is_keyword(source, "GROUP")
            && significant
                .get(pos + 1)
                .map_or(false, |&next| sql.tokens()[next].is_keyword(source, "BY"));
        if opens_group_by {
            open.push(token.depth);
        }
        inside[idx] = !open.is_empty();
    }
    inside
}

#[cfg(test)]
mod eligibility_test {
    use test_case::test_case;

    use super::*;

    fn reason(sql: &str) -> Option<IneligibleReason> {
        classify(sql, &SemanticOperatorRegistry::default())
            .reason()
            .cloned()
    }

    #[test_case("SELECT id, ALIGNS(text, 'x') AS s FROM docs" ; "projection")]
    #[test_case("SELECT id FROM docs WHERE means(text, 'cats') AND id > 1" ; "filter")]
    #[test_case("SELECT sentiment(body) AS mood, classify(body) FROM r WHERE about(body, 'x')" ; "several")]
    #[test_case("SELECT semantic_aligns(text, 'x') FROM docs" ; "prefixed")]
    #[test_case("SELECT count(*), aligns(max(text), 'x') FROM docs GROUP BY category" ; "over grouped rows")]
    fn test_eligible(sql: &str) {
        assert_eq!(reason(sql), None);
    }

    #[test_case("SELECT * FROM docs", IneligibleReason::NoSemanticOperators ; "plain sql")]
    #[test_case(
        "SELECT category, SUMMARIZE(text) FROM docs GROUP BY category",
        IneligibleReason::SemanticAggregate("summarize".to_string()) ; "aggregate"
    )]
    #[test_case(
        "SELECT aligns(text, 'x'), consensus(text) FROM docs",
        IneligibleReason::SemanticAggregate("consensus".to_string()) ; "aggregate with scalar"
    )]
    #[test_case(
        "SELECT count(*) FROM docs GROUP BY meaning(text)",
        IneligibleReason::SemanticGroupingKey("meaning".to_string()) ; "grouping operator"
    )]
    #[test_case(
        "SELECT count(*) FROM docs GROUP BY id, classify(text) HAVING count(*) > 1",
        IneligibleReason::SemanticGroupingKey("classify".to_string()) ; "scalar as grouping key"
    )]
    #[test_case(
        "SELECT * FROM a WHERE semantic_join(a.text, 'x')",
        IneligibleReason::SemanticStructural("semantic_join".to_string()) ; "structural"
    )]
    #[test_case(
        "SELECT semantic_vibes(text) FROM docs",
        IneligibleReason::UnrecognizedOperator("semantic_vibes".to_string()) ; "unrecognized"
    )]
    #[test_case(
        "SELECT * FROM docs HAVING count(*) > 1 AND themes(text) IS NOT NULL",
        IneligibleReason::SemanticAggregate("themes".to_string()) ; "aggregate in having"
    )]
    fn test_not_eligible(sql: &str, expected: IneligibleReason) {
        assert_eq!(reason(sql), Some(expected));
    }

    #[test]
    fn test_undecomposable_scalar_is_unsupported_shape() {
        assert!(matches!(
            reason("SELECT upper(aligns(text, 'x')) FROM docs"),
            Some(IneligibleReason::UnsupportedShape(_))
        ));
        assert!(matches!(
            reason("SELECT id FROM docs WHERE aligns(text, 'x') GROUP BY id"),
            Some(IneligibleReason::UnsupportedShape(_))
        ));
    }

    #[test_case("SELECT id, row_number() OVER (ORDER BY id) AS rn FROM docs WHERE means(text, 'x')" ; "window")]
    #[test_case("SELECT median(score) FROM docs WHERE means(text, 'x')" ; "unlisted aggregate")]
    #[test_case("SELECT count_if(score > 1) FROM docs WHERE means(text, 'x')" ; "conditional aggregate")]
    fn test_filter_next_to_row_dependent_call(sql: &str) {
        assert!(matches!(
            reason(sql),
            Some(IneligibleReason::UnsupportedShape(_))
        ));
    }

    #[test_case("SELECT id, median(score) OVER () AS m, means(text, 'x') AS hit FROM docs" ; "projection next to window")]
    #[test_case("SELECT upper(title), aligns(text, 'x') FROM docs WHERE id IN (1, 2) AND means(text, 'y')" ; "known scalars")]
    fn test_row_dependent_calls_allowed(sql: &str) {
        assert_eq!(reason(sql), None);
    }

    #[test]
    fn test_group_by_region_ends_at_terminator() {
        let sql = "SELECT c FROM t GROUP BY c ORDER BY aligns(c, 'x')";
        let tokens = SqlTokens::new(sql).unwrap();
        let inside = group_by_tokens(&tokens);
        let site = tokens
            .call_sites()
            .into_iter()
            .find(|s| s.name == "aligns")
            .unwrap();
        assert!(!inside[site.name_token]);
    }

    #[test]
    fn test_strings_and_comments_are_not_operators() {
        assert_eq!(
            reason("SELECT 'summarize(text)' /* themes(x) */ FROM docs -- meaning(y)"),
            Some(IneligibleReason::NoSemanticOperators)
        );
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            IneligibleReason::SemanticAggregate("summarize".to_string()).to_string(),
            "semantic aggregate summarize"
        );
    }
}
