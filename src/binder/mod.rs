mod relation_refs;

use std::collections::HashMap;

pub use relation_refs::*;

use crate::parser::{ParseError, PipelineRequest, Position, SqlTokens};

/// Substitutes materialized relation names for stage names in FROM/JOIN position. A stage
/// becomes resolvable only once it is bound, which happens after it has been materialized.
#[derive(Default, Debug)]
pub struct ReferenceResolver {
    /// stage name -> relation name
    bindings: HashMap<String, String>,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, stage_name: &str, relation_name: impl Into<String>) {
        self.bindings
            .insert(stage_name.to_string(), relation_name.into());
    }

    pub fn is_bound(&self, stage_name: &str) -> bool {
        self.bindings.contains_key(stage_name)
    }

    /// Rewrites `sql` so every bound stage reference reads from its relation. An unaliased
    /// reference keeps its stage name as alias, so qualified columns like `scored.s` still
    /// resolve.
    pub fn resolve(&self, sql: &str) -> Result<String, BindError> {
        let tokens = SqlTokens::new(sql)?;
        let mut output = String::with_capacity(sql.len());
        let mut copied = 0;
        for reference in relation_refs(&tokens) {
            let Some(relation) = self.bindings.get(&reference.name) else {
                continue;
            };
            output.push_str(&sql[copied..reference.span.start]);
            output.push_str(relation);
            if !reference.aliased {
                output.push_str(" AS ");
                output.push_str(&sql[reference.span.clone()]);
            }
            copied = reference.span.end;
        }
        output.push_str(&sql[copied..]);
        Ok(output)
    }
}

/// Pre-flight check run before any engine call: a stage may only read from stages declared
/// strictly before it. The final query may read from every stage.
pub fn validate_references(request: &PipelineRequest) -> Result<(), BindError> {
    for (idx, stage) in request.stages.iter().enumerate() {
        let tokens = SqlTokens::new(&stage.raw_sql)?;
        for reference in relation_refs(&tokens) {
            match request.stage_index(&reference.name) {
                Some(target) if target >= idx => {
                    return Err(BindError::DanglingStageReference {
                        stage: stage.name.clone(),
                        reference: reference.name,
                        position: stage.position.within(&stage.raw_sql, reference.span.start),
                    });
                }
                _ => {}
            }
        }
    }
    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum BindError {
    #[error("parse error: {0}")]
    Parse(
        #[from]
        #[source]
        ParseError,
    ),
    #[error("stage {stage} references stage {reference} at {position}, which is not defined before it")]
    DanglingStageReference {
        stage: String,
        reference: String,
        position: Position,
    },
}

#[cfg(test)]
mod binder_test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_resolve_bound_references_only() {
        let mut resolver = ReferenceResolver::new();
        resolver.bind("scored", "run_stage_1");
        let sql = "SELECT scored.s, o.y FROM scored JOIN other o ON scored.id = o.id";
        assert_eq!(
            resolver.resolve(sql).unwrap(),
            "SELECT scored.s, o.y FROM run_stage_1 AS scored JOIN other o ON scored.id = o.id"
        );
    }

    #[test]
    fn test_resolve_keeps_existing_alias() {
        let mut resolver = ReferenceResolver::new();
        resolver.bind("a", "r1");
        resolver.bind("b", "r2");
        assert_eq!(
            resolver
                .resolve("SELECT * FROM a AS x, B y WHERE 'a' <> x.v")
                .unwrap(),
            "SELECT * FROM r1 AS x, r2 y WHERE 'a' <> x.v"
        );
    }

    #[test]
    fn test_resolved_sql_has_no_bare_stage_reference() {
        let mut resolver = ReferenceResolver::new();
        resolver.bind("scored", "run_stage_1");
        let sql = "SELECT * FROM scored, (SELECT * FROM scored s2) q JOIN scored ON true";
        let resolved = resolver.resolve(sql).unwrap();
        let tokens = SqlTokens::new(&resolved).unwrap();
        let refs = relation_refs(&tokens);
        assert_eq!(refs.len(), 3);
        assert!(refs.iter().all(|r| r.name == "run_stage_1"));
    }

    #[test]
    fn test_unbound_stage_stays_untouched() {
        let resolver = ReferenceResolver::new();
        let sql = "SELECT * FROM later";
        assert_eq!(resolver.resolve(sql).unwrap(), sql);
        assert!(!resolver.is_bound("later"));
    }

    #[test]
    fn test_from_inside_function_is_not_a_reference() {
        let mut resolver = ReferenceResolver::new();
        resolver.bind("created", "run_stage_2");
        assert_eq!(
            resolver
                .resolve("SELECT extract(year FROM created) FROM created")
                .unwrap(),
            "SELECT extract(year FROM created) FROM run_stage_2 AS created"
        );

        let request = PipelineRequest::parse(
            "PIPELINE a AS (SELECT extract(year FROM created) AS y FROM docs), \
             created AS (SELECT 1) SELECT * FROM a",
        )
        .unwrap();
        assert!(validate_references(&request).is_ok());
    }

    #[test]
    fn test_validate_accepts_backward_references() {
        let request = PipelineRequest::parse(
            "PIPELINE a AS (SELECT * FROM docs), b AS (SELECT * FROM a JOIN docs ON true) SELECT * FROM a, b",
        )
        .unwrap();
        assert!(validate_references(&request).is_ok());
    }

    #[test]
    fn test_validate_rejects_forward_and_self_references() {
        let request = PipelineRequest::parse(
            "PIPELINE a AS (SELECT * FROM b), b AS (SELECT 1) SELECT * FROM b",
        )
        .unwrap();
        match validate_references(&request) {
            Err(BindError::DanglingStageReference {
                stage,
                reference,
                position,
            }) => {
                assert_eq!((stage.as_str(), reference.as_str()), ("a", "b"));
                assert_eq!(position.column, 30);
            }
            other => panic!("unexpected result {:?}", other),
        }

        let request =
            PipelineRequest::parse("PIPELINE a AS (SELECT * FROM a) SELECT * FROM a").unwrap();
        assert!(matches!(
            validate_references(&request),
            Err(BindError::DanglingStageReference { .. })
        ));
    }
}
