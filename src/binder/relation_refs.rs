use std::ops::Range;

use crate::parser::{SqlTokens, TokenKind};

/// Keywords ending a FROM list at the depth they appear on.
const FROM_TERMINATORS: [&str; 12] = [
    "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT",
    "WINDOW", "QUALIFY", "FETCH",
];

/// Words that may follow a relation name without being its alias.
const NOT_AN_ALIAS: [&str; 26] = [
    "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT",
    "WINDOW", "QUALIFY", "FETCH", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS",
    "NATURAL", "ON", "USING", "TABLESAMPLE", "FOR", "LATERAL", "RETURNING",
];

/// An unqualified table name in FROM/JOIN position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRef {
    /// Normalized identifier
    pub name: String,
    /// Byte range of the name in the scanned text
    pub span: Range<usize>,
    /// Whether an alias follows the name
    pub aliased: bool,
}

/// Finds relation names in FROM/JOIN position: the first item after `FROM` or `JOIN` and
/// every item after a comma of the same FROM list. Derived tables, table functions and
/// qualified names are skipped.
pub fn relation_refs(sql: &SqlTokens) -> Vec<RelationRef> {
    let source = sql.source();
    let significant = sql.significant();
    // in_from_list[d]: a FROM list is open at parenthesis depth d
    let mut in_from_list: Vec<bool> = vec![false];
    // in_statement[d]: a SELECT or DELETE was seen at depth d, so FROM there opens a list.
    // A FROM inside EXTRACT, SUBSTRING or TRIM has no statement keyword at its depth.
    let mut in_statement: Vec<bool> = vec![false];
    let mut expect_relation = false;
    let mut refs = vec![];

    for (pos, &idx) in significant.iter().enumerate() {
        let token = &sql.tokens()[idx];
        let depth = token.depth;
        if in_from_list.len() <= depth + 1 {
            in_from_list.resize(depth + 2, false);
            in_statement.resize(depth + 2, false);
        }

        match token.kind {
            TokenKind::LParen => {
                in_from_list[depth + 1] = false;
                in_statement[depth + 1] = false;
                expect_relation = false;
                continue;
            }
            TokenKind::RParen => {
                in_from_list.truncate(depth + 1);
                in_statement.truncate(depth + 1);
                expect_relation = false;
                continue;
            }
            TokenKind::Comma => {
                expect_relation = in_from_list[depth];
                continue;
            }
            TokenKind::Word if token.is_any_keyword(source, &["SELECT", "DELETE"]) => {
                in_statement[depth] = true;
                continue;
            }
            TokenKind::Word if token.is_keyword(source, "FROM") => {
                if in_statement[depth] {
                    in_from_list[depth] = true;
                    expect_relation = true;
                }
                continue;
            }
            TokenKind::Word if token.is_keyword(source, "JOIN") => {
                expect_relation = true;
                continue;
            }
            TokenKind::Word if token.is_any_keyword(source, &FROM_TERMINATORS) => {
                in_from_list[depth] = false;
                expect_relation = false;
                continue;
            }
            TokenKind::Word
                if expect_relation && token.is_any_keyword(source, &["LATERAL", "ONLY"]) =>
            {
                continue;
            }
            _ => {}
        }

        if !std::mem::take(&mut expect_relation) || !token.is_identifier() {
            continue;
        }
        let next = significant.get(pos + 1).map(|&i| &sql.tokens()[i]);
        let qualified_or_call = next.map_or(false, |t| {
            matches!(t.kind, TokenKind::Period | TokenKind::LParen)
        });
        if qualified_or_call {
            continue;
        }
        let aliased = next.map_or(false, |t| match t.kind {
            TokenKind::Word => {
                t.is_keyword(source, "AS") || !t.is_any_keyword(source, &NOT_AN_ALIAS)
            }
            TokenKind::QuotedIdent => true,
            _ => false,
        });
        if let Some(name) = token.identifier(source) {
            refs.push(RelationRef {
                name,
                span: token.span.clone(),
                aliased,
            });
        }
    }
    refs
}

#[cfg(test)]
mod relation_refs_test {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;

    fn names(sql: &str) -> Vec<(String, bool)> {
        let tokens = SqlTokens::new(sql).unwrap();
        relation_refs(&tokens)
            .into_iter()
            .map(|r| (r.name, r.aliased))
            .collect()
    }

    fn plain(names: &[&str]) -> Vec<(String, bool)> {
        names.iter().map(|n| (n.to_string(), false)).collect()
    }

    #[test_case("SELECT * FROM a", &["a"] ; "single")]
    #[test_case("SELECT * FROM a, b WHERE a.x = b.x", &["a", "b"] ; "comma list")]
    #[test_case("SELECT * FROM a JOIN b ON a.x = b.x LEFT JOIN c USING (x)", &["a", "b", "c"] ; "joins")]
    #[test_case("SELECT * FROM a JOIN b ON f(a.x, b.x), c", &["a", "b", "c"] ; "comma after join")]
    #[test_case("SELECT f(x, y) FROM a", &["a"] ; "commas before from")]
    #[test_case("SELECT * FROM a WHERE x IN (SELECT y FROM b, c)", &["a", "b", "c"] ; "subquery")]
    #[test_case("SELECT * FROM (SELECT * FROM a) AS s, b", &["a", "b"] ; "derived table")]
    #[test_case("SELECT * FROM s.a, unnest(arr)", &[] ; "qualified and table function")]
    #[test_case("SELECT a.x, 'FROM b' FROM c -- FROM d", &["c"] ; "literal and comment")]
    #[test_case("SELECT * FROM a ORDER BY x, y", &["a"] ; "order by commas")]
    #[test_case("SELECT * FROM a GROUP BY x, y", &["a"] ; "group by commas")]
    #[test_case("WITH w AS (SELECT 1) SELECT * FROM w, LATERAL f", &["w", "f"] ; "lateral")]
    #[test_case("SELECT * FROM \"Quoted\"", &["Quoted"] ; "quoted")]
    #[test_case("SELECT extract(year FROM created) AS y FROM docs", &["docs"] ; "extract")]
    #[test_case("SELECT substring(s FROM 2), trim(both 'x' FROM s) FROM a", &["a"] ; "string functions")]
    #[test_case("SELECT * FROM a WHERE x IN (SELECT extract(day FROM b) FROM c)", &["a", "c"] ; "function inside subquery")]
    #[test_case("DELETE FROM a WHERE x = 1", &["a"] ; "delete")]
    fn test_relation_refs(sql: &str, expected: &[&str]) {
        let actual: Vec<String> = names(sql).into_iter().map(|(n, _)| n).collect();
        assert_eq!(actual, expected.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn test_alias_detection() {
        assert_eq!(
            names("SELECT * FROM a x JOIN b AS y ON true, c WHERE true"),
            vec![
                ("a".to_string(), true),
                ("b".to_string(), true),
                ("c".to_string(), false)
            ]
        );
        assert_eq!(names("SELECT * FROM a JOIN b ON true"), plain(&["a", "b"]));
        assert_eq!(names("SELECT * FROM a LEFT JOIN b ON true"), plain(&["a", "b"]));
    }
}
