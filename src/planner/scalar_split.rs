use arrow::datatypes::DataType;
use sqlparser::ast::{
    BinaryOperator, Expr, Function, FunctionArg, FunctionArgExpr, Ident, OrderByExpr, SelectItem,
    SetExpr, Statement, Value,
};

use crate::function::SemanticOperatorRegistry;
use crate::parser::{parse, SqlTokens};

/// Where a semantic call sits in the stage query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallPosition {
    /// A whole select item; its result becomes the column `output_name`
    Projection { output_name: String },
    /// A whole top-level WHERE conjunct; its boolean result filters rows
    Predicate,
}

/// One row-scalar semantic call lifted out of an eligible stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticCall {
    pub index: usize,
    /// Operator name as written, lower-cased
    pub operator: String,
    pub arity: usize,
    pub position: CallPosition,
    /// The call as it appeared in the stage body
    pub sql: String,
}

impl SemanticCall {
    /// Name of the hidden structural column carrying argument `arg`.
    pub fn argument_column(&self, arg: usize) -> String {
        argument_column(self.index, arg)
    }

    pub fn argument_columns(&self) -> Vec<String> {
        (0..self.arity).map(|j| self.argument_column(j)).collect()
    }

    pub fn is_predicate(&self) -> bool {
        self.position == CallPosition::Predicate
    }

    /// Result type used when the stage produced no rows and nothing was evaluated.
    pub fn empty_result_type(&self) -> DataType {
        match self.position {
            CallPosition::Projection { .. } => DataType::Null,
            CallPosition::Predicate => DataType::Boolean,
        }
    }
}

pub fn argument_column(call: usize, arg: usize) -> String {
    format!("__sem_{}_{}", call, arg)
}

/// An eligible stage decomposed into the query the relational engine runs and the semantic
/// calls evaluated over its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarSplit {
    /// The stage query with every semantic call replaced by its argument columns
    pub structural_sql: String,
    pub calls: Vec<SemanticCall>,
}

impl ScalarSplit {
    /// Splits `sql`, which the tokenizer found to contain `expected_calls` semantic calls.
    /// Any call the decomposition cannot account for makes the stage undecomposable; the
    /// error is the detail reported for it.
    pub(crate) fn decompose(
        sql: &str,
        registry: &SemanticOperatorRegistry,
        expected_calls: usize,
        may_aggregate: bool,
    ) -> Result<Self, String> {
        let mut statements = parse(sql).map_err(|e| format!("stage body does not parse: {}", e))?;
        if statements.len() != 1 {
            return Err("stage body must be a single query".to_string());
        }
        let mut query = match statements.remove(0) {
            Statement::Query(query) => query,
            other => return Err(format!("stage body is not a query: {}", other)),
        };
        let bounded = query.limit.is_some() || query.offset.is_some() || query.fetch.is_some();
        let order_by = query.order_by.clone();
        let select = match query.body.as_mut() {
            SetExpr::Select(select) => select,
            _ => return Err("only a plain SELECT can be split".to_string()),
        };
        if select.distinct {
            return Err("SELECT DISTINCT over semantic calls".to_string());
        }

        let mut calls = vec![];
        let mut projection = Vec::with_capacity(select.projection.len());
        for item in std::mem::take(&mut select.projection) {
            let found = match &item {
                SelectItem::UnnamedExpr(expr) => {
                    semantic_function(expr, registry).map(|(op, f)| (op, f.clone(), None))
                }
                SelectItem::ExprWithAlias { expr, alias } => semantic_function(expr, registry)
                    .map(|(op, f)| (op, f.clone(), Some(alias.value.clone()))),
                _ => None,
            };
            let Some((operator, function, alias)) = found else {
                projection.push(item);
                continue;
            };
            let index = calls.len();
            let args = call_arguments(&operator, &function)?;
            for (j, arg) in args.iter().enumerate() {
                projection.push(SelectItem::ExprWithAlias {
                    expr: arg.clone(),
                    alias: Ident::new(argument_column(index, j)),
                });
            }
            calls.push(SemanticCall {
                index,
                operator: operator.clone(),
                arity: args.len(),
                position: CallPosition::Projection {
                    output_name: alias.unwrap_or(operator),
                },
                sql: function.to_string(),
            });
        }

        let mut predicate_args = vec![];
        if let Some(selection) = select.selection.take() {
            let mut kept = vec![];
            for conjunct in split_conjuncts(selection) {
                let found = semantic_function(&conjunct, registry).map(|(op, f)| (op, f.clone()));
                let Some((operator, function)) = found else {
                    kept.push(conjunct);
                    continue;
                };
                let index = calls.len();
                let args = call_arguments(&operator, &function)?;
                for (j, arg) in args.iter().enumerate() {
                    predicate_args.push(SelectItem::ExprWithAlias {
                        expr: arg.clone(),
                        alias: Ident::new(argument_column(index, j)),
                    });
                }
                calls.push(SemanticCall {
                    index,
                    operator,
                    arity: args.len(),
                    position: CallPosition::Predicate,
                    sql: function.to_string(),
                });
            }
            select.selection = kept.into_iter().reduce(|left, right| Expr::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::And,
                right: Box::new(right),
            });
        }
        projection.extend(predicate_args);
        select.projection = projection;

        if calls.len() != expected_calls {
            return Err("semantic call in an unsupported position".to_string());
        }
        let has_predicates = calls.iter().any(SemanticCall::is_predicate);
        if has_predicates
            && (bounded || may_aggregate || !select.group_by.is_empty() || select.having.is_some())
        {
            return Err(
                "semantic filter cannot run before GROUP BY, HAVING, LIMIT or aggregates"
                    .to_string(),
            );
        }
        if has_predicates && has_window(sql)? {
            return Err("semantic filter cannot run before window functions".to_string());
        }
        let has_projections = calls.iter().any(|c| !c.is_predicate());
        if has_projections {
            if select.group_by.iter().any(is_ordinal) || order_by.iter().any(|o| is_ordinal(&o.expr)) {
                return Err("ordinal column reference next to a semantic projection".to_string());
            }
            if let Some(name) = ordered_by_semantic_output(&order_by, &calls) {
                return Err(format!("ORDER BY semantic result {}", name));
            }
        }

        Ok(Self {
            structural_sql: query.to_string(),
            calls,
        })
    }
}

fn has_window(sql: &str) -> Result<bool, String> {
    let tokens = SqlTokens::new(sql).map_err(|e| e.to_string())?;
    Ok(tokens
        .tokens()
        .iter()
        .any(|token| token.is_keyword(sql, "OVER")))
}

/// The call `expr` consists of, when it is a registered semantic operator call.
fn semantic_function<'a>(
    expr: &'a Expr,
    registry: &SemanticOperatorRegistry,
) -> Option<(String, &'a Function)> {
    match expr {
        Expr::Nested(inner) => semantic_function(inner, registry),
        Expr::Function(function) => {
            let name = function.name.0.last()?;
            registry
                .lookup(&name.value)
                .map(|operator| (operator.name, function))
        }
        _ => None,
    }
}

fn call_arguments(operator: &str, function: &Function) -> Result<Vec<Expr>, String> {
    if function.over.is_some() {
        return Err(format!("window clause on semantic call {}", operator));
    }
    if function.distinct {
        return Err(format!("DISTINCT argument on semantic call {}", operator));
    }
    let args = function
        .args
        .iter()
        .map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
            | FunctionArg::Named {
                arg: FunctionArgExpr::Expr(expr),
                ..
            } => Ok(expr.clone()),
            _ => Err(format!("wildcard argument to semantic call {}", operator)),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if args.is_empty() {
        return Err(format!("semantic call {} has no arguments", operator));
    }
    Ok(args)
}

fn split_conjuncts(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut conjuncts = split_conjuncts(*left);
            conjuncts.extend(split_conjuncts(*right));
            conjuncts
        }
        other => vec![other],
    }
}

fn is_ordinal(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(Value::Number(..)))
}

fn ordered_by_semantic_output<'a>(
    order_by: &[OrderByExpr],
    calls: &'a [SemanticCall],
) -> Option<&'a str> {
    calls.iter().find_map(|call| match &call.position {
        CallPosition::Projection { output_name }
            if order_by.iter().any(|o| {
                matches!(&o.expr, Expr::Identifier(ident) if ident.value.eq_ignore_ascii_case(output_name))
            }) =>
        {
            Some(output_name.as_str())
        }
        _ => None,
    })
}
