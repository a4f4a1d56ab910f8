mod hints;
mod splitter;
mod tokenizer;

use std::fmt;

pub use hints::*;
pub use splitter::*;
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::{Parser, ParserError};
pub use tokenizer::*;

pub fn parse(sql: &str) -> Result<Vec<Statement>, ParserError> {
    let dialect = PostgreSqlDialect {};
    Parser::parse_sql(&dialect, sql)
}

/// A location in pipeline text. `line` and `column` are 1-based, `column` counts characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn locate(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let column = before[line_start..].chars().count() + 1;
        Self {
            offset,
            line,
            column,
        }
    }

    /// Position of `offset` inside `text`, where `text` itself starts at `self`.
    pub fn within(&self, text: &str, offset: usize) -> Self {
        let inner = Self::locate(text, offset);
        if inner.line == 1 {
            Self {
                offset: self.offset + inner.offset,
                line: self.line,
                column: self.column + inner.column - 1,
            }
        } else {
            Self {
                offset: self.offset + inner.offset,
                line: self.line + inner.line - 1,
                column: inner.column,
            }
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("malformed pipeline at {position}: {message}")]
    MalformedPipeline { position: Position, message: String },
    #[error("nested PIPELINE block at {position} is not supported")]
    UnsupportedNestedPipeline { position: Position },
}

impl ParseError {
    pub(crate) fn malformed(source: &str, offset: usize, message: impl Into<String>) -> Self {
        ParseError::MalformedPipeline {
            position: Position::locate(source, offset),
            message: message.into(),
        }
    }

    pub fn position(&self) -> Position {
        match self {
            ParseError::MalformedPipeline { position, .. } => *position,
            ParseError::UnsupportedNestedPipeline { position } => *position,
        }
    }
}
