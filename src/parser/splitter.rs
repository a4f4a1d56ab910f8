use std::fmt;

use derive_new::new;

use super::{Hints, ParseError, Position, Token, TokenKind, Tokenizer};

const PIPELINE_KEYWORD: &str = "PIPELINE";

/// Keywords that open a query; seeing one where a stage name belongs means the block has
/// no (further) stage definitions.
const QUERY_KEYWORDS: [&str; 4] = ["SELECT", "WITH", "VALUES", "TABLE"];

/// One named stage of a pipeline block, as written.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Normalized name used for reference matching
    pub name: String,
    /// Name exactly as declared
    pub declared_name: String,
    /// Stage body between the parentheses, trimmed
    pub raw_sql: String,
    /// Hints written directly before the stage definition
    pub hints: Hints,
    /// Position of the first character of `raw_sql`
    pub position: Position,
}

#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct FinalQuery {
    pub sql: String,
    pub position: Position,
}

/// A split pipeline block: ordered stages plus the terminal query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    /// Hints written before the `PIPELINE` keyword
    pub hints: Hints,
    pub stages: Vec<Stage>,
    pub final_query: FinalQuery,
}

impl PipelineRequest {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        StageSplitter::new(text)?.split()
    }

    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }
}

impl fmt::Display for PipelineRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", PIPELINE_KEYWORD)?;
        for (idx, stage) in self.stages.iter().enumerate() {
            let delimiter = if idx + 1 < self.stages.len() { "," } else { "" };
            writeln!(
                f,
                "  {} AS ({}){}",
                stage.declared_name, stage.raw_sql, delimiter
            )?;
        }
        write!(f, "{}", self.final_query.sql)
    }
}

/// Walks the token stream of a pipeline block. Stage boundaries are only ever found on
/// depth-0 tokens, so commas and parentheses inside literals, comments or nested
/// expressions never split a stage.
pub struct StageSplitter<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    cursor: usize,
}

impl<'a> StageSplitter<'a> {
    pub fn new(source: &'a str) -> Result<Self, ParseError> {
        let tokens = Tokenizer::new(source).tokenize()?;
        Ok(Self {
            source,
            tokens,
            cursor: 0,
        })
    }

    pub fn split(mut self) -> Result<PipelineRequest, ParseError> {
        let hints = Hints::from_comments(self.skip_trivia());
        match self.peek() {
            Some(t) if t.is_keyword(self.source, PIPELINE_KEYWORD) => self.cursor += 1,
            Some(t) => {
                return Err(self.malformed(t.span.start, "expected PIPELINE keyword"));
            }
            None => return Err(self.malformed(self.source.len(), "empty pipeline text")),
        }

        let mut stages: Vec<Stage> = vec![];
        loop {
            let stage = self.split_stage(&stages)?;
            stages.push(stage);
            self.skip_trivia();
            match self.peek() {
                Some(t) if t.kind == TokenKind::Comma => self.cursor += 1,
                _ => break,
            }
        }

        let final_query = self.split_final_query()?;
        Ok(PipelineRequest {
            hints,
            stages,
            final_query,
        })
    }

    fn split_stage(&mut self, declared: &[Stage]) -> Result<Stage, ParseError> {
        let hints = Hints::from_comments(self.skip_trivia());
        let name_token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.malformed(self.source.len(), "expected stage definition")),
        };
        if name_token.is_any_keyword(self.source, &QUERY_KEYWORDS) {
            let message = if declared.is_empty() {
                "pipeline declares no stages".to_string()
            } else {
                format!(
                    "expected stage definition after ',', found {}",
                    name_token.text(self.source)
                )
            };
            return Err(self.malformed(name_token.span.start, message));
        }
        if self.opens_pipeline(self.cursor) {
            return Err(self.nested(&name_token));
        }
        let name = name_token
            .identifier(self.source)
            .ok_or_else(|| self.malformed(name_token.span.start, "expected stage name"))?;
        if declared.iter().any(|s| s.name == name) {
            return Err(self.malformed(
                name_token.span.start,
                format!("duplicate stage name {}", name_token.text(self.source)),
            ));
        }
        self.cursor += 1;

        self.skip_trivia();
        match self.peek() {
            Some(t) if t.is_keyword(self.source, "AS") => self.cursor += 1,
            Some(t) => {
                return Err(self.malformed(
                    t.span.start,
                    format!("expected AS after stage name {}", name_token.text(self.source)),
                ))
            }
            None => return Err(self.malformed(self.source.len(), "expected AS")),
        }

        self.skip_trivia();
        let open = match self.peek() {
            Some(t) if t.kind == TokenKind::LParen => self.cursor,
            Some(t) => {
                return Err(self.malformed(
                    t.span.start,
                    format!(
                        "expected '(' to open the body of stage {}",
                        name_token.text(self.source)
                    ),
                ))
            }
            None => return Err(self.malformed(self.source.len(), "expected '('")),
        };
        let close = self.matching_paren(open)?;
        if let Some(nested) = (open + 1..close).find(|&i| self.opens_pipeline(i)) {
            return Err(self.nested(&self.tokens[nested]));
        }

        let body_start = self.tokens[open].span.end;
        let body_end = self.tokens[close].span.start;
        let body = &self.source[body_start..body_end];
        let raw_sql = body.trim();
        if raw_sql.is_empty() {
            return Err(self.malformed(
                self.tokens[open].span.start,
                format!("stage {} has an empty body", name_token.text(self.source)),
            ));
        }
        let leading = body.len() - body.trim_start().len();
        self.cursor = close + 1;

        Ok(Stage::new(
            name,
            name_token.text(self.source).to_string(),
            raw_sql.to_string(),
            hints,
            Position::locate(self.source, body_start + leading),
        ))
    }

    fn split_final_query(&mut self) -> Result<FinalQuery, ParseError> {
        self.skip_trivia();
        let start = match self.peek() {
            Some(t) => t.span.start,
            None => return Err(self.malformed(self.source.len(), "missing final query")),
        };

        let mut end = self.source.len();
        while let Some(token) = self.peek() {
            if token.kind == TokenKind::Semicolon && token.depth == 0 {
                end = token.span.start;
                self.cursor += 1;
                break;
            }
            if self.opens_pipeline(self.cursor) {
                let token = token.clone();
                return Err(self.nested(&token));
            }
            self.cursor += 1;
        }

        self.skip_trivia();
        if let Some(extra) = self.peek() {
            return Err(self.malformed(extra.span.start, "unexpected input after final query"));
        }
        let sql = self.source[start..end].trim_end();
        if sql.is_empty() {
            return Err(self.malformed(start, "missing final query"));
        }
        Ok(FinalQuery::new(
            sql.to_string(),
            Position::locate(self.source, start),
        ))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    /// Advances past whitespace and comments, returning the line comments seen.
    fn skip_trivia(&mut self) -> Vec<&'a str> {
        let source = self.source;
        let mut comments = vec![];
        while let Some(token) = self.tokens.get(self.cursor) {
            if !token.is_trivia() {
                break;
            }
            if token.kind == TokenKind::LineComment {
                comments.push(token.text(source));
            }
            self.cursor += 1;
        }
        comments
    }

    /// Whether the token at `idx` starts `PIPELINE <name> AS (`. A bare `pipeline` word is
    /// an ordinary identifier.
    fn opens_pipeline(&self, idx: usize) -> bool {
        let source = self.source;
        if !self.tokens[idx].is_keyword(source, PIPELINE_KEYWORD) {
            return false;
        }
        let mut rest = (idx + 1..self.tokens.len())
            .map(|i| &self.tokens[i])
            .filter(|t| !t.is_trivia());
        match (rest.next(), rest.next(), rest.next()) {
            (Some(name), Some(as_kw), Some(open)) => {
                name.is_identifier()
                    && !name.is_keyword(source, "AS")
                    && as_kw.is_keyword(source, "AS")
                    && open.kind == TokenKind::LParen
            }
            _ => false,
        }
    }

    fn matching_paren(&self, open: usize) -> Result<usize, ParseError> {
        let depth = self.tokens[open].depth;
        (open + 1..self.tokens.len())
            .find(|&i| self.tokens[i].kind == TokenKind::RParen && self.tokens[i].depth == depth)
            .ok_or_else(|| self.malformed(self.tokens[open].span.start, "unclosed '('"))
    }

    fn malformed(&self, offset: usize, message: impl Into<String>) -> ParseError {
        ParseError::malformed(self.source, offset, message)
    }

    fn nested(&self, token: &Token) -> ParseError {
        ParseError::UnsupportedNestedPipeline {
            position: Position::locate(self.source, token.span.start),
        }
    }
}
