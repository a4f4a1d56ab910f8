use std::ops::Range;

use super::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare identifier or keyword
    Word,
    /// `"ident"` or `` `ident` ``
    QuotedIdent,
    /// `'literal'`
    StringLit,
    Number,
    LineComment,
    BlockComment,
    Whitespace,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Period,
    /// Any other single character
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte range of the token in its source text
    pub span: Range<usize>,
    /// Parenthesis nesting depth. A parenthesis carries the depth of the level it opens or
    /// closes from the outside, so `(` and its matching `)` share the same depth.
    pub depth: usize,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.clone()]
    }

    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }

    pub fn is_keyword(&self, source: &str, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text(source).eq_ignore_ascii_case(keyword)
    }

    pub fn is_any_keyword(&self, source: &str, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.is_keyword(source, k))
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdent)
    }

    /// Normalized identifier value: bare words fold to lower case, quoted identifiers keep
    /// their exact spelling with the doubled quote escapes removed.
    pub fn identifier(&self, source: &str) -> Option<String> {
        let text = self.text(source);
        match self.kind {
            TokenKind::Word => Some(text.to_lowercase()),
            TokenKind::QuotedIdent => {
                let quote = &text[..1];
                let inner = &text[1..text.len() - 1];
                Some(inner.replace(&quote.repeat(2), quote))
            }
            _ => None,
        }
    }
}

/// Splits SQL text into a lossless token stream: concatenating every token's text gives back
/// the input exactly.
pub struct Tokenizer<'a> {
    source: &'a str,
    pos: usize,
    open_parens: Vec<usize>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            open_parens: vec![],
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = vec![];
        while let Some(c) = self.peek() {
            let start = self.pos;
            let kind = match c {
                c if c.is_whitespace() => {
                    self.eat_while(char::is_whitespace);
                    TokenKind::Whitespace
                }
                '-' if self.peek_nth(1) == Some('-') => {
                    self.eat_while(|c| c != '\n');
                    TokenKind::LineComment
                }
                '/' if self.peek_nth(1) == Some('*') => {
                    self.block_comment(start)?;
                    TokenKind::BlockComment
                }
                '\'' => {
                    self.quoted(start, '\'', "string literal")?;
                    TokenKind::StringLit
                }
                '"' | '`' => {
                    self.quoted(start, c, "quoted identifier")?;
                    TokenKind::QuotedIdent
                }
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                ',' => self.single(TokenKind::Comma),
                ';' => self.single(TokenKind::Semicolon),
                '.' => self.single(TokenKind::Period),
                c if c.is_ascii_digit() => {
                    self.number();
                    TokenKind::Number
                }
                c if is_word_start(c) => {
                    self.eat_while(is_word_part);
                    TokenKind::Word
                }
                _ => self.single(TokenKind::Operator),
            };

            let depth = match kind {
                TokenKind::LParen => {
                    self.open_parens.push(start);
                    self.open_parens.len() - 1
                }
                TokenKind::RParen => {
                    if self.open_parens.pop().is_none() {
                        return Err(ParseError::malformed(self.source, start, "unbalanced ')'"));
                    }
                    self.open_parens.len()
                }
                _ => self.open_parens.len(),
            };
            tokens.push(Token {
                kind,
                span: start..self.pos,
                depth,
            });
        }

        if let Some(&open) = self.open_parens.last() {
            return Err(ParseError::malformed(self.source, open, "unclosed '('"));
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    fn eat_while(&mut self, predicate: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !predicate(c) {
                break;
            }
            self.bump();
        }
    }

    fn number(&mut self) {
        self.eat_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') && self.peek_nth(1).map_or(false, |c| c.is_ascii_digit()) {
            self.bump();
            self.eat_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let exponent_digits = match self.peek_nth(1) {
                Some('+' | '-') => self.peek_nth(2),
                other => other,
            };
            if exponent_digits.map_or(false, |c| c.is_ascii_digit()) {
                self.bump();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.bump();
                }
                self.eat_while(|c| c.is_ascii_digit());
            }
        }
    }

    /// Consumes a quoted token where a doubled quote character is an escaped quote.
    fn quoted(&mut self, start: usize, quote: char, what: &str) -> Result<(), ParseError> {
        self.bump();
        loop {
            match self.bump() {
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.bump();
                    } else {
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => {
                    return Err(ParseError::malformed(
                        self.source,
                        start,
                        format!("unterminated {}", what),
                    ))
                }
            }
        }
    }

    /// Block comments nest, as in PostgreSQL.
    fn block_comment(&mut self, start: usize) -> Result<(), ParseError> {
        self.pos += 2;
        let mut nesting = 1;
        while nesting > 0 {
            match (self.peek(), self.peek_nth(1)) {
                (Some('*'), Some('/')) => {
                    self.pos += 2;
                    nesting -= 1;
                }
                (Some('/'), Some('*')) => {
                    self.pos += 2;
                    nesting += 1;
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => {
                    return Err(ParseError::malformed(
                        self.source,
                        start,
                        "unterminated block comment",
                    ))
                }
            }
        }
        Ok(())
    }
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_word_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// A function call site: a word directly followed by `(`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Lower-cased function name
    pub name: String,
    /// Index of the name token
    pub name_token: usize,
    /// Index of the opening parenthesis
    pub open_paren: usize,
}

/// Tokenized SQL text with navigation helpers that skip trivia.
pub struct SqlTokens<'a> {
    source: &'a str,
    tokens: Vec<Token>,
}

impl<'a> SqlTokens<'a> {
    pub fn new(source: &'a str) -> Result<Self, ParseError> {
        let tokens = Tokenizer::new(source).tokenize()?;
        Ok(Self { source, tokens })
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn get(&self, idx: usize) -> Option<&Token> {
        self.tokens.get(idx)
    }

    pub fn text(&self, idx: usize) -> &'a str {
        self.tokens[idx].text(self.source)
    }

    /// Indices of all non-trivia tokens, in order.
    pub fn significant(&self) -> Vec<usize> {
        self.tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_trivia())
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn next_significant(&self, idx: usize) -> Option<usize> {
        (idx + 1..self.tokens.len()).find(|&i| !self.tokens[i].is_trivia())
    }

    /// Index of the `)` matching the `(` at `open`.
    pub fn matching_paren(&self, open: usize) -> Option<usize> {
        let depth = self.tokens.get(open)?.depth;
        (open + 1..self.tokens.len())
            .find(|&i| self.tokens[i].kind == TokenKind::RParen && self.tokens[i].depth == depth)
    }

    pub fn call_sites(&self) -> Vec<CallSite> {
        self.tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind == TokenKind::Word)
            .filter_map(|(idx, t)| {
                let open = self.next_significant(idx)?;
                (self.tokens[open].kind == TokenKind::LParen).then(|| CallSite {
                    name: t.text(self.source).to_lowercase(),
                    name_token: idx,
                    open_paren: open,
                })
            })
            .collect()
    }
}
