//! Source instrumentation for mock implementations.
//!
//! A mock implementation travels to the main process as JavaScript source. Before
//! it is installed, a `console.log("<prefix><api>.<method>")` statement is spliced
//! in as the first statement of its body so every remote invocation announces
//! itself over `Runtime.consoleAPICalled`.
//!
//! Only two top-level shapes are understood:
//!
//! * a function declaration or function expression
//!   (`[async] function [name](params) { body }`);
//! * an arrow function (`[async] (params) => body`, `[async] param => body`)
//!   with either a block or an expression body.
//!
//! Everything else (generators, classes, method shorthands, trailing code) is
//! rejected with [`InstrumentErrorCode::UnsupportedShape`] or
//! [`InstrumentErrorCode::TrailingCode`]. The lexer only needs to be precise
//! enough to find bracket structure, so it treats strings, template literals,
//! regular expressions and comments as opaque.

use std::fmt;

use cdp_bridge::NOTIFICATION_PREFIX;
use serde::{Deserialize, Serialize};

use crate::MockId;

pub type InstrumentResult<T> = Result<T, InstrumentError>;

/// Stable error codes for instrumentation diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentErrorCode {
    EmptySource,
    UnterminatedLiteral,
    UnbalancedBrackets,
    UnsupportedShape,
    TrailingCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentError {
    pub code: InstrumentErrorCode,
    pub message: String,
    /// Byte offset into the source, when the failure has a location.
    pub offset: Option<usize>,
}

impl InstrumentError {
    fn new(code: InstrumentErrorCode, message: impl Into<String>, offset: Option<usize>) -> Self {
        Self {
            code,
            message: message.into(),
            offset,
        }
    }

    fn unsupported(message: impl Into<String>, offset: usize) -> Self {
        Self::new(InstrumentErrorCode::UnsupportedShape, message, Some(offset))
    }
}

impl fmt::Display for InstrumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{:?}: {} (offset {})", self.code, self.message, offset),
            None => write!(f, "{:?}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for InstrumentError {}

/// Which of the supported grammar shapes a function was parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    Declaration,
    Expression,
    Arrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionBody {
    /// Byte offsets of the opening and closing braces.
    Block { open: usize, close: usize },
    /// Byte range of the expression an arrow returns.
    Expression { start: usize, end: usize },
}

/// Parsed head and body location of a supported function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionNode {
    pub kind: FunctionKind,
    pub is_async: bool,
    pub name: Option<String>,
    pub body: FunctionBody,
    /// Offset just past the first directive (`"use strict";`) of a block body.
    directive_end: Option<usize>,
}

/// Function source with the notification statement spliced in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentedSource {
    pub source: String,
    pub kind: FunctionKind,
}

impl InstrumentedSource {
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for InstrumentedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// The statement that announces a call of `id`.
pub fn notification_statement(id: &MockId) -> String {
    let marker = format!("{NOTIFICATION_PREFIX}{}.{}", id.api(), id.method());
    let literal = serde_json::to_string(&marker).unwrap_or_else(|_| format!("\"{marker}\""));
    format!("console.log({literal});")
}

/// Rewrite `source` so that it logs the notification marker for `id` first.
pub fn instrument(source: &str, id: &MockId) -> InstrumentResult<InstrumentedSource> {
    let node = parse_function(source)?;
    let statement = notification_statement(id);

    let rewritten = match node.body {
        FunctionBody::Block { open, .. } => {
            let insert_at = node.directive_end.unwrap_or(open + 1);
            // a directive may be terminated by ASI alone
            let separator = match node.directive_end {
                Some(end) if !source[..end].ends_with(';') => ";",
                _ => "",
            };
            format!(
                "{}{} {}{}",
                &source[..insert_at],
                separator,
                statement,
                &source[insert_at..]
            )
        }
        FunctionBody::Expression { start, end } => format!(
            "{}{{ {} return ({}); }}{}",
            &source[..start],
            statement,
            &source[start..end],
            &source[end..]
        ),
    };

    Ok(InstrumentedSource {
        source: rewritten,
        kind: node.kind,
    })
}

/// Parse `source` as one of the supported function shapes.
pub fn parse_function(source: &str) -> InstrumentResult<FunctionNode> {
    let tokens = Lexer::new(source, 0).tokenize()?;
    if tokens.is_empty() {
        return Err(InstrumentError::new(
            InstrumentErrorCode::EmptySource,
            "function source is empty",
            None,
        ));
    }
    let pairs = bracket_pairs(&tokens)?;
    Parser {
        source,
        tokens: &tokens,
        pairs: &pairs,
    }
    .parse()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenKind {
    Word,
    Str,
    Template,
    Regex,
    Arrow,
    Open(u8),
    Close(u8),
    Punct(u8),
}

#[derive(Clone, Copy, Debug)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

const RESERVED_WORDS: &[&str] = &[
    "async", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "export", "extends", "false", "finally", "for", "function",
    "if", "import", "in", "instanceof", "let", "new", "null", "return", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    prev: Option<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos,
            prev: None,
        }
    }

    fn tokenize(mut self) -> InstrumentResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn next_token(&mut self) -> InstrumentResult<Option<Token>> {
        self.skip_trivia()?;
        let Some(byte) = self.peek(0) else {
            return Ok(None);
        };
        let start = self.pos;
        let kind = match byte {
            b'\'' | b'"' => {
                self.scan_string(byte)?;
                TokenKind::Str
            }
            b'`' => {
                self.scan_template()?;
                TokenKind::Template
            }
            b'(' | b'[' | b'{' => {
                self.pos += 1;
                TokenKind::Open(byte)
            }
            b')' | b']' | b'}' => {
                self.pos += 1;
                TokenKind::Close(byte)
            }
            b'=' if self.peek(1) == Some(b'>') => {
                self.pos += 2;
                TokenKind::Arrow
            }
            b'/' if self.regex_allowed() => {
                self.scan_regex()?;
                TokenKind::Regex
            }
            _ if is_word_byte(byte) => {
                while self.peek(0).is_some_and(is_word_byte) {
                    self.pos += 1;
                }
                TokenKind::Word
            }
            _ => {
                self.pos += 1;
                TokenKind::Punct(byte)
            }
        };
        let token = Token {
            kind,
            start,
            end: self.pos,
        };
        self.prev = Some(token);
        Ok(Some(token))
    }

    fn skip_trivia(&mut self) -> InstrumentResult<()> {
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(b), _) if b.is_ascii_whitespace() => self.pos += 1,
                (Some(b'/'), Some(b'/')) => {
                    while self.peek(0).is_some_and(|b| b != b'\n') {
                        self.pos += 1;
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let start = self.pos;
                    let close = self.src[self.pos + 2..].find("*/").ok_or_else(|| {
                        InstrumentError::new(
                            InstrumentErrorCode::UnterminatedLiteral,
                            "unterminated block comment",
                            Some(start),
                        )
                    })?;
                    self.pos += 2 + close + 2;
                }
                _ => return Ok(()),
            }
        }
    }

    fn regex_allowed(&self) -> bool {
        let Some(prev) = self.prev else {
            return true;
        };
        match prev.kind {
            TokenKind::Word => REGEX_PRECEDING_KEYWORDS.contains(&&self.src[prev.start..prev.end]),
            TokenKind::Str | TokenKind::Template | TokenKind::Regex | TokenKind::Close(_) => false,
            TokenKind::Arrow | TokenKind::Open(_) | TokenKind::Punct(_) => true,
        }
    }

    fn unterminated(&self, what: &str, start: usize) -> InstrumentError {
        InstrumentError::new(
            InstrumentErrorCode::UnterminatedLiteral,
            format!("unterminated {what}"),
            Some(start),
        )
    }

    fn scan_string(&mut self, quote: u8) -> InstrumentResult<()> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None | Some(b'\n') => return Err(self.unterminated("string literal", start)),
                Some(b'\\') => self.pos += 2,
                Some(b) if b == quote => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn scan_template(&mut self) -> InstrumentResult<()> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match (self.peek(0), self.peek(1)) {
                (None, _) => return Err(self.unterminated("template literal", start)),
                (Some(b'\\'), _) => self.pos += 2,
                (Some(b'`'), _) => {
                    self.pos += 1;
                    return Ok(());
                }
                (Some(b'$'), Some(b'{')) => {
                    self.pos = skip_substitution(self.src, self.pos + 2)?;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn scan_regex(&mut self) -> InstrumentResult<()> {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        loop {
            match self.peek(0) {
                None | Some(b'\n') => return Err(self.unterminated("regular expression", start)),
                Some(b'\\') => self.pos += 2,
                Some(b'[') => {
                    in_class = true;
                    self.pos += 1;
                }
                Some(b']') => {
                    in_class = false;
                    self.pos += 1;
                }
                Some(b'/') if !in_class => {
                    self.pos += 1;
                    break;
                }
                Some(_) => self.pos += 1,
            }
        }
        while self.peek(0).is_some_and(is_word_byte) {
            self.pos += 1;
        }
        Ok(())
    }
}

/// Lex the code of a `${...}` substitution; returns the offset after its `}`.
fn skip_substitution(src: &str, pos: usize) -> InstrumentResult<usize> {
    let mut lexer = Lexer::new(src, pos);
    let mut depth = 0usize;
    while let Some(token) = lexer.next_token()? {
        match token.kind {
            TokenKind::Open(_) => depth += 1,
            TokenKind::Close(b'}') if depth == 0 => return Ok(token.end),
            TokenKind::Close(_) if depth == 0 => {
                return Err(InstrumentError::new(
                    InstrumentErrorCode::UnbalancedBrackets,
                    "unbalanced bracket in template substitution",
                    Some(token.start),
                ))
            }
            TokenKind::Close(_) => depth -= 1,
            _ => {}
        }
    }
    Err(InstrumentError::new(
        InstrumentErrorCode::UnterminatedLiteral,
        "unterminated template substitution",
        Some(pos),
    ))
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$' || byte >= 0x80
}

fn closing_for(open: u8) -> u8 {
    match open {
        b'(' => b')',
        b'[' => b']',
        _ => b'}',
    }
}

/// Index of the partner bracket for every bracket token.
fn bracket_pairs(tokens: &[Token]) -> InstrumentResult<Vec<Option<usize>>> {
    let mut pairs = vec![None; tokens.len()];
    let mut stack: Vec<usize> = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::Open(_) => stack.push(index),
            TokenKind::Close(close) => {
                let open = stack.pop().filter(|open| {
                    matches!(tokens[*open].kind, TokenKind::Open(o) if closing_for(o) == close)
                });
                let Some(open) = open else {
                    return Err(InstrumentError::new(
                        InstrumentErrorCode::UnbalancedBrackets,
                        format!("unexpected `{}`", close as char),
                        Some(token.start),
                    ));
                };
                pairs[open] = Some(index);
                pairs[index] = Some(open);
            }
            _ => {}
        }
    }
    if let Some(open) = stack.pop() {
        return Err(InstrumentError::new(
            InstrumentErrorCode::UnbalancedBrackets,
            "unclosed bracket",
            Some(tokens[open].start),
        ));
    }
    Ok(pairs)
}

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pairs: &'a [Option<usize>],
}

impl<'a> Parser<'a> {
    fn text(&self, index: usize) -> &'a str {
        let token = self.tokens[index];
        &self.source[token.start..token.end]
    }

    fn kind(&self, index: usize) -> Option<TokenKind> {
        self.tokens.get(index).map(|token| token.kind)
    }

    fn is_word(&self, index: usize, word: &str) -> bool {
        self.kind(index) == Some(TokenKind::Word) && self.text(index) == word
    }

    fn is_identifier(&self, index: usize) -> bool {
        self.kind(index) == Some(TokenKind::Word)
            && !self.text(index).as_bytes()[0].is_ascii_digit()
            && !RESERVED_WORDS.contains(&self.text(index))
    }

    fn offset(&self, index: usize) -> usize {
        self.tokens
            .get(index)
            .map(|token| token.start)
            .unwrap_or(self.source.len())
    }

    fn partner(&self, index: usize) -> usize {
        // bracket_pairs has already proven every bracket is matched
        self.pairs[index].unwrap_or(index)
    }

    fn parse(&self) -> InstrumentResult<FunctionNode> {
        let mut index = 0;
        let is_async = self.is_word(0, "async") && self.kind(1) != Some(TokenKind::Arrow);
        if is_async {
            index = 1;
        }

        if self.is_word(index, "function") {
            return self.parse_function_keyword(index + 1, is_async);
        }
        if self.is_word(index, "class") {
            return Err(InstrumentError::unsupported(
                "class declarations are not supported",
                self.offset(index),
            ));
        }

        match self.kind(index) {
            Some(TokenKind::Open(b'(')) => {
                let close = self.partner(index);
                let arrow = self.skip_return_type(close + 1, |kind| kind == TokenKind::Arrow);
                if self.kind(arrow) != Some(TokenKind::Arrow) {
                    return Err(InstrumentError::unsupported(
                        "expected `=>` after the parameter list",
                        self.offset(arrow),
                    ));
                }
                self.parse_arrow_body(arrow + 1, is_async)
            }
            Some(TokenKind::Word) if self.kind(index + 1) == Some(TokenKind::Arrow) => {
                if !self.is_identifier(index) {
                    return Err(InstrumentError::unsupported(
                        format!("`{}` is not a valid parameter name", self.text(index)),
                        self.offset(index),
                    ));
                }
                self.parse_arrow_body(index + 2, is_async)
            }
            Some(TokenKind::Word) if self.kind(index + 1) == Some(TokenKind::Open(b'(')) => {
                Err(InstrumentError::unsupported(
                    "method definitions are not supported",
                    self.offset(index),
                ))
            }
            Some(TokenKind::Punct(b'*')) => Err(InstrumentError::unsupported(
                "generator methods are not supported",
                self.offset(index),
            )),
            _ => Err(InstrumentError::unsupported(
                "expected a function declaration or an arrow function",
                self.offset(index),
            )),
        }
    }

    fn parse_function_keyword(&self, mut index: usize, is_async: bool) -> InstrumentResult<FunctionNode> {
        if self.kind(index) == Some(TokenKind::Punct(b'*')) {
            return Err(InstrumentError::unsupported(
                "generator functions are not supported",
                self.offset(index),
            ));
        }

        let name = if self.is_identifier(index) {
            index += 1;
            Some(self.text(index - 1).to_string())
        } else {
            None
        };

        if self.kind(index) != Some(TokenKind::Open(b'(')) {
            return Err(InstrumentError::unsupported(
                "expected a parameter list",
                self.offset(index),
            ));
        }
        let close = self.partner(index);
        let open = self.skip_return_type(close + 1, |kind| kind == TokenKind::Open(b'{'));
        if self.kind(open) != Some(TokenKind::Open(b'{')) {
            return Err(InstrumentError::unsupported(
                "expected a function body",
                self.offset(open),
            ));
        }
        let body_close = self.partner(open);
        self.expect_end(body_close + 1)?;

        let kind = if name.is_some() {
            FunctionKind::Declaration
        } else {
            FunctionKind::Expression
        };
        Ok(FunctionNode {
            kind,
            is_async,
            name,
            body: FunctionBody::Block {
                open: self.tokens[open].start,
                close: self.tokens[body_close].start,
            },
            directive_end: self.directive_end(open),
        })
    }

    fn parse_arrow_body(&self, start: usize, is_async: bool) -> InstrumentResult<FunctionNode> {
        match self.kind(start) {
            None => Err(InstrumentError::unsupported(
                "arrow function has no body",
                self.source.len(),
            )),
            Some(TokenKind::Open(b'{')) => {
                let close = self.partner(start);
                self.expect_end(close + 1)?;
                Ok(FunctionNode {
                    kind: FunctionKind::Arrow,
                    is_async,
                    name: None,
                    body: FunctionBody::Block {
                        open: self.tokens[start].start,
                        close: self.tokens[close].start,
                    },
                    directive_end: self.directive_end(start),
                })
            }
            Some(_) => {
                let mut last = self.tokens.len() - 1;
                while last > start && self.kind(last) == Some(TokenKind::Punct(b';')) {
                    last -= 1;
                }
                if self.kind(last) == Some(TokenKind::Punct(b';')) {
                    return Err(InstrumentError::unsupported(
                        "arrow function has no body",
                        self.offset(last),
                    ));
                }

                let mut index = start;
                while index <= last {
                    match self.kind(index) {
                        Some(TokenKind::Open(_)) => index = self.partner(index),
                        Some(TokenKind::Punct(b',')) | Some(TokenKind::Punct(b';')) => {
                            return Err(InstrumentError::new(
                                InstrumentErrorCode::TrailingCode,
                                "unexpected code after the arrow function body",
                                Some(self.offset(index)),
                            ))
                        }
                        _ => {}
                    }
                    index += 1;
                }

                Ok(FunctionNode {
                    kind: FunctionKind::Arrow,
                    is_async,
                    name: None,
                    body: FunctionBody::Expression {
                        start: self.tokens[start].start,
                        end: self.tokens[last].end,
                    },
                    directive_end: None,
                })
            }
        }
    }

    /// Skip an optional `: Type` annotation up to the first token accepted by `stop`.
    fn skip_return_type(&self, index: usize, stop: impl Fn(TokenKind) -> bool) -> usize {
        if self.kind(index) != Some(TokenKind::Punct(b':')) {
            return index;
        }
        let mut cursor = index + 1;
        while let Some(kind) = self.kind(cursor) {
            if stop(kind) {
                return cursor;
            }
            cursor = match kind {
                TokenKind::Open(b'{') => return cursor,
                TokenKind::Open(_) => self.partner(cursor) + 1,
                _ => cursor + 1,
            };
        }
        cursor
    }

    fn expect_end(&self, mut index: usize) -> InstrumentResult<()> {
        while self.kind(index) == Some(TokenKind::Punct(b';')) {
            index += 1;
        }
        if index < self.tokens.len() {
            return Err(InstrumentError::new(
                InstrumentErrorCode::TrailingCode,
                "unexpected code after the function",
                Some(self.offset(index)),
            ));
        }
        Ok(())
    }

    fn directive_end(&self, open: usize) -> Option<usize> {
        let first = open + 1;
        if self.kind(first) != Some(TokenKind::Str) {
            return None;
        }
        let directive = &self.text(first)[1..self.text(first).len() - 1];
        if directive != "use strict" {
            return None;
        }
        match self.kind(first + 1) {
            Some(TokenKind::Punct(b';')) => Some(self.tokens[first + 1].end),
            _ => Some(self.tokens[first].end),
        }
    }
}
