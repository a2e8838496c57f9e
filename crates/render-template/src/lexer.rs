/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tokenizer for template source.
//!
//! Splits the source into literal text and the tokens of `{{ ... }}` actions.
//! Whitespace trim markers (`{{- ` and ` -}}`) are applied to the neighbouring
//! text here, so the parser never sees them.

use crate::ast::SourcePos;
use crate::error::{TemplateError, TemplateResult};

const LEFT_DELIM: &str = "{{";
const RIGHT_DELIM: &str = "}}";
const LEFT_COMMENT: &str = "/*";
const RIGHT_COMMENT: &str = "*/";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Text(String),
    Comment(String),
    LeftDelim,
    RightDelim,
    /// Keyword, function name, `true`, `false` or `nil`.
    Ident(String),
    /// `.a.b`
    Field(Vec<String>),
    /// `.a.b` directly following `)`.
    ChainField(Vec<String>),
    /// `$x.a`; the name includes the `$`.
    Variable {
        name: String,
        fields: Vec<String>,
    },
    Dot,
    Str(String),
    Int(i64),
    Float(f64),
    LeftParen,
    RightParen,
    Pipe,
    Declare,
    Assign,
    Comma,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Item {
    pub token: Token,
    pub pos: SourcePos,
}

/// Tokenize a template. The returned list always ends with [`Token::Eof`].
pub(crate) fn lex(source: &str) -> TemplateResult<Vec<Item>> {
    let mut lexer = Lexer::new(source);
    lexer.run()?;
    Ok(lexer.items)
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    items: Vec<Item>,
    line_starts: Vec<usize>,
    trim_next_text: bool,
}

fn is_space(c: char) -> bool {
    c.is_ascii_whitespace()
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn leading_space_len(s: &str) -> usize {
    s.len() - s.trim_start_matches(is_space).len()
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            src,
            pos: 0,
            items: Vec::new(),
            line_starts,
            trim_next_text: false,
        }
    }

    fn position(&self, offset: usize) -> SourcePos {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[line_index];
        let column = self.src[line_start..offset].chars().count() + 1;
        SourcePos {
            offset,
            line: line_index + 1,
            column,
        }
    }

    fn error(&self, message: impl Into<String>, offset: usize) -> TemplateError {
        TemplateError::parse(message, self.position(offset))
    }

    fn push(&mut self, token: Token, offset: usize) {
        let pos = self.position(offset);
        self.items.push(Item { token, pos });
    }

    fn char_after(&self, offset: usize) -> Option<char> {
        self.src.get(offset..).and_then(|s| s.chars().next())
    }

    fn run(&mut self) -> TemplateResult<()> {
        loop {
            let Some(rel) = self.src[self.pos..].find(LEFT_DELIM) else {
                self.push_text(self.pos, self.src.len(), false);
                break;
            };
            let start = self.pos + rel;
            let mut inner = start + LEFT_DELIM.len();
            let trim_left = self.src[inner..].starts_with('-')
                && self.char_after(inner + 1).is_some_and(is_space);

            self.push_text(self.pos, start, trim_left);
            if trim_left {
                inner += 2;
            }

            if self.src[inner..].starts_with(LEFT_COMMENT) {
                self.lex_comment(start, inner)?;
            } else {
                self.push(Token::LeftDelim, start);
                self.pos = inner;
                self.lex_action(start)?;
            }
        }
        self.push(Token::Eof, self.src.len());
        Ok(())
    }

    fn push_text(&mut self, from: usize, to: usize, trim_end: bool) {
        let mut text = &self.src[from..to];
        let mut offset = from;
        if self.trim_next_text {
            let trimmed = text.trim_start_matches(is_space);
            offset += text.len() - trimmed.len();
            text = trimmed;
            self.trim_next_text = false;
        }
        if trim_end {
            text = text.trim_end_matches(is_space);
        }
        if !text.is_empty() {
            self.push(Token::Text(text.to_string()), offset);
        }
    }

    fn lex_comment(&mut self, start: usize, inner: usize) -> TemplateResult<()> {
        let body_start = inner + LEFT_COMMENT.len();
        let Some(rel) = self.src[body_start..].find(RIGHT_COMMENT) else {
            return Err(self.error("unclosed comment", start));
        };
        let text = self.src[body_start..body_start + rel].to_string();
        let mut after = body_start + rel + RIGHT_COMMENT.len();

        let rest = &self.src[after..];
        if rest.starts_with(RIGHT_DELIM) {
            after += RIGHT_DELIM.len();
        } else {
            let ws = leading_space_len(rest);
            if ws > 0 && rest[ws..].starts_with("-}}") {
                self.trim_next_text = true;
                after += ws + 3;
            } else {
                return Err(self.error("comment ends before closing delimiter", start));
            }
        }

        self.push(Token::Comment(text), start);
        self.pos = after;
        Ok(())
    }

    fn lex_action(&mut self, start: usize) -> TemplateResult<()> {
        loop {
            let rest = &self.src[self.pos..];
            let Some(c) = rest.chars().next() else {
                return Err(self.error("unclosed action", start));
            };

            if rest.starts_with(RIGHT_DELIM) {
                self.push(Token::RightDelim, self.pos);
                self.pos += RIGHT_DELIM.len();
                return Ok(());
            }

            if is_space(c) {
                let ws = leading_space_len(rest);
                if rest[ws..].starts_with("-}}") {
                    self.trim_next_text = true;
                    self.push(Token::RightDelim, self.pos + ws + 1);
                    self.pos += ws + 3;
                    return Ok(());
                }
                self.pos += ws;
                continue;
            }

            let at = self.pos;
            match c {
                '|' => self.single(Token::Pipe),
                '(' => self.single(Token::LeftParen),
                ',' => self.single(Token::Comma),
                '=' => self.single(Token::Assign),
                ')' => {
                    self.single(Token::RightParen);
                    if self.at_field_start() {
                        let fields = self.lex_fields();
                        self.push(Token::ChainField(fields), at + 1);
                    }
                }
                ':' => {
                    if !rest.starts_with(":=") {
                        return Err(self.error("expected :=", at));
                    }
                    self.push(Token::Declare, at);
                    self.pos += 2;
                }
                '"' => self.lex_quoted(at)?,
                '`' => self.lex_raw(at)?,
                '.' => {
                    if self.at_field_start() {
                        let fields = self.lex_fields();
                        self.push(Token::Field(fields), at);
                    } else if self.char_after(at + 1).is_some_and(|n| n.is_ascii_digit()) {
                        self.lex_number(at)?;
                    } else {
                        self.single(Token::Dot);
                    }
                }
                '$' => {
                    self.pos += 1;
                    let name = format!("${}", self.read_ident());
                    let fields = if self.at_field_start() {
                        self.lex_fields()
                    } else {
                        Vec::new()
                    };
                    self.push(Token::Variable { name, fields }, at);
                }
                '-' | '+' if self.char_after(at + 1).is_some_and(|n| n.is_ascii_digit()) => {
                    self.lex_number(at)?;
                }
                c if c.is_ascii_digit() => self.lex_number(at)?,
                c if is_ident_start(c) => {
                    let ident = self.read_ident();
                    self.push(Token::Ident(ident), at);
                }
                other => {
                    return Err(self.error(format!("unexpected {:?} in action", other), at));
                }
            }
        }
    }

    fn single(&mut self, token: Token) {
        self.push(token, self.pos);
        self.pos += 1;
    }

    fn at_field_start(&self) -> bool {
        self.src[self.pos..].starts_with('.')
            && self.char_after(self.pos + 1).is_some_and(is_ident_start)
    }

    fn read_ident(&mut self) -> String {
        let rest = &self.src[self.pos..];
        let len = rest.len() - rest.trim_start_matches(is_ident_char).len();
        self.pos += len;
        rest[..len].to_string()
    }

    fn lex_fields(&mut self) -> Vec<String> {
        let mut fields = Vec::new();
        while self.at_field_start() {
            self.pos += 1;
            fields.push(self.read_ident());
        }
        fields
    }

    fn lex_quoted(&mut self, at: usize) -> TemplateResult<()> {
        let mut value = String::new();
        let mut chars = self.src[at + 1..].char_indices();
        loop {
            match chars.next() {
                None | Some((_, '\n')) => {
                    return Err(self.error("unterminated quoted string", at));
                }
                Some((i, '"')) => {
                    self.pos = at + 1 + i + 1;
                    break;
                }
                Some((_, '\\')) => {
                    let escaped = match chars.next() {
                        Some((_, 'n')) => '\n',
                        Some((_, 't')) => '\t',
                        Some((_, 'r')) => '\r',
                        Some((_, '"')) => '"',
                        Some((_, '\\')) => '\\',
                        Some((_, other)) => {
                            return Err(self.error(format!("invalid escape \\{}", other), at));
                        }
                        None => return Err(self.error("unterminated quoted string", at)),
                    };
                    value.push(escaped);
                }
                Some((_, c)) => value.push(c),
            }
        }
        self.push(Token::Str(value), at);
        Ok(())
    }

    fn lex_raw(&mut self, at: usize) -> TemplateResult<()> {
        let body_start = at + 1;
        let Some(rel) = self.src[body_start..].find('`') else {
            return Err(self.error("unterminated raw quoted string", at));
        };
        let value = self.src[body_start..body_start + rel].to_string();
        self.pos = body_start + rel + 1;
        self.push(Token::Str(value), at);
        Ok(())
    }

    fn lex_number(&mut self, at: usize) -> TemplateResult<()> {
        let bytes = self.src.as_bytes();
        let mut end = at;
        if matches!(bytes.get(end), Some(b'-' | b'+')) {
            end += 1;
        }
        let digits = |mut i: usize| {
            while bytes.get(i).is_some_and(u8::is_ascii_digit) {
                i += 1;
            }
            i
        };
        end = digits(end);
        let mut is_float = false;
        if bytes.get(end) == Some(&b'.') {
            is_float = true;
            end = digits(end + 1);
        }
        if matches!(bytes.get(end), Some(b'e' | b'E')) {
            is_float = true;
            end += 1;
            if matches!(bytes.get(end), Some(b'-' | b'+')) {
                end += 1;
            }
            end = digits(end);
        }

        let text = &self.src[at..end];
        if self.char_after(end).is_some_and(is_ident_char) {
            return Err(self.error(format!("bad number syntax: {:?}", text), at));
        }

        let token = if is_float {
            text.parse::<f64>().map(Token::Float).ok()
        } else {
            text.parse::<i64>().map(Token::Int).ok()
        };
        let Some(token) = token else {
            return Err(self.error(format!("bad number syntax: {:?}", text), at));
        };
        self.push(token, at);
        self.pos = end;
        Ok(())
    }
}
