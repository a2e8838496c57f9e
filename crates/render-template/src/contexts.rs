/*
 * contexts.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Escape analysis.
//!
//! Tracks the HTML output context through the literal markup of a template
//! and records on every action the context its output lands in. Values are
//! then escaped per context at evaluation time (see [`crate::escape`]).
//!
//! The tracker is a small HTML tokenizer: it recognizes tags, attribute
//! names and values (quoted or not), comments, and the raw-text bodies of
//! `<script>`, `<style>`, `<title>` and `<textarea>`.

use std::fmt;

use crate::ast::{SourcePos, TemplateNode};
use crate::error::{TemplateError, TemplateResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// HTML body text.
    #[default]
    Text,
    /// Inside a tag, before an attribute name.
    Tag,
    /// Inside an attribute name.
    AttrName,
    /// After an attribute name, before any `=`.
    AfterName,
    /// After `=`, before the value starts.
    BeforeValue,
    /// Inside an attribute value.
    Attr,
    /// Body of `<title>` or `<textarea>`.
    Rcdata,
    /// Body of `<script>`.
    Script,
    /// Body of `<style>`.
    Style,
    /// Inside `<!-- -->`.
    Comment,
}

/// How the current attribute value is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delim {
    #[default]
    None,
    Double,
    Single,
    /// Unquoted value, ended by whitespace or `>`.
    Space,
}

/// The content type of the current attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttrKind {
    #[default]
    Normal,
    Url,
    Css,
    Script,
}

/// Position inside a URL-valued attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UrlPart {
    /// Nothing written yet; the scheme is still open.
    #[default]
    Start,
    /// Some of the URL written, no `?` or `#` yet.
    PreQuery,
    QueryOrFragment,
}

/// Elements whose bodies are not parsed as markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Element {
    #[default]
    None,
    Script,
    Style,
    Textarea,
    Title,
}

impl Element {
    fn from_tag(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "script" => Element::Script,
            "style" => Element::Style,
            "textarea" => Element::Textarea,
            "title" => Element::Title,
            _ => Element::None,
        }
    }

    fn tag_name(self) -> Option<&'static str> {
        match self {
            Element::None => None,
            Element::Script => Some("script"),
            Element::Style => Some("style"),
            Element::Textarea => Some("textarea"),
            Element::Title => Some("title"),
        }
    }

    fn body_state(self) -> State {
        match self {
            Element::None => State::Text,
            Element::Script => State::Script,
            Element::Style => State::Style,
            Element::Textarea | Element::Title => State::Rcdata,
        }
    }
}

/// Lexical position inside JavaScript code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsState {
    /// Between tokens, where a value is a complete expression.
    #[default]
    Expr,
    DoubleQuote,
    SingleQuote,
    /// Inside a backtick template literal.
    Template,
    Regexp,
    LineComment,
    BlockComment,
}

/// JavaScript scanner state for `<script>` bodies and event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Js {
    pub state: JsState,
    /// A `/` here is a division operator rather than the start of a regexp.
    pub slash_divides: bool,
    /// Open braces of the current `${ }` substitution; 0 outside one.
    pub braces: u8,
}

/// The output context at a point in the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Context {
    pub state: State,
    pub delim: Delim,
    pub attr: AttrKind,
    pub url_part: UrlPart,
    pub element: Element,
    pub js: Js,
}

impl Context {
    /// Whether values written here land in JavaScript code.
    pub fn in_js(&self) -> bool {
        self.state == State::Script || (self.state == State::Attr && self.attr == AttrKind::Script)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.state)?;
        if self.state == State::Attr {
            write!(f, " {:?} {:?}", self.attr, self.delim)?;
            if self.attr == AttrKind::Url {
                write!(f, " {:?}", self.url_part)?;
            }
        }
        if self.in_js() && self.js.state != JsState::Expr {
            write!(f, " {:?}", self.js.state)?;
        }
        if self.element != Element::None {
            write!(f, " in {:?}", self.element)?;
        }
        Ok(())
    }
}

const URL_ATTRS: &[&str] = &[
    "action",
    "archive",
    "background",
    "cite",
    "classid",
    "codebase",
    "data",
    "formaction",
    "href",
    "icon",
    "longdesc",
    "manifest",
    "poster",
    "profile",
    "src",
    "usemap",
    "xmlns",
];

/// Classify an attribute by name.
pub(crate) fn attr_kind(name: &str) -> AttrKind {
    let lower = name.to_ascii_lowercase();
    let mut name = lower.strip_prefix("data-").unwrap_or(&lower);
    if let Some((prefix, local)) = name.split_once(':') {
        if prefix == "xmlns" {
            return AttrKind::Url;
        }
        name = local;
    }

    if name.starts_with("on") {
        AttrKind::Script
    } else if name == "style" {
        AttrKind::Css
    } else if URL_ATTRS.contains(&name)
        || name.contains("src")
        || name.contains("uri")
        || name.contains("url")
    {
        AttrKind::Url
    } else {
        AttrKind::Normal
    }
}

fn is_space(c: char) -> bool {
    c.is_ascii_whitespace()
}

fn tag_name_len(s: &str) -> usize {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() => {}
        _ => return 0,
    }
    chars
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '-' || *c == ':'))
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn attr_name_len(s: &str) -> usize {
    s.find(|c: char| is_space(c) || c == '=' || c == '>' || c == '/')
        .unwrap_or(s.len())
        .max(1)
}

fn in_tag(ctx: Context) -> Context {
    Context {
        state: State::Tag,
        element: ctx.element,
        ..Context::default()
    }
}

fn end_of_tag(ctx: Context) -> Context {
    let state = ctx.element.body_state();
    Context {
        state,
        element: if state == State::Text {
            Element::None
        } else {
            ctx.element
        },
        ..Context::default()
    }
}

/// Compute the context after `text` is written in context `ctx`.
pub(crate) fn advance(mut ctx: Context, text: &str) -> Context {
    let mut i = 0;
    while i < text.len() {
        let (next, to) = match ctx.state {
            State::Text => step_text(ctx, text, i),
            State::Comment => step_comment(ctx, text, i),
            State::Tag => step_tag(ctx, text, i),
            State::AttrName => step_attr_name(ctx, text, i),
            State::AfterName => step_after_name(ctx, text, i),
            State::BeforeValue => step_before_value(ctx, text, i),
            State::Attr => step_attr(ctx, text, i),
            State::Rcdata | State::Script | State::Style => step_raw_text(ctx, text, i),
        };
        ctx = next;
        i = to;
    }
    ctx
}

fn step_text(ctx: Context, s: &str, i: usize) -> (Context, usize) {
    let Some(rel) = s[i..].find('<') else {
        return (ctx, s.len());
    };
    let lt = i + rel;
    let rest = &s[lt..];
    if rest.starts_with("<!--") {
        return (
            Context {
                state: State::Comment,
                ..Context::default()
            },
            lt + 4,
        );
    }

    let closing = rest.starts_with("</");
    let name_start = if closing { lt + 2 } else { lt + 1 };
    let name_len = tag_name_len(&s[name_start..]);
    if name_len == 0 {
        return (ctx, lt + 1);
    }
    let element = if closing {
        Element::None
    } else {
        Element::from_tag(&s[name_start..name_start + name_len])
    };
    (
        Context {
            state: State::Tag,
            element,
            ..Context::default()
        },
        name_start + name_len,
    )
}

fn step_comment(ctx: Context, s: &str, i: usize) -> (Context, usize) {
    match s[i..].find("-->") {
        Some(rel) => (Context::default(), i + rel + 3),
        None => (ctx, s.len()),
    }
}

fn step_tag(ctx: Context, s: &str, i: usize) -> (Context, usize) {
    let rest = &s[i..];
    let trimmed = rest.trim_start_matches(is_space);
    if trimmed.len() < rest.len() {
        return (ctx, i + rest.len() - trimmed.len());
    }
    if rest.starts_with('>') {
        return (end_of_tag(ctx), i + 1);
    }
    if rest.starts_with('/') {
        return (ctx, i + 1);
    }
    let len = attr_name_len(rest);
    (
        Context {
            state: State::AttrName,
            attr: attr_kind(&rest[..len]),
            ..ctx
        },
        i + len,
    )
}

fn step_attr_name(ctx: Context, s: &str, i: usize) -> (Context, usize) {
    let rest = &s[i..];
    match rest.chars().next() {
        Some(c) if is_space(c) => (
            Context {
                state: State::AfterName,
                ..ctx
            },
            i + 1,
        ),
        Some('=') => (
            Context {
                state: State::BeforeValue,
                ..ctx
            },
            i + 1,
        ),
        Some('>' | '/') => (in_tag(ctx), i),
        _ => (ctx, i + attr_name_len(rest)),
    }
}

fn step_after_name(ctx: Context, s: &str, i: usize) -> (Context, usize) {
    match s[i..].chars().next() {
        Some(c) if is_space(c) => (ctx, i + 1),
        Some('=') => (
            Context {
                state: State::BeforeValue,
                ..ctx
            },
            i + 1,
        ),
        _ => (in_tag(ctx), i),
    }
}

fn step_before_value(ctx: Context, s: &str, i: usize) -> (Context, usize) {
    let attr_value = |delim| Context {
        state: State::Attr,
        delim,
        url_part: UrlPart::Start,
        ..ctx
    };
    match s[i..].chars().next() {
        Some(c) if is_space(c) => (ctx, i + 1),
        Some('"') => (attr_value(Delim::Double), i + 1),
        Some('\'') => (attr_value(Delim::Single), i + 1),
        Some('>') => (end_of_tag(ctx), i + 1),
        _ => (attr_value(Delim::Space), i),
    }
}

fn step_attr(ctx: Context, s: &str, i: usize) -> (Context, usize) {
    let rest = &s[i..];
    let end = match ctx.delim {
        Delim::Double => rest.find('"'),
        Delim::Single => rest.find('\''),
        Delim::Space | Delim::None => rest.find(|c: char| is_space(c) || c == '>'),
    };
    let content = &rest[..end.unwrap_or(rest.len())];
    let ctx = match ctx.attr {
        AttrKind::Url => Context {
            url_part: url_part_after(ctx.url_part, content),
            ..ctx
        },
        AttrKind::Script => Context {
            js: advance_js(ctx.js, &decode_quote_entities(content)),
            ..ctx
        },
        AttrKind::Normal | AttrKind::Css => ctx,
    };

    match end {
        None => (ctx, s.len()),
        Some(e) => match ctx.delim {
            Delim::Double | Delim::Single => (in_tag(ctx), i + e + 1),
            Delim::Space | Delim::None => (in_tag(ctx), i + e),
        },
    }
}

fn url_part_after(part: UrlPart, written: &str) -> UrlPart {
    if part == UrlPart::QueryOrFragment || written.contains(['?', '#']) {
        UrlPart::QueryOrFragment
    } else if !written.is_empty() {
        UrlPart::PreQuery
    } else {
        part
    }
}

fn step_raw_text(ctx: Context, s: &str, i: usize) -> (Context, usize) {
    let Some(name) = ctx.element.tag_name() else {
        return (Context::default(), i);
    };
    let needle = format!("</{}", name);
    let lower = s[i..].to_ascii_lowercase();
    match lower.find(&needle) {
        Some(rel) => (in_tag(Context::default()), i + rel + needle.len()),
        None if ctx.state == State::Script => (
            Context {
                js: advance_js(ctx.js, &s[i..]),
                ..ctx
            },
            s.len(),
        ),
        None => (ctx, s.len()),
    }
}

/// Event handler values are HTML-decoded before they run.
fn decode_quote_entities(s: &str) -> std::borrow::Cow<'_, str> {
    if !s.contains('&') {
        return s.into();
    }
    s.replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&#96;", "`")
        .into()
}

/// Characters after which a `/` starts a regexp literal.
fn slash_starts_regexp_after(c: char) -> bool {
    !(c.is_alphanumeric() || matches!(c, '_' | '$' | ')' | ']'))
}

/// Compute the JavaScript state after `text`.
pub(crate) fn advance_js(mut js: Js, text: &str) -> Js {
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match js.state {
            JsState::Expr => match c {
                '"' => js.state = JsState::DoubleQuote,
                '\'' => js.state = JsState::SingleQuote,
                '`' => js.state = JsState::Template,
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    js.state = JsState::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    js.state = JsState::BlockComment;
                }
                '/' if !js.slash_divides => js.state = JsState::Regexp,
                '}' if js.braces == 1 => {
                    js.braces = 0;
                    js.state = JsState::Template;
                }
                c if c.is_whitespace() => {}
                c => {
                    match c {
                        '{' if js.braces > 0 => js.braces = js.braces.saturating_add(1),
                        '}' if js.braces > 1 => js.braces -= 1,
                        _ => {}
                    }
                    js.slash_divides = !slash_starts_regexp_after(c);
                }
            },
            JsState::DoubleQuote | JsState::SingleQuote | JsState::Regexp => match c {
                '\\' => {
                    chars.next();
                }
                '"' if js.state == JsState::DoubleQuote => js = closed(js),
                '\'' if js.state == JsState::SingleQuote => js = closed(js),
                '/' if js.state == JsState::Regexp => js = closed(js),
                _ => {}
            },
            JsState::Template => match c {
                '\\' => {
                    chars.next();
                }
                '`' => js = closed(js),
                '$' if chars.peek() == Some(&'{') => {
                    chars.next();
                    js = Js {
                        state: JsState::Expr,
                        slash_divides: false,
                        braces: 1,
                    };
                }
                _ => {}
            },
            JsState::LineComment => {
                if c == '\n' {
                    js.state = JsState::Expr;
                }
            }
            JsState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    js.state = JsState::Expr;
                }
            }
        }
    }
    js
}

/// Back in expression position after a literal ends.
fn closed(js: Js) -> Js {
    Js {
        state: JsState::Expr,
        slash_divides: true,
        ..js
    }
}

/// The context after an action that printed something.
fn after_action(ctx: Context) -> Context {
    if ctx.in_js() && ctx.js.state == JsState::Expr {
        return Context {
            js: Js {
                slash_divides: true,
                ..ctx.js
            },
            ..ctx
        };
    }
    match ctx.state {
        State::Tag | State::AfterName => Context {
            state: State::AttrName,
            attr: AttrKind::Normal,
            ..ctx
        },
        State::BeforeValue => Context {
            state: State::Attr,
            delim: Delim::Space,
            url_part: if ctx.attr == AttrKind::Url {
                UrlPart::PreQuery
            } else {
                UrlPart::Start
            },
            ..ctx
        },
        State::Attr if ctx.attr == AttrKind::Url && ctx.url_part == UrlPart::Start => Context {
            url_part: UrlPart::PreQuery,
            ..ctx
        },
        _ => ctx,
    }
}

/// Collapse states that only differ by how far a tag has progressed.
fn nudge(ctx: Context) -> Context {
    match ctx.state {
        State::Tag | State::AfterName => Context {
            state: State::AttrName,
            ..ctx
        },
        State::BeforeValue => Context {
            state: State::Attr,
            delim: Delim::Space,
            ..ctx
        },
        _ => ctx,
    }
}

/// Join two URL contexts that only differ in URL part, keeping the stricter.
fn join_url(a: Context, b: Context) -> Option<Context> {
    let same_otherwise = Context {
        url_part: UrlPart::Start,
        ..a
    } == Context {
        url_part: UrlPart::Start,
        ..b
    };
    if !same_otherwise {
        return None;
    }
    let url_part = if a.url_part == UrlPart::QueryOrFragment || b.url_part == UrlPart::QueryOrFragment {
        UrlPart::QueryOrFragment
    } else if a.url_part == UrlPart::Start || b.url_part == UrlPart::Start {
        UrlPart::Start
    } else {
        UrlPart::PreQuery
    };
    Some(Context { url_part, ..a })
}

fn dividing(ctx: Context) -> Context {
    Context {
        js: Js {
            slash_divides: true,
            ..ctx.js
        },
        ..ctx
    }
}

/// Merge the end contexts of two branches.
pub(crate) fn join(a: Context, b: Context, pos: SourcePos) -> TemplateResult<Context> {
    if a == b {
        return Ok(a);
    }
    if let Some(joined) = join_url(a, b) {
        return Ok(joined);
    }
    let (na, nb) = (nudge(a), nudge(b));
    if na == nb {
        return Ok(na);
    }
    if let Some(joined) = join_url(na, nb) {
        return Ok(joined);
    }
    // Branches ending after an operand and after punctuation only disagree
    // on how a later `/` lexes; that is taken as division.
    let (da, db) = (dividing(a), dividing(b));
    if da == db {
        return Ok(da);
    }
    Err(TemplateError::parse(
        format!("branches end in different contexts: {} and {}", a, b),
        pos,
    ))
}

/// Record the output context of every action in `nodes`.
pub(crate) fn annotate(nodes: &mut [TemplateNode]) -> TemplateResult<()> {
    walk(nodes, Context::default())?;
    Ok(())
}

fn walk(nodes: &mut [TemplateNode], mut ctx: Context) -> TemplateResult<Context> {
    for node in nodes.iter_mut() {
        ctx = match node {
            TemplateNode::Text(text) => advance(ctx, &text.text),
            TemplateNode::Comment(_) => ctx,
            TemplateNode::Action(action) => {
                action.context = ctx;
                if action.pipeline.prints() {
                    after_action(ctx)
                } else {
                    ctx
                }
            }
            TemplateNode::If(branch) | TemplateNode::With(branch) => {
                let body_end = walk(&mut branch.body, ctx)?;
                let else_end = match &mut branch.else_body {
                    Some(else_body) => walk(else_body, ctx)?,
                    None => ctx,
                };
                join(body_end, else_end, branch.pos)?
            }
            TemplateNode::Range(branch) => {
                // The body may run zero or more times, so it has to be
                // stable when entered from its own end context.
                let body_end = walk(&mut branch.body, ctx)?;
                let mut loop_ctx = join(ctx, body_end, branch.pos)?;
                if loop_ctx != ctx {
                    let again = walk(&mut branch.body, loop_ctx)?;
                    let settled = join(loop_ctx, again, branch.pos)?;
                    if settled != loop_ctx {
                        return Err(TemplateError::parse(
                            format!(
                                "range body ends in a different context: {} and {}",
                                loop_ctx, again
                            ),
                            branch.pos,
                        ));
                    }
                    loop_ctx = settled;
                }
                let else_end = match &mut branch.else_body {
                    Some(else_body) => walk(else_body, ctx)?,
                    None => ctx,
                };
                join(loop_ctx, else_end, branch.pos)?
            }
        };
    }
    Ok(ctx)
}
