/*
 * escape.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Per-context escapers.
//!
//! [`escape_value`] turns an evaluated value into the text written at an
//! action site, given the [`Context`] recorded for that site.

use std::fmt::Write;

use crate::context::{SafeKind, Value};
use crate::contexts::{self, AttrKind, Context, Delim, JsState, State, UrlPart};

/// Replacement for values rejected by a context filter.
pub const FILTERED: &str = "ZgotmplZ";

/// Replacement for rejected URLs; keeps the attribute a harmless fragment link.
const FILTERED_URL: &str = "#ZgotmplZ";

/// Render `value` for the action site described by `ctx`.
pub(crate) fn escape_value(value: &Value, ctx: &Context) -> String {
    let safe = match value {
        Value::Safe(s) => Some(s.kind()),
        _ => None,
    };
    let text = value.to_string();

    match ctx.state {
        State::Text => {
            if safe == Some(SafeKind::Html) {
                text
            } else {
                html_escape(&text)
            }
        }
        State::Rcdata => html_escape(&text),
        State::Comment => String::new(),
        State::Tag | State::AttrName | State::AfterName => filter_attr_name(&text),
        State::BeforeValue => escape_attr_value(
            value,
            safe,
            text,
            &Context {
                delim: Delim::Space,
                url_part: UrlPart::Start,
                ..*ctx
            },
        ),
        State::Attr => escape_attr_value(value, safe, text, ctx),
        State::Script => escape_js(value, ctx.js.state),
        State::Style => {
            if safe == Some(SafeKind::Css) {
                text
            } else {
                css_filter(&text)
            }
        }
    }
}

fn escape_attr_value(
    value: &Value,
    safe: Option<SafeKind>,
    text: String,
    ctx: &Context,
) -> String {
    let unquoted = matches!(ctx.delim, Delim::Space | Delim::None);
    let content = match ctx.attr {
        AttrKind::Normal => text,
        AttrKind::Url if safe == Some(SafeKind::Url) => text,
        AttrKind::Url => match ctx.url_part {
            UrlPart::Start => normalize_url(filter_url(&text)),
            UrlPart::PreQuery => normalize_url(&text),
            UrlPart::QueryOrFragment => query_escape(&text),
        },
        AttrKind::Css if safe == Some(SafeKind::Css) => text,
        AttrKind::Css => css_filter(&text),
        AttrKind::Script => escape_js(value, ctx.js.state),
    };
    attr_escape(&content, unquoted)
}

fn escape_js(value: &Value, state: JsState) -> String {
    match state {
        JsState::Expr => js_value(value),
        JsState::DoubleQuote | JsState::SingleQuote | JsState::Template => {
            js_string_escape(&value.to_string())
        }
        JsState::Regexp => js_regexp_escape(&value.to_string()),
        JsState::LineComment | JsState::BlockComment => String::new(),
    }
}

/// Entity-escape text for HTML body content.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            '\0' => out.push('\u{FFFD}'),
            _ => out.push(c),
        }
    }
    out
}

/// Entity-escape text for an attribute value. Unquoted values also escape
/// every character that could end or split the value.
pub fn attr_escape(s: &str, unquoted: bool) -> String {
    if !unquoted {
        return html_escape(s);
    }
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\x0c' => out.push_str("&#12;"),
            '\r' => out.push_str("&#13;"),
            ' ' => out.push_str("&#32;"),
            '=' => out.push_str("&#61;"),
            '`' => out.push_str("&#96;"),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            '\0' => out.push('\u{FFFD}'),
            _ => out.push(c),
        }
    }
    out
}

/// Attribute names are limited to a conservative alphabet, and a name
/// whose value would be a URL, style or script is refused.
pub fn filter_attr_name(s: &str) -> String {
    let name = s.to_ascii_lowercase();
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && contexts::attr_kind(&name) == AttrKind::Normal;
    if ok { name } else { FILTERED.to_string() }
}

/// Reject URLs with a scheme other than http, https or mailto.
pub fn filter_url(s: &str) -> &str {
    let scheme_end = s.find(':');
    let path_start = s.find(['/', '?', '#']);
    let has_scheme = match (scheme_end, path_start) {
        (Some(colon), Some(path)) => colon < path,
        (Some(_), None) => true,
        (None, _) => false,
    };
    if !has_scheme {
        return s;
    }
    let scheme = s[..scheme_end.unwrap_or(0)].to_ascii_lowercase();
    if matches!(scheme.as_str(), "http" | "https" | "mailto") {
        s
    } else {
        FILTERED_URL
    }
}

/// Percent-encode bytes that are not valid in a URL, leaving existing
/// escapes and reserved characters intact.
pub fn normalize_url(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        let keep = b.is_ascii_alphanumeric()
            || matches!(
                b,
                b'-' | b'.'
                    | b'_'
                    | b'~'
                    | b'!'
                    | b'#'
                    | b'$'
                    | b'&'
                    | b'*'
                    | b'+'
                    | b','
                    | b'/'
                    | b':'
                    | b';'
                    | b'='
                    | b'?'
                    | b'@'
                    | b'['
                    | b']'
                    | b'%'
            );
        if keep {
            out.push(b as char);
        } else {
            push_percent(&mut out, b);
        }
    }
    out
}

/// Percent-encode everything except unreserved characters.
pub fn query_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            push_percent(&mut out, b);
        }
    }
    out
}

fn push_percent(out: &mut String, b: u8) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    out.push('%');
    out.push(HEX[(b >> 4) as usize] as char);
    out.push(HEX[(b & 0x0f) as usize] as char);
}

/// Allow only values that cannot break out of a CSS declaration.
pub fn css_filter(s: &str) -> String {
    let ok = s.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, ' ' | '#' | '%' | '.' | ',' | '_' | '+' | '-')
    });
    if ok {
        s.to_string()
    } else {
        FILTERED.to_string()
    }
}

/// Render a value as a JavaScript literal that is safe inside `<script>`
/// and event-handler attributes.
pub fn js_value(value: &Value) -> String {
    let json = value.to_json().to_string();
    let mut out = String::with_capacity(json.len());
    let mut chars = json.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('"') => out.push_str("\\u0022"),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            },
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\'' => out.push_str("\\u0027"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape text for the inside of a JavaScript string or template literal.
pub fn js_string_escape(s: &str) -> String {
    js_escape_chars(s, |c| {
        matches!(c, '"' | '\'' | '`' | '$' | '{' | '}' | '<' | '>' | '&' | '/')
    })
}

/// Escape text so it matches literally inside a JavaScript regexp.
pub fn js_regexp_escape(s: &str) -> String {
    if s.is_empty() {
        return "(?:)".to_string();
    }
    js_escape_chars(s, |c| {
        matches!(
            c,
            '"' | '\'' | '`' | '<' | '>' | '&' | '/' | '^' | '$' | '.' | '*' | '+' | '?' | '('
                | ')' | '[' | ']' | '{' | '}' | '|' | '-'
        )
    })
}

fn js_escape_chars(s: &str, special: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < ' ' || c == '\u{2028}' || c == '\u{2029}' || special(c) => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
