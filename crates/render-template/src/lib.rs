/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Context-aware HTML template engine for the render service.
//!
//! Templates use `{{ ... }}` actions:
//!
//! - Interpolation: `{{.customer.name}}`, `{{$row.total}}`
//! - Pipelines: `{{.price | mul 100}}`
//! - Variables: `{{$x := .a}}`, `{{$x = add $x 1}}`
//! - Conditionals: `{{if .a}}...{{else if .b}}...{{else}}...{{end}}`
//! - Loops: `{{range $i, $row := .rows}}...{{else}}...{{end}}`
//! - Rebinding: `{{with .address}}...{{end}}`
//! - Comments: `{{/* ignored */}}`, whitespace trimming with `{{-` and `-}}`
//!
//! # Escaping
//!
//! While parsing, the engine follows the HTML markup around each action and
//! records whether its output lands in body text, an attribute (plain, URL,
//! CSS or event handler), a `<script>`/`<style>` body, or a comment. Values
//! are escaped for that context when rendered. A [`SafeValue`] bypasses
//! escaping only in the context it was vetted for.
//!
//! Request data is usually passed through [`RenderContext::sanitized`] first,
//! which tags URL-like strings (`http://`, `https://`, `data:`, `file://`) as
//! safe URLs so embedded images survive the URL filter.
//!
//! # Example
//!
//! ```
//! use render_template::{RenderContext, Template};
//!
//! let template = Template::compile("<p title=\"{{.t}}\">{{.body}}</p>").unwrap();
//!
//! let mut ctx = RenderContext::new();
//! ctx.insert("t", "a \"quoted\" title");
//! ctx.insert("body", "<script>");
//!
//! let output = template.render(&ctx).unwrap();
//! assert_eq!(output, "<p title=\"a &#34;quoted&#34; title\">&lt;script&gt;</p>");
//! ```

pub mod ast;
pub mod context;
pub mod contexts;
pub mod error;
pub mod escape;
pub mod eval_context;
pub mod evaluator;
pub mod functions;
mod lexer;
pub mod parser;
pub mod sanitize;

// Re-export main types at crate root
pub use ast::{SourcePos, TemplateNode};
pub use context::{RenderContext, SafeKind, SafeValue, Value};
pub use error::{TemplateError, TemplateResult};
pub use evaluator::render_template;
pub use parser::Template;
pub use sanitize::{is_url_like, sanitize};
