/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template AST types.
//!
//! This module defines the abstract syntax tree for parsed templates.
//! Each node includes its source position for error reporting, and every
//! interpolating action records the output context it writes into.

use std::fmt;

use crate::contexts::Context;

/// A position in the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
    /// Byte offset from the start of the template.
    pub offset: usize,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column (in characters).
    pub column: usize,
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A node in the template AST.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    /// Literal markup to be output as-is.
    Text(TextNode),

    /// `{{pipeline}}` or a variable declaration `{{$x := pipeline}}`.
    Action(ActionNode),

    /// `{{if p}}...{{else}}...{{end}}`; `else if` nests another `If` in `else_body`.
    If(Branch),

    /// `{{range p}}...{{else}}...{{end}}`
    Range(Branch),

    /// `{{with p}}...{{else}}...{{end}}`
    With(Branch),

    /// `{{/* comment */}}` (not rendered).
    Comment(CommentNode),
}

/// Literal text node.
#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub text: String,
    pub pos: SourcePos,
}

/// Comment node.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentNode {
    pub text: String,
    pub pos: SourcePos,
}

/// An action that evaluates a pipeline and, unless it declares a variable,
/// prints the result.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionNode {
    pub pipeline: Pipeline,
    /// Output context of this interpolation site, filled in by escape analysis.
    pub context: Context,
    pub pos: SourcePos,
}

/// Shared shape of `if`, `range` and `with`.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub pipeline: Pipeline,
    pub body: Vec<TemplateNode>,
    pub else_body: Option<Vec<TemplateNode>>,
    pub pos: SourcePos,
}

/// A chain of commands joined by `|`, optionally declaring variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// Declared or assigned variable names, including the `$`.
    pub decl: Vec<String>,
    /// `true` for `=` (assign to an existing variable), `false` for `:=`.
    pub is_assign: bool,
    pub commands: Vec<Command>,
    pub pos: SourcePos,
}

impl Pipeline {
    /// Whether the action produces output (declarations do not).
    pub fn prints(&self) -> bool {
        self.decl.is_empty()
    }
}

/// One stage of a pipeline: a function call or a single operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub args: Vec<Operand>,
    pub pos: SourcePos,
}

/// An argument or the head of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `.`
    Dot,
    /// `.a.b`
    Field(Vec<String>),
    /// `$`, `$x` or `$x.a.b`
    Variable { name: String, fields: Vec<String> },
    /// A helper function name.
    Function(String),
    /// `(pipeline)` optionally followed by `.a.b`
    Chain {
        inner: Box<Pipeline>,
        fields: Vec<String>,
    },
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
}

impl Operand {
    pub fn is_function(&self) -> bool {
        matches!(self, Operand::Function(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Dot => f.write_str("."),
            Operand::Field(names) => {
                for name in names {
                    write!(f, ".{}", name)?;
                }
                Ok(())
            }
            Operand::Variable { name, fields } => {
                f.write_str(name)?;
                for field in fields {
                    write!(f, ".{}", field)?;
                }
                Ok(())
            }
            Operand::Function(name) => f.write_str(name),
            Operand::Chain { fields, .. } => {
                f.write_str("(...)")?;
                for field in fields {
                    write!(f, ".{}", field)?;
                }
                Ok(())
            }
            Operand::Str(s) => write!(f, "{:?}", s),
            Operand::Int(i) => write!(f, "{}", i),
            Operand::Float(x) => write!(f, "{}", x),
            Operand::Bool(b) => write!(f, "{}", b),
            Operand::Nil => f.write_str("nil"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_display() {
        assert_eq!(
            Operand::Field(vec!["employee".to_string(), "salary".to_string()]).to_string(),
            ".employee.salary"
        );
        assert_eq!(
            Operand::Variable {
                name: "$row".to_string(),
                fields: vec!["id".to_string()],
            }
            .to_string(),
            "$row.id"
        );
        assert_eq!(Operand::Str("a\"b".to_string()).to_string(), "\"a\\\"b\"");
    }

    #[test]
    fn test_pipeline_prints() {
        let pipeline = Pipeline {
            decl: vec!["$x".to_string()],
            is_assign: false,
            commands: Vec::new(),
            pos: SourcePos::default(),
        };
        assert!(!pipeline.prints());
    }
}
