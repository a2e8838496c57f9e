/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template parsing and evaluation.

use thiserror::Error;

use crate::ast::SourcePos;

/// Errors that can occur during template operations.
///
/// Both variants are plain values: a malformed template or a bad helper call
/// never panics, and no partial output accompanies either error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    /// The template source is not well formed.
    #[error("{}", with_position(.message, .position))]
    ParseError {
        message: String,
        position: Option<SourcePos>,
    },

    /// Evaluating the template against the data failed.
    #[error("{}", with_position(.message, .position))]
    ExecError {
        message: String,
        position: Option<SourcePos>,
    },
}

impl TemplateError {
    pub(crate) fn parse(message: impl Into<String>, position: SourcePos) -> Self {
        TemplateError::ParseError {
            message: message.into(),
            position: Some(position),
        }
    }

    pub(crate) fn exec(message: impl Into<String>) -> Self {
        TemplateError::ExecError {
            message: message.into(),
            position: None,
        }
    }

    /// Attach a source position if the error does not carry one yet.
    pub(crate) fn at(self, pos: SourcePos) -> Self {
        match self {
            TemplateError::ExecError {
                message,
                position: None,
            } => TemplateError::ExecError {
                message,
                position: Some(pos),
            },
            TemplateError::ParseError {
                message,
                position: None,
            } => TemplateError::ParseError {
                message,
                position: Some(pos),
            },
            other => other,
        }
    }

    /// The human-readable description without the position prefix.
    pub fn message(&self) -> &str {
        match self {
            TemplateError::ParseError { message, .. } | TemplateError::ExecError { message, .. } => {
                message
            }
        }
    }

    /// Where in the template source the error was detected, if known.
    pub fn position(&self) -> Option<SourcePos> {
        match self {
            TemplateError::ParseError { position, .. }
            | TemplateError::ExecError { position, .. } => *position,
        }
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self, TemplateError::ParseError { .. })
    }
}

fn with_position(message: &str, position: &Option<SourcePos>) -> String {
    match position {
        Some(pos) => format!("{}: {}", pos, message),
        None => message.to_string(),
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;
