/*
 * eval_context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Evaluation state for template rendering.
//!
//! [`EvalContext`] is threaded through the evaluator and holds the variable
//! scopes. Scopes are a flat stack: a block records the stack height when it
//! starts ([`EvalContext::mark`]) and drops everything above it when it ends
//! ([`EvalContext::restore`]).

use crate::context::Value;
use crate::error::{TemplateError, TemplateResult};

pub struct EvalContext<'a> {
    /// The data the template was rendered against; also bound to `$`.
    pub root: &'a Value,

    variables: Vec<(String, Value)>,
}

impl<'a> EvalContext<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self {
            root,
            variables: vec![("$".to_string(), root.clone())],
        }
    }

    /// Current scope height.
    pub fn mark(&self) -> usize {
        self.variables.len()
    }

    /// Drop every variable declared since `mark`.
    pub fn restore(&mut self, mark: usize) {
        self.variables.truncate(mark.max(1));
    }

    /// Declare a variable in the innermost scope, shadowing outer ones.
    pub fn declare(&mut self, name: &str, value: Value) {
        self.variables.push((name.to_string(), value));
    }

    /// Assign to the innermost visible variable with this name.
    pub fn assign(&mut self, name: &str, value: Value) -> TemplateResult<()> {
        match self.variables.iter_mut().rev().find(|(n, _)| n == name) {
            Some((_, slot)) => {
                *slot = value;
                Ok(())
            }
            None => Err(TemplateError::exec(format!("undefined variable \"{}\"", name))),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.variables
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}
