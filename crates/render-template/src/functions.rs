/*
 * functions.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Built-in helper functions callable from templates.
//!
//! The set is fixed: names outside [`BUILTINS`] are rejected at parse time,
//! while wrong arity or argument types are reported when the call runs.

use std::cmp::Ordering;

use crate::context::{SafeKind, SafeValue, Value};
use crate::error::{TemplateError, TemplateResult};

/// Every helper name a template may call.
pub const BUILTINS: &[&str] = &[
    "safeURL", "safeHTML", "safeCSS", "add", "sub", "mul", "div", "and", "or", "not", "eq", "ne",
    "lt", "le", "gt", "ge", "len", "index", "print",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Invoke a helper with already evaluated arguments.
pub(crate) fn call(name: &str, args: Vec<Value>) -> TemplateResult<Value> {
    match name {
        "safeURL" => wrap_safe(name, SafeKind::Url, args),
        "safeHTML" => wrap_safe(name, SafeKind::Html, args),
        "safeCSS" => wrap_safe(name, SafeKind::Css, args),
        "add" => arithmetic(name, args, i64::wrapping_add),
        "sub" => arithmetic(name, args, i64::wrapping_sub),
        "mul" => arithmetic(name, args, i64::wrapping_mul),
        // A zero divisor yields 0 so reports with missing figures still render.
        "div" => arithmetic(name, args, |a, b| if b == 0 { 0 } else { a.wrapping_div(b) }),
        "and" => {
            at_least(name, &args, 1)?;
            let last = args.len() - 1;
            let pick = args.iter().position(|v| !v.is_truthy()).unwrap_or(last);
            Ok(args.into_iter().nth(pick).unwrap_or_default())
        }
        "or" => {
            at_least(name, &args, 1)?;
            let last = args.len() - 1;
            let pick = args.iter().position(Value::is_truthy).unwrap_or(last);
            Ok(args.into_iter().nth(pick).unwrap_or_default())
        }
        "not" => {
            exactly(name, &args, 1)?;
            Ok(Value::Bool(!args[0].is_truthy()))
        }
        "eq" => eq(&args).map(Value::Bool),
        "ne" => {
            exactly(name, &args, 2)?;
            eq(&args).map(|equal| Value::Bool(!equal))
        }
        "lt" => ordered(name, &args, |o| o == Ordering::Less),
        "le" => ordered(name, &args, |o| o != Ordering::Greater),
        "gt" => ordered(name, &args, |o| o == Ordering::Greater),
        "ge" => ordered(name, &args, |o| o != Ordering::Less),
        "len" => {
            exactly(name, &args, 1)?;
            length(&args[0]).map(Value::Int)
        }
        "index" => {
            at_least(name, &args, 1)?;
            let mut args = args.into_iter();
            let item = args.next().unwrap_or_default();
            args.try_fold(item, |item, key| index(item, &key))
        }
        "print" => Ok(Value::String(print(&args))),
        _ => Err(TemplateError::exec(format!("function \"{}\" not defined", name))),
    }
}

fn exactly(name: &str, args: &[Value], want: usize) -> TemplateResult<()> {
    if args.len() == want {
        Ok(())
    } else {
        Err(TemplateError::exec(format!(
            "wrong number of args for {}: want {} got {}",
            name,
            want,
            args.len()
        )))
    }
}

fn at_least(name: &str, args: &[Value], want: usize) -> TemplateResult<()> {
    if args.len() >= want {
        Ok(())
    } else {
        Err(TemplateError::exec(format!(
            "wrong number of args for {}: want at least {} got {}",
            name,
            want,
            args.len()
        )))
    }
}

fn wrap_safe(name: &str, kind: SafeKind, args: Vec<Value>) -> TemplateResult<Value> {
    exactly(name, &args, 1)?;
    match args.into_iter().next().unwrap_or_default() {
        Value::String(s) => Ok(Value::Safe(SafeValue::new(kind, s))),
        Value::Safe(s) => Ok(Value::Safe(SafeValue::new(kind, s.into_string()))),
        other => Err(TemplateError::exec(format!(
            "wrong type for {}: expected string; got {}",
            name,
            other.type_name()
        ))),
    }
}

fn int_arg(name: &str, value: &Value) -> TemplateResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
            Ok(*f as i64)
        }
        other => Err(TemplateError::exec(format!(
            "wrong type for {}: expected integer; got {}",
            name,
            other.type_name()
        ))),
    }
}

fn arithmetic(name: &str, args: Vec<Value>, op: impl Fn(i64, i64) -> i64) -> TemplateResult<Value> {
    exactly(name, &args, 2)?;
    let a = int_arg(name, &args[0])?;
    let b = int_arg(name, &args[1])?;
    Ok(Value::Int(op(a, b)))
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => match (a.as_text(), b.as_text()) {
            (Some(x), Some(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

fn check_comparable(value: &Value) -> TemplateResult<()> {
    match value {
        Value::List(_) | Value::Map(_) => Err(TemplateError::exec(format!(
            "non-comparable type {}",
            value.type_name()
        ))),
        _ => Ok(()),
    }
}

/// `eq a b c...` is true when `a` equals any of the others.
fn eq(args: &[Value]) -> TemplateResult<bool> {
    at_least("eq", args, 2)?;
    let first = &args[0];
    check_comparable(first)?;
    for other in &args[1..] {
        check_comparable(other)?;
        match compare(first, other) {
            Some(Ordering::Equal) => return Ok(true),
            Some(_) => {}
            None if matches!(first, Value::Null) || matches!(other, Value::Null) => {}
            None => {
                return Err(TemplateError::exec(format!(
                    "incompatible types for comparison: {} and {}",
                    first.type_name(),
                    other.type_name()
                )));
            }
        }
    }
    Ok(false)
}

fn ordered(name: &str, args: &[Value], test: impl Fn(Ordering) -> bool) -> TemplateResult<Value> {
    exactly(name, args, 2)?;
    let (a, b) = (&args[0], &args[1]);
    for value in [a, b] {
        if matches!(
            value,
            Value::Null | Value::Bool(_) | Value::List(_) | Value::Map(_)
        ) {
            return Err(TemplateError::exec(format!(
                "invalid type for comparison: {}",
                value.type_name()
            )));
        }
    }
    match compare(a, b) {
        Some(ordering) => Ok(Value::Bool(test(ordering))),
        None => Err(TemplateError::exec(format!(
            "incompatible types for comparison: {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn length(value: &Value) -> TemplateResult<i64> {
    let len = match value {
        Value::String(s) => s.len(),
        Value::Safe(s) => s.as_str().len(),
        Value::List(items) => items.len(),
        Value::Map(m) => m.len(),
        other => {
            return Err(TemplateError::exec(format!(
                "len of type {}",
                other.type_name()
            )));
        }
    };
    Ok(len as i64)
}

fn index(item: Value, key: &Value) -> TemplateResult<Value> {
    match (item, key) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::List(items), key) => {
            let i = int_arg("index", key)?;
            let len = items.len();
            usize::try_from(i)
                .ok()
                .and_then(|i| items.into_iter().nth(i))
                .ok_or_else(|| {
                    TemplateError::exec(format!("index out of range: {} (length {})", i, len))
                })
        }
        (Value::Map(mut m), key) => match key.as_text() {
            Some(k) => Ok(m.remove(k).unwrap_or_default()),
            None => Err(TemplateError::exec(format!(
                "cannot index map with {}",
                key.type_name()
            ))),
        },
        (other, _) => Err(TemplateError::exec(format!(
            "can't index item of type {}",
            other.type_name()
        ))),
    }
}

fn print(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && args[i - 1].as_text().is_none() && arg.as_text().is_none() {
            out.push(' ');
        }
        out.push_str(&arg.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(name: &str, args: Vec<Value>) -> Value {
        call(name, args).unwrap_or_else(|e| panic!("{} failed: {}", name, e))
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("add", vec![Value::Int(2), Value::Int(3)]), Value::Int(5));
        assert_eq!(run("sub", vec![Value::Int(2), Value::Int(3)]), Value::Int(-1));
        assert_eq!(run("mul", vec![Value::Int(4), Value::Float(2.0)]), Value::Int(8));
        assert_eq!(run("div", vec![Value::Int(7), Value::Int(2)]), Value::Int(3));
    }

    #[test]
    fn test_div_by_zero_is_zero() {
        assert_eq!(run("div", vec![Value::Int(10), Value::Int(0)]), Value::Int(0));
    }

    #[test]
    fn test_arithmetic_wraps() {
        assert_eq!(
            run("add", vec![Value::Int(i64::MAX), Value::Int(1)]),
            Value::Int(i64::MIN)
        );
        assert_eq!(
            run("div", vec![Value::Int(i64::MIN), Value::Int(-1)]),
            Value::Int(i64::MIN)
        );
    }

    #[test]
    fn test_arity_and_type_errors() {
        let err = call("add", vec![Value::Int(1)]).unwrap_err();
        assert_eq!(err.message(), "wrong number of args for add: want 2 got 1");
        assert!(!err.is_parse_error());

        let err = call("mul", vec![Value::from("x"), Value::Int(1)]).unwrap_err();
        assert_eq!(err.message(), "wrong type for mul: expected integer; got string");

        let err = call("safeURL", vec![Value::Int(1)]).unwrap_err();
        assert!(err.message().contains("expected string"));
    }

    #[test]
    fn test_safe_wrappers() {
        assert_eq!(
            run("safeHTML", vec![Value::from("<b>")]),
            Value::Safe(SafeValue::new(SafeKind::Html, "<b>"))
        );
        let url = Value::Safe(SafeValue::new(SafeKind::Url, "https://x"));
        assert_eq!(
            run("safeCSS", vec![url]),
            Value::Safe(SafeValue::new(SafeKind::Css, "https://x"))
        );
    }

    #[test]
    fn test_logic() {
        assert_eq!(run("and", vec![Value::Int(1), Value::from("")]), Value::from(""));
        assert_eq!(run("and", vec![Value::Int(1), Value::Int(2)]), Value::Int(2));
        assert_eq!(run("or", vec![Value::Null, Value::from("x")]), Value::from("x"));
        assert_eq!(run("or", vec![Value::Null, Value::Int(0)]), Value::Int(0));
        assert_eq!(run("not", vec![Value::Null]), Value::Bool(true));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run("eq", vec![Value::Int(2), Value::Float(2.0)]), Value::Bool(true));
        assert_eq!(
            run("eq", vec![Value::from("b"), Value::from("a"), Value::from("b")]),
            Value::Bool(true)
        );
        assert_eq!(run("eq", vec![Value::Null, Value::from("a")]), Value::Bool(false));
        assert_eq!(run("ne", vec![Value::Int(1), Value::Int(2)]), Value::Bool(true));
        assert_eq!(run("lt", vec![Value::Int(1), Value::Int(2)]), Value::Bool(true));
        assert_eq!(run("ge", vec![Value::from("b"), Value::from("a")]), Value::Bool(true));
        assert!(call("eq", vec![Value::from("1"), Value::Int(1)]).is_err());
        assert!(call("lt", vec![Value::Null, Value::Int(1)]).is_err());
    }

    #[test]
    fn test_len_and_index() {
        let data = Value::from(json!({"rows": [{"name": "a"}, {"name": "b"}]}));
        assert_eq!(run("len", vec![Value::from("héllo")]), Value::Int(6));

        let rows = data.field("rows").cloned().unwrap_or_default();
        assert_eq!(run("len", vec![rows.clone()]), Value::Int(2));
        assert_eq!(
            run("index", vec![rows.clone(), Value::Int(1), Value::from("name")]),
            Value::from("b")
        );
        assert_eq!(
            run("index", vec![data, Value::from("missing"), Value::from("x")]),
            Value::Null
        );

        let err = call("index", vec![rows, Value::Int(5)]).unwrap_err();
        assert_eq!(err.message(), "index out of range: 5 (length 2)");
    }

    #[test]
    fn test_print_spacing() {
        assert_eq!(
            run("print", vec![Value::Int(1), Value::Int(2), Value::from("x"), Value::Int(3)]),
            Value::from("1 2x3")
        );
    }

    #[test]
    fn test_every_builtin_is_callable() {
        for name in BUILTINS {
            let result = call(name, Vec::new());
            if let Err(err) = result {
                assert!(
                    !err.message().contains("not defined"),
                    "{} is listed but not implemented",
                    name
                );
            }
        }
    }
}
