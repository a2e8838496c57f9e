/*
 * evaluator.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template evaluation engine.
//!
//! Walks a compiled [`Template`] against a [`RenderContext`], escaping every
//! printed value for the context recorded on its action. Output is collected
//! into a local buffer, so a failed render never yields partial output.

use crate::ast::{Branch, Command, Operand, Pipeline, TemplateNode};
use crate::context::{RenderContext, Value};
use crate::error::{TemplateError, TemplateResult};
use crate::escape::escape_value;
use crate::eval_context::EvalContext;
use crate::functions;
use crate::parser::Template;

impl Template {
    /// Render this template with the given context.
    ///
    /// # Arguments
    /// * `context` - The data the template's dot starts at
    ///
    /// # Returns
    /// The rendered output string, or an [`TemplateError::ExecError`] if
    /// evaluation fails.
    pub fn render(&self, context: &RenderContext) -> TemplateResult<String> {
        let root = context.as_value();
        let mut ctx = EvalContext::new(root);
        let mut out = String::new();
        evaluate(self.nodes(), root, &mut ctx, &mut out)?;
        Ok(out)
    }
}

/// Compile and render in one step.
pub fn render_template(source: &str, context: &RenderContext) -> TemplateResult<String> {
    Template::compile(source)?.render(context)
}

fn evaluate(
    nodes: &[TemplateNode],
    dot: &Value,
    ctx: &mut EvalContext<'_>,
    out: &mut String,
) -> TemplateResult<()> {
    for node in nodes {
        match node {
            TemplateNode::Text(text) => out.push_str(&text.text),

            TemplateNode::Comment(_) => {}

            TemplateNode::Action(action) => {
                let value = eval_pipeline(&action.pipeline, dot, ctx).map_err(|e| e.at(action.pos))?;
                if action.pipeline.prints() {
                    out.push_str(&escape_value(&value, &action.context));
                }
            }

            TemplateNode::If(branch) => {
                let mark = ctx.mark();
                let value = eval_pipeline(&branch.pipeline, dot, ctx).map_err(|e| e.at(branch.pos))?;
                if value.is_truthy() {
                    evaluate(&branch.body, dot, ctx, out)?;
                } else if let Some(else_body) = &branch.else_body {
                    evaluate(else_body, dot, ctx, out)?;
                }
                ctx.restore(mark);
            }

            TemplateNode::With(branch) => {
                let mark = ctx.mark();
                let value = eval_pipeline(&branch.pipeline, dot, ctx).map_err(|e| e.at(branch.pos))?;
                if value.is_truthy() {
                    evaluate(&branch.body, &value, ctx, out)?;
                } else if let Some(else_body) = &branch.else_body {
                    evaluate(else_body, dot, ctx, out)?;
                }
                ctx.restore(mark);
            }

            TemplateNode::Range(branch) => evaluate_range(branch, dot, ctx, out)?,
        }
    }
    Ok(())
}

type RangeItems = Box<dyn Iterator<Item = (Value, Value)>>;

fn range_items(value: Value) -> TemplateResult<RangeItems> {
    match value {
        Value::Null => Ok(Box::new(std::iter::empty())),
        Value::List(items) => Ok(Box::new(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::Int(i as i64), item)),
        )),
        Value::Map(map) => Ok(Box::new(
            map.into_iter().map(|(key, item)| (Value::String(key), item)),
        )),
        Value::Int(n) if n >= 0 => Ok(Box::new((0..n).map(|i| (Value::Int(i), Value::Int(i))))),
        other => Err(TemplateError::exec(format!(
            "range can't iterate over {} of type {}",
            other,
            other.type_name()
        ))),
    }
}

fn evaluate_range(
    branch: &Branch,
    dot: &Value,
    ctx: &mut EvalContext<'_>,
    out: &mut String,
) -> TemplateResult<()> {
    let mark = ctx.mark();
    let pipeline = &branch.pipeline;
    let value = eval_commands(pipeline, dot, ctx).map_err(|e| e.at(branch.pos))?;
    let items = range_items(value).map_err(|e| e.at(branch.pos))?;

    let mut ran = false;
    for (key, item) in items {
        ran = true;
        let iteration = ctx.mark();
        match (pipeline.decl.as_slice(), pipeline.is_assign) {
            ([elem], false) => ctx.declare(elem, item.clone()),
            ([elem], true) => ctx.assign(elem, item.clone()).map_err(|e| e.at(branch.pos))?,
            ([index, elem], _) => {
                ctx.declare(index, key);
                ctx.declare(elem, item.clone());
            }
            _ => {}
        }
        evaluate(&branch.body, &item, ctx, out)?;
        ctx.restore(iteration);
    }

    if !ran {
        if let Some(else_body) = &branch.else_body {
            evaluate(else_body, dot, ctx, out)?;
        }
    }
    ctx.restore(mark);
    Ok(())
}

/// Evaluate a pipeline and bind its declared variable, if any.
fn eval_pipeline(
    pipeline: &Pipeline,
    dot: &Value,
    ctx: &mut EvalContext<'_>,
) -> TemplateResult<Value> {
    let value = eval_commands(pipeline, dot, ctx)?;
    if let Some(name) = pipeline.decl.first() {
        if pipeline.is_assign {
            ctx.assign(name, value.clone())?;
        } else {
            ctx.declare(name, value.clone());
        }
    }
    Ok(value)
}

/// Run the commands of a pipeline, feeding each result to the next stage.
fn eval_commands(
    pipeline: &Pipeline,
    dot: &Value,
    ctx: &mut EvalContext<'_>,
) -> TemplateResult<Value> {
    let mut value = None;
    for command in &pipeline.commands {
        value = Some(eval_command(command, dot, ctx, value)?);
    }
    Ok(value.unwrap_or_default())
}

fn eval_command(
    command: &Command,
    dot: &Value,
    ctx: &mut EvalContext<'_>,
    piped: Option<Value>,
) -> TemplateResult<Value> {
    let Some((head, rest)) = command.args.split_first() else {
        return Err(TemplateError::exec("empty command").at(command.pos));
    };

    match head {
        Operand::Function(name) => {
            let mut args = rest
                .iter()
                .map(|arg| eval_operand(arg, dot, ctx))
                .collect::<TemplateResult<Vec<_>>>()?;
            args.extend(piped);
            functions::call(name, args).map_err(|e| e.at(command.pos))
        }
        _ if !rest.is_empty() || piped.is_some() => Err(TemplateError::exec(format!(
            "can't give argument to non-function {}",
            head
        ))
        .at(command.pos)),
        _ => eval_operand(head, dot, ctx),
    }
}

fn eval_operand(operand: &Operand, dot: &Value, ctx: &mut EvalContext<'_>) -> TemplateResult<Value> {
    match operand {
        Operand::Dot => Ok(dot.clone()),
        Operand::Field(names) => lookup_path(dot, names),
        Operand::Variable { name, fields } => match ctx.lookup(name) {
            Some(base) => lookup_path(base, fields),
            None => Err(TemplateError::exec(format!("undefined variable \"{}\"", name))),
        },
        Operand::Function(name) => functions::call(name, Vec::new()),
        Operand::Chain { inner, fields } => {
            let value = eval_commands(inner, dot, ctx)?;
            lookup_path(&value, fields)
        }
        Operand::Str(s) => Ok(Value::String(s.clone())),
        Operand::Int(i) => Ok(Value::Int(*i)),
        Operand::Float(x) => Ok(Value::Float(*x)),
        Operand::Bool(b) => Ok(Value::Bool(*b)),
        Operand::Nil => Ok(Value::Null),
    }
}

/// Follow `.a.b.c` from `base`. Missing keys and fields of null resolve to
/// null; fields of any other non-map value are an error.
fn lookup_path(base: &Value, names: &[String]) -> TemplateResult<Value> {
    let mut current = base;
    for name in names {
        match current {
            Value::Map(map) => match map.get(name) {
                Some(value) => current = value,
                None => return Ok(Value::Null),
            },
            Value::Null => return Ok(Value::Null),
            other => {
                return Err(TemplateError::exec(format!(
                    "can't evaluate field {} in type {}",
                    name,
                    other.type_name()
                )));
            }
        }
    }
    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: serde_json::Value) -> RenderContext {
        match value {
            serde_json::Value::Object(map) => RenderContext::from_json_object(map),
            _ => panic!("test context must be an object"),
        }
    }

    fn render(source: &str, data: serde_json::Value) -> String {
        render_template(source, &ctx(data)).unwrap_or_else(|e| panic!("render failed: {}", e))
    }

    #[test]
    fn test_lookup_path() {
        let data = Value::from(json!({"a": {"b": 1}, "s": "x"}));
        let path = |p: &[&str]| p.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(lookup_path(&data, &path(&["a", "b"])).unwrap(), Value::Int(1));
        assert_eq!(lookup_path(&data, &path(&["a", "zz", "q"])).unwrap(), Value::Null);
        let err = lookup_path(&data, &path(&["s", "len"])).unwrap_err();
        assert_eq!(err.message(), "can't evaluate field len in type string");
    }

    #[test]
    fn test_variables() {
        assert_eq!(
            render("{{$x := .n}}{{$x = add $x 1}}{{$x}}", json!({"n": 41})),
            "42"
        );
        assert_eq!(render("{{with .a}}{{$.title}}{{end}}", json!({"a": 1, "title": "T"})), "T");
    }

    #[test]
    fn test_range_forms() {
        assert_eq!(
            render("{{range $i, $e := .xs}}{{$i}}={{$e}};{{end}}", json!({"xs": ["a", "b"]})),
            "0=a;1=b;"
        );
        assert_eq!(
            render("{{range $k, $v := .m}}{{$k}}:{{$v}} {{end}}", json!({"m": {"b": 2, "a": 1}})),
            "a:1 b:2 "
        );
        assert_eq!(render("{{range 3}}{{.}}{{end}}", json!({})), "012");
        assert_eq!(render("{{range .none}}x{{else}}empty{{end}}", json!({})), "empty");
    }

    #[test]
    fn test_range_over_string_fails() {
        let err = render_template("{{range .s}}{{end}}", &ctx(json!({"s": "abc"}))).unwrap_err();
        assert!(!err.is_parse_error());
        assert!(err.message().starts_with("range can't iterate over abc"));
    }

    #[test]
    fn test_assignment_inside_range_persists() {
        assert_eq!(
            render(
                "{{$sum := 0}}{{range .xs}}{{$sum = add $sum .}}{{end}}{{$sum}}",
                json!({"xs": [1, 2, 3]})
            ),
            "6"
        );
    }

    #[test]
    fn test_argument_to_non_function() {
        let err = render_template("{{.a 1}}", &ctx(json!({"a": 1}))).unwrap_err();
        assert_eq!(err.message(), "can't give argument to non-function .a");
        assert!(err.position().is_some());
    }

    #[test]
    fn test_exec_error_has_no_partial_output() {
        let result = render_template("start {{add .x}} end", &ctx(json!({"x": 1})));
        let err = result.unwrap_err();
        assert_eq!(err.message(), "wrong number of args for add: want 2 got 1");
    }
}
