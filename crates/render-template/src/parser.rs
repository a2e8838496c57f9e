/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template parser.
//!
//! Turns the token stream produced by [`crate::lexer`] into a [`Template`],
//! then runs escape analysis so every action knows the output context it
//! writes into. All structural problems (unbalanced blocks, unknown helpers,
//! undefined variables, ambiguous contexts) surface here as
//! [`TemplateError::ParseError`].

use crate::ast::{
    ActionNode, Branch, Command, CommentNode, Operand, Pipeline, SourcePos, TemplateNode,
    TextNode,
};
use crate::contexts::{self, Context};
use crate::error::{TemplateError, TemplateResult};
use crate::functions;
use crate::lexer::{self, Item, Token};

/// Deepest allowed nesting of blocks and parenthesized pipelines combined.
pub const MAX_NESTING: usize = 100;

/// A compiled template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<TemplateNode>,
}

impl Template {
    /// Parse and analyze a template source string.
    ///
    /// # Example
    ///
    /// ```
    /// use render_template::Template;
    ///
    /// let template = Template::compile("<h1>{{.title}}</h1>").unwrap();
    /// assert_eq!(template.nodes().len(), 3);
    /// ```
    pub fn compile(source: &str) -> TemplateResult<Self> {
        let items = lexer::lex(source)?;
        let mut parser = Parser::new(items);
        let mut nodes = parser.parse_root()?;
        contexts::annotate(&mut nodes)?;
        Ok(Template { nodes })
    }

    /// The top-level nodes of the template.
    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlKind {
    If,
    Range,
    With,
}

impl ControlKind {
    fn name(self) -> &'static str {
        match self {
            ControlKind::If => "if",
            ControlKind::Range => "range",
            ControlKind::With => "with",
        }
    }
}

/// What stopped a node list.
enum ListEnd {
    Eof,
    End(SourcePos),
    Else(SourcePos),
    ElseIf(SourcePos),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclMode {
    None,
    Single,
    /// `range` may declare `$index, $element`.
    Pair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closer {
    Delim,
    Paren,
}

struct Parser {
    items: Vec<Item>,
    pos: usize,
    /// Variables in scope, innermost last. `$` is always defined.
    vars: Vec<String>,
    /// Open blocks and parentheses.
    depth: usize,
}

impl Parser {
    fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            pos: 0,
            vars: vec!["$".to_string()],
            depth: 0,
        }
    }

    fn descend(&mut self, pos: SourcePos) -> TemplateResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(TemplateError::parse(
                format!("template nesting exceeds {} levels", MAX_NESTING),
                pos,
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn peek(&self) -> &Item {
        let last = self.items.len().saturating_sub(1);
        &self.items[self.pos.min(last)]
    }

    fn peek_token(&self, ahead: usize) -> Option<&Token> {
        self.items.get(self.pos + ahead).map(|item| &item.token)
    }

    fn next(&mut self) -> Item {
        let item = self.peek().clone();
        if item.token != Token::Eof {
            self.pos += 1;
        }
        item
    }

    fn is_defined(&self, name: &str) -> bool {
        self.vars.iter().any(|v| v == name)
    }

    fn parse_root(&mut self) -> TemplateResult<Vec<TemplateNode>> {
        let (nodes, end) = self.parse_list()?;
        match end {
            ListEnd::Eof => Ok(nodes),
            ListEnd::End(pos) => Err(TemplateError::parse("unexpected {{end}}", pos)),
            ListEnd::Else(pos) | ListEnd::ElseIf(pos) => {
                Err(TemplateError::parse("unexpected {{else}}", pos))
            }
        }
    }

    fn parse_list(&mut self) -> TemplateResult<(Vec<TemplateNode>, ListEnd)> {
        let mut nodes = Vec::new();
        loop {
            let item = self.next();
            match item.token {
                Token::Text(text) => nodes.push(TemplateNode::Text(TextNode {
                    text,
                    pos: item.pos,
                })),
                Token::Comment(text) => nodes.push(TemplateNode::Comment(CommentNode {
                    text,
                    pos: item.pos,
                })),
                Token::Eof => return Ok((nodes, ListEnd::Eof)),
                Token::LeftDelim => {
                    if let Some(end) = self.parse_delimited(&mut nodes, item.pos)? {
                        return Ok((nodes, end));
                    }
                }
                other => return Err(unexpected(&other, item.pos, "template")),
            }
        }
    }

    /// Parse the inside of one `{{ ... }}`. Returns `Some` when the action
    /// closes the current list.
    fn parse_delimited(
        &mut self,
        nodes: &mut Vec<TemplateNode>,
        pos: SourcePos,
    ) -> TemplateResult<Option<ListEnd>> {
        let keyword = match &self.peek().token {
            Token::Ident(name) => Some(name.clone()),
            _ => None,
        };

        match keyword.as_deref() {
            Some("end") => {
                self.next();
                self.expect_right_delim("end")?;
                Ok(Some(ListEnd::End(pos)))
            }
            Some("else") => {
                self.next();
                if matches!(&self.peek().token, Token::Ident(name) if name == "if") {
                    self.next();
                    return Ok(Some(ListEnd::ElseIf(pos)));
                }
                self.expect_right_delim("else")?;
                Ok(Some(ListEnd::Else(pos)))
            }
            Some("if") => {
                self.next();
                nodes.push(self.parse_control(ControlKind::If, pos)?);
                Ok(None)
            }
            Some("range") => {
                self.next();
                nodes.push(self.parse_control(ControlKind::Range, pos)?);
                Ok(None)
            }
            Some("with") => {
                self.next();
                nodes.push(self.parse_control(ControlKind::With, pos)?);
                Ok(None)
            }
            _ => {
                let pipeline = self.parse_pipeline("command", DeclMode::Single, Closer::Delim, pos)?;
                nodes.push(TemplateNode::Action(ActionNode {
                    pipeline,
                    context: Context::default(),
                    pos,
                }));
                Ok(None)
            }
        }
    }

    fn expect_right_delim(&mut self, context: &str) -> TemplateResult<()> {
        let item = self.next();
        match item.token {
            Token::RightDelim => Ok(()),
            other => Err(unexpected(&other, item.pos, context)),
        }
    }

    fn parse_control(&mut self, kind: ControlKind, pos: SourcePos) -> TemplateResult<TemplateNode> {
        self.descend(pos)?;
        let scope = self.vars.len();
        let mode = match kind {
            ControlKind::Range => DeclMode::Pair,
            ControlKind::If | ControlKind::With => DeclMode::Single,
        };
        let pipeline = self.parse_pipeline(kind.name(), mode, Closer::Delim, pos)?;

        let body_scope = self.vars.len();
        let (body, end) = self.parse_list()?;
        self.vars.truncate(body_scope);

        let else_body = match end {
            ListEnd::End(_) => None,
            ListEnd::Else(_) => {
                let (else_body, end) = self.parse_list()?;
                self.vars.truncate(body_scope);
                match end {
                    ListEnd::End(_) => Some(else_body),
                    ListEnd::Eof => return Err(unclosed(kind, pos)),
                    ListEnd::Else(else_pos) | ListEnd::ElseIf(else_pos) => {
                        return Err(TemplateError::parse(
                            format!("expected {{{{end}}}} for {{{{{}}}}}, found {{{{else}}}}", kind.name()),
                            else_pos,
                        ));
                    }
                }
            }
            // `{{else if p}}` nests an `if` that consumes the shared `{{end}}`.
            ListEnd::ElseIf(else_pos) => Some(vec![self.parse_control(ControlKind::If, else_pos)?]),
            ListEnd::Eof => return Err(unclosed(kind, pos)),
        };
        self.vars.truncate(scope);
        self.depth -= 1;

        let branch = Branch {
            pipeline,
            body,
            else_body,
            pos,
        };
        Ok(match kind {
            ControlKind::If => TemplateNode::If(branch),
            ControlKind::Range => TemplateNode::Range(branch),
            ControlKind::With => TemplateNode::With(branch),
        })
    }

    fn parse_pipeline(
        &mut self,
        context: &str,
        mode: DeclMode,
        closer: Closer,
        pos: SourcePos,
    ) -> TemplateResult<Pipeline> {
        let (decl, is_assign) = if mode == DeclMode::None {
            (Vec::new(), false)
        } else {
            self.parse_declaration(context, mode)?
        };

        let mut commands: Vec<Command> = Vec::new();
        loop {
            let command = self.parse_command()?;
            let item = self.next();
            match (&item.token, closer) {
                (Token::Pipe, _) => {
                    if command.args.is_empty() {
                        return Err(TemplateError::parse("missing value for command", item.pos));
                    }
                    commands.push(command);
                }
                (Token::RightDelim, Closer::Delim) | (Token::RightParen, Closer::Paren) => {
                    if !command.args.is_empty() {
                        commands.push(command);
                    } else if !commands.is_empty() {
                        return Err(TemplateError::parse("missing value for command", item.pos));
                    }
                    break;
                }
                (other, _) => return Err(unexpected(other, item.pos, context)),
            }
        }

        if commands.is_empty() {
            return Err(TemplateError::parse(format!("missing value for {}", context), pos));
        }
        check_stages(&commands)?;

        if !is_assign {
            self.vars.extend(decl.iter().cloned());
        }
        Ok(Pipeline {
            decl,
            is_assign,
            commands,
            pos,
        })
    }

    fn parse_declaration(
        &mut self,
        context: &str,
        mode: DeclMode,
    ) -> TemplateResult<(Vec<String>, bool)> {
        let pos = self.peek().pos;
        let first = match self.peek_token(0) {
            Some(Token::Variable { name, fields }) if fields.is_empty() => name.clone(),
            _ => return Ok((Vec::new(), false)),
        };

        let declared = match self.peek_token(1) {
            Some(Token::Declare) => {
                self.pos += 2;
                (vec![first], false)
            }
            Some(Token::Assign) => {
                if !self.is_defined(&first) {
                    return Err(TemplateError::parse(
                        format!("undefined variable \"{}\"", first),
                        pos,
                    ));
                }
                self.pos += 2;
                (vec![first], true)
            }
            Some(Token::Comma) if mode == DeclMode::Pair => {
                let second = match (self.peek_token(2), self.peek_token(3)) {
                    (Some(Token::Variable { name, fields }), Some(Token::Declare))
                        if fields.is_empty() =>
                    {
                        name.clone()
                    }
                    _ => {
                        return Err(TemplateError::parse(
                            "range can only declare two variables with :=",
                            pos,
                        ));
                    }
                };
                self.pos += 4;
                (vec![first, second], false)
            }
            Some(Token::Comma) => {
                return Err(TemplateError::parse(
                    format!("too many declarations in {}", context),
                    pos,
                ));
            }
            _ => return Ok((Vec::new(), false)),
        };

        if !declared.1 && declared.0.iter().any(|name| name == "$") {
            return Err(TemplateError::parse("cannot declare $", pos));
        }
        Ok(declared)
    }

    fn parse_command(&mut self) -> TemplateResult<Command> {
        let pos = self.peek().pos;
        let mut args = Vec::new();
        while !matches!(
            self.peek().token,
            Token::Pipe | Token::RightDelim | Token::RightParen | Token::Eof
        ) {
            let item = self.next();
            args.push(self.parse_operand(item)?);
        }
        Ok(Command { args, pos })
    }

    fn parse_operand(&mut self, item: Item) -> TemplateResult<Operand> {
        match item.token {
            Token::Dot => Ok(Operand::Dot),
            Token::Field(names) => Ok(Operand::Field(names)),
            Token::Variable { name, fields } => {
                if !self.is_defined(&name) {
                    return Err(TemplateError::parse(
                        format!("undefined variable \"{}\"", name),
                        item.pos,
                    ));
                }
                Ok(Operand::Variable { name, fields })
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Operand::Bool(true)),
                "false" => Ok(Operand::Bool(false)),
                "nil" => Ok(Operand::Nil),
                "if" | "else" | "end" | "range" | "with" => Err(TemplateError::parse(
                    format!("unexpected keyword {} in command", name),
                    item.pos,
                )),
                _ if functions::is_builtin(&name) => Ok(Operand::Function(name)),
                _ => Err(TemplateError::parse(
                    format!("function \"{}\" not defined", name),
                    item.pos,
                )),
            },
            Token::Str(s) => Ok(Operand::Str(s)),
            Token::Int(i) => Ok(Operand::Int(i)),
            Token::Float(x) => Ok(Operand::Float(x)),
            Token::LeftParen => {
                self.descend(item.pos)?;
                let inner = self.parse_pipeline(
                    "parenthesized pipeline",
                    DeclMode::None,
                    Closer::Paren,
                    item.pos,
                )?;
                self.depth -= 1;
                let fields = match &self.peek().token {
                    Token::ChainField(fields) => {
                        let fields = fields.clone();
                        self.next();
                        fields
                    }
                    _ => Vec::new(),
                };
                Ok(Operand::Chain {
                    inner: Box::new(inner),
                    fields,
                })
            }
            other => Err(unexpected(&other, item.pos, "command")),
        }
    }
}

/// Literals can only start the first stage of a pipeline.
fn check_stages(commands: &[Command]) -> TemplateResult<()> {
    for (i, command) in commands.iter().enumerate() {
        match command.args.first() {
            Some(Operand::Nil) if command.args.len() == 1 && commands.len() == 1 => {
                return Err(TemplateError::parse("nil is not a command", command.pos));
            }
            Some(
                Operand::Bool(_)
                | Operand::Dot
                | Operand::Nil
                | Operand::Int(_)
                | Operand::Float(_)
                | Operand::Str(_),
            ) if i > 0 => {
                return Err(TemplateError::parse(
                    format!("non executable command in pipeline stage {}", i + 1),
                    command.pos,
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn unclosed(kind: ControlKind, pos: SourcePos) -> TemplateError {
    TemplateError::parse(
        format!("unexpected EOF: {{{{{}}}}} is never closed", kind.name()),
        pos,
    )
}

fn unexpected(token: &Token, pos: SourcePos, context: &str) -> TemplateError {
    TemplateError::parse(format!("unexpected {} in {}", describe(token), context), pos)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Text(_) => "text".to_string(),
        Token::Comment(_) => "comment".to_string(),
        Token::LeftDelim => "\"{{\"".to_string(),
        Token::RightDelim => "\"}}\"".to_string(),
        Token::Ident(name) => format!("<{}>", name),
        Token::Field(names) | Token::ChainField(names) => format!("<.{}>", names.join(".")),
        Token::Variable { name, fields } => {
            let mut s = format!("<{}", name);
            for field in fields {
                s.push('.');
                s.push_str(field);
            }
            s.push('>');
            s
        }
        Token::Dot => "<.>".to_string(),
        Token::Str(s) => format!("{:?}", s),
        Token::Int(i) => format!("<{}>", i),
        Token::Float(x) => format!("<{}>", x),
        Token::LeftParen => "\"(\"".to_string(),
        Token::RightParen => "\")\"".to_string(),
        Token::Pipe => "\"|\"".to_string(),
        Token::Declare => "\":=\"".to_string(),
        Token::Assign => "\"=\"".to_string(),
        Token::Comma => "\",\"".to_string(),
        Token::Eof => "EOF".to_string(),
    }
}
