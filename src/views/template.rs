//! Template compilation.
//!
//! # Responsibilities
//! - Split source into literal spans and `<% %>` tags
//! - Build a block tree from `if`/`else`/`for ... of` statements
//! - Render the tree against a locals map
//!
//! # Design Decisions
//! - Compilation does all parsing; rendering never re-reads source
//! - Both output tags are raw, nullish values render as empty
//! - Unbalanced blocks fail at compile time with the line of the tag

use serde_json::{Map, Value};

use super::expr::{self, Expr, Parser, Scope, Token};
use super::TemplateError;

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Option<Vec<Node>>,
    },
    For {
        binding: String,
        iterable: Expr,
        body: Vec<Node>,
    },
}

/// Open block while building the tree.
enum Frame {
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Option<Vec<Node>>,
        line: usize,
    },
    For {
        binding: String,
        iterable: Expr,
        body: Vec<Node>,
        line: usize,
    },
}

impl Frame {
    fn body_mut(&mut self) -> &mut Vec<Node> {
        match self {
            Frame::If {
                otherwise: Some(body),
                ..
            } => body,
            Frame::If { branches, .. } => match branches.last_mut() {
                Some((_, body)) => body,
                None => unreachable!("if frame always holds a branch"),
            },
            Frame::For { body, .. } => body,
        }
    }

    fn into_node(self) -> Node {
        match self {
            Frame::If {
                branches,
                otherwise,
                ..
            } => Node::If {
                branches,
                otherwise,
            },
            Frame::For {
                binding,
                iterable,
                body,
                ..
            } => Node::For {
                binding,
                iterable,
                body,
            },
        }
    }

    fn line(&self) -> usize {
        match self {
            Frame::If { line, .. } | Frame::For { line, .. } => *line,
        }
    }
}

struct Builder {
    root: Vec<Node>,
    frames: Vec<Frame>,
}

impl Builder {
    fn current(&mut self) -> &mut Vec<Node> {
        match self.frames.last_mut() {
            Some(frame) => frame.body_mut(),
            None => &mut self.root,
        }
    }

    fn close(&mut self) -> Result<(), String> {
        let frame = self.frames.pop().ok_or("unexpected `}` with no open block")?;
        let node = frame.into_node();
        self.current().push(node);
        Ok(())
    }

    fn statements(&mut self, source: &str, line: usize) -> Result<(), String> {
        let tokens = expr::tokenize(source)?;
        let mut parser = Parser::new(&tokens);

        while !parser.is_done() {
            if parser.eat(";") {
                continue;
            }
            if parser.eat("}") {
                if parser.eat_keyword("else") {
                    self.else_branch(&mut parser)?;
                } else {
                    self.close()?;
                }
                continue;
            }
            if parser.eat_keyword("if") {
                let condition = condition(&mut parser)?;
                parser.expect("{")?;
                self.frames.push(Frame::If {
                    branches: vec![(condition, Vec::new())],
                    otherwise: None,
                    line,
                });
                continue;
            }
            if parser.eat_keyword("for") {
                parser.expect("(")?;
                let declared = parser.eat_keyword("const")
                    || parser.eat_keyword("let")
                    || parser.eat_keyword("var");
                if !declared {
                    return Err("expected `const`, `let` or `var` in for loop".to_string());
                }
                let binding = parser.expect_ident()?;
                if !parser.eat_keyword("of") {
                    return Err("only `for (... of ...)` loops are supported".to_string());
                }
                let iterable = parser.parse_expr()?;
                parser.expect(")")?;
                parser.expect("{")?;
                self.frames.push(Frame::For {
                    binding,
                    iterable,
                    body: Vec::new(),
                    line,
                });
                continue;
            }
            return Err(match parser.peek() {
                Some(Token::Ident(word)) => format!("unsupported statement `{word}`"),
                _ => "unsupported statement".to_string(),
            });
        }
        Ok(())
    }

    fn else_branch(&mut self, parser: &mut Parser<'_>) -> Result<(), String> {
        let Some(Frame::If {
            branches, otherwise, ..
        }) = self.frames.last_mut()
        else {
            return Err("`else` without a matching `if`".to_string());
        };
        if otherwise.is_some() {
            return Err("`else` after the final `else` branch".to_string());
        }
        if parser.eat_keyword("if") {
            let condition = condition(parser)?;
            parser.expect("{")?;
            branches.push((condition, Vec::new()));
        } else {
            parser.expect("{")?;
            *otherwise = Some(Vec::new());
        }
        Ok(())
    }
}

fn condition(parser: &mut Parser<'_>) -> Result<Expr, String> {
    parser.expect("(")?;
    let condition = parser.parse_expr()?;
    parser.expect(")")?;
    Ok(condition)
}

/// A compiled template, reusable across renders.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Compile template source.
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut builder = Builder {
            root: Vec::new(),
            frames: Vec::new(),
        };
        let mut cursor = 0;

        while let Some(offset) = source[cursor..].find("<%") {
            let start = cursor + offset;
            if start > cursor {
                builder.current().push(Node::Text(source[cursor..start].to_string()));
            }

            let line = line_of(source, start);
            let syntax = |message: String| TemplateError::Syntax { line, message };

            let body_start = start + 2;
            let end = source[body_start..]
                .find("%>")
                .map(|i| body_start + i)
                .ok_or_else(|| syntax("unclosed `<%` tag".to_string()))?;
            let tag = &source[body_start..end];

            if let Some(expression) = tag.strip_prefix('=').or_else(|| tag.strip_prefix('-')) {
                if expression.trim().is_empty() {
                    return Err(syntax("empty output tag".to_string()));
                }
                let expr = expr::parse(expression).map_err(syntax)?;
                builder.current().push(Node::Output(expr));
            } else {
                builder.statements(tag, line).map_err(syntax)?;
            }

            cursor = end + 2;
        }

        if cursor < source.len() {
            builder.current().push(Node::Text(source[cursor..].to_string()));
        }

        if let Some(frame) = builder.frames.last() {
            return Err(TemplateError::Syntax {
                line: frame.line(),
                message: "block opened here is never closed".to_string(),
            });
        }

        Ok(Self {
            nodes: builder.root,
        })
    }

    /// Render with the given locals.
    pub fn render(&self, locals: &Map<String, Value>) -> Result<String, TemplateError> {
        let mut out = String::new();
        let mut scope = Scope::new(locals);
        render_nodes(&self.nodes, &mut scope, &mut out)?;
        Ok(out)
    }

    /// Render with any JSON value; it must be an object (or null for none).
    pub fn render_value(&self, locals: &Value) -> Result<String, TemplateError> {
        match locals {
            Value::Object(map) => self.render(map),
            Value::Null => self.render(&Map::new()),
            _ => Err(TemplateError::InvalidLocals),
        }
    }
}

fn render_nodes(
    nodes: &[Node],
    scope: &mut Scope<'_>,
    out: &mut String,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(expr) => match expr.eval(scope)? {
                Value::Null => {}
                value => out.push_str(&expr::to_js_string(&value)),
            },
            Node::If {
                branches,
                otherwise,
            } => {
                let mut taken = None;
                for (condition, body) in branches {
                    if expr::truthy(&condition.eval(scope)?) {
                        taken = Some(body);
                        break;
                    }
                }
                if let Some(body) = taken.or(otherwise.as_ref()) {
                    render_nodes(body, scope, out)?;
                }
            }
            Node::For {
                binding,
                iterable,
                body,
            } => {
                let items: Vec<Value> = match iterable.eval(scope)? {
                    Value::Array(items) => items,
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    other => {
                        return Err(TemplateError::Type(format!(
                            "{} is not iterable",
                            expr::to_js_string(&other)
                        )))
                    }
                };
                for item in items {
                    scope.push(binding, item);
                    let result = render_nodes(body, scope, out);
                    scope.pop();
                    result?;
                }
            }
        }
    }
    Ok(())
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(source: &str, locals: Value) -> Result<String, TemplateError> {
        Template::compile(source)?.render_value(&locals)
    }

    #[test]
    fn test_conditional_greeting() {
        let source = "<% if (user) { %>Hi <%= user.name %><% } %>";
        assert_eq!(render(source, json!({ "user": { "name": "Ana" } })).unwrap(), "Hi Ana");
        assert_eq!(render(source, json!({ "user": null })).unwrap(), "");
    }

    #[test]
    fn test_literal_spans_preserved() {
        let source = "<h1>\n  <%= title %>\n</h1>";
        assert_eq!(render(source, json!({ "title": "Portal" })).unwrap(), "<h1>\n  Portal\n</h1>");
        assert_eq!(render("plain text", json!({})).unwrap(), "plain text");
    }

    #[test]
    fn test_output_is_not_escaped() {
        let locals = json!({ "html": "<b>bold</b>" });
        assert_eq!(render("<%= html %>|<%- html %>", locals).unwrap(), "<b>bold</b>|<b>bold</b>");
    }

    #[test]
    fn test_nullish_output_is_empty() {
        let locals = json!({ "value": null, "user": {} });
        assert_eq!(render("[<%= value %>][<%- user.missing %>]", locals).unwrap(), "[][]");
        assert_eq!(render("<%= 0 %><%= false %>", json!({})).unwrap(), "0false");
    }

    #[test]
    fn test_else_if_chain() {
        let source =
            "<% if (n > 10) { %>big<% } else if (n > 5) { %>medium<% } else { %>small<% } %>";
        assert_eq!(render(source, json!({ "n": 20 })).unwrap(), "big");
        assert_eq!(render(source, json!({ "n": 7 })).unwrap(), "medium");
        assert_eq!(render(source, json!({ "n": 1 })).unwrap(), "small");
    }

    #[test]
    fn test_for_of_loop() {
        let source = concat!(
            "<ul><% for (const order of orders) { %>",
            "<li><%= order.id %>:<%= order.status %></li>",
            "<% } %></ul>",
        );
        let locals = json!({
            "orders": [
                { "id": "order-1001", "status": "offen" },
                { "id": "order-1002", "status": "geplant" }
            ]
        });
        assert_eq!(
            render(source, locals).unwrap(),
            "<ul><li>order-1001:offen</li><li>order-1002:geplant</li></ul>"
        );
    }

    #[test]
    fn test_loop_binding_shadows_and_unwinds() {
        let source = "<% for (let x of items) { %><%= x %><% } %>-<%= x %>";
        let locals = json!({ "items": [1, 2], "x": "outer" });
        assert_eq!(render(source, locals).unwrap(), "12-outer");
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            Template::compile("<% if (a) { %>open"),
            Err(TemplateError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            Template::compile("a\n<% } %>"),
            Err(TemplateError::Syntax { line: 2, .. })
        ));
        assert!(matches!(
            Template::compile("<%= user.name"),
            Err(TemplateError::Syntax { .. })
        ));
        assert!(matches!(
            Template::compile("<% while (x) { %><% } %>"),
            Err(TemplateError::Syntax { .. })
        ));
        assert!(matches!(
            Template::compile("<% if (a) { %><% } else { %><% } else { %><% } %>"),
            Err(TemplateError::Syntax { .. })
        ));
    }

    #[test]
    fn test_render_errors_surface() {
        assert!(matches!(
            render("<%= nobody %>", json!({})),
            Err(TemplateError::Reference(_))
        ));
        assert!(matches!(
            render("<% for (const x of n) { %><% } %>", json!({ "n": 3 })),
            Err(TemplateError::Type(_))
        ));
        assert!(matches!(
            Template::compile("x").unwrap().render_value(&json!([1])),
            Err(TemplateError::InvalidLocals)
        ));
    }
}
