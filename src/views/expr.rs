//! Expression language embedded in template tags.
//!
//! A small JavaScript-flavoured subset evaluated over JSON values: literals,
//! identifiers, member and index access, arithmetic, comparison, logical
//! operators, `??` and the ternary operator.

use serde_json::{Map, Number, Value};

use super::TemplateError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Punct(&'static str),
}

const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "(", ")", "[", "]", "{", "}", ".",
    ",", ";", "!", "?", ":", "<", ">", "+", "-", "*", "/", "%",
];

/// Split source text into tokens.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| format!("invalid number `{text}`"))?;
            tokens.push(Token::Number(number));
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err("unterminated string literal".to_string());
                };
                i += 1;
                match ch {
                    ch if ch == quote => break,
                    '\\' => {
                        let escaped = chars
                            .get(i)
                            .ok_or_else(|| "unterminated string literal".to_string())?;
                        i += 1;
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => *other,
                        });
                    }
                    ch => value.push(ch),
                }
            }
            tokens.push(Token::Str(value));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
            Some(p) => {
                tokens.push(Token::Punct(*p));
                i += p.chars().count();
            }
            None => return Err(format!("unexpected character `{c}`")),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LogicalOp {
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Ident(String),
    Array(Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// Recursive-descent parser over a token slice.
pub(crate) struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    pub(crate) fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    pub(crate) fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub(crate) fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the punctuation `p` if it is next.
    pub(crate) fn eat(&mut self, p: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(q)) if *q == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume the keyword `word` if it is next.
    pub(crate) fn eat_keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, p: &str) -> Result<(), String> {
        if self.eat(p) {
            Ok(())
        } else {
            Err(format!("expected `{p}`, found {}", describe(self.peek())))
        }
    }

    pub(crate) fn expect_ident(&mut self) -> Result<String, String> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name.clone()),
            other => Err(format!("expected identifier, found {}", describe(other))),
        }
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Expr, String> {
        let condition = self.parse_logical(0)?;
        if self.eat("?") {
            let then = self.parse_expr()?;
            self.expect(":")?;
            let otherwise = self.parse_expr()?;
            return Ok(Expr::Conditional(
                Box::new(condition),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(condition)
    }

    // Levels: 0 `??`, 1 `||`, 2 `&&`.
    fn parse_logical(&mut self, level: u8) -> Result<Expr, String> {
        if level > 2 {
            return self.parse_equality();
        }
        let (token, op) = match level {
            0 => ("??", LogicalOp::Coalesce),
            1 => ("||", LogicalOp::Or),
            _ => ("&&", LogicalOp::And),
        };
        let mut left = self.parse_logical(level + 1)?;
        while self.eat(token) {
            let right = self.parse_logical(level + 1)?;
            left = Expr::Logical(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_relational()?;
        loop {
            let op = if self.eat("===") {
                BinaryOp::StrictEq
            } else if self.eat("!==") {
                BinaryOp::StrictNe
            } else if self.eat("==") {
                BinaryOp::LooseEq
            } else if self.eat("!=") {
                BinaryOp::LooseNe
            } else {
                return Ok(left);
            };
            let right = self.parse_relational()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_additive()?;
        loop {
            let op = if self.eat("<=") {
                BinaryOp::Le
            } else if self.eat(">=") {
                BinaryOp::Ge
            } else if self.eat("<") {
                BinaryOp::Lt
            } else if self.eat(">") {
                BinaryOp::Gt
            } else {
                return Ok(left);
            };
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat("*") {
                BinaryOp::Mul
            } else if self.eat("/") {
                BinaryOp::Div
            } else if self.eat("%") {
                BinaryOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat("!") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat("-") {
            return Ok(Expr::Negate(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                let name = self.expect_ident()?;
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat("[") {
                let index = self.parse_expr()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if matches!(self.peek(), Some(Token::Punct("("))) {
                return Err("function calls are not supported".to_string());
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number(*n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s.clone()))),
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Ident(word.clone()),
            }),
            Some(Token::Punct("(")) => {
                let inner = self.parse_expr()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Token::Punct("[")) => {
                let mut items = Vec::new();
                if !self.eat("]") {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.eat("]") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            other => Err(format!("unexpected {}", describe(other))),
        }
    }
}

fn describe(token: Option<&Token>) -> String {
    match token {
        None => "end of expression".to_string(),
        Some(Token::Ident(name)) => format!("`{name}`"),
        Some(Token::Number(n)) => format!("number {n}"),
        Some(Token::Str(s)) => format!("string {s:?}"),
        Some(Token::Punct(p)) => format!("`{p}`"),
    }
}

/// Parse a complete standalone expression.
pub(crate) fn parse(source: &str) -> Result<Expr, String> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(&tokens);
    let expr = parser.parse_expr()?;
    if !parser.is_done() {
        return Err(format!("unexpected {} after expression", describe(parser.peek())));
    }
    Ok(expr)
}

/// Variable lookup during evaluation: loop bindings shadow locals.
pub(crate) struct Scope<'a> {
    locals: &'a Map<String, Value>,
    bindings: Vec<(String, Value)>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(locals: &'a Map<String, Value>) -> Self {
        Self {
            locals,
            bindings: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, name: &str, value: Value) {
        self.bindings.push((name.to_string(), value));
    }

    pub(crate) fn pop(&mut self) {
        self.bindings.pop();
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value)
            .or_else(|| self.locals.get(name))
    }
}

impl Expr {
    pub(crate) fn eval(&self, scope: &Scope<'_>) -> Result<Value, TemplateError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => scope
                .lookup(name)
                .cloned()
                .ok_or_else(|| TemplateError::Reference(name.clone())),
            Expr::Array(items) => items
                .iter()
                .map(|item| item.eval(scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Member(target, name) => {
                let target = target.eval(scope)?;
                member(&target, name)
            }
            Expr::Index(target, index) => {
                let target = target.eval(scope)?;
                let index = index.eval(scope)?;
                match (&target, &index) {
                    (Value::Array(items), Value::Number(n)) => Ok(n
                        .as_f64()
                        .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                        .and_then(|f| items.get(f as usize))
                        .cloned()
                        .unwrap_or(Value::Null)),
                    _ => member(&target, &to_js_string(&index)),
                }
            }
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&inner.eval(scope)?))),
            Expr::Negate(inner) => Ok(number(-to_number(&inner.eval(scope)?))),
            Expr::Logical(op, left, right) => {
                let left = left.eval(scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !truthy(&left),
                    LogicalOp::Or => truthy(&left),
                    LogicalOp::Coalesce => !left.is_null(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    right.eval(scope)
                }
            }
            Expr::Conditional(condition, then, otherwise) => {
                if truthy(&condition.eval(scope)?) {
                    then.eval(scope)
                } else {
                    otherwise.eval(scope)
                }
            }
            Expr::Binary(op, left, right) => {
                let left = left.eval(scope)?;
                let right = right.eval(scope)?;
                Ok(binary(*op, &left, &right))
            }
        }
    }
}

fn member(target: &Value, name: &str) -> Result<Value, TemplateError> {
    match target {
        Value::Null => Err(TemplateError::Type(format!(
            "cannot read properties of null (reading '{name}')"
        ))),
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if name == "length" => Ok(Value::from(items.len())),
        Value::Array(items) => Ok(name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null)),
        Value::String(s) if name == "length" => Ok(Value::from(s.encode_utf16().count())),
        Value::String(s) => Ok(name
            .parse::<usize>()
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        Value::Bool(_) | Value::Number(_) => Ok(Value::Null),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let concat =
                |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
            if concat(left) || concat(right) {
                Value::String(format!("{}{}", to_js_string(left), to_js_string(right)))
            } else {
                number(to_number(left) + to_number(right))
            }
        }
        BinaryOp::Sub => number(to_number(left) - to_number(right)),
        BinaryOp::Mul => number(to_number(left) * to_number(right)),
        BinaryOp::Div => number(to_number(left) / to_number(right)),
        BinaryOp::Rem => number(to_number(left) % to_number(right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => to_number(left).partial_cmp(&to_number(right)),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::StrictEq => Value::Bool(strict_eq(left, right)),
        BinaryOp::StrictNe => Value::Bool(!strict_eq(left, right)),
        BinaryOp::LooseEq => Value::Bool(loose_eq(left, right)),
        BinaryOp::LooseNe => Value::Bool(!loose_eq(left, right)),
    }
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_))
        | (Value::Bool(_), _)
        | (_, Value::Bool(_)) => to_number(left) == to_number(right),
        _ => strict_eq(left, right),
    }
}

/// JavaScript truthiness.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Non-finite results have no JSON form and collapse to `null`.
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// JavaScript `String(value)` conversion.
pub(crate) fn to_js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
            (_, _, Some(f)) => f.to_string(),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(source: &str, locals: Value) -> Result<Value, TemplateError> {
        let Value::Object(map) = locals else {
            panic!("locals must be an object");
        };
        let expr = parse(source).expect("parse");
        expr.eval(&Scope::new(&map))
    }

    #[test]
    fn test_member_access_and_coalesce() {
        let locals = json!({ "user": { "name": "Ana", "roles": ["admin", "ops"] } });
        assert_eq!(eval("user.name", locals.clone()).unwrap(), json!("Ana"));
        assert_eq!(eval("user.roles.length", locals.clone()).unwrap(), json!(2));
        assert_eq!(eval("user.roles[1]", locals.clone()).unwrap(), json!("ops"));
        assert_eq!(eval("user['name']", locals.clone()).unwrap(), json!("Ana"));
        assert_eq!(eval("user.email ?? 'none'", locals).unwrap(), json!("none"));
    }

    #[test]
    fn test_operators() {
        let locals = json!({ "count": 3, "label": "n=" });
        assert_eq!(eval("count * 2 + 1", locals.clone()).unwrap(), json!(7));
        assert_eq!(eval("label + count", locals.clone()).unwrap(), json!("n=3"));
        assert_eq!(eval("count > 2 && count <= 3", locals.clone()).unwrap(), json!(true));
        assert_eq!(eval("count === '3'", locals.clone()).unwrap(), json!(false));
        assert_eq!(eval("count == '3'", locals.clone()).unwrap(), json!(true));
        assert_eq!(eval("!count", locals.clone()).unwrap(), json!(false));
        assert_eq!(eval("count > 5 ? 'big' : 'small'", locals.clone()).unwrap(), json!("small"));
        assert_eq!(eval("'' || 'fallback'", locals.clone()).unwrap(), json!("fallback"));
        assert_eq!(eval("7 / 2", locals).unwrap(), json!(3.5));
    }

    #[test]
    fn test_reference_and_type_errors() {
        assert!(matches!(
            eval("missing", json!({})),
            Err(TemplateError::Reference(name)) if name == "missing"
        ));
        assert!(matches!(
            eval("user.name", json!({ "user": null })),
            Err(TemplateError::Type(_))
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("a +").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("fn(1)").is_err());
        assert!(parse("'open").is_err());
    }

    #[test]
    fn test_js_stringification() {
        assert_eq!(to_js_string(&json!(2.0)), "2");
        assert_eq!(to_js_string(&json!(2.5)), "2.5");
        assert_eq!(to_js_string(&json!([1, null, "a"])), "1,,a");
        assert_eq!(to_js_string(&json!({ "a": 1 })), "[object Object]");
        assert_eq!(to_js_string(&Value::Null), "null");
    }
}
