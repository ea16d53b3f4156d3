//! 默认过滤表达式语言
//!
//! 形如 `o => o.name == 'Ada' && (o.age >= 18 || !o.blocked)`：
//! - 操作数：字段路径、字符串（单/双引号）、数字、`true` / `false` / `null`；
//! - 比较：`== != < <= > >=`，大小比较仅对数字与字符串生效，缺失字段视为 `null`；
//! - 单独的路径当且仅当其值为 JSON `true` 时成立；
//! - 逻辑：`&&`、`||`、`!` 与括号，括号与 `!` 的嵌套深度不超过 [`MAX_NESTING`]；
//! - 省略 lambda 头时，路径开头的 `o.` 即为参数本身。
//!
//! 规范化文本为 `o => ...` 形式的完全加括号渲染结果，与书写时的空白和 lambda 参数名无关。
//!
use super::{CompiledFilter, FilterCompiler};
use crate::error::{DispatchError, DispatchResult};
use crate::specification::{AllOf, AnyOf, BoxSpecification, Not, Specification};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

static NULL: Value = Value::Null;

/// 括号与 `!` 的最大嵌套深度
pub const MAX_NESTING: usize = 64;

const IMPLICIT_PARAM: &str = "o";

/// 基于 JSON 实体的默认过滤器编译器
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFilterCompiler;

impl FilterCompiler for JsonFilterCompiler {
    fn compile(&self, text: &str) -> DispatchResult<CompiledFilter> {
        let expr = tokenize(text)
            .and_then(|tokens| Parser::new(tokens).parse())
            .map_err(|reason| DispatchError::invalid_filter(text, reason))?;

        let canonical = format!("o => {expr}");
        let spec: Arc<dyn Specification<Value>> = Arc::from(expr.into_spec());
        Ok(CompiledFilter::new(canonical, spec))
    }
}

// ---- 词法 ----

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(Number),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Arrow,
    Dot,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::Cmp(CmpOp::Eq), 2),
            ('=', Some('>')) => (Token::Arrow, 2),
            ('!', Some('=')) => (Token::Cmp(CmpOp::Ne), 2),
            ('<', Some('=')) => (Token::Cmp(CmpOp::Le), 2),
            ('>', Some('=')) => (Token::Cmp(CmpOp::Ge), 2),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('<', _) => (Token::Cmp(CmpOp::Lt), 1),
            ('>', _) => (Token::Cmp(CmpOp::Gt), 1),
            ('!', _) => (Token::Not, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('.', _) => (Token::Dot, 1),
            ('\'' | '"', _) => {
                let (value, width) = lex_string(&chars[i..])?;
                (Token::Str(value), width)
            }
            (c, _) if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let width = lex_number_width(&chars[i..]);
                let raw: String = chars[i..i + width].iter().collect();
                let number = raw
                    .parse::<Number>()
                    .map_err(|_| format!("invalid number literal `{raw}`"))?;
                (Token::Num(number), width)
            }
            (c, _) if c.is_alphabetic() || c == '_' || c == '$' => {
                let width = chars[i..]
                    .iter()
                    .take_while(|c| c.is_alphanumeric() || **c == '_' || **c == '$')
                    .count();
                (Token::Ident(chars[i..i + width].iter().collect()), width)
            }
            (c, _) => return Err(format!("unexpected character `{c}` at {i}")),
        };

        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

fn lex_string(chars: &[char]) -> Result<(String, usize), String> {
    let quote = chars[0];
    let mut value = String::new();
    let mut i = 1;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars.get(i + 1).ok_or("unterminated escape sequence")?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((value, i + 1)),
            c => {
                value.push(c);
                i += 1;
            }
        }
    }

    Err("unterminated string literal".to_string())
}

fn lex_number_width(chars: &[char]) -> usize {
    let mut i = usize::from(chars[0] == '-');
    let digits = |from: usize| chars[from..].iter().take_while(|c| c.is_ascii_digit()).count();

    i += digits(i);
    if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
        i += 1 + digits(i + 1);
    }
    if matches!(chars.get(i), Some('e' | 'E')) {
        let sign = usize::from(matches!(chars.get(i + 1), Some('+' | '-')));
        let exp = digits(i + 1 + sign);
        if exp > 0 {
            i += 1 + sign + exp;
        }
    }
    i
}

// ---- 语法树 ----

#[derive(Clone, Debug, PartialEq)]
struct Path(Vec<String>);

impl Path {
    fn resolve<'a>(&self, entity: &'a Value) -> &'a Value {
        self.0
            .iter()
            .try_fold(entity, |value, segment| value.get(segment))
            .unwrap_or(&NULL)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("o")?;
        for segment in &self.0 {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Operand {
    Path(Path),
    Literal(Value),
}

impl Operand {
    fn resolve<'a>(&'a self, entity: &'a Value) -> &'a Value {
        match self {
            Operand::Path(path) => path.resolve(entity),
            Operand::Literal(value) => value,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Path(path) => write!(f, "{path}"),
            Operand::Literal(Value::String(s)) => {
                f.write_str("'")?;
                for c in s.chars() {
                    match c {
                        '\'' | '\\' => write!(f, "\\{c}")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        '\r' => f.write_str("\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("'")
            }
            Operand::Literal(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    Compare(Operand, CmpOp, Operand),
    Truthy(Path),
    Const(bool),
}

impl Expr {
    fn into_spec(self) -> BoxSpecification<Value> {
        match self {
            Expr::Or(parts) => Box::new(AnyOf::new(
                parts.into_iter().map(Expr::into_spec).collect(),
            )),
            Expr::And(parts) => Box::new(AllOf::new(
                parts.into_iter().map(Expr::into_spec).collect(),
            )),
            Expr::Not(inner) => Box::new(Not::new(inner.into_spec())),
            Expr::Compare(left, op, right) => Box::new(ComparePredicate { left, op, right }),
            Expr::Truthy(path) => Box::new(TruthyPredicate(path)),
            Expr::Const(value) => Box::new(ConstPredicate(value)),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Expr], op: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        write!(f, "{part}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Or(parts) => write_joined(f, parts, "||"),
            Expr::And(parts) => write_joined(f, parts, "&&"),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::Compare(l, op, r) => write!(f, "{l} {} {r}", op.as_str()),
            Expr::Truthy(path) => write!(f, "{path}"),
            Expr::Const(value) => write!(f, "{value}"),
        }
    }
}

// ---- 语法分析 ----

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    param: Option<String>,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            param: None,
            depth: 0,
        }
    }

    fn parse(mut self) -> Result<Expr, String> {
        if let (Some(Token::Ident(param)), Some(Token::Arrow)) =
            (self.tokens.first(), self.tokens.get(1))
        {
            self.param = Some(param.clone());
            self.pos = 2;
        }

        if self.peek().is_none() {
            return Err("empty filter expression".to_string());
        }

        let expr = self.parse_or()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(format!("unexpected token {token:?}")),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// 进入一层括号或 `!`
    fn nest<T>(&mut self, inner: impl FnOnce(&mut Self) -> Result<T, String>) -> Result<T, String> {
        if self.depth >= MAX_NESTING {
            return Err(format!("filter nesting deeper than {MAX_NESTING}"));
        }
        self.depth += 1;
        let result = inner(self);
        self.depth -= 1;
        result
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut parts = Vec::new();
        loop {
            match self.parse_and()? {
                Expr::Or(nested) => parts.extend(nested),
                other => parts.push(other),
            }
            if !self.eat(&Token::Or) {
                break;
            }
        }
        Ok(collapse(parts, Expr::Or))
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut parts = Vec::new();
        loop {
            match self.parse_unary()? {
                Expr::And(nested) => parts.extend(nested),
                other => parts.push(other),
            }
            if !self.eat(&Token::And) {
                break;
            }
        }
        Ok(collapse(parts, Expr::And))
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Not) {
            let inner = self.nest(Self::parse_unary)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::LParen) {
            let expr = self.nest(Self::parse_or)?;
            if !self.eat(&Token::RParen) {
                return Err("expected `)`".to_string());
            }
            return Ok(expr);
        }

        let left = self.parse_operand()?;
        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Compare(left, op, right));
        }

        match left {
            Operand::Path(path) => Ok(Expr::Truthy(path)),
            Operand::Literal(Value::Bool(value)) => Ok(Expr::Const(value)),
            Operand::Literal(other) => Err(format!("expected comparison after literal {other}")),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Operand::Literal(Value::Number(n))),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Operand::Literal(Value::Bool(true))),
                "false" => Ok(Operand::Literal(Value::Bool(false))),
                "null" => Ok(Operand::Literal(Value::Null)),
                _ => self.parse_path(ident).map(Operand::Path),
            },
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of filter expression".to_string()),
        }
    }

    fn parse_path(&mut self, head: String) -> Result<Path, String> {
        let mut segments = vec![head];
        while self.eat(&Token::Dot) {
            match self.advance() {
                Some(Token::Ident(segment)) => segments.push(segment),
                _ => return Err("expected field name after `.`".to_string()),
            }
        }

        match &self.param {
            Some(param) if segments[0] != *param => {
                return Err(format!("unknown identifier `{}`", segments[0]));
            }
            Some(_) => {
                segments.remove(0);
            }
            None if segments.len() > 1 && segments[0] == IMPLICIT_PARAM => {
                segments.remove(0);
            }
            None => {}
        }
        Ok(Path(segments))
    }
}

/// 只有一项时不再包一层
fn collapse(mut parts: Vec<Expr>, wrap: fn(Vec<Expr>) -> Expr) -> Expr {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        wrap(parts)
    }
}

// ---- 求值 ----

struct ComparePredicate {
    left: Operand,
    op: CmpOp,
    right: Operand,
}

impl Specification<Value> for ComparePredicate {
    fn is_satisfied_by(&self, candidate: &Value) -> bool {
        let left = self.left.resolve(candidate);
        let right = self.right.resolve(candidate);
        match self.op {
            CmpOp::Eq => values_equal(left, right),
            CmpOp::Ne => !values_equal(left, right),
            CmpOp::Lt => ordering(left, right).is_some_and(Ordering::is_lt),
            CmpOp::Le => ordering(left, right).is_some_and(Ordering::is_le),
            CmpOp::Gt => ordering(left, right).is_some_and(Ordering::is_gt),
            CmpOp::Ge => ordering(left, right).is_some_and(Ordering::is_ge),
        }
    }
}

struct TruthyPredicate(Path);

impl Specification<Value> for TruthyPredicate {
    fn is_satisfied_by(&self, candidate: &Value) -> bool {
        matches!(self.0.resolve(candidate), Value::Bool(true))
    }
}

struct ConstPredicate(bool);

impl Specification<Value> for ConstPredicate {
    fn is_satisfied_by(&self, _: &Value) -> bool {
        self.0
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(text: &str) -> CompiledFilter {
        JsonFilterCompiler.compile(text).expect("valid filter")
    }

    #[test]
    fn compares_fields_with_literals() {
        let filter = compile("o => o.name == 'Ada' && o.age >= 18");
        assert!(filter.evaluate(&json!({"name": "Ada", "age": 36})));
        assert!(!filter.evaluate(&json!({"name": "Ada", "age": 12})));
        assert!(!filter.evaluate(&json!({"name": "Bob", "age": 36})));
        assert!(!filter.evaluate(&json!({"name": "Ada"})));
    }

    #[test]
    fn supports_nested_paths_negation_and_truthiness() {
        let filter = compile("o => o.address.city != \"Paris\" || !o.blocked");
        assert!(filter.evaluate(&json!({"address": {"city": "Rome"}, "blocked": true})));
        assert!(filter.evaluate(&json!({"address": {"city": "Paris"}})));
        assert!(!filter.evaluate(&json!({"address": {"city": "Paris"}, "blocked": true})));

        let active = compile("active");
        assert!(active.evaluate(&json!({"active": true})));
        assert!(!active.evaluate(&json!({"active": 1})));
    }

    #[test]
    fn numbers_compare_by_value() {
        let filter = compile("o => o.price < 9.5 && o.qty == 2");
        assert!(filter.evaluate(&json!({"price": 3, "qty": 2.0})));
        assert!(!filter.evaluate(&json!({"price": "3", "qty": 2})));
    }

    #[test]
    fn canonical_text_ignores_layout_and_parameter_name() {
        let a = compile("o => o.a == 1&&o.b=='x'");
        let b = compile("  x =>  (x.a == 1) && x.b == 'x' ");
        assert_eq!(a, b);
        assert_eq!(a.text(), "o => (o.a == 1 && o.b == 'x')");

        // 规范化文本可再次编译且保持不变
        let again = compile(a.text());
        assert_eq!(again.text(), a.text());
    }

    #[test]
    fn leading_o_without_arrow_is_the_parameter() {
        let bare = compile("o.color == 'red'");
        let arrow = compile("o => o.color == 'red'");
        assert_eq!(bare.text(), arrow.text());
        assert_eq!(bare.text(), "o => o.color == 'red'");

        let entity = json!({"color": "red"});
        assert!(bare.evaluate(&entity));
        assert_eq!(bare.evaluate(&entity), arrow.evaluate(&entity));

        // 单独的 `o` 仍是字段名
        assert!(compile("o").evaluate(&json!({"o": true})));
    }

    #[test]
    fn chains_flatten_regardless_of_grouping() {
        let flat = compile("o.a == 1 && o.b == 2 && o.c == 3");
        let grouped = compile("(o.a == 1 && o.b == 2) && o.c == 3");
        assert_eq!(flat.text(), "o => (o.a == 1 && o.b == 2 && o.c == 3)");
        assert_eq!(flat, grouped);

        let long = vec!["o.a == 1"; 50_000].join(" || ");
        let filter = compile(&long);
        assert!(filter.evaluate(&json!({"a": 1})));
        assert!(!filter.evaluate(&json!({"a": 2})));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let ok = format!("{}o.a{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert!(compile(&ok).evaluate(&json!({"a": true})));
        assert!(compile(&format!("{}o.a", "!".repeat(MAX_NESTING))).evaluate(&json!({"a": true})));

        let parens = format!("{}a{}", "(".repeat(200_000), ")".repeat(200_000));
        let negations = format!("{}a", "!".repeat(200_000));
        for text in [parens, negations] {
            let err = JsonFilterCompiler.compile(&text).unwrap_err();
            assert!(matches!(err, DispatchError::InvalidFilter { .. }));
            assert!(err.to_string().contains("nesting"), "{err}");
        }
    }

    #[test]
    fn rejects_invalid_text() {
        for text in ["", "o => o.a ==", "o.a == 'x", "(o.a == 1", "o => p.a == 1", "42", "o.a # 1"] {
            let err = JsonFilterCompiler.compile(text).unwrap_err();
            assert!(
                matches!(err, DispatchError::InvalidFilter { .. }),
                "{text}: {err}"
            );
        }
    }
}
