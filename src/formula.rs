//! Formula parser and evaluator for computed columns.
//!
//! Formulas start with `=` and are evaluated against a single row:
//! - `={budget} * 1.2`
//! - `={first} & " " & {last}`
//! - `=IF({progress} >= 100, "Done", "Open")`
//! - `=ROUND({hours} / 8, 1)`
//!
//! Column references are written `{key}`; a reference to a missing or null
//! cell evaluates to `0`. Any parse or evaluation failure renders as
//! [`ERROR_TEXT`].

use crate::error::FormulaError;
use crate::schema::Row;
use crate::value::CellValue;
use chrono::{SecondsFormat, Utc};
use std::cmp::Ordering;

/// Cell text shown for formulas that fail to parse or evaluate.
pub const ERROR_TEXT: &str = "#ERROR";

/// A parsed formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    /// `{column_key}`
    Reference(String),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Token types for lexing
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Reference(String),
    Plus,
    Minus,
    Star,
    Slash,
    Amp,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Comma,
    LParen,
    RParen,
    Eof,
}

struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn read_while(&mut self, mut pred: impl FnMut(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.advance();
        }
        out
    }

    fn read_number(&mut self) -> Result<Token, FormulaError> {
        let mut seen_dot = false;
        let text = self.read_while(|c| {
            if c == '.' && !seen_dot {
                seen_dot = true;
                true
            } else {
                c.is_ascii_digit()
            }
        });
        text.parse()
            .map(Token::Number)
            .map_err(|_| FormulaError::Syntax(format!("bad number '{}'", text)))
    }

    fn read_string(&mut self) -> Result<Token, FormulaError> {
        self.advance(); // opening quote
        let mut s = String::new();
        while let Some(c) = self.advance() {
            match c {
                '"' => {
                    // "" inside a string is an escaped quote
                    if self.peek() == Some('"') {
                        self.advance();
                        s.push('"');
                    } else {
                        return Ok(Token::Text(s));
                    }
                }
                _ => s.push(c),
            }
        }
        Err(FormulaError::Syntax("unterminated string".to_string()))
    }

    fn read_reference(&mut self) -> Result<Token, FormulaError> {
        self.advance(); // {
        let key = self.read_while(|c| c != '}');
        if self.advance() != Some('}') {
            return Err(FormulaError::Syntax("unterminated reference".to_string()));
        }
        let key = key.trim();
        if key.is_empty() {
            return Err(FormulaError::Syntax("empty reference".to_string()));
        }
        Ok(Token::Reference(key.to_string()))
    }

    fn next_token(&mut self) -> Result<Token, FormulaError> {
        self.skip_whitespace();
        let Some(c) = self.peek() else {
            return Ok(Token::Eof);
        };

        let single = |lexer: &mut Lexer, token: Token| -> Result<Token, FormulaError> {
            lexer.advance();
            Ok(token)
        };

        match c {
            '(' => single(self, Token::LParen),
            ')' => single(self, Token::RParen),
            ',' => single(self, Token::Comma),
            '+' => single(self, Token::Plus),
            '-' => single(self, Token::Minus),
            '*' => single(self, Token::Star),
            '/' => single(self, Token::Slash),
            '&' => single(self, Token::Amp),
            '=' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                }
                Ok(Token::Eq)
            }
            '!' => {
                self.advance();
                if self.advance() == Some('=') {
                    Ok(Token::Ne)
                } else {
                    Err(FormulaError::Syntax("expected '=' after '!'".to_string()))
                }
            }
            '<' => {
                self.advance();
                match self.peek() {
                    Some('=') => single(self, Token::Le),
                    Some('>') => single(self, Token::Ne),
                    _ => Ok(Token::Lt),
                }
            }
            '>' => {
                self.advance();
                if self.peek() == Some('=') {
                    single(self, Token::Ge)
                } else {
                    Ok(Token::Gt)
                }
            }
            '"' => self.read_string(),
            '{' => self.read_reference(),
            _ if c.is_ascii_digit() || c == '.' => self.read_number(),
            _ if c.is_alphabetic() || c == '_' => {
                Ok(Token::Ident(self.read_while(|c| c.is_alphanumeric() || c == '_')))
            }
            _ => Err(FormulaError::Syntax(format!("unexpected character '{}'", c))),
        }
    }
}

/// Deepest allowed nesting of parentheses, calls and unary signs.
const MAX_NESTING: usize = 64;
/// Most operator and call nodes one formula may contain.
const MAX_OPERATIONS: usize = 1024;

/// Recursive-descent parser. Precedence, lowest first: comparison, `&`,
/// `+ -`, `* /`, unary minus.
struct Parser {
    lexer: Lexer,
    current: Token,
    depth: usize,
    operations: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, FormulaError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Parser {
            lexer,
            current,
            depth: 0,
            operations: 0,
        })
    }

    fn advance(&mut self) -> Result<(), FormulaError> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: &Token) -> Result<(), FormulaError> {
        if &self.current == expected {
            self.advance()
        } else {
            Err(FormulaError::Syntax(format!(
                "expected {:?}, got {:?}",
                expected, self.current
            )))
        }
    }

    fn parse(&mut self) -> Result<Expr, FormulaError> {
        self.nested(Self::parse_comparison)
    }

    fn nested(
        &mut self,
        inner: fn(&mut Self) -> Result<Expr, FormulaError>,
    ) -> Result<Expr, FormulaError> {
        if self.depth >= MAX_NESTING {
            return Err(FormulaError::Syntax("formula is nested too deeply".to_string()));
        }
        self.depth += 1;
        let result = inner(self);
        self.depth -= 1;
        result
    }

    fn count_operation(&mut self) -> Result<(), FormulaError> {
        self.operations += 1;
        if self.operations > MAX_OPERATIONS {
            return Err(FormulaError::Syntax("formula has too many operations".to_string()));
        }
        Ok(())
    }

    fn parse_comparison(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.current {
                Token::Eq => BinaryOp::Eq,
                Token::Ne => BinaryOp::Ne,
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_concat()?;
            self.count_operation()?;
            left = binary(op, left, right);
        }
    }

    fn parse_concat(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_additive()?;
        while self.current == Token::Amp {
            self.advance()?;
            let right = self.parse_additive()?;
            self.count_operation()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            self.count_operation()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_unary()?;
            self.count_operation()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        match self.current {
            Token::Minus => {
                self.advance()?;
                self.count_operation()?;
                Ok(Expr::Negate(Box::new(self.nested(Self::parse_unary)?)))
            }
            Token::Plus => {
                self.advance()?;
                self.nested(Self::parse_unary)
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        let token = std::mem::replace(&mut self.current, Token::Eof);
        match token {
            Token::Number(n) => {
                self.advance()?;
                Ok(Expr::Number(n))
            }
            Token::Text(s) => {
                self.advance()?;
                Ok(Expr::Text(s))
            }
            Token::Reference(key) => {
                self.advance()?;
                Ok(Expr::Reference(key))
            }
            Token::LParen => {
                self.advance()?;
                let expr = self.parse()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::Ident(name) => {
                self.advance()?;
                let upper = name.to_uppercase();
                if self.current != Token::LParen {
                    return match upper.as_str() {
                        "TRUE" => Ok(Expr::Bool(true)),
                        "FALSE" => Ok(Expr::Bool(false)),
                        _ => Err(FormulaError::Syntax(format!("unexpected name '{}'", name))),
                    };
                }
                self.advance()?;
                self.count_operation()?;
                let mut args = Vec::new();
                if self.current != Token::RParen {
                    args.push(self.parse()?);
                    while self.current == Token::Comma {
                        self.advance()?;
                        args.push(self.parse()?);
                    }
                }
                self.expect(&Token::RParen)?;
                Ok(Expr::Call { name: upper, args })
            }
            other => Err(FormulaError::Syntax(format!("unexpected {:?}", other))),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Parse a formula body (without the leading `=`).
pub fn parse_formula(input: &str) -> Result<Expr, FormulaError> {
    let mut parser = Parser::new(input)?;
    let expr = parser.parse()?;
    if parser.current != Token::Eof {
        return Err(FormulaError::Syntax(format!(
            "unexpected token after expression: {:?}",
            parser.current
        )));
    }
    Ok(expr)
}

/// Returns true for strings that should be evaluated as formulas.
pub fn is_formula(text: &str) -> bool {
    text.trim_start().starts_with('=')
}

/// Evaluate `formula` against `row`.
///
/// Non-formula input yields `Null`; failures yield the text `#ERROR`.
pub fn evaluate(formula: &str, row: &Row) -> CellValue {
    let Some(body) = formula.trim_start().strip_prefix('=') else {
        return CellValue::Null;
    };
    match parse_formula(body).and_then(|expr| eval_expr(&expr, row)) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Formula '{}' failed: {}", formula, e);
            CellValue::Text(ERROR_TEXT.to_string())
        }
    }
}

/// Evaluate a parsed expression against a row.
pub fn eval_expr(expr: &Expr, row: &Row) -> Result<CellValue, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(number(*n)),
        Expr::Text(s) => Ok(CellValue::Text(s.clone())),
        Expr::Bool(b) => Ok(CellValue::Bool(*b)),
        Expr::Reference(key) => Ok(match row.get(key) {
            None | Some(CellValue::Null) => CellValue::Int(0),
            Some(value) => value,
        }),
        Expr::Negate(inner) => {
            let v = to_number(&eval_expr(inner, row)?)?;
            Ok(number(-v))
        }
        Expr::Binary { op, left, right } => {
            let l = eval_expr(left, row)?;
            let r = eval_expr(right, row)?;
            eval_binary(*op, &l, &r)
        }
        Expr::Call { name, args } => eval_call(name, args, row),
    }
}

fn eval_binary(op: BinaryOp, l: &CellValue, r: &CellValue) -> Result<CellValue, FormulaError> {
    match op {
        BinaryOp::Add => Ok(number(to_number(l)? + to_number(r)?)),
        BinaryOp::Sub => Ok(number(to_number(l)? - to_number(r)?)),
        BinaryOp::Mul => Ok(number(to_number(l)? * to_number(r)?)),
        BinaryOp::Div => {
            let divisor = to_number(r)?;
            if divisor == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            Ok(number(to_number(l)? / divisor))
        }
        BinaryOp::Concat => Ok(CellValue::Text(format!("{}{}", l, r))),
        BinaryOp::Eq => Ok(CellValue::Bool(compare(l, r) == Ordering::Equal)),
        BinaryOp::Ne => Ok(CellValue::Bool(compare(l, r) != Ordering::Equal)),
        BinaryOp::Lt => Ok(CellValue::Bool(compare(l, r) == Ordering::Less)),
        BinaryOp::Le => Ok(CellValue::Bool(compare(l, r) != Ordering::Greater)),
        BinaryOp::Gt => Ok(CellValue::Bool(compare(l, r) == Ordering::Greater)),
        BinaryOp::Ge => Ok(CellValue::Bool(compare(l, r) != Ordering::Less)),
    }
}

fn eval_call(name: &str, args: &[Expr], row: &Row) -> Result<CellValue, FormulaError> {
    let arity = |expected: &'static str, ok: bool| {
        if ok {
            Ok(())
        } else {
            Err(FormulaError::Arity {
                name: name.to_string(),
                expected,
                actual: args.len(),
            })
        }
    };

    match name {
        "IF" => {
            arity("2 or 3", args.len() == 2 || args.len() == 3)?;
            if truthy(&eval_expr(&args[0], row)?) {
                eval_expr(&args[1], row)
            } else if let Some(otherwise) = args.get(2) {
                eval_expr(otherwise, row)
            } else {
                Ok(CellValue::Bool(false))
            }
        }
        "AND" => {
            arity("at least 1", !args.is_empty())?;
            for arg in args {
                if !truthy(&eval_expr(arg, row)?) {
                    return Ok(CellValue::Bool(false));
                }
            }
            Ok(CellValue::Bool(true))
        }
        "OR" => {
            arity("at least 1", !args.is_empty())?;
            for arg in args {
                if truthy(&eval_expr(arg, row)?) {
                    return Ok(CellValue::Bool(true));
                }
            }
            Ok(CellValue::Bool(false))
        }
        "NOT" => {
            arity("1", args.len() == 1)?;
            Ok(CellValue::Bool(!truthy(&eval_expr(&args[0], row)?)))
        }
        "CONCAT" => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&eval_expr(arg, row)?.to_string());
            }
            Ok(CellValue::Text(out))
        }
        "ROUND" => {
            arity("1 or 2", args.len() == 1 || args.len() == 2)?;
            let value = to_number(&eval_expr(&args[0], row)?)?;
            let digits = match args.get(1) {
                Some(arg) => to_number(&eval_expr(arg, row)?)?.trunc() as i32,
                None => 0,
            };
            let factor = 10f64.powi(digits);
            Ok(number((value * factor).round() / factor))
        }
        "LEN" => {
            arity("1", args.len() == 1)?;
            let text = eval_expr(&args[0], row)?.to_string();
            Ok(CellValue::Int(text.chars().count() as i64))
        }
        "UPPER" => {
            arity("1", args.len() == 1)?;
            Ok(CellValue::Text(eval_expr(&args[0], row)?.to_string().to_uppercase()))
        }
        "LOWER" => {
            arity("1", args.len() == 1)?;
            Ok(CellValue::Text(eval_expr(&args[0], row)?.to_string().to_lowercase()))
        }
        "TODAY" => {
            arity("0", args.is_empty())?;
            Ok(CellValue::Text(Utc::now().format("%Y-%m-%d").to_string()))
        }
        "NOW" => {
            arity("0", args.is_empty())?;
            Ok(CellValue::Text(
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ))
        }
        other => Err(FormulaError::UnknownFunction(other.to_string())),
    }
}

/// Whole results come back as integers so `=1+1` displays `2`.
fn number(n: f64) -> CellValue {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        CellValue::Int(n as i64)
    } else {
        CellValue::Float(n)
    }
}

fn to_number(value: &CellValue) -> Result<f64, FormulaError> {
    match value {
        CellValue::Null => Ok(0.0),
        CellValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        CellValue::Int(i) => Ok(*i as f64),
        CellValue::Float(f) => Ok(*f),
        CellValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| FormulaError::NotANumber(s.clone())),
        CellValue::List(_) => Err(FormulaError::NotANumber(value.to_string())),
    }
}

fn truthy(value: &CellValue) -> bool {
    match value {
        CellValue::Null => false,
        CellValue::Bool(b) => *b,
        CellValue::Int(i) => *i != 0,
        CellValue::Float(f) => *f != 0.0,
        CellValue::Text(s) => !s.is_empty(),
        CellValue::List(items) => !items.is_empty(),
    }
}

/// Numbers (and numeric text) compare numerically, everything else as text.
fn compare(l: &CellValue, r: &CellValue) -> Ordering {
    let numeric = |v: &CellValue| match v {
        CellValue::Text(_) | CellValue::List(_) => None,
        other => to_number(other).ok(),
    };
    match (numeric(l), numeric(r)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => l.to_string().cmp(&r.to_string()),
    }
}
