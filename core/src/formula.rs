//! Sandboxed fee formulas.
//!
//! A formula is a single arithmetic expression over the variables `x`
//! (payment magnitude) and `y` (payment frequency). The grammar is closed:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary (('^' | '**') unary)?
//! primary := number | 'x' | 'y' | function '(' expr (',' expr)* ')' | '(' expr ')'
//! ```
//!
//! Anything outside it (other identifiers, attribute access, keywords,
//! statements) is rejected while parsing. Evaluation walks the immutable
//! tree and never touches shared mutable state.
//!
//! RULE: division by zero is not an error, it evaluates to 0.0.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Probe values used by [`validate`].
pub const PROBE_X: f64 = 1.0;
pub const PROBE_Y: f64 = 0.5;

/// Formulas longer than this are refused outright.
pub const MAX_FORMULA_LEN: usize = 4096;

/// Maximum nesting of parentheses, unary signs and exponents.
const MAX_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("function '{0}' is not allowed")]
    UnsupportedFunction(String),

    #[error("{name}() takes {expected} argument(s), got {got}")]
    Arity {
        name: &'static str,
        expected: Arity,
        got: usize,
    },

    #[error("math domain error in {0}()")]
    Domain(&'static str),

    #[error("numeric overflow")]
    Overflow,
}

pub type FormulaResult<T> = Result<T, FormulaError>;

// ── Registries ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    Between(usize, usize),
    AtLeast(usize),
}

impl Arity {
    fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exactly(k) => n == k,
            Arity::Between(lo, hi) => (lo..=hi).contains(&n),
            Arity::AtLeast(k) => n >= k,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(k) => write!(f, "{k}"),
            Arity::Between(lo, hi) => write!(f, "{lo} to {hi}"),
            Arity::AtLeast(k) => write!(f, "at least {k}"),
        }
    }
}

/// One entry of the function allow-list.
pub struct Builtin {
    pub name: &'static str,
    pub arity: Arity,
    apply: fn(&[f64]) -> FormulaResult<f64>,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

lazy_static! {
    /// The complete set of callable functions. Built once, never mutated.
    static ref FUNCTIONS: HashMap<&'static str, Builtin> = {
        let table = [
            Builtin { name: "abs",  arity: Arity::Exactly(1),    apply: |a| Ok(a[0].abs()) },
            Builtin { name: "min",  arity: Arity::AtLeast(2),    apply: |a| Ok(pick(a, |v, best| v < best)) },
            Builtin { name: "max",  arity: Arity::AtLeast(2),    apply: |a| Ok(pick(a, |v, best| v > best)) },
            Builtin { name: "sqrt", arity: Arity::Exactly(1),    apply: sqrt },
            Builtin { name: "log",  arity: Arity::Between(1, 2), apply: log },
            Builtin { name: "sin",  arity: Arity::Exactly(1),    apply: |a| trig("sin", a[0], f64::sin) },
            Builtin { name: "cos",  arity: Arity::Exactly(1),    apply: |a| trig("cos", a[0], f64::cos) },
        ];
        table.into_iter().map(|b| (b.name, b)).collect()
    };
}

/// Names of every function a formula may call.
pub fn allowed_functions() -> Vec<&'static str> {
    let mut names: Vec<_> = FUNCTIONS.keys().copied().collect();
    names.sort_unstable();
    names
}

/// First argument that wins `better` against every later one.
fn pick(args: &[f64], better: fn(f64, f64) -> bool) -> f64 {
    let mut best = args[0];
    for &v in &args[1..] {
        if better(v, best) {
            best = v;
        }
    }
    best
}

fn sqrt(args: &[f64]) -> FormulaResult<f64> {
    if args[0] < 0.0 {
        return Err(FormulaError::Domain("sqrt"));
    }
    Ok(args[0].sqrt())
}

fn log(args: &[f64]) -> FormulaResult<f64> {
    let value = args[0];
    if value <= 0.0 {
        return Err(FormulaError::Domain("log"));
    }
    match args.get(1) {
        None => Ok(value.ln()),
        Some(&base) => {
            // base 1 has ln(base) == 0
            if base <= 0.0 || base == 1.0 {
                return Err(FormulaError::Domain("log"));
            }
            Ok(value.ln() / base.ln())
        }
    }
}

fn trig(name: &'static str, value: f64, f: fn(f64) -> f64) -> FormulaResult<f64> {
    if value.is_infinite() {
        return Err(FormulaError::Domain(name));
    }
    Ok(f(value))
}

// ── Syntax tree ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn apply(self, lhs: f64, rhs: f64) -> FormulaResult<f64> {
        match self {
            BinaryOp::Add => Ok(lhs + rhs),
            BinaryOp::Sub => Ok(lhs - rhs),
            BinaryOp::Mul => Ok(lhs * rhs),
            BinaryOp::Div if rhs == 0.0 => Ok(0.0),
            BinaryOp::Div => Ok(lhs / rhs),
            BinaryOp::Pow => {
                let value = lhs.powf(rhs);
                // Finite operands must not produce an infinity (this also
                // covers 0 raised to a negative power).
                if value.is_infinite() && lhs.is_finite() && rhs.is_finite() {
                    return Err(FormulaError::Overflow);
                }
                Ok(value)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(f64),
    Variable(Variable),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        function: &'static Builtin,
        args: Vec<Expr>,
    },
}

impl Expr {
    fn eval(&self, x: f64, y: f64) -> FormulaResult<f64> {
        match self {
            Expr::Literal(v) => Ok(*v),
            Expr::Variable(Variable::X) => Ok(x),
            Expr::Variable(Variable::Y) => Ok(y),
            Expr::Binary { op, lhs, rhs } => {
                let l = lhs.eval(x, y)?;
                let r = rhs.eval(x, y)?;
                op.apply(l, r)
            }
            Expr::Unary { op, operand } => {
                let v = operand.eval(x, y)?;
                Ok(match op {
                    UnaryOp::Plus => v,
                    UnaryOp::Minus => -v,
                })
            }
            Expr::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|a| a.eval(x, y))
                    .collect::<FormulaResult<Vec<_>>>()?;
                (function.apply)(&values)
            }
        }
    }
}

/// A parsed formula, ready to be evaluated any number of times.
#[derive(Debug, Clone)]
pub struct Formula {
    source: String,
    root: Expr,
}

impl Formula {
    pub fn parse(text: &str) -> FormulaResult<Self> {
        if text.len() > MAX_FORMULA_LEN {
            return Err(FormulaError::Syntax {
                offset: MAX_FORMULA_LEN,
                message: format!("formula longer than {MAX_FORMULA_LEN} bytes"),
            });
        }
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0, depth: 0 };
        let root = parser.expr()?;
        match parser.peek() {
            Token::End => Ok(Self { source: text.to_string(), root }),
            other => Err(parser.unexpected(other)),
        }
    }

    pub fn eval(&self, x: f64, y: f64) -> FormulaResult<f64> {
        self.root.eval(x, y)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }
}

/// Evaluate `formula_text` at `(x, y)`. Any failure yields `None`.
pub fn evaluate(formula_text: &str, x: f64, y: f64) -> Option<f64> {
    match Formula::parse(formula_text).and_then(|f| f.eval(x, y)) {
        Ok(v) => Some(v),
        Err(e) => {
            log::debug!("formula: '{formula_text}' rejected: {e}");
            None
        }
    }
}

/// True when the formula parses and yields a finite number at the probe point.
pub fn validate(formula_text: &str) -> bool {
    matches!(evaluate(formula_text, PROBE_X, PROBE_Y), Some(v) if v.is_finite())
}

// ── Lexer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
    End,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(v) => write!(f, "number {v}"),
            Token::Ident(name) => write!(f, "'{name}'"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Caret => f.write_str("'^'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
            Token::End => f.write_str("end of input"),
        }
    }
}

fn syntax(offset: usize, message: impl Into<String>) -> FormulaError {
    FormulaError::Syntax { offset, message: message.into() }
}

fn tokenize(text: &str) -> FormulaResult<Vec<(usize, Token)>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let token = match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' if bytes.get(i + 1) == Some(&b'*') => {
                i += 1;
                Token::Caret
            }
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'^' => Token::Caret,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            b'0'..=b'9' | b'.' => {
                let (value, end) = lex_number(bytes, i)?;
                tokens.push((start, Token::Number(value)));
                i = end;
                continue;
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let mut end = i;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                tokens.push((start, Token::Ident(text[i..end].to_string())));
                i = end;
                continue;
            }
            _ => {
                let ch = text[i..].chars().next().unwrap_or('?');
                return Err(syntax(i, format!("unexpected character '{ch}'")));
            }
        };
        tokens.push((start, token));
        i += 1;
    }

    tokens.push((text.len(), Token::End));
    Ok(tokens)
}

/// Lex `digits [. digits] [e [+-] digits]` or `. digits`.
fn lex_number(bytes: &[u8], start: usize) -> FormulaResult<(f64, usize)> {
    let digits = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = digits(start);
    let int_len = end - start;
    let mut frac_len = 0;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits(end + 1);
        frac_len = frac_end - end - 1;
        end = frac_end;
    }
    if int_len == 0 && frac_len == 0 {
        return Err(syntax(start, "unexpected character '.'"));
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits(exp);
        if exp_end == exp {
            return Err(syntax(end, "malformed exponent"));
        }
        end = exp_end;
    }
    if matches!(bytes.get(end), Some(b) if b.is_ascii_alphanumeric() || *b == b'_' || *b == b'.') {
        return Err(syntax(end, "invalid numeric literal"));
    }

    // The slice is pure ASCII digits, '.', 'e' and signs.
    let literal = std::str::from_utf8(&bytes[start..end]).map_err(|_| syntax(start, "invalid numeric literal"))?;
    let value = literal
        .parse::<f64>()
        .map_err(|_| syntax(start, "invalid numeric literal"))?;
    Ok((value, end))
}

// ── Parser ─────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Token {
        self.tokens[self.pos].1.clone()
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].0
    }

    fn bump(&mut self) -> Token {
        let token = self.peek();
        if token != Token::End {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, token: Token) -> FormulaError {
        syntax(self.offset(), format!("unexpected {token}"))
    }

    fn expect(&mut self, want: Token) -> FormulaResult<()> {
        let got = self.peek();
        if got == want {
            self.bump();
            Ok(())
        } else {
            Err(syntax(self.offset(), format!("expected {want}, found {got}")))
        }
    }

    fn enter(&mut self) -> FormulaResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(syntax(self.offset(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn expr(&mut self) -> FormulaResult<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn term(&mut self) -> FormulaResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn unary(&mut self) -> FormulaResult<Expr> {
        let op = match self.peek() {
            Token::Plus => UnaryOp::Plus,
            Token::Minus => UnaryOp::Minus,
            _ => return self.power(),
        };
        self.bump();
        self.enter()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary { op, operand: Box::new(operand) })
    }

    /// `^` binds tighter than a leading sign and associates to the right:
    /// `-2^2 == -4`, `2^3^2 == 512`.
    fn power(&mut self) -> FormulaResult<Expr> {
        let base = self.primary()?;
        if self.peek() != Token::Caret {
            return Ok(base);
        }
        self.bump();
        self.enter()?;
        let exponent = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Binary { op: BinaryOp::Pow, lhs: Box::new(base), rhs: Box::new(exponent) })
    }

    fn primary(&mut self) -> FormulaResult<Expr> {
        let offset = self.offset();
        match self.bump() {
            Token::Number(v) => Ok(Expr::Literal(v)),
            Token::Ident(name) => {
                if self.peek() == Token::LParen {
                    self.call(name)
                } else {
                    match name.as_str() {
                        "x" => Ok(Expr::Variable(Variable::X)),
                        "y" => Ok(Expr::Variable(Variable::Y)),
                        _ => Err(FormulaError::UnknownVariable(name)),
                    }
                }
            }
            Token::LParen => {
                self.enter()?;
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            other => Err(syntax(offset, format!("unexpected {other}"))),
        }
    }

    fn call(&mut self, name: String) -> FormulaResult<Expr> {
        let function: &'static Builtin = match FUNCTIONS.get(name.as_str()) {
            Some(f) => f,
            None => return Err(FormulaError::UnsupportedFunction(name)),
        };
        self.expect(Token::LParen)?;
        self.enter()?;

        let mut args = Vec::new();
        if self.peek() != Token::RParen {
            loop {
                args.push(self.expr()?);
                if self.peek() != Token::Comma {
                    break;
                }
                self.bump();
            }
        }
        self.expect(Token::RParen)?;
        self.depth -= 1;

        if !function.arity.accepts(args.len()) {
            return Err(FormulaError::Arity {
                name: function.name,
                expected: function.arity,
                got: args.len(),
            });
        }
        Ok(Expr::Call { function, args })
    }
}
