//! Per-pixel band arithmetic.
//!
//! Expressions are parsed into a typed tree, resolved against the bands of a
//! product, and evaluated in parallel. Values are `f64`; booleans are 1 and 0,
//! and any non-zero, non-NaN value is true. Comparisons follow IEEE 754, so
//! every comparison involving NaN is false except `!=`.
//!
//! ```text
//! expr     := or ('?' expr ':' expr)? | 'if' expr 'then' expr 'else' expr
//! or       := and (('||' | 'or') and)*
//! and      := equality (('&&' | 'and') equality)*
//! equality := compare (('==' | '!=') compare)*
//! compare  := sum (('<' | '<=' | '>' | '>=') sum)*
//! sum      := product (('+' | '-') product)*
//! product  := unary (('*' | '/' | '%') unary)*
//! unary    := ('-' | '+' | '!' | 'not') unary | primary
//! primary  := number | 'true' | 'false' | 'NaN' | band | function '(' args ')' | '(' expr ')'
//! ```

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{Band, FloodResult, Product, RasterData, ScalarType};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("unknown band '{0}'")]
    UnknownBand(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' takes {expected} argument(s), got {found}")]
    Arity { name: String, expected: usize, found: usize },
}

/// Target band of a band-maths run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandDescriptor {
    pub name: String,
    pub data_type: ScalarType,
    pub expression: String,
    /// Value written where the expression yields NaN and declared as the band's no-data.
    /// Without one, NaN results are filled with the data type's default and the band has no no-data.
    pub no_data_value: Option<f64>,
    pub unit: Option<String>,
}

impl BandDescriptor {
    pub fn new(name: impl Into<String>, data_type: ScalarType, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
            expression: expression.into(),
            no_data_value: None,
            unit: None,
        }
    }

    /// Fill value for NaN results
    pub fn no_data(&self) -> f64 {
        self.no_data_value.unwrap_or_else(|| self.data_type.default_no_data())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sqrt,
    Exp,
    Log,
    Log10,
    Min,
    Max,
    Pow,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Function::Abs,
            "sqrt" => Function::Sqrt,
            "exp" => Function::Exp,
            "log" => Function::Log,
            "log10" => Function::Log10,
            "min" => Function::Min,
            "max" => Function::Max,
            "pow" => Function::Pow,
            _ => return None,
        })
    }

    fn arity(&self) -> usize {
        match self {
            Function::Min | Function::Max | Function::Pow => 2,
            _ => 1,
        }
    }

    fn call(&self, args: &[f64]) -> f64 {
        match self {
            Function::Abs => args[0].abs(),
            Function::Sqrt => args[0].sqrt(),
            Function::Exp => args[0].exp(),
            Function::Log => args[0].ln(),
            Function::Log10 => args[0].log10(),
            Function::Min => args[0].min(args[1]),
            Function::Max => args[0].max(args[1]),
            Function::Pow => args[0].powf(args[1]),
        }
    }
}

/// Expression tree; bands are referenced by their index in [`Expression::bands`]
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    Band(usize),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

fn truth(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

impl Expr {
    fn eval(&self, pixels: &dyn Fn(usize) -> f64) -> f64 {
        match self {
            Expr::Const(v) => *v,
            Expr::Band(i) => pixels(*i),
            Expr::Unary(UnaryOp::Neg, e) => -e.eval(pixels),
            Expr::Unary(UnaryOp::Not, e) => flag(!truth(e.eval(pixels))),
            Expr::Binary(BinaryOp::And, a, b) => flag(truth(a.eval(pixels)) && truth(b.eval(pixels))),
            Expr::Binary(BinaryOp::Or, a, b) => flag(truth(a.eval(pixels)) || truth(b.eval(pixels))),
            Expr::Binary(op, a, b) => {
                let (x, y) = (a.eval(pixels), b.eval(pixels));
                match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    BinaryOp::Rem => x % y,
                    BinaryOp::Lt => flag(x < y),
                    BinaryOp::Le => flag(x <= y),
                    BinaryOp::Gt => flag(x > y),
                    BinaryOp::Ge => flag(x >= y),
                    BinaryOp::Eq => flag(x == y),
                    BinaryOp::Ne => flag(x != y),
                    BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
                }
            }
            Expr::Conditional(c, t, e) => {
                if truth(c.eval(pixels)) {
                    t.eval(pixels)
                } else {
                    e.eval(pixels)
                }
            }
            Expr::Call(f, args) => {
                let values: Vec<f64> = args.iter().map(|a| a.eval(pixels)).collect();
                f.call(&values)
            }
        }
    }
}

/// A parsed expression and the band names it reads
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub root: Expr,
    pub bands: Vec<String>,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0, bands: Vec::new(), end: source.len() };
        let root = parser.expression()?;
        if let Some((token, offset)) = parser.tokens.get(parser.pos) {
            return Err(ExpressionError::Parse {
                position: *offset,
                message: format!("unexpected {:?}", token),
            });
        }
        Ok(Self { root, bands: parser.bands })
    }

    /// Evaluate over every pixel of `product`, casting to `data_type`
    pub fn evaluate(&self, product: &Product, data_type: ScalarType, no_data: f64) -> Result<RasterData, ExpressionError> {
        let sources: Vec<Arc<RasterData>> = self
            .bands
            .iter()
            .map(|name| {
                product
                    .band(name)
                    .map(|b| Arc::clone(&b.data))
                    .ok_or_else(|| ExpressionError::UnknownBand(name.clone()))
            })
            .collect::<Result<_, _>>()?;

        let mut output = Array2::<f32>::zeros((product.height, product.width));
        Zip::indexed(&mut output).par_for_each(|(row, col), value| {
            let pixels = |i: usize| sources[i][[row, col]] as f64;
            *value = data_type.cast(self.root.eval(&pixels), no_data);
        });
        Ok(output)
    }
}

/// Evaluate each descriptor against `product` and return a copy with the resulting bands
/// appended; an existing band of the same name is replaced.
pub fn apply_band_maths(product: &Product, descriptors: &[BandDescriptor]) -> FloodResult<Product> {
    let mut bands = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        log::debug!("Band maths {} ({}) = {}", descriptor.name, descriptor.data_type, descriptor.expression);
        let expression = Expression::parse(&descriptor.expression)?;
        let data = expression.evaluate(product, descriptor.data_type, descriptor.no_data())?;

        let mut band = Band::new(descriptor.name.clone(), descriptor.data_type, data);
        band.no_data_value = descriptor.no_data_value;
        band.unit = descriptor.unit.clone();
        bands.push(band);
    }

    let mut output = product.clone();
    for band in bands {
        if output.contains_band(&band.name) {
            log::debug!("Replacing band {}", band.name);
        }
        output.set_band(band)?;
    }
    Ok(output)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Symbol(&'static str),
}

const SYMBOLS: [&str; 20] = [
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!", "?", ":", "(", ")", ",", "=",
];

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).map_or(false, u8::is_ascii_digit)) {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < bytes.len() && bytes[j].is_ascii_digit() {
                    i = j;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text = &source[start..i];
            let value = text.parse::<f64>().map_err(|_| ExpressionError::Parse {
                position: start,
                message: format!("invalid number '{}'", text),
            })?;
            tokens.push((Token::Number(value), start));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push((Token::Ident(source[start..i].to_string()), start));
            continue;
        }

        let rest = &source[i..];
        match SYMBOLS.iter().find(|s| rest.starts_with(**s)) {
            // a lone '=' is accepted as equality
            Some(&"=") => {
                tokens.push((Token::Symbol("=="), i));
                i += 1;
            }
            Some(&symbol) => {
                tokens.push((Token::Symbol(symbol), i));
                i += symbol.len();
            }
            None => {
                return Err(ExpressionError::Parse {
                    position: i,
                    message: format!("unexpected character '{}'", rest.chars().next().unwrap_or(c)),
                })
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    bands: Vec<String>,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(_, o)| *o)
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Parse { position: self.offset(), message: message.into() }
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(s)) if s == keyword) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), ExpressionError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", symbol)))
        }
    }

    fn expression(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_keyword("if") {
            let condition = self.expression()?;
            if !self.eat_keyword("then") {
                return Err(self.error("expected 'then'"));
            }
            let then = self.expression()?;
            if !self.eat_keyword("else") {
                return Err(self.error("expected 'else'"));
            }
            let otherwise = self.expression()?;
            return Ok(Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise)));
        }

        let condition = self.or()?;
        if self.eat_symbol("?") {
            let then = self.expression()?;
            self.expect_symbol(":")?;
            let otherwise = self.expression()?;
            return Ok(Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise)));
        }
        Ok(condition)
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.and()?;
        while self.eat_symbol("||") || self.eat_keyword("or") {
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.equality()?;
        while self.eat_symbol("&&") || self.eat_keyword("and") {
            let right = self.equality()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn binary_level<F>(&mut self, ops: &[(&str, BinaryOp)], next: F) -> Result<Expr, ExpressionError>
    where
        F: Fn(&mut Self) -> Result<Expr, ExpressionError>,
    {
        let mut left = next(self)?;
        'outer: loop {
            for (symbol, op) in ops {
                if self.eat_symbol(symbol) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)], Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(
            &[("<=", BinaryOp::Le), (">=", BinaryOp::Ge), ("<", BinaryOp::Lt), (">", BinaryOp::Gt)],
            Self::sum,
        )
    }

    fn sum(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Self::product)
    }

    fn product(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_symbol("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat_symbol("+") {
            return self.unary();
        }
        if self.eat_symbol("!") || self.eat_keyword("not") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let Some((token, _)) = self.tokens.get(self.pos).cloned() else {
            return Err(self.error("unexpected end of expression"));
        };
        self.pos += 1;

        match token {
            Token::Number(v) => Ok(Expr::Const(v)),
            Token::Symbol("(") => {
                let inner = self.expression()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Const(1.0)),
                "false" => Ok(Expr::Const(0.0)),
                "NaN" => Ok(Expr::Const(f64::NAN)),
                _ if self.eat_symbol("(") => self.call(name),
                _ => Ok(Expr::Band(self.band_index(name))),
            },
            Token::Symbol(s) => {
                self.pos -= 1;
                Err(self.error(format!("unexpected '{}'", s)))
            }
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, ExpressionError> {
        let function = Function::lookup(&name).ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
        let mut args = Vec::new();
        if !self.eat_symbol(")") {
            loop {
                args.push(self.expression()?);
                if self.eat_symbol(")") {
                    break;
                }
                self.expect_symbol(",")?;
            }
        }
        if args.len() != function.arity() {
            return Err(ExpressionError::Arity { name, expected: function.arity(), found: args.len() });
        }
        Ok(Expr::Call(function, args))
    }

    fn band_index(&mut self, name: String) -> usize {
        match self.bands.iter().position(|b| *b == name) {
            Some(i) => i,
            None => {
                self.bands.push(name);
                self.bands.len() - 1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, values: &[f64]) -> f64 {
        let expression = Expression::parse(source).unwrap();
        expression.root.eval(&|i: usize| values[i])
    }

    #[test]
    fn test_threshold_expression() {
        let e = Expression::parse("(Sigma0_VV < 1.13E-2) ? 1 : 0").unwrap();
        assert_eq!(e.bands, vec!["Sigma0_VV"]);
        assert_eq!(eval("(Sigma0_VV < 1.13E-2) ? 1 : 0", &[0.0112]), 1.0);
        assert_eq!(eval("(Sigma0_VV < 1.13E-2) ? 1 : 0", &[0.0113]), 0.0);
        assert_eq!(eval("(Sigma0_VV < 1.13E-2) ? 1 : 0", &[f64::NAN]), 0.0);
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3", &[]), 7.0);
        assert_eq!(eval("10 - 4 - 3", &[]), 3.0);
        assert_eq!(eval("-2 * -3 % 4", &[]), 2.0);
        assert_eq!(eval("1 < 2 && 3 > 4 || 5 == 5", &[]), 1.0);
        assert_eq!(eval("a ? b ? 1 : 2 : 3", &[1.0, 0.0]), 2.0);
    }

    #[test]
    fn test_keywords_and_functions() {
        assert_eq!(eval("if a >= 2 and not b then max(a, 5) else pow(a, 2)", &[3.0, 0.0]), 5.0);
        assert_eq!(eval("if a >= 2 and not b then max(a, 5) else pow(a, 2)", &[1.5, 0.0]), 2.25);
        assert_eq!(eval("abs(-4) + sqrt(16) + log10(100)", &[]), 10.0);
        assert!(eval("NaN", &[]).is_nan());
        assert_eq!(eval("NaN != NaN", &[]), 1.0);
        assert_eq!(eval("true or false", &[]), 1.0);
    }

    #[test]
    fn test_repeated_band_gets_one_slot() {
        let e = Expression::parse("BinaryWater == 1 && flooded == 1 && BinaryWater").unwrap();
        assert_eq!(e.bands, vec!["BinaryWater", "flooded"]);
    }

    #[test]
    fn test_integer_band_without_declared_no_data() {
        use crate::core::geocoding::Geocoding;
        use crate::types::SarMetadata;

        let mut product = Product::new("p", 3, 1, Geocoding::geographic(10.0, 45.0, 0.01), SarMetadata::default());
        let sigma0 = Array2::from_shape_vec((1, 3), vec![0.001, 0.5, f32::NAN]).unwrap();
        product.add_band(Band::new("Sigma0_VV", ScalarType::Float32, sigma0)).unwrap();

        let out = apply_band_maths(
            &product,
            &[
                BandDescriptor::new("flooded", ScalarType::Uint8, "(Sigma0_VV < 0.0113) ? 1 : 0"),
                BandDescriptor::new("copy", ScalarType::Uint8, "Sigma0_VV * 100"),
            ],
        )
        .unwrap();

        let flooded = out.band("flooded").unwrap();
        assert_eq!(flooded.no_data_value, None);
        assert_eq!(flooded.data.iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 0.0]);
        let copy = out.band("copy").unwrap();
        assert_eq!(copy.no_data_value, None);
        assert_eq!(copy.data[[0, 2]], 0.0);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Expression::parse("1 +"), Err(ExpressionError::Parse { .. })));
        assert!(matches!(Expression::parse("(a < 1"), Err(ExpressionError::Parse { .. })));
        assert!(matches!(Expression::parse("a # b"), Err(ExpressionError::Parse { position: 2, .. })));
        assert!(matches!(Expression::parse("a b"), Err(ExpressionError::Parse { .. })));
        assert!(matches!(Expression::parse("sin(a)"), Err(ExpressionError::UnknownFunction(_))));
        assert!(matches!(Expression::parse("pow(a)"), Err(ExpressionError::Arity { expected: 2, found: 1, .. })));
    }
}
