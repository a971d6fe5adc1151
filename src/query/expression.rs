//! Expression formulas
//!
//! Parses the formula text of descriptor expressions into an AST and
//! evaluates it against the labels already resolved in a row.
//!
//! # Supported Syntax
//!
//! ```text
//! in + out                 # label references
//! (in + out) * 8           # arithmetic with parentheses
//! -delta / 1e3             # unary minus, scientific literals
//! max(in, out)             # abs, min, max, sqrt
//! coalesce(errors, 0)      # first known argument
//! ```
//!
//! Unknown values propagate through every operator and function except
//! `coalesce`. Division by zero and non-finite results are unknown.
//!
//! Formulas nesting deeper than [`MAX_FORMULA_DEPTH`] are rejected when
//! parsed, which keeps parsing and evaluation within a fixed stack depth.

use crate::query::descriptor::Descriptor;
use crate::query::error::{QueryError, QueryResult};
use crate::results::Row;
use crate::types::{Element, Measurement};
use nom::{
    branch::alt,
    bytes::complete::take_while,
    character::complete::{char, digit0, digit1, multispace0, one_of, satisfy},
    combinator::{cut, opt, recognize},
    error::ErrorKind,
    multi::separated_list0,
    sequence::delimited,
    IResult, Parser,
};
use std::collections::HashSet;

// ============================================================================
// AST
// ============================================================================

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Absolute value
    Abs,
    /// Square root
    Sqrt,
    /// Smallest argument
    Min,
    /// Largest argument
    Max,
    /// First known argument
    Coalesce,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "abs" => Some(Function::Abs),
            "sqrt" => Some(Function::Sqrt),
            "min" => Some(Function::Min),
            "max" => Some(Function::Max),
            "coalesce" => Some(Function::Coalesce),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Function::Abs => "abs",
            Function::Sqrt => "sqrt",
            Function::Min => "min",
            Function::Max => "max",
            Function::Coalesce => "coalesce",
        }
    }

    fn accepts(&self, arity: usize) -> bool {
        match self {
            Function::Abs | Function::Sqrt => arity == 1,
            Function::Min | Function::Max | Function::Coalesce => arity >= 1,
        }
    }

    fn apply<F>(&self, args: &[Expr], lookup: &F) -> Option<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        if *self == Function::Coalesce {
            return args.iter().find_map(|arg| arg.evaluate(lookup));
        }

        let values = args
            .iter()
            .map(|arg| arg.evaluate(lookup))
            .collect::<Option<Vec<f64>>>()?;
        match self {
            Function::Abs => values.first().map(|v| v.abs()),
            Function::Sqrt => values.first().map(|v| v.sqrt()),
            Function::Min => values.into_iter().reduce(f64::min),
            Function::Max => values.into_iter().reduce(f64::max),
            Function::Coalesce => None,
        }
    }
}

/// Formula syntax tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Number(f64),
    /// Reference to a datasource or expression label
    Label(String),
    /// Unary minus
    Neg(Box<Expr>),
    /// Binary arithmetic
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Function call
    Call {
        /// Function
        function: Function,
        /// Arguments
        args: Vec<Expr>,
    },
}

impl Expr {
    fn binary(op: char, lhs: Expr, rhs: Expr) -> Expr {
        let op = match op {
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '*' => BinaryOp::Mul,
            _ => BinaryOp::Div,
        };
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Evaluate with a label lookup; `None` means unknown
    pub fn evaluate<F>(&self, lookup: &F) -> Option<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let value = match self {
            Expr::Number(v) => Some(*v),
            Expr::Label(label) => lookup(label),
            Expr::Neg(operand) => operand.evaluate(lookup).map(|v| -v),
            Expr::Binary { op, lhs, rhs } => {
                let a = lhs.evaluate(lookup)?;
                let b = rhs.evaluate(lookup)?;
                match op {
                    BinaryOp::Add => Some(a + b),
                    BinaryOp::Sub => Some(a - b),
                    BinaryOp::Mul => Some(a * b),
                    BinaryOp::Div if b == 0.0 => None,
                    BinaryOp::Div => Some(a / b),
                }
            },
            Expr::Call { function, args } => function.apply(args, lookup),
        };
        value.filter(|v| v.is_finite())
    }

    fn collect_labels<'a>(&'a self, labels: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {},
            Expr::Label(label) => labels.push(label),
            Expr::Neg(operand) => operand.collect_labels(labels),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_labels(labels);
                rhs.collect_labels(labels);
            },
            Expr::Call { args, .. } => args.iter().for_each(|arg| arg.collect_labels(labels)),
        }
    }

    fn check_arity(&self) -> QueryResult<()> {
        match self {
            Expr::Number(_) | Expr::Label(_) => Ok(()),
            Expr::Neg(operand) => operand.check_arity(),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.check_arity()?;
                rhs.check_arity()
            },
            Expr::Call { function, args } => {
                if !function.accepts(args.len()) {
                    return Err(QueryError::parse(format!(
                        "{}() does not take {} argument(s)",
                        function.name(),
                        args.len()
                    )));
                }
                args.iter().try_for_each(Expr::check_arity)
            },
        }
    }
}

/// Parsed formula
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: Expr,
}

impl Formula {
    /// Parse formula text
    pub fn parse(text: &str) -> QueryResult<Self> {
        match parse_expr(text, 0) {
            Ok((rest, expr)) if rest.trim().is_empty() => {
                expr.check_arity()?;
                Ok(Self { expr })
            },
            Ok((rest, _)) => Err(QueryError::parse(format!(
                "unexpected trailing input '{}'",
                rest.trim()
            ))),
            Err(nom::Err::Failure(e)) if e.code == ErrorKind::TooLarge => Err(QueryError::parse(
                format!("formula nests deeper than {} levels", MAX_FORMULA_DEPTH),
            )),
            Err(nom::Err::Failure(e)) if e.code == ErrorKind::Verify => {
                let name = e
                    .input
                    .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
                    .next()
                    .unwrap_or_default();
                Err(QueryError::parse(format!("unknown function '{}'", name)))
            },
            Err(e) => Err(QueryError::parse(format!("malformed formula: {:?}", e))),
        }
    }

    /// Labels referenced by the formula, in order of appearance
    pub fn labels(&self) -> Vec<&str> {
        let mut labels = Vec::new();
        self.expr.collect_labels(&mut labels);
        labels
    }

    /// Evaluate against a label lookup
    pub fn evaluate<F>(&self, lookup: &F) -> Option<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        self.expr.evaluate(lookup)
    }

}

// ============================================================================
// Parser
// ============================================================================

/// Deepest syntax tree a formula may produce
///
/// Parentheses, unary minus, function calls and every chained binary operator
/// each add one level.
pub const MAX_FORMULA_DEPTH: usize = 128;

/// Account for one more level of nesting at `input`
fn descend(input: &str, depth: usize) -> Result<usize, nom::Err<nom::error::Error<&str>>> {
    if depth >= MAX_FORMULA_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    Ok(depth + 1)
}

/// Operator between two operands, if one follows
fn parse_operator<'a>(input: &'a str, operators: &str) -> Option<(&'a str, char)> {
    delimited(multispace0, one_of::<_, _, nom::error::Error<&str>>(operators), multispace0)
        .parse(input)
        .ok()
}

/// expr := term (('+' | '-') term)*
fn parse_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (mut input, mut expr) = parse_term(input, depth)?;
    let mut depth = depth;
    while let Some((rest, op)) = parse_operator(input, "+-") {
        depth = descend(input, depth)?;
        let (rest, rhs) = parse_term(rest, depth)?;
        expr = Expr::binary(op, expr, rhs);
        input = rest;
    }
    Ok((input, expr))
}

/// term := unary (('*' | '/') unary)*
fn parse_term(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (mut input, mut expr) = parse_unary(input, depth)?;
    let mut depth = depth;
    while let Some((rest, op)) = parse_operator(input, "*/") {
        depth = descend(input, depth)?;
        let (rest, rhs) = parse_unary(rest, depth)?;
        expr = Expr::binary(op, expr, rhs);
        input = rest;
    }
    Ok((input, expr))
}

/// unary := '-' unary | primary
fn parse_unary(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    if let Some(rest) = input.strip_prefix('-') {
        let depth = descend(input, depth)?;
        let (rest, operand) = parse_unary(rest, depth)?;
        return Ok((rest, Expr::Neg(Box::new(operand))));
    }
    parse_primary(input, depth)
}

/// primary := number | '(' expr ')' | call | label
fn parse_primary(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    let (input, expr) = alt((
        parse_number,
        |i| parse_group(i, depth),
        |i| parse_call_or_label(i, depth),
    ))
    .parse(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, expr))
}

fn parse_number(input: &str) -> IResult<&str, Expr> {
    let (rest, text) = recognize((
        digit1,
        opt((char('.'), digit0)),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)?;
    match text.parse::<f64>() {
        Ok(value) => Ok((rest, Expr::Number(value))),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Float,
        ))),
    }
}

fn parse_group(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, _) = char('(')(input)?;
    let depth = descend(input, depth)?;
    let (input, expr) = parse_expr(input, depth)?;
    let (input, _) = cut(char(')')).parse(input)?;
    Ok((input, expr))
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize((
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.'),
    ))
    .parse(input)
}

fn parse_call_or_label(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (rest, name) = parse_identifier(input)?;
    let (after_ws, _) = multispace0(rest)?;

    let Some(args_input) = after_ws.strip_prefix('(') else {
        return Ok((rest, Expr::Label(name.to_string())));
    };

    let Some(function) = Function::from_name(name) else {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::Verify,
        )));
    };

    let depth = descend(args_input, depth)?;
    let (args_input, args) =
        separated_list0(char(','), |i| parse_expr(i, depth)).parse(args_input)?;
    let (args_input, _) = multispace0(args_input)?;
    let (rest, _) = cut(char(')')).parse(args_input)?;
    Ok((rest, Expr::Call { function, args }))
}

// ============================================================================
// Compilation against a descriptor
// ============================================================================

/// Expression ready for per-row evaluation
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    label: String,
    formula: Formula,
}

impl CompiledExpression {
    /// Output label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Evaluate against the measurements already present in a row
    pub fn evaluate(&self, row: &Row<Measurement>) -> Option<f64> {
        self.formula
            .evaluate(&|label: &str| row.get(label).and_then(Element::numeric_value))
    }
}

/// Parse every expression of a descriptor and check its references
///
/// A formula may reference datasource labels and labels of expressions
/// declared before it. Anything else is a configuration error.
pub fn compile_expressions(descriptor: &Descriptor) -> QueryResult<Vec<CompiledExpression>> {
    let mut resolved: HashSet<&str> = descriptor
        .datasources()
        .iter()
        .map(|ds| ds.label.as_str())
        .collect();
    let declared: HashSet<&str> = descriptor
        .expressions()
        .iter()
        .map(|e| e.label.as_str())
        .collect();

    let mut compiled = Vec::with_capacity(descriptor.expressions().len());
    for expression in descriptor.expressions() {
        let formula = Formula::parse(&expression.formula).map_err(|e| {
            QueryError::parse(format!(
                "expression '{}' ({}): {}",
                expression.label, expression.formula, e.message
            ))
        })?;

        for label in formula.labels() {
            if resolved.contains(label) {
                continue;
            }
            let reason = if declared.contains(label) {
                "is not resolved before it"
            } else {
                "is not declared"
            };
            return Err(QueryError::validation(format!(
                "expression '{}' references '{}', which {}",
                expression.label, label, reason
            )));
        }

        resolved.insert(expression.label.as_str());
        compiled.push(CompiledExpression {
            label: expression.label.clone(),
            formula,
        });
    }

    Ok(compiled)
}
