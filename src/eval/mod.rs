//! Sandboxed arithmetic evaluator.
//!
//! Accepts numeric literals, the constants `pi` and `e`, unary `+`/`-`, the
//! binary operators `+ - * / // % **`, parentheses, and calls to
//! `sin cos tan sqrt log exp max min abs`. Anything else is rejected before
//! evaluation starts. Results are always finite `f64` values.
//!
//! ```
//! use calcwire::eval::{evaluate, EvalError};
//!
//! assert_eq!(evaluate("3*(5+4)").unwrap(), 27.0);
//! assert_eq!(evaluate("1/0"), Err(EvalError::DivisionByZero));
//! assert!(matches!(evaluate("__import__('os')"), Err(EvalError::UnknownFunction(_))));
//! ```

pub mod ast;
pub mod interp;
pub mod lexer;
pub mod parser;

use thiserror::Error;

pub use ast::Expr;

/// Longest accepted expression source, in bytes.
pub const MAX_EXPR_BYTES: usize = 4096;

/// Deepest accepted nesting of parentheses, signs, powers and calls.
pub const MAX_DEPTH: usize = 64;

/// Evaluation failures, one variant per category.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{function}() takes {expected} argument(s), got {got}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("math domain error: {0}")]
    Domain(String),

    #[error("result is not a finite number")]
    NonFinite,

    #[error("expression too complex: {0}")]
    TooComplex(String),
}

/// Parse `src` into an expression tree without evaluating it.
pub fn parse(src: &str) -> Result<Expr, EvalError> {
    if src.len() > MAX_EXPR_BYTES {
        return Err(EvalError::TooComplex(format!(
            "expression longer than {MAX_EXPR_BYTES} bytes"
        )));
    }
    parser::Parser::new(src)?.parse()
}

/// Parse and evaluate `src`.
pub fn evaluate(src: &str) -> Result<f64, EvalError> {
    let tree = parse(src)?;
    let value = interp::eval(&tree)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::NonFinite)
    }
}
