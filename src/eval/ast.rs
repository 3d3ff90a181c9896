//! Expression tree and the whitelist tables that give it meaning.
//!
//! Names from the source are resolved into [`Constant`] and [`Function`]
//! while parsing; nothing outside these enums can appear in a tree.

use std::f64::consts;

/// Parsed expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Constant(Constant),
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BinOp {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Pos,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

/// Named constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    Pi,
    E,
}

impl Constant {
    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            "pi" => Some(Constant::Pi),
            "e" => Some(Constant::E),
            _ => None,
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Constant::Pi => consts::PI,
            Constant::E => consts::E,
        }
    }
}

/// Callable functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Sqrt,
    Log,
    Exp,
    Max,
    Min,
    Abs,
}

impl Function {
    pub fn lookup(name: &str) -> Option<Self> {
        let func = match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "sqrt" => Function::Sqrt,
            "log" => Function::Log,
            "exp" => Function::Exp,
            "max" => Function::Max,
            "min" => Function::Min,
            "abs" => Function::Abs,
            _ => return None,
        };
        Some(func)
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Sqrt => "sqrt",
            Function::Log => "log",
            Function::Exp => "exp",
            Function::Max => "max",
            Function::Min => "min",
            Function::Abs => "abs",
        }
    }
}
