//! Tree-walking evaluator.
//!
//! Operators and functions are applied through exhaustive matches on the
//! whitelist enums in [`super::ast`]; there is no other way to reach code.

use super::ast::{BinOp, Expr, Function, UnaryOp};
use super::EvalError;

/// Evaluate a parsed tree. Intermediate values may be infinite; callers
/// decide whether the final value is acceptable.
pub fn eval(expr: &Expr) -> Result<f64, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(*value),
        Expr::Constant(constant) => Ok(constant.value()),
        Expr::UnaryOp { op, operand } => {
            let value = eval(operand)?;
            Ok(match op {
                UnaryOp::Pos => value,
                UnaryOp::Neg => -value,
            })
        }
        Expr::BinOp { op, lhs, rhs } => apply_binary(*op, eval(lhs)?, eval(rhs)?),
        Expr::Call { func, args } => {
            let values = args.iter().map(eval).collect::<Result<Vec<_>, _>>()?;
            apply_function(*func, &values)
        }
    }
}

fn apply_binary(op: BinOp, a: f64, b: f64) -> Result<f64, EvalError> {
    match op {
        BinOp::Add => Ok(a + b),
        BinOp::Sub => Ok(a - b),
        BinOp::Mul => Ok(a * b),
        BinOp::Div => {
            nonzero_divisor(b)?;
            Ok(a / b)
        }
        BinOp::FloorDiv => {
            nonzero_divisor(b)?;
            Ok(floor_divmod(a, b).0)
        }
        BinOp::Mod => {
            nonzero_divisor(b)?;
            Ok(floor_divmod(a, b).1)
        }
        BinOp::Pow => power(a, b),
    }
}

/// Floor quotient and remainder with the remainder taking the divisor's sign.
///
/// Both come from the same `fmod`, so `b * q + r == a` up to rounding even
/// when the operands are fractional. `b` must be non-zero.
fn floor_divmod(a: f64, b: f64) -> (f64, f64) {
    let mut rem = a % b;
    let mut div = (a - rem) / b;
    if rem != 0.0 {
        if (b < 0.0) != (rem < 0.0) {
            rem += b;
            div -= 1.0;
        }
    } else {
        rem = 0.0_f64.copysign(b);
    }

    let quotient = if div != 0.0 {
        let floored = div.floor();
        if div - floored > 0.5 {
            floored + 1.0
        } else {
            floored
        }
    } else {
        0.0_f64.copysign(a / b)
    };
    (quotient, rem)
}

fn nonzero_divisor(b: f64) -> Result<(), EvalError> {
    if b == 0.0 {
        Err(EvalError::DivisionByZero)
    } else {
        Ok(())
    }
}

fn power(base: f64, exponent: f64) -> Result<f64, EvalError> {
    if base == 0.0 && exponent < 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    if base < 0.0 && exponent.is_finite() && exponent.fract() != 0.0 {
        return Err(EvalError::Domain(
            "negative number raised to a fractional power".to_string(),
        ));
    }
    Ok(base.powf(exponent))
}

fn apply_function(func: Function, args: &[f64]) -> Result<f64, EvalError> {
    match func {
        Function::Sin => unary_arg(func, args).map(f64::sin),
        Function::Cos => unary_arg(func, args).map(f64::cos),
        Function::Tan => unary_arg(func, args).map(f64::tan),
        Function::Exp => unary_arg(func, args).map(f64::exp),
        Function::Abs => unary_arg(func, args).map(f64::abs),
        Function::Sqrt => {
            let x = unary_arg(func, args)?;
            if x < 0.0 {
                return Err(EvalError::Domain("sqrt of a negative number".to_string()));
            }
            Ok(x.sqrt())
        }
        Function::Log => log(args),
        Function::Max => fold_extreme(func, args, f64::max),
        Function::Min => fold_extreme(func, args, f64::min),
    }
}

fn unary_arg(func: Function, args: &[f64]) -> Result<f64, EvalError> {
    match args {
        [x] => Ok(*x),
        _ => Err(EvalError::Arity {
            function: func.name(),
            expected: "exactly 1",
            got: args.len(),
        }),
    }
}

fn log(args: &[f64]) -> Result<f64, EvalError> {
    let (x, base) = match args {
        [x] => (*x, None),
        [x, base] => (*x, Some(*base)),
        _ => {
            return Err(EvalError::Arity {
                function: Function::Log.name(),
                expected: "1 or 2",
                got: args.len(),
            })
        }
    };
    if x <= 0.0 {
        return Err(EvalError::Domain("log of a non-positive number".to_string()));
    }
    match base {
        None => Ok(x.ln()),
        Some(base) if base <= 0.0 => Err(EvalError::Domain(
            "log with a non-positive base".to_string(),
        )),
        Some(base) if base == 1.0 => Err(EvalError::DivisionByZero),
        Some(base) => Ok(x.ln() / base.ln()),
    }
}

fn fold_extreme(func: Function, args: &[f64], pick: fn(f64, f64) -> f64) -> Result<f64, EvalError> {
    let (first, rest) = args.split_first().ok_or(EvalError::Arity {
        function: func.name(),
        expected: "at least 1",
        got: 0,
    })?;
    Ok(rest.iter().copied().fold(*first, pick))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_div_and_mod_follow_divisor_sign() {
        assert_eq!(apply_binary(BinOp::FloorDiv, 7.0, 2.0).unwrap(), 3.0);
        assert_eq!(apply_binary(BinOp::FloorDiv, -7.0, 2.0).unwrap(), -4.0);
        assert_eq!(apply_binary(BinOp::Mod, -7.0, 2.0).unwrap(), 1.0);
        assert_eq!(apply_binary(BinOp::Mod, 7.0, -2.0).unwrap(), -1.0);
        assert_eq!(apply_binary(BinOp::Mod, 6.0, 3.0).unwrap(), 0.0);
    }

    #[test]
    fn test_floor_div_with_fractional_operands() {
        assert_eq!(apply_binary(BinOp::FloorDiv, 1.0, 0.1).unwrap(), 9.0);
        assert_eq!(apply_binary(BinOp::FloorDiv, 7.5, 0.1).unwrap(), 74.0);
        assert_eq!(apply_binary(BinOp::FloorDiv, -1.0, 0.1).unwrap(), -10.0);

        for (a, b) in [(1.0, 0.1), (7.5, 0.1), (-1.0, 0.1), (5.3, -0.7), (0.3, 0.1)] {
            let q = apply_binary(BinOp::FloorDiv, a, b).unwrap();
            let r = apply_binary(BinOp::Mod, a, b).unwrap();
            assert!((b * q + r - a).abs() < 1e-9, "{a} // {b} = {q}, {a} % {b} = {r}");
            assert!(r == 0.0 || (r < 0.0) == (b < 0.0));
        }
    }

    #[test]
    fn test_zero_divisors() {
        for op in [BinOp::Div, BinOp::FloorDiv, BinOp::Mod] {
            assert_eq!(apply_binary(op, 1.0, 0.0), Err(EvalError::DivisionByZero));
        }
        assert_eq!(power(0.0, -1.0), Err(EvalError::DivisionByZero));
        assert_eq!(power(0.0, 0.0).unwrap(), 1.0);
    }

    #[test]
    fn test_negative_base_powers() {
        assert_eq!(power(-2.0, 3.0).unwrap(), -8.0);
        assert!(matches!(power(-8.0, 1.0 / 3.0), Err(EvalError::Domain(_))));
    }

    #[test]
    fn test_function_arity() {
        assert!(matches!(
            apply_function(Function::Sin, &[]),
            Err(EvalError::Arity { got: 0, .. })
        ));
        assert!(matches!(
            apply_function(Function::Abs, &[1.0, 2.0]),
            Err(EvalError::Arity { got: 2, .. })
        ));
        assert!(matches!(
            apply_function(Function::Log, &[1.0, 2.0, 3.0]),
            Err(EvalError::Arity { got: 3, .. })
        ));
        assert!(matches!(
            apply_function(Function::Max, &[]),
            Err(EvalError::Arity { got: 0, .. })
        ));
    }

    #[test]
    fn test_max_min() {
        assert_eq!(apply_function(Function::Max, &[1.0, 5.0, -2.0]).unwrap(), 5.0);
        assert_eq!(apply_function(Function::Min, &[1.0, 5.0, -2.0]).unwrap(), -2.0);
        assert_eq!(apply_function(Function::Max, &[4.0]).unwrap(), 4.0);
    }

    #[test]
    fn test_log_bases() {
        assert!((apply_function(Function::Log, &[8.0, 2.0]).unwrap() - 3.0).abs() < 1e-12);
        assert!(matches!(
            apply_function(Function::Log, &[0.0]),
            Err(EvalError::Domain(_))
        ));
        assert!(matches!(
            apply_function(Function::Log, &[8.0, -2.0]),
            Err(EvalError::Domain(_))
        ));
        assert_eq!(
            apply_function(Function::Log, &[8.0, 1.0]),
            Err(EvalError::DivisionByZero)
        );
    }
}
