//! Recursive-descent parser.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '//' | '%') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary ('**' unary)?
//! primary := NUMBER | NAME | NAME '(' [expr (',' expr)*] ')' | '(' expr ')'
//! ```
//!
//! `**` binds tighter than a unary sign on its left and is right-associative,
//! so `-2**2` is `-(2**2)` and `2**-1` is `2**(-1)`.

use super::ast::{BinOp, Constant, Expr, Function, UnaryOp};
use super::lexer::{Lexer, Token, TokenKind};
use super::{EvalError, MAX_DEPTH};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Result<Self, EvalError> {
        let mut lexer = Lexer::new(src);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            depth: 0,
        })
    }

    /// Parse a complete expression; trailing input is an error.
    pub fn parse(mut self) -> Result<Expr, EvalError> {
        if self.current.kind == TokenKind::Eof {
            return Err(EvalError::Syntax {
                position: 0,
                message: "empty expression".to_string(),
            });
        }
        let expr = self.expr()?;
        if self.current.kind != TokenKind::Eof {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    fn advance(&mut self) -> Result<Token, EvalError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), EvalError> {
        if self.current.kind == kind {
            self.advance()?;
            Ok(())
        } else {
            Err(EvalError::Syntax {
                position: self.current.position,
                message: format!(
                    "expected {}, found {}",
                    kind.describe(),
                    self.current.kind.describe()
                ),
            })
        }
    }

    fn unexpected(&self) -> EvalError {
        EvalError::Syntax {
            position: self.current.position,
            message: format!("unexpected {}", self.current.kind.describe()),
        }
    }

    fn enter(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::TooComplex(format!(
                "nesting deeper than {MAX_DEPTH} levels"
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expr(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance()?;
            let rhs = self.term()?;
            lhs = Expr::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.advance()?;
            let rhs = self.unary()?;
            lhs = Expr::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.current.kind {
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.power(),
        };
        self.advance()?;
        self.enter()?;
        let operand = self.unary()?;
        self.leave();
        Ok(Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr, EvalError> {
        let base = self.primary()?;
        if self.current.kind != TokenKind::DoubleStar {
            return Ok(base);
        }
        self.advance()?;
        self.enter()?;
        let exponent = self.unary()?;
        self.leave();
        Ok(Expr::BinOp {
            op: BinOp::Pow,
            lhs: Box::new(base),
            rhs: Box::new(exponent),
        })
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.current.kind.clone() {
            TokenKind::Number(value) => {
                self.advance()?;
                Ok(Expr::Literal(value))
            }
            TokenKind::Ident(name) => {
                self.advance()?;
                if self.current.kind == TokenKind::LParen {
                    let func =
                        Function::lookup(&name).ok_or(EvalError::UnknownFunction(name))?;
                    self.call(func)
                } else {
                    Constant::lookup(&name)
                        .map(Expr::Constant)
                        .ok_or(EvalError::UnknownSymbol(name))
                }
            }
            TokenKind::LParen => {
                self.advance()?;
                self.enter()?;
                let inner = self.expr()?;
                self.leave();
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn call(&mut self, func: Function) -> Result<Expr, EvalError> {
        self.expect(TokenKind::LParen)?;
        self.enter()?;
        let mut args = Vec::new();
        if self.current.kind != TokenKind::RParen {
            loop {
                args.push(self.expr()?);
                if self.current.kind != TokenKind::Comma {
                    break;
                }
                self.advance()?;
            }
        }
        self.leave();
        self.expect(TokenKind::RParen)?;
        Ok(Expr::Call { func, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<Expr, EvalError> {
        Parser::new(src)?.parse()
    }

    fn lit(v: f64) -> Box<Expr> {
        Box::new(Expr::Literal(v))
    }

    #[test]
    fn test_precedence_mul_over_add() {
        assert_eq!(
            parse("1 + 2 * 3").unwrap(),
            Expr::BinOp {
                op: BinOp::Add,
                lhs: lit(1.0),
                rhs: Box::new(Expr::BinOp {
                    op: BinOp::Mul,
                    lhs: lit(2.0),
                    rhs: lit(3.0),
                }),
            }
        );
    }

    #[test]
    fn test_power_binds_tighter_than_leading_minus() {
        assert_eq!(
            parse("-2**2").unwrap(),
            Expr::UnaryOp {
                op: UnaryOp::Neg,
                operand: Box::new(Expr::BinOp {
                    op: BinOp::Pow,
                    lhs: lit(2.0),
                    rhs: lit(2.0),
                }),
            }
        );
    }

    #[test]
    fn test_power_is_right_associative() {
        assert_eq!(
            parse("2**3**2").unwrap(),
            Expr::BinOp {
                op: BinOp::Pow,
                lhs: lit(2.0),
                rhs: Box::new(Expr::BinOp {
                    op: BinOp::Pow,
                    lhs: lit(3.0),
                    rhs: lit(2.0),
                }),
            }
        );
    }

    #[test]
    fn test_call_with_arguments() {
        assert_eq!(
            parse("max(1, pi)").unwrap(),
            Expr::Call {
                func: Function::Max,
                args: vec![Expr::Literal(1.0), Expr::Constant(Constant::Pi)],
            }
        );
        assert_eq!(
            parse("max()").unwrap(),
            Expr::Call {
                func: Function::Max,
                args: vec![],
            }
        );
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(
            parse("__import__('os')").unwrap_err(),
            EvalError::UnknownFunction("__import__".into())
        );
        assert_eq!(parse("x + 1").unwrap_err(), EvalError::UnknownSymbol("x".into()));
        assert_eq!(
            parse("1 + os").unwrap_err(),
            EvalError::UnknownSymbol("os".into())
        );
    }

    #[test]
    fn test_rejected_syntax() {
        for src in [
            "", "1 +", "(1", "1)", "1 2", "a = 1", "1 < 2", "[1]", "\"s\"", "x[0]", "2e", "sin 1",
            "max(1,)", "math.pi",
        ] {
            assert!(parse(src).is_err(), "{src:?} should be rejected");
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert!(matches!(parse(&deep), Err(EvalError::TooComplex(_))));

        let ok = format!("{}1{}", "(".repeat(MAX_DEPTH - 1), ")".repeat(MAX_DEPTH - 1));
        assert_eq!(parse(&ok).unwrap(), Expr::Literal(1.0));

        let minus = format!("{}1", "-".repeat(MAX_DEPTH + 1));
        assert!(matches!(parse(&minus), Err(EvalError::TooComplex(_))));
    }
}
