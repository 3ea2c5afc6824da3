//! Recursive descent parser producing an [`Expr`] tree

use crate::ast::{CompareOp, Expr, Value};
use crate::error::{ExprError, Result};
use crate::lexer::{tokenize, Token, TokenKind};

/// Maximum nesting depth accepted by the parser
const MAX_DEPTH: usize = 64;

/// Maximum number of tokens in one expression, bounding the size of the tree
pub const MAX_TOKENS: usize = 512;

pub struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            cursor: 0,
            depth: 0,
        }
    }

    /// Parse a complete expression, rejecting trailing input
    pub fn parse(mut self) -> Result<Expr> {
        let significant = self
            .tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .count();
        if significant > MAX_TOKENS {
            let position = self.tokens.get(MAX_TOKENS).map_or(0, |t| t.position);
            return Err(ExprError::syntax(
                position,
                format!("expression too long (more than {} tokens)", MAX_TOKENS),
            ));
        }

        let expr = self.parse_or()?;
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            return Err(ExprError::syntax(
                token.position,
                format!("unexpected {}", describe(token.kind)),
            ));
        }
        Ok(expr)
    }

    fn peek(&self) -> Token {
        // tokenize() always terminates the stream with Eof
        self.tokens
            .get(self.cursor)
            .or_else(|| self.tokens.last())
            .copied()
            .unwrap_or(Token {
                kind: TokenKind::Eof,
                position: 0,
            })
    }

    fn advance(&mut self) -> Token {
        let token = self.peek();
        if self.cursor < self.tokens.len() {
            self.cursor += 1;
        }
        token
    }

    fn enter(&mut self, position: usize) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::syntax(position, "expression nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek().kind == TokenKind::Or {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::or(lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while self.peek().kind == TokenKind::And {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::and(lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        let token = self.peek();
        if token.kind == TokenKind::Not {
            self.advance();
            self.enter(token.position)?;
            let inner = self.parse_not();
            self.leave();
            return Ok(Expr::not(inner?));
        }
        self.parse_comparison()
    }

    /// `a < b < c` is read as `a < b and b < c`
    fn parse_comparison(&mut self) -> Result<Expr> {
        let first = self.parse_unary()?;
        let mut operands = vec![first];
        let mut ops = Vec::new();

        while let Some(op) = compare_op(self.peek().kind) {
            self.advance();
            ops.push(op);
            operands.push(self.parse_unary()?);
        }

        if ops.is_empty() {
            return Ok(operands.remove(0));
        }

        let mut chain: Option<Expr> = None;
        for (i, op) in ops.into_iter().enumerate() {
            let link = Expr::compare(op, operands[i].clone(), operands[i + 1].clone());
            chain = Some(match chain {
                Some(prev) => Expr::and(prev, link),
                None => link,
            });
        }
        chain.ok_or_else(|| ExprError::syntax(0, "empty comparison"))
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let token = self.peek();
        if token.kind == TokenKind::Minus {
            self.advance();
            self.enter(token.position)?;
            let inner = self.parse_unary();
            self.leave();
            return Ok(match inner? {
                Expr::Literal(Value::Number(n)) => Expr::number(-n),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::number(n)),
            TokenKind::True => Ok(Expr::boolean(true)),
            TokenKind::False => Ok(Expr::boolean(false)),
            TokenKind::Unknown => Ok(Expr::Literal(Value::Unknown)),
            TokenKind::LParen => {
                self.enter(token.position)?;
                let inner = self.parse_or();
                self.leave();
                let inner = inner?;
                let close = self.advance();
                if close.kind != TokenKind::RParen {
                    return Err(ExprError::syntax(
                        close.position,
                        format!("expected ')', found {}", describe(close.kind)),
                    ));
                }
                Ok(inner)
            },
            other => Err(ExprError::syntax(
                token.position,
                format!("expected a value, found {}", describe(other)),
            )),
        }
    }
}

fn compare_op(kind: TokenKind) -> Option<CompareOp> {
    match kind {
        TokenKind::Lt => Some(CompareOp::Lt),
        TokenKind::Le => Some(CompareOp::Le),
        TokenKind::Gt => Some(CompareOp::Gt),
        TokenKind::Ge => Some(CompareOp::Ge),
        TokenKind::Eq => Some(CompareOp::Eq),
        TokenKind::Ne => Some(CompareOp::Ne),
        _ => None,
    }
}

fn describe(kind: TokenKind) -> String {
    match kind {
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::True => "'true'".to_string(),
        TokenKind::False => "'false'".to_string(),
        TokenKind::Unknown => "'unknown'".to_string(),
        TokenKind::And => "'and'".to_string(),
        TokenKind::Or => "'or'".to_string(),
        TokenKind::Not => "'not'".to_string(),
        TokenKind::Minus => "'-'".to_string(),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::Eof => "end of input".to_string(),
        op => match compare_op(op) {
            Some(op) => format!("'{}'", op.symbol()),
            None => format!("{:?}", op),
        },
    }
}

/// Parse a rendered expression into a syntax tree
pub fn parse(source: &str) -> Result<Expr> {
    Parser::new(tokenize(source)?).parse()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let expr = parse("true or false and false").unwrap();
        assert_eq!(
            expr,
            Expr::or(
                Expr::boolean(true),
                Expr::and(Expr::boolean(false), Expr::boolean(false))
            )
        );
    }

    #[test]
    fn test_not_binds_looser_than_comparison() {
        let expr = parse("not 1 > 2").unwrap();
        assert_eq!(
            expr,
            Expr::not(Expr::compare(
                CompareOp::Gt,
                Expr::number(1.0),
                Expr::number(2.0)
            ))
        );
    }

    #[test]
    fn test_chained_comparison() {
        let expr = parse("1 < 5 <= 9").unwrap();
        assert_eq!(
            expr,
            Expr::and(
                Expr::compare(CompareOp::Lt, Expr::number(1.0), Expr::number(5.0)),
                Expr::compare(CompareOp::Le, Expr::number(5.0), Expr::number(9.0))
            )
        );
    }

    #[test]
    fn test_negative_literals_fold() {
        assert_eq!(parse("-3.5").unwrap(), Expr::number(-3.5));
        assert_eq!(parse("--2").unwrap(), Expr::number(2.0));
        assert_eq!(
            parse("-(1)").unwrap(),
            Expr::number(-1.0),
            "parenthesized literal still folds"
        );
        assert_eq!(
            parse("-true").unwrap(),
            Expr::Neg(Box::new(Expr::boolean(true)))
        );
    }

    #[test]
    fn test_parentheses() {
        let expr = parse("(true or false) and false").unwrap();
        assert_eq!(
            expr,
            Expr::and(
                Expr::or(Expr::boolean(true), Expr::boolean(false)),
                Expr::boolean(false)
            )
        );
    }

    #[test]
    fn test_syntax_errors() {
        for source in ["", "1 >", "(1 > 2", "1 > 2)", "and", "1 2", "not"] {
            assert!(
                matches!(parse(source), Err(ExprError::Syntax { .. })),
                "expected syntax error for {:?}",
                source
            );
        }
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}true{}", "(".repeat(200), ")".repeat(200));
        let err = parse(&deep).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));

        let not_chain = format!("{}true", "not ".repeat(200));
        assert!(parse(&not_chain).is_err());
    }

    #[test]
    fn test_long_chains_rejected() {
        let terms = vec!["true"; 200_000];
        let err = parse(&terms.join(" and ")).unwrap_err();
        assert!(err.to_string().contains("expression too long"));
        assert!(parse(&terms.join(" or ")).is_err());

        let compares = vec!["1"; 200_000].join(" < ");
        assert!(parse(&compares).is_err());
    }

    #[test]
    fn test_chain_within_token_limit() {
        let terms = vec!["true"; 100].join(" and ");
        let expr = parse(&terms).unwrap();
        assert_eq!(crate::eval::evaluate(&expr).unwrap(), Value::Bool(true));

        // 256 operands and 255 operators
        let at_limit = vec!["1"; 256].join(" <= ");
        assert!(parse(&at_limit).is_ok());
    }
}
