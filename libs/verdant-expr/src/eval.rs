//! Interpreter for [`Expr`] trees

use crate::ast::{CompareOp, Expr, Value};
use crate::error::{ExprError, Result};
use crate::parser::parse;

/// Evaluate an expression tree to a value
///
/// `and`/`or` short-circuit: the right operand is not evaluated when the left
/// one already decides the result.
pub fn evaluate(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(*v),
        Expr::Neg(inner) => match evaluate(inner)? {
            Value::Number(n) => Ok(Value::Number(-n)),
            other => Err(ExprError::type_error(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        },
        Expr::Compare { op, lhs, rhs } => compare(*op, evaluate(lhs)?, evaluate(rhs)?),
        Expr::And(lhs, rhs) => {
            if !as_bool(evaluate(lhs)?, "and")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(as_bool(evaluate(rhs)?, "and")?))
        },
        Expr::Or(lhs, rhs) => {
            if as_bool(evaluate(lhs)?, "or")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(as_bool(evaluate(rhs)?, "or")?))
        },
        Expr::Not(inner) => Ok(Value::Bool(!as_bool(evaluate(inner)?, "not")?)),
    }
}

/// Parse and evaluate a rendered expression, requiring a boolean result
pub fn evaluate_str(source: &str) -> Result<bool> {
    let expr = parse(source)?;
    match evaluate(&expr)? {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::type_error(format!(
            "expression evaluated to {} '{}', expected bool",
            other.type_name(),
            other
        ))),
    }
}

fn as_bool(value: Value, operator: &str) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::type_error(format!(
            "'{}' expects bool operands, got {}",
            operator,
            other.type_name()
        ))),
    }
}

fn compare(op: CompareOp, lhs: Value, rhs: Value) -> Result<Value> {
    let result = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => match op {
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
        },
        (Value::Bool(a), Value::Bool(b)) if !op.is_ordering() => (a == b) == (op == CompareOp::Eq),
        // unknown only supports equality checks, e.g. `{c1} == unknown`
        (Value::Unknown, other) | (other, Value::Unknown) if !op.is_ordering() => {
            (other == Value::Unknown) == (op == CompareOp::Eq)
        },
        (a, b) => {
            return Err(ExprError::type_error(format!(
                "cannot compare {} {} {}",
                a.type_name(),
                op.symbol(),
                b.type_name()
            )))
        },
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_numeric_comparisons() {
        assert_eq!(evaluate_str("25 > 20 and 40 < 50"), Ok(true));
        assert_eq!(evaluate_str("25 >= 25"), Ok(true));
        assert_eq!(evaluate_str("25 <= 24.9"), Ok(false));
        assert_eq!(evaluate_str("0.1 == 0.1"), Ok(true));
        assert_eq!(evaluate_str("-3.5 < -3"), Ok(true));
        assert_eq!(evaluate_str("1 != 2"), Ok(true));
    }

    #[test]
    fn test_equality_is_exact() {
        assert_eq!(evaluate_str("1e-17 == 2e-17"), Ok(false));
        assert_eq!(evaluate_str("1e-17 != 2e-17"), Ok(true));
        assert_eq!(evaluate_str("0.30000000000000004 == 0.3"), Ok(false));
        assert_eq!(evaluate_str("21.5 == 21.5"), Ok(true));
    }

    #[test]
    fn test_boolean_logic() {
        assert_eq!(evaluate_str("true"), Ok(true));
        assert_eq!(evaluate_str("not false"), Ok(true));
        assert_eq!(evaluate_str("true and false"), Ok(false));
        assert_eq!(evaluate_str("false or (1 < 2)"), Ok(true));
        assert_eq!(evaluate_str("true == false"), Ok(false));
        assert_eq!(evaluate_str("!(true && false)"), Ok(true));
    }

    #[test]
    fn test_chained_comparison_semantics() {
        assert_eq!(evaluate_str("10 < 15 < 20"), Ok(true));
        assert_eq!(evaluate_str("10 < 25 < 20"), Ok(false));
    }

    #[test]
    fn test_unknown_equality() {
        assert_eq!(evaluate_str("unknown == unknown"), Ok(true));
        assert_eq!(evaluate_str("unknown != 4"), Ok(true));
        assert_eq!(evaluate_str("4 == unknown"), Ok(false));
    }

    #[test]
    fn test_unknown_in_ordering_is_type_error() {
        assert!(matches!(
            evaluate_str("unknown > 20"),
            Err(ExprError::Type(_))
        ));
        assert!(matches!(
            evaluate_str("unknown and true"),
            Err(ExprError::Type(_))
        ));
    }

    #[test]
    fn test_short_circuit_skips_right_operand() {
        assert_eq!(evaluate_str("false and unknown > 3"), Ok(false));
        assert_eq!(evaluate_str("true or unknown > 3"), Ok(true));
        assert!(evaluate_str("true and unknown > 3").is_err());
    }

    #[test]
    fn test_type_mismatches() {
        assert!(matches!(evaluate_str("1 and true"), Err(ExprError::Type(_))));
        assert!(matches!(evaluate_str("true > false"), Err(ExprError::Type(_))));
        assert!(matches!(evaluate_str("true == 1"), Err(ExprError::Type(_))));
        assert!(matches!(evaluate_str("-true"), Err(ExprError::Type(_))));
    }

    #[test]
    fn test_non_boolean_result_is_error() {
        let err = evaluate_str("25").unwrap_err();
        assert!(err.to_string().contains("expected bool"));
        assert!(evaluate_str("unknown").is_err());
    }

    #[test]
    fn test_unresolved_placeholder_is_error() {
        assert_eq!(
            evaluate_str("25 > 20 and {c2} < 50"),
            Err(ExprError::UnresolvedPlaceholder("c2".to_string()))
        );
    }
}
