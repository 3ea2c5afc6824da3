//! verdant-expr - Boolean expression engine for Verdant conditionals
//!
//! Conditional statements are written as templates over sub-condition
//! placeholders, e.g. `{3f2a} > 20 and {9b1c} < 50`. At evaluation time each
//! placeholder is replaced by the textual form of its resolved value and the
//! result is parsed and evaluated against a fixed grammar.
//!
//! # Grammar
//!
//! ```text
//! expr       := or_expr
//! or_expr    := and_expr ( ("or" | "||") and_expr )*
//! and_expr   := not_expr ( ("and" | "&&") not_expr )*
//! not_expr   := ("not" | "!") not_expr | comparison
//! comparison := unary ( cmp_op unary )*          (chained like `1 < x < 5`)
//! unary      := "-" unary | primary
//! primary    := NUMBER | "true" | "false" | "unknown" | "(" expr ")"
//! cmp_op     := "<" | "<=" | ">" | ">=" | "==" | "!="
//! ```
//!
//! There are no identifiers, function calls or statements. Anything outside
//! the grammar, including a placeholder that was never substituted, is an error.
//!
//! # Example
//!
//! ```rust
//! use verdant_expr::{evaluate_str, substitute};
//!
//! let rendered = substitute("{c1} > 20 and {c2} < 50", [("c1", "25"), ("c2", "40")]);
//! assert_eq!(rendered, "25 > 20 and 40 < 50");
//! assert_eq!(evaluate_str(&rendered), Ok(true));
//! ```

pub mod ast;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod template;

// Re-exports for convenience
pub use ast::{CompareOp, Expr, Value};
pub use error::{ExprError, Result};
pub use eval::{evaluate, evaluate_str};
pub use parser::parse;
pub use template::{check_placeholders, placeholders, substitute};
