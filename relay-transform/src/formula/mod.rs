//! Formula language for building outbound payloads.
//!
//! A formula is a single expression over the extracted fields. It can
//! build objects and arrays, read fields, concatenate and template strings,
//! branch and call a small set of pure built-ins. It cannot perform I/O,
//! read anything besides its fields, or run longer than its step budget.
//!
//! # Syntax
//!
//! ## Values
//! - Literals: `"text"`, `'text'`, `42`, `1.5`, `true`, `false`, `null`
//! - Fields: `msg` reads the field named `msg`; `fields` is every present
//!   field as an object, so `fields["odd key"]` also works
//! - Objects: `{ text: msg, "two words": 1, msg }` (the last is shorthand for `msg: msg`)
//! - Arrays: `[a, b, 1]`
//! - Templates: `` `From ${from}: ${msg}` ``
//!
//! ## Operators (lowest precedence first)
//! - `if c then a else b`, `c ? a : b`
//! - `||`, `&&` (return an operand, like JavaScript)
//! - `==`, `!=`
//! - `<`, `<=`, `>`, `>=`
//! - `+` (numbers add, strings concatenate, arrays join), `-`
//! - `*`, `/`, `%`
//! - `!`, unary `-`
//! - `.name`, `[index]`
//!
//! ## Absent fields
//! A field whose path matched nothing is *absent*. It renders as `""` in
//! strings, equals `null`, is dropped from objects and becomes `null` in
//! arrays. A formula that evaluates to an absent value fails.
//!
//! ## Built-in functions
//! `exists`, `coalesce`, `default`, `upper`, `lower`, `trim`, `len`,
//! `string`, `number`, `join`, `contains`.
//!
//! # Example
//!
//! ```rust
//! use relay_transform::{ExtractedFields, Formula};
//!
//! let formula = Formula::parse(r#"{ text: "Message: " + msg }"#).unwrap();
//! let fields = ExtractedFields::new().with("msg", "hi");
//!
//! let payload = formula.evaluate(&fields, 10_000).unwrap();
//! assert_eq!(payload, serde_json::json!({"text": "Message: hi"}));
//! ```

mod ast;
mod evaluator;
mod functions;
mod lexer;
mod parser;

pub use ast::{BinaryOp, Expr, TemplatePart, UnaryOp};
pub use evaluator::{Budget, DEFAULT_STEP_BUDGET, Evaluator};
pub use functions::BUILTINS;
pub use lexer::{Lexer, Spanned, TemplateChunk, Token};
pub use parser::{MAX_DEPTH, Parser};

use crate::{ExtractedFields, TransformError};
use serde_json::Value;

/// A parsed formula and its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    /// Parse formula source
    pub fn parse(source: &str) -> Result<Self, TransformError> {
        let expr = Parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Evaluate against `fields` within `step_budget` steps
    pub fn evaluate(&self, fields: &ExtractedFields, step_budget: usize) -> Result<Value, TransformError> {
        let mut evaluator = Evaluator::new(fields, step_budget);
        Ok(evaluator.evaluate(&self.expr)?)
    }

    /// Fields read by name, sorted
    pub fn referenced_fields(&self) -> Vec<String> {
        self.expr.referenced_fields()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl std::str::FromStr for Formula {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
