//! Syntax tree for formulas.

use serde_json::Value;
use std::collections::BTreeSet;

/// A formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A JSON literal
    Literal(Value),
    /// An extracted field by name
    Field(String),
    /// The whole extracted-fields mapping as an object
    Fields,
    /// `expr.name`
    Member(Box<Expr>, String),
    /// `expr[index]`
    Index(Box<Expr>, Box<Expr>),
    /// A call to a built-in function
    Call(String, Vec<Expr>),
    /// `{ key: expr, ... }` in source order
    Object(Vec<(String, Expr)>),
    /// `[expr, ...]`
    Array(Vec<Expr>),
    /// A backtick template
    Template(Vec<TemplatePart>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `if c then a else b` and `c ? a : b`
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// Piece of a template
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Remainder => "%",
        };
        f.write_str(symbol)
    }
}

impl Expr {
    /// Names of the fields this expression reads, sorted.
    ///
    /// A formula that uses `fields` reads everything; that is not reported
    /// here.
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        self.collect_fields(&mut names);
        names.into_iter().collect()
    }

    fn collect_fields(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) | Expr::Fields => {}
            Expr::Field(name) => {
                names.insert(name.clone());
            }
            Expr::Member(inner, _) | Expr::Unary(_, inner) => inner.collect_fields(names),
            Expr::Index(target, index) | Expr::Binary(_, target, index) => {
                target.collect_fields(names);
                index.collect_fields(names);
            }
            Expr::Call(_, args) | Expr::Array(args) => {
                args.iter().for_each(|a| a.collect_fields(names));
            }
            Expr::Object(entries) => {
                entries.iter().for_each(|(_, e)| e.collect_fields(names));
            }
            Expr::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Expr(e) = part {
                        e.collect_fields(names);
                    }
                }
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_fields(names);
                then.collect_fields(names);
                otherwise.collect_fields(names);
            }
        }
    }
}
