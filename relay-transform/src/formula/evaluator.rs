//! Evaluates parsed formulas against extracted fields.
//!
//! Values are `Option<Value>`: `None` is an absent field, distinct from a
//! JSON `null`. The only inputs are the fields and literals in the formula;
//! nothing here touches the clock, the environment, files or the network.

use super::ast::{BinaryOp, Expr, TemplatePart, UnaryOp};
use super::functions;
use crate::{EvalError, ExtractedFields};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Steps allowed per evaluation unless configured otherwise
pub const DEFAULT_STEP_BUDGET: usize = 10_000;

/// Bytes of copied or produced data that cost one extra step
pub const BYTES_PER_STEP: usize = 1024;

/// Largest integer representable exactly as an f64
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Counts evaluation work against a fixed limit.
///
/// Besides one step per node, every value copied out of the fields and
/// every string built costs one step per [`BYTES_PER_STEP`], so the limit
/// bounds the size of the output as well as the time spent.
#[derive(Debug, Clone)]
pub struct Budget {
    used: usize,
    limit: usize,
    bytes: usize,
    byte_steps: usize,
}

impl Budget {
    pub fn new(limit: usize) -> Self {
        Self {
            used: 0,
            limit,
            bytes: 0,
            byte_steps: 0,
        }
    }

    /// Account for `bytes` of copied or produced data
    pub fn charge_bytes(&mut self, bytes: usize) -> Result<(), EvalError> {
        self.bytes = self.bytes.saturating_add(bytes);
        let due = self.bytes / BYTES_PER_STEP;
        if due > self.byte_steps {
            let steps = due - self.byte_steps;
            self.byte_steps = due;
            self.tick(steps)?;
        }
        Ok(())
    }

    /// Account for a copy of `value`
    pub fn charge_value(&mut self, value: &Value) -> Result<(), EvalError> {
        self.charge_bytes(approximate_size(value))
    }

    /// Spend `steps`, failing once the limit is passed
    pub fn tick(&mut self, steps: usize) -> Result<(), EvalError> {
        self.used = self.used.saturating_add(steps);
        if self.used > self.limit {
            return Err(EvalError::BudgetExceeded(self.limit));
        }
        Ok(())
    }

    pub fn used(&self) -> usize {
        self.used
    }
}

/// Walks an [`Expr`] tree.
pub struct Evaluator<'a> {
    fields: &'a ExtractedFields,
    budget: Budget,
}

impl<'a> Evaluator<'a> {
    pub fn new(fields: &'a ExtractedFields, step_budget: usize) -> Self {
        Self {
            fields,
            budget: Budget::new(step_budget),
        }
    }

    /// Evaluate to a JSON value. An absent result is an error.
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        self.eval(expr)?
            .ok_or_else(|| EvalError::NotSerializable("formula produced no value".to_string()))
    }

    /// Steps spent so far
    pub fn steps_used(&self) -> usize {
        self.budget.used()
    }

    fn eval(&mut self, expr: &Expr) -> Result<Option<Value>, EvalError> {
        self.budget.tick(1)?;

        match expr {
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::Field(name) => match self.fields.get(name) {
                Some(value) => {
                    self.budget.charge_value(value)?;
                    Ok(Some(value.clone()))
                }
                None => Ok(None),
            },
            Expr::Fields => {
                self.budget.tick(self.fields.len())?;
                let object = self.fields.to_object();
                self.budget.charge_value(&object)?;
                Ok(Some(object))
            }
            Expr::Member(target, name) => Ok(self.eval(target)?.and_then(|v| member(v, name))),
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                Ok(index_value(target, index))
            }
            Expr::Call(name, args) => {
                let function =
                    functions::lookup(name).ok_or_else(|| EvalError::UnknownFunction(name.clone()))?;
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                function(&values, &mut self.budget)
            }
            Expr::Object(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    if let Some(value) = self.eval(value)? {
                        map.insert(key.clone(), value);
                    }
                }
                Ok(Some(Value::Object(map)))
            }
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?.unwrap_or(Value::Null));
                }
                Ok(Some(Value::Array(values)))
            }
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => {
                            self.budget.charge_bytes(text.len())?;
                            out.push_str(text);
                        }
                        TemplatePart::Expr(expr) => {
                            let value = self.eval(expr)?;
                            let chunk = to_text(value.as_ref());
                            self.budget.charge_bytes(chunk.len())?;
                            out.push_str(&chunk);
                        }
                    }
                }
                Ok(Some(Value::String(out)))
            }
            Expr::Unary(UnaryOp::Not, operand) => {
                let value = self.eval(operand)?;
                Ok(Some(Value::Bool(!truthy(value.as_ref()))))
            }
            Expr::Unary(UnaryOp::Negate, operand) => match self.eval(operand)? {
                Some(Value::Number(n)) => number_result(-as_f64(&n)),
                other => Err(EvalError::type_error(
                    "-",
                    format!("cannot negate {}", type_name(other.as_ref())),
                )),
            },
            Expr::Binary(BinaryOp::And, left, right) => {
                let left = self.eval(left)?;
                if truthy(left.as_ref()) {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                let left = self.eval(left)?;
                if truthy(left.as_ref()) {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.eval(condition)?;
                if truthy(condition.as_ref()) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        left: Option<Value>,
        right: Option<Value>,
    ) -> Result<Option<Value>, EvalError> {
        match op {
            BinaryOp::Add => self.add(left, right),
            BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Remainder => {
                let (Some(Value::Number(a)), Some(Value::Number(b))) = (&left, &right) else {
                    return Err(EvalError::type_error(
                        op.to_string(),
                        format!(
                            "expected numbers, got {} and {}",
                            type_name(left.as_ref()),
                            type_name(right.as_ref())
                        ),
                    ));
                };
                let (a, b) = (as_f64(a), as_f64(b));
                number_result(match op {
                    BinaryOp::Subtract => a - b,
                    BinaryOp::Multiply => a * b,
                    BinaryOp::Divide => a / b,
                    _ => a % b,
                })
            }
            BinaryOp::Equal => Ok(Some(Value::Bool(loose_eq(left.as_ref(), right.as_ref())))),
            BinaryOp::NotEqual => Ok(Some(Value::Bool(!loose_eq(left.as_ref(), right.as_ref())))),
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                let ordering = compare(left.as_ref(), right.as_ref());
                let result = match op {
                    BinaryOp::Less => ordering == Some(Ordering::Less),
                    BinaryOp::LessEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                    BinaryOp::Greater => ordering == Some(Ordering::Greater),
                    _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                };
                Ok(Some(Value::Bool(result)))
            }
            BinaryOp::And if truthy(left.as_ref()) => Ok(right),
            BinaryOp::Or if !truthy(left.as_ref()) => Ok(right),
            BinaryOp::And | BinaryOp::Or => Ok(left),
        }
    }

    fn add(&mut self, left: Option<Value>, right: Option<Value>) -> Result<Option<Value>, EvalError> {
        match (left, right) {
            (Some(Value::Number(a)), Some(Value::Number(b))) => number_result(as_f64(&a) + as_f64(&b)),
            (Some(Value::Array(mut a)), Some(Value::Array(b))) => {
                self.budget.tick(a.len() + b.len())?;
                a.extend(b);
                Ok(Some(Value::Array(a)))
            }
            (left, right)
                if is_textual(left.as_ref()) || is_textual(right.as_ref()) =>
            {
                let mut text = to_text(left.as_ref());
                text.push_str(&to_text(right.as_ref()));
                self.budget.charge_bytes(text.len())?;
                Ok(Some(Value::String(text)))
            }
            (left, right) => Err(EvalError::type_error(
                "+",
                format!(
                    "cannot add {} and {}",
                    type_name(left.as_ref()),
                    type_name(right.as_ref())
                ),
            )),
        }
    }
}

/// Convert an f64 into a JSON number, integral values as integers
pub(crate) fn number_value(n: f64) -> Option<Value> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER {
        return Some(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n).map(Value::Number)
}

fn number_result(n: f64) -> Result<Option<Value>, EvalError> {
    number_value(n)
        .map(Some)
        .ok_or_else(|| EvalError::NotSerializable(format!("non-finite number {n}")))
}

fn as_f64(n: &serde_json::Number) -> f64 {
    n.as_f64().unwrap_or(f64::NAN)
}

fn is_textual(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::String(_)))
}

fn member(target: Value, name: &str) -> Option<Value> {
    match target {
        Value::Object(mut map) => map.remove(name),
        Value::Array(items) if name == "length" => Some(Value::from(items.len())),
        Value::String(s) if name == "length" => Some(Value::from(s.chars().count())),
        _ => None,
    }
}

fn index_value(target: Option<Value>, index: Option<Value>) -> Option<Value> {
    match (target?, index?) {
        (Value::Object(mut map), Value::String(key)) => map.remove(&key),
        (Value::Array(mut items), Value::Number(n)) => {
            let i = array_index(&n, items.len())?;
            Some(items.swap_remove(i))
        }
        (Value::String(s), Value::Number(n)) => {
            let i = array_index(&n, usize::MAX)?;
            s.chars().nth(i).map(|c| Value::String(c.to_string()))
        }
        (target @ (Value::Array(_) | Value::String(_)), Value::String(key)) => member(target, &key),
        _ => None,
    }
}

fn array_index(n: &serde_json::Number, len: usize) -> Option<usize> {
    let i = n.as_u64().and_then(|i| usize::try_from(i).ok())?;
    (i < len).then_some(i)
}

/// Rough heap footprint of a value, in bytes
pub(crate) fn approximate_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => 8,
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(approximate_size).sum::<usize>() + 8,
        Value::Object(map) => {
            map.iter()
                .map(|(key, value)| key.len() + approximate_size(value))
                .sum::<usize>()
                + 8
        }
    }
}

/// JavaScript-style truthiness; absent is falsy
pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Equality with absent treated as null and numbers compared by value
pub(crate) fn loose_eq(a: Option<&Value>, b: Option<&Value>) -> bool {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Option<Ordering> {
    match (a?, b?) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Text used for concatenation and templates
pub(crate) fn to_text(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => format_number(n),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(element_text)
            .collect::<Vec<_>>()
            .join(","),
        Some(object @ Value::Object(_)) => object.to_string(),
    }
}

/// Array elements render `null` as empty text
pub(crate) fn element_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => to_text(Some(other)),
    }
}

fn format_number(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER => {
            (f as i64).to_string()
        }
        _ => n.to_string(),
    }
}

pub(crate) fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "absent",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}
