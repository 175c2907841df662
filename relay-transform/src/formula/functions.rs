//! Built-in functions available to formulas.
//!
//! Every function is pure: its result depends only on its arguments.
//! Calls to any other name fail with [`EvalError::UnknownFunction`].

use super::evaluator::{Budget, element_text, loose_eq, number_value, to_text, type_name};
use crate::EvalError;
use serde_json::Value;

pub(crate) type Builtin = fn(&[Option<Value>], &mut Budget) -> Result<Option<Value>, EvalError>;

/// Names of every built-in function
pub const BUILTINS: &[&str] = &[
    "exists", "coalesce", "default", "upper", "lower", "trim", "len", "string", "number", "join",
    "contains",
];

pub(crate) fn lookup(name: &str) -> Option<Builtin> {
    let function: Builtin = match name {
        "exists" => exists,
        "coalesce" => coalesce,
        "default" => default,
        "upper" => upper,
        "lower" => lower,
        "trim" => trim,
        "len" => len,
        "string" => string,
        "number" => number,
        "join" => join,
        "contains" => contains,
        _ => return None,
    };
    Some(function)
}

fn arity(name: &str, args: &[Option<Value>], expected: &'static str, ok: bool) -> Result<(), EvalError> {
    if ok {
        Ok(())
    } else {
        Err(EvalError::Arity {
            name: name.to_string(),
            expected,
            found: args.len(),
        })
    }
}

fn is_set(value: &Option<Value>) -> bool {
    matches!(value, Some(v) if !v.is_null())
}

fn text(value: String) -> Result<Option<Value>, EvalError> {
    Ok(Some(Value::String(value)))
}

/// `exists(x)`: whether the value is present (a `null` counts as present)
fn exists(args: &[Option<Value>], _: &mut Budget) -> Result<Option<Value>, EvalError> {
    arity("exists", args, "1", args.len() == 1)?;
    Ok(Some(Value::Bool(args[0].is_some())))
}

/// `coalesce(a, b, ...)`: the first argument that is present and not null
fn coalesce(args: &[Option<Value>], budget: &mut Budget) -> Result<Option<Value>, EvalError> {
    arity("coalesce", args, "at least 1", !args.is_empty())?;
    budget.tick(args.len())?;
    Ok(args
        .iter()
        .find(|a| is_set(a))
        .or_else(|| args.last())
        .cloned()
        .flatten())
}

/// `default(x, fallback)`
fn default(args: &[Option<Value>], _: &mut Budget) -> Result<Option<Value>, EvalError> {
    arity("default", args, "2", args.len() == 2)?;
    let chosen = if is_set(&args[0]) { &args[0] } else { &args[1] };
    Ok(chosen.clone())
}

fn upper(args: &[Option<Value>], _: &mut Budget) -> Result<Option<Value>, EvalError> {
    arity("upper", args, "1", args.len() == 1)?;
    text(to_text(args[0].as_ref()).to_uppercase())
}

fn lower(args: &[Option<Value>], _: &mut Budget) -> Result<Option<Value>, EvalError> {
    arity("lower", args, "1", args.len() == 1)?;
    text(to_text(args[0].as_ref()).to_lowercase())
}

fn trim(args: &[Option<Value>], _: &mut Budget) -> Result<Option<Value>, EvalError> {
    arity("trim", args, "1", args.len() == 1)?;
    text(to_text(args[0].as_ref()).trim().to_string())
}

/// `len(x)`: characters, elements or members; absent and null are 0
fn len(args: &[Option<Value>], _: &mut Budget) -> Result<Option<Value>, EvalError> {
    arity("len", args, "1", args.len() == 1)?;
    let n = match &args[0] {
        None | Some(Value::Null) => 0,
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(map)) => map.len(),
        other => {
            return Err(EvalError::type_error(
                "len",
                format!("{} has no length", type_name(other.as_ref())),
            ));
        }
    };
    Ok(Some(Value::from(n)))
}

fn string(args: &[Option<Value>], _: &mut Budget) -> Result<Option<Value>, EvalError> {
    arity("string", args, "1", args.len() == 1)?;
    text(to_text(args[0].as_ref()))
}

/// `number(x)`: numeric value of a number, numeric string or boolean, else null
fn number(args: &[Option<Value>], _: &mut Budget) -> Result<Option<Value>, EvalError> {
    arity("number", args, "1", args.len() == 1)?;
    let value = match &args[0] {
        Some(Value::Number(n)) => Value::Number(n.clone()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(number_value)
            .unwrap_or(Value::Null),
        Some(Value::Bool(b)) => Value::from(u8::from(*b)),
        _ => Value::Null,
    };
    Ok(Some(value))
}

/// `join(array, separator)`; the separator defaults to ","
fn join(args: &[Option<Value>], budget: &mut Budget) -> Result<Option<Value>, EvalError> {
    arity("join", args, "1 or 2", matches!(args.len(), 1 | 2))?;
    let separator = args.get(1).map_or_else(|| ",".to_string(), |s| to_text(s.as_ref()));
    match &args[0] {
        None => text(String::new()),
        Some(Value::Array(items)) => {
            budget.tick(items.len())?;
            let parts: Vec<String> = items.iter().map(element_text).collect();
            let size = parts.iter().map(String::len).sum::<usize>()
                + separator.len().saturating_mul(parts.len().saturating_sub(1));
            budget.charge_bytes(size)?;
            text(parts.join(&separator))
        }
        other => Err(EvalError::type_error(
            "join",
            format!("expected an array, got {}", type_name(other.as_ref())),
        )),
    }
}

/// `contains(haystack, needle)` over strings, arrays and object keys
fn contains(args: &[Option<Value>], budget: &mut Budget) -> Result<Option<Value>, EvalError> {
    arity("contains", args, "2", args.len() == 2)?;
    let needle = args[1].as_ref();
    let found = match &args[0] {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => s.contains(&to_text(needle)),
        Some(Value::Array(items)) => {
            budget.tick(items.len())?;
            items.iter().any(|item| loose_eq(Some(item), needle))
        }
        Some(Value::Object(map)) => map.contains_key(&to_text(needle)),
        other => {
            return Err(EvalError::type_error(
                "contains",
                format!("cannot search in {}", type_name(other.as_ref())),
            ));
        }
    };
    Ok(Some(Value::Bool(found)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Vec<Option<Value>>) -> Result<Option<Value>, EvalError> {
        let function = lookup(name).unwrap();
        function(&args, &mut Budget::new(1000))
    }

    fn some(v: Value) -> Option<Value> {
        Some(v)
    }

    #[test]
    fn test_every_builtin_resolves() {
        for name in BUILTINS {
            assert!(lookup(name).is_some(), "{name}");
        }
        for name in ["eval", "fetch", "read_file", "env", "now", "require", "exec"] {
            assert!(lookup(name).is_none(), "{name}");
        }
    }

    #[test]
    fn test_exists_and_fallbacks() {
        assert_eq!(call("exists", vec![None]).unwrap(), some(json!(false)));
        assert_eq!(call("exists", vec![some(Value::Null)]).unwrap(), some(json!(true)));
        assert_eq!(
            call("coalesce", vec![None, some(Value::Null), some(json!("x"))]).unwrap(),
            some(json!("x"))
        );
        assert_eq!(call("coalesce", vec![None, None]).unwrap(), None);
        assert_eq!(
            call("default", vec![None, some(json!(1))]).unwrap(),
            some(json!(1))
        );
        assert_eq!(
            call("default", vec![some(json!(0)), some(json!(1))]).unwrap(),
            some(json!(0))
        );
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call("upper", vec![some(json!("abc"))]).unwrap(), some(json!("ABC")));
        assert_eq!(call("lower", vec![some(json!("ÀB"))]).unwrap(), some(json!("àb")));
        assert_eq!(call("trim", vec![some(json!("  x "))]).unwrap(), some(json!("x")));
        assert_eq!(call("upper", vec![None]).unwrap(), some(json!("")));
        assert_eq!(call("string", vec![some(json!(4))]).unwrap(), some(json!("4")));
    }

    #[test]
    fn test_len() {
        assert_eq!(call("len", vec![some(json!("héllo"))]).unwrap(), some(json!(5)));
        assert_eq!(call("len", vec![some(json!([1, 2]))]).unwrap(), some(json!(2)));
        assert_eq!(call("len", vec![None]).unwrap(), some(json!(0)));
        assert!(call("len", vec![some(json!(true))]).is_err());
    }

    #[test]
    fn test_number() {
        assert_eq!(call("number", vec![some(json!(" 42 "))]).unwrap(), some(json!(42)));
        assert_eq!(call("number", vec![some(json!("1.5"))]).unwrap(), some(json!(1.5)));
        assert_eq!(call("number", vec![some(json!("abc"))]).unwrap(), some(Value::Null));
        assert_eq!(call("number", vec![some(json!(true))]).unwrap(), some(json!(1)));
    }

    #[test]
    fn test_join_and_contains() {
        assert_eq!(
            call("join", vec![some(json!(["a", 1, null])), some(json!("-"))]).unwrap(),
            some(json!("a-1-"))
        );
        assert_eq!(call("join", vec![some(json!(["a", "b"]))]).unwrap(), some(json!("a,b")));
        assert!(call("join", vec![some(json!("nope"))]).is_err());

        assert_eq!(
            call("contains", vec![some(json!("hello")), some(json!("ell"))]).unwrap(),
            some(json!(true))
        );
        assert_eq!(
            call("contains", vec![some(json!([1, 2])), some(json!(2.0))]).unwrap(),
            some(json!(true))
        );
        assert_eq!(
            call("contains", vec![some(json!({"k": 1})), some(json!("k"))]).unwrap(),
            some(json!(true))
        );
        assert_eq!(call("contains", vec![None, some(json!("x"))]).unwrap(), some(json!(false)));
    }

    #[test]
    fn test_arity() {
        assert!(matches!(
            call("upper", vec![]),
            Err(EvalError::Arity { found: 0, .. })
        ));
        assert!(matches!(call("default", vec![None]), Err(EvalError::Arity { .. })));
        assert!(matches!(call("coalesce", vec![]), Err(EvalError::Arity { .. })));
    }

    #[test]
    fn test_budget_applies_to_collections() {
        let function = lookup("join").unwrap();
        let big = json!(vec![1; 50]);
        assert_eq!(
            function(&[Some(big)], &mut Budget::new(10)),
            Err(EvalError::BudgetExceeded(10))
        );
    }

    #[test]
    fn test_join_output_is_charged() {
        let function = lookup("join").unwrap();
        let separator = "-".repeat(4 * 1024);
        let items = json!(vec![1; 5]);
        assert_eq!(
            function(&[Some(items), Some(json!(separator))], &mut Budget::new(10)),
            Err(EvalError::BudgetExceeded(10))
        );
    }
}
