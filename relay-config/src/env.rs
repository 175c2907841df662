// Environment variable loading

use serde_json::Value;
use std::collections::HashMap;

/// Collects prefixed environment variables as configuration keys.
///
/// `RELAY_DELIVERY_TIMEOUT_SECS=30` becomes `delivery_timeout_secs = 30`.
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    /// Create a loader for variables starting with `prefix` (without the trailing `_`).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Collect the prefixed variables from `vars`, keyed by lowercased setting name.
    pub fn load_from<I>(&self, vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let marker = format!("{}_", self.prefix);
        vars.into_iter()
            .filter_map(|(key, value)| {
                let trimmed = key.strip_prefix(&marker)?;
                if trimmed.is_empty() {
                    return None;
                }
                Some((trimmed.to_lowercase(), value))
            })
            .collect()
    }
}

/// Convert a raw variable to the JSON type of the value it replaces.
///
/// Strings and unset (`null`) settings keep the text as is; numbers and
/// booleans are parsed, and text that does not parse stays a string so
/// deserialization reports the field. Keys with no current value are
/// promoted by shape.
pub(crate) fn coerce(raw: &str, current: Option<&Value>) -> Value {
    let trimmed = raw.trim();
    match current {
        Some(Value::String(_) | Value::Null) => Value::String(raw.to_string()),
        Some(Value::Bool(_)) => match trimmed {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        Some(Value::Number(_)) => parse_number(trimmed).unwrap_or_else(|| Value::String(raw.to_string())),
        _ => match trimmed {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => parse_number(trimmed).unwrap_or_else(|| Value::String(raw.to_string())),
        },
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(n) = text.parse::<u64>() {
        return Some(Value::from(n));
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::from(n));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_prefix_is_stripped_and_lowercased() {
        let loader = EnvLoader::new("RELAY");
        let loaded = loader.load_from(vars(&[
            ("RELAY_PORT", "8080"),
            ("RELAY_DOMAIN_NAME", "https://hooks.example.com"),
            ("PATH", "/usr/bin"),
            ("RELAYX_PORT", "1"),
        ]));

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["port"], "8080");
        assert_eq!(loaded["domain_name"], "https://hooks.example.com");
    }

    #[test]
    fn test_coercion_follows_current_type() {
        let number = Value::from(5000u64);
        let text = Value::String("webhook-relay/0.1.0".into());
        let flag = Value::Bool(true);

        assert_eq!(coerce("42", Some(&number)), Value::from(42u64));
        assert_eq!(coerce("-3", Some(&number)), Value::from(-3i64));
        assert_eq!(coerce("1.5s", Some(&number)), Value::String("1.5s".into()));
        assert_eq!(coerce("123", Some(&text)), Value::String("123".into()));
        assert_eq!(coerce("2024", Some(&Value::Null)), Value::String("2024".into()));
        assert_eq!(coerce("false", Some(&flag)), Value::Bool(false));
        assert_eq!(coerce("0", Some(&flag)), Value::Bool(false));
    }

    #[test]
    fn test_coercion_without_current_value() {
        assert_eq!(coerce("42", None), Value::from(42u64));
        assert_eq!(coerce("true", None), Value::Bool(true));
        assert_eq!(coerce("hello", None), Value::String("hello".into()));
    }
}
