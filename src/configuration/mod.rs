//! Resolves an experiment's `configuration` mapping.
//!
//! A configuration value is either a literal, passed through unchanged, or a
//! mapping shaped `{type: "env", key: K, default？: D}`, which resolves
//! against the process environment. A referenced variable that is unset and
//! has no default is a validation failure, reported before any activity
//! runs — not an `ActivityFailed` at dispatch time.

use serde_json::{Map, Value};

/// Returns the resolved configuration map, or the list of env keys that
/// could not be resolved.
pub fn resolve_configuration(configuration: &Map<String, Value>) -> Result<Map<String, Value>, Vec<String>> {
    let mut resolved = Map::new();
    let mut errors = Vec::new();

    for (key, value) in configuration {
        match resolve_value(value) {
            Ok(v) => {
                resolved.insert(key.clone(), v);
            }
            Err(env_key) => {
                errors.push(format!(
                    "configuration key '{}' references environment key that does not exist: '{}'",
                    key, env_key
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(resolved)
    } else {
        Err(errors)
    }
}

/// Resolves a single configuration value. On failure, returns the
/// environment variable name that could not be found.
fn resolve_value(value: &Value) -> Result<Value, String> {
    if let Some(spec) = value.as_object() {
        if spec.get("type").and_then(Value::as_str) == Some("env") {
            let key = spec
                .get("key")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            return match std::env::var(&key) {
                Ok(v) => Ok(Value::String(v)),
                Err(_) => match spec.get("default") {
                    Some(default) => Ok(default.clone()),
                    None => Err(key),
                },
            };
        }
    }

    Ok(value.clone())
}
