//! The code provider.
//!
//! The Python ancestor resolves `module.func` through the host language's
//! import system and binds arguments by reflecting on the function's
//! declared parameters. Neither makes sense in a statically typed,
//! statically linked binary, so this is rewritten as an explicit contract
//! (see the design notes on reflection-based argument binding): `module` and
//! `func` together name an entry in a process-wide registry of built-in
//! functions, and every entry receives the same `CodeContext` — its
//! `arguments`, the resolved experiment `configuration`, and `secrets` — and
//! picks out whatever it needs.
//!
//! This intentionally closes the set of "code" activities/controls to what
//! ships with the runner; it trades the ancestor's arbitrary extensibility
//! for a binary that never shells out to an interpreter it doesn't control.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::errors::ChaosError;
use crate::model::CodeProvider;

/// Everything a registered function is given to work with.
pub struct CodeContext<'a> {
    pub arguments: &'a Map<String, Value>,
    pub configuration: &'a Map<String, Value>,
    pub secrets: &'a Map<String, Value>,
}

pub type CodeFn = fn(&CodeContext) -> Result<Value, ChaosError>;

fn registry() -> &'static HashMap<(&'static str, &'static str), CodeFn> {
    static REGISTRY: Lazy<HashMap<(&'static str, &'static str), CodeFn>> = Lazy::new(|| {
        let mut m: HashMap<(&'static str, &'static str), CodeFn> = HashMap::new();
        m.insert(("builtin", "always_true"), always_true as CodeFn);
        m.insert(("builtin", "always_false"), always_false as CodeFn);
        m.insert(("builtin", "fail"), fail as CodeFn);
        m.insert(("builtin", "echo"), echo as CodeFn);
        m.insert(("builtin", "config_value"), config_value as CodeFn);
        m.insert(("builtin", "secret_value"), secret_value as CodeFn);
        m.insert(("builtin", "read_flag"), read_flag as CodeFn);
        m.insert(("builtin", "set_flag"), set_flag as CodeFn);
        m
    });
    &REGISTRY
}

/// In-memory flags keyed by name, standing in for whatever state a real
/// probe would observe on the system under test. `set_flag` is a method
/// action that flips one; `read_flag` is the probe that steady-state
/// hypotheses check against. Keying by name keeps concurrently running
/// experiments (and tests) from treading on each other.
static FLAGS: Lazy<Mutex<HashMap<String, bool>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn is_resolvable(module: &str, func: &str) -> bool {
    registry().contains_key(&(module, func))
}

pub async fn run(
    provider: &CodeProvider,
    configuration: &Map<String, Value>,
    secrets: &Map<String, Value>,
    timeout: Option<f64>,
) -> Result<Value, ChaosError> {
    let Some(f) = registry().get(&(provider.module.as_str(), provider.func.as_str())).copied() else {
        return Err(ChaosError::activity_failed(format!(
            "could not resolve code provider '{}.{}'",
            provider.module, provider.func
        )));
    };

    let arguments = provider.arguments.clone();
    let configuration = configuration.clone();
    let secrets = secrets.clone();

    let call = tokio::task::spawn_blocking(move || {
        let ctx = CodeContext {
            arguments: &arguments,
            configuration: &configuration,
            secrets: &secrets,
        };
        f(&ctx)
    });

    let result = match timeout {
        Some(secs) if secs > 0.0 => {
            match tokio::time::timeout(Duration::from_secs_f64(secs), call).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(ChaosError::activity_failed(format!(
                        "code provider '{}.{}' timed out after {}s",
                        provider.module, provider.func, secs
                    )))
                }
            }
        }
        _ => call.await,
    };

    result.map_err(|e| ChaosError::activity_failed(format!("code provider panicked: {}", e)))?
}

fn always_true(_ctx: &CodeContext) -> Result<Value, ChaosError> {
    Ok(Value::Bool(true))
}

fn always_false(_ctx: &CodeContext) -> Result<Value, ChaosError> {
    Ok(Value::Bool(false))
}

fn fail(ctx: &CodeContext) -> Result<Value, ChaosError> {
    let msg = ctx
        .arguments
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("builtin.fail always fails");
    Err(ChaosError::activity_failed(msg.to_string()))
}

fn echo(ctx: &CodeContext) -> Result<Value, ChaosError> {
    Ok(ctx.arguments.get("value").cloned().unwrap_or(Value::Null))
}

fn config_value(ctx: &CodeContext) -> Result<Value, ChaosError> {
    let key = ctx.arguments.get("key").and_then(Value::as_str).unwrap_or_default();
    Ok(ctx.configuration.get(key).cloned().unwrap_or(Value::Null))
}

fn secret_value(ctx: &CodeContext) -> Result<Value, ChaosError> {
    let key = ctx.arguments.get("key").and_then(Value::as_str).unwrap_or_default();
    Ok(ctx.secrets.get(key).cloned().unwrap_or(Value::Null))
}

fn flag_key(ctx: &CodeContext) -> String {
    ctx.arguments.get("key").and_then(Value::as_str).unwrap_or("default").to_string()
}

fn read_flag(ctx: &CodeContext) -> Result<Value, ChaosError> {
    let key = flag_key(ctx);
    let flags = FLAGS.lock().unwrap();
    Ok(Value::Bool(flags.get(&key).copied().unwrap_or(true)))
}

fn set_flag(ctx: &CodeContext) -> Result<Value, ChaosError> {
    let key = flag_key(ctx);
    let value = ctx.arguments.get("value").and_then(Value::as_bool).unwrap_or(false);
    FLAGS.lock().unwrap().insert(key, value);
    Ok(Value::Bool(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_and_runs_a_builtin_function() {
        let provider = CodeProvider {
            module: "builtin".into(),
            func: "always_true".into(),
            arguments: Map::new(),
        };
        let result = run(&provider, &Map::new(), &Map::new(), None).await.unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[tokio::test]
    async fn unresolved_module_fails_as_activity_failed() {
        let provider = CodeProvider {
            module: "does-not".into(),
            func: "exist".into(),
            arguments: Map::new(),
        };
        let err = run(&provider, &Map::new(), &Map::new(), None).await.unwrap_err();
        assert!(err.is_activity_failed());
    }

    #[tokio::test]
    async fn echo_returns_the_value_argument() {
        let mut arguments = Map::new();
        arguments.insert("value".into(), serde_json::json!(42));
        let provider = CodeProvider {
            module: "builtin".into(),
            func: "echo".into(),
            arguments,
        };
        let result = run(&provider, &Map::new(), &Map::new(), None).await.unwrap();
        assert_eq!(result, serde_json::json!(42));
    }

    #[test]
    fn is_resolvable_matches_registry_contents() {
        assert!(is_resolvable("builtin", "always_true"));
        assert!(!is_resolvable("builtin", "nope"));
    }

    #[tokio::test]
    async fn set_flag_changes_what_read_flag_later_reports() {
        let mut key_arg = Map::new();
        key_arg.insert("key".into(), serde_json::json!("code_rs_set_flag_test"));

        let read_provider = CodeProvider { module: "builtin".into(), func: "read_flag".into(), arguments: key_arg.clone() };
        let before = run(&read_provider, &Map::new(), &Map::new(), None).await.unwrap();
        assert_eq!(before, Value::Bool(true));

        let mut set_args = key_arg.clone();
        set_args.insert("value".into(), serde_json::json!(false));
        let set_provider = CodeProvider { module: "builtin".into(), func: "set_flag".into(), arguments: set_args };
        run(&set_provider, &Map::new(), &Map::new(), None).await.unwrap();

        let after = run(&read_provider, &Map::new(), &Map::new(), None).await.unwrap();
        assert_eq!(after, Value::Bool(false));
    }
}
