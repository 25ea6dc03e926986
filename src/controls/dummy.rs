//! The `builtin.dummy` control: a diagnostic hook that proves the scope
//! machinery is wired correctly. It stamps `before_<level>_control` /
//! `after_<level>_control` flags onto whatever context it wraps, and, when
//! loaded globally with a `dummy-key` runner setting, copies that value onto
//! the experiment's `extra` bag as `control-value`. Useful for exercising
//! the control system the same way the project's own test fixtures do.

use serde_json::{Map, Value};

use crate::controls::{ControlHook, ControlHookContext};
use crate::errors::ChaosError;
use crate::model::ControlLevel;

#[derive(Debug, Default)]
pub struct DummyControl;

impl ControlHook for DummyControl {
    fn configure(
        &self,
        _arguments: &Map<String, Value>,
        experiment_extra: &mut Map<String, Value>,
        settings_extra: &Map<String, Value>,
    ) -> Result<(), ChaosError> {
        if let Some(value) = settings_extra.get("dummy-key") {
            experiment_extra.insert("control-value".to_string(), value.clone());
        }
        Ok(())
    }

    fn before(&self, ctx: &mut ControlHookContext) -> Result<(), ChaosError> {
        ctx.context_extra
            .insert(format!("before_{}_control", level_name(ctx.level)), Value::Bool(true));
        Ok(())
    }

    fn after(&self, ctx: &mut ControlHookContext, _state: &Value) -> Result<(), ChaosError> {
        ctx.context_extra
            .insert(format!("after_{}_control", level_name(ctx.level)), Value::Bool(true));
        Ok(())
    }
}

fn level_name(level: ControlLevel) -> &'static str {
    match level {
        ControlLevel::Loader => "loader",
        ControlLevel::Experiment => "experiment",
        ControlLevel::Hypothesis => "hypothesis",
        ControlLevel::Method => "method",
        ControlLevel::Rollback => "rollback",
        ControlLevel::Activity => "activity",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn before_and_after_stamp_level_scoped_flags() {
        let control = DummyControl;
        let configuration = Map::new();
        let secrets = Map::new();
        let arguments = Map::new();
        let mut context_extra = Map::new();

        {
            let mut ctx = ControlHookContext {
                level: ControlLevel::Activity,
                configuration: &configuration,
                secrets: &secrets,
                arguments: &arguments,
                context_extra: &mut context_extra,
            };
            control.before(&mut ctx).unwrap();
        }
        assert_eq!(context_extra.get("before_activity_control"), Some(&json!(true)));

        {
            let mut ctx = ControlHookContext {
                level: ControlLevel::Activity,
                configuration: &configuration,
                secrets: &secrets,
                arguments: &arguments,
                context_extra: &mut context_extra,
            };
            control.after(&mut ctx, &Value::Null).unwrap();
        }
        assert_eq!(context_extra.get("after_activity_control"), Some(&json!(true)));
    }

    #[test]
    fn configure_copies_dummy_key_onto_experiment_extra() {
        let control = DummyControl;
        let mut experiment_extra = Map::new();
        let mut settings_extra = Map::new();
        settings_extra.insert("dummy-key".to_string(), json!("hello there"));

        control.configure(&Map::new(), &mut experiment_extra, &settings_extra).unwrap();
        assert_eq!(experiment_extra.get("control-value"), Some(&json!("hello there")));
    }
}
