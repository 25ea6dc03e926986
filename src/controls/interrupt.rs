//! The `builtin.interrupt` control: raises `ChaosError::InterruptExecution`
//! from whichever hook its `arguments.when` names (`"before"` or `"after"`,
//! defaulting to `"before"`). Exists so an experiment document can exercise
//! cooperative interruption without reaching for an OS signal.

use serde_json::{Map, Value};

use crate::controls::{ControlHook, ControlHookContext};
use crate::errors::ChaosError;

#[derive(Debug, Default)]
pub struct InterruptControl;

fn fires_at(arguments: &Map<String, Value>, moment: &str) -> bool {
    arguments.get("when").and_then(Value::as_str).unwrap_or("before") == moment
}

impl ControlHook for InterruptControl {
    fn before(&self, ctx: &mut ControlHookContext) -> Result<(), ChaosError> {
        if fires_at(ctx.arguments, "before") {
            return Err(ChaosError::InterruptExecution(
                "builtin.interrupt control requested interruption before the activity".to_string(),
            ));
        }
        Ok(())
    }

    fn after(&self, ctx: &mut ControlHookContext, _state: &Value) -> Result<(), ChaosError> {
        if fires_at(ctx.arguments, "after") {
            return Err(ChaosError::InterruptExecution(
                "builtin.interrupt control requested interruption after the activity".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ControlLevel;

    #[test]
    fn before_hook_interrupts_by_default() {
        let control = InterruptControl;
        let configuration = Map::new();
        let secrets = Map::new();
        let arguments = Map::new();
        let mut context_extra = Map::new();
        let mut ctx = ControlHookContext {
            level: ControlLevel::Activity,
            configuration: &configuration,
            secrets: &secrets,
            arguments: &arguments,
            context_extra: &mut context_extra,
        };
        let err = control.before(&mut ctx).unwrap_err();
        assert!(err.is_interrupt());
    }

    #[test]
    fn after_hook_is_silent_unless_requested() {
        let control = InterruptControl;
        let configuration = Map::new();
        let secrets = Map::new();
        let arguments = Map::new();
        let mut context_extra = Map::new();
        let mut ctx = ControlHookContext {
            level: ControlLevel::Activity,
            configuration: &configuration,
            secrets: &secrets,
            arguments: &arguments,
            context_extra: &mut context_extra,
        };
        assert!(control.after(&mut ctx, &Value::Null).is_ok());
    }
}
