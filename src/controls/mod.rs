//! Control hooks: before/after interceptors wrapped around every phase and
//! activity of an experiment.
//!
//! A control is resolved from a `module` name against a small process-wide
//! registry of built-ins (the code-provider module's reflection-free
//! approach applies here too — see `crate::providers::code`). Two sources
//! feed a running experiment:
//!
//! - document-level controls, attached directly to the `Experiment` or to an
//!   individual `ActivityDef`, which cascade down through [`ControlLevel::ancestors`]
//!   when `automatic` (the default),
//! - global controls, loaded once per run from [`Settings`] and applied at
//!   every level regardless of what the document itself declares.
//!
//! `ControlScope` is the RAII-like bracket the executor opens around a phase:
//! its `open` call resolves and runs every applicable control's `before`
//! hook, and the caller later calls `close` with the resulting state to run
//! `after` hooks. Any hook may raise [`ChaosError::InterruptExecution`] to
//! cooperatively stop the run; any other hook error is logged and ignored,
//! matching the ancestor's "a misbehaving control must not crash the
//! experiment" stance.

mod dummy;
mod interrupt;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::errors::ChaosError;
use crate::model::{ControlLevel, ControlScopeFilter, ControlSpec, Settings};

/// Everything a control hook needs to act on the level it has been opened
/// at: the experiment's resolved `configuration`/`secrets`, the control's own
/// `arguments`, and a mutable handle to that level's `extra` bag.
pub struct ControlHookContext<'a> {
    pub level: ControlLevel,
    pub configuration: &'a Map<String, Value>,
    pub secrets: &'a Map<String, Value>,
    pub arguments: &'a Map<String, Value>,
    pub context_extra: &'a mut Map<String, Value>,
}

/// One control implementation. Hooks default to doing nothing so a control
/// that only cares about, say, `after` doesn't have to stub the rest.
pub trait ControlHook: Send + Sync {
    fn configure(
        &self,
        _arguments: &Map<String, Value>,
        _experiment_extra: &mut Map<String, Value>,
        _settings_extra: &Map<String, Value>,
    ) -> Result<(), ChaosError> {
        Ok(())
    }

    fn before(&self, _ctx: &mut ControlHookContext) -> Result<(), ChaosError> {
        Ok(())
    }

    fn after(&self, _ctx: &mut ControlHookContext, _state: &Value) -> Result<(), ChaosError> {
        Ok(())
    }

    fn cleanup(&self) -> Result<(), ChaosError> {
        Ok(())
    }
}

fn builtin_registry() -> &'static HashMap<&'static str, fn() -> Arc<dyn ControlHook>> {
    static REGISTRY: Lazy<HashMap<&'static str, fn() -> Arc<dyn ControlHook>>> = Lazy::new(|| {
        let mut m: HashMap<&'static str, fn() -> Arc<dyn ControlHook>> = HashMap::new();
        m.insert("builtin.dummy", || Arc::new(dummy::DummyControl) as Arc<dyn ControlHook>);
        m.insert("builtin.interrupt", || Arc::new(interrupt::InterruptControl) as Arc<dyn ControlHook>);
        m
    });
    &REGISTRY
}

fn resolve(module: &str) -> Option<Arc<dyn ControlHook>> {
    builtin_registry().get(module).map(|f| f())
}

struct LoadedGlobalControl {
    name: String,
    hook: Arc<dyn ControlHook>,
    arguments: Map<String, Value>,
}

static GLOBAL_CONTROLS: Lazy<Mutex<Vec<LoadedGlobalControl>>> = Lazy::new(|| Mutex::new(Vec::new()));

#[derive(Debug, serde::Deserialize)]
struct ControlSettingsEntry {
    provider: crate::model::ControlProvider,
    #[serde(default)]
    arguments: Map<String, Value>,
}

/// Loads every control named under `settings.controls` into the process-wide
/// global list, calling each one's `configure` hook as it is loaded. Safe to
/// call more than once; each call replaces the previous set. The orchestrator
/// calls this once at the top of a run and [`cleanup_global_controls`] once
/// at the end, even on failure paths.
pub fn load_global_controls(settings: &Settings, experiment_extra: &mut Map<String, Value>) {
    let mut loaded = Vec::new();

    for (name, spec) in &settings.controls {
        let entry: ControlSettingsEntry = match serde_json::from_value(spec.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(control = %name, error = %e, "could not parse global control settings; skipping");
                continue;
            }
        };

        let Some(hook) = resolve(&entry.provider.module) else {
            tracing::warn!(control = %name, module = %entry.provider.module, "could not resolve global control provider; skipping");
            continue;
        };

        if let Err(e) = hook.configure(&entry.arguments, experiment_extra, &settings.extra) {
            tracing::warn!(control = %name, error = %e, "global control failed to configure; skipping");
            continue;
        }

        loaded.push(LoadedGlobalControl { name: name.clone(), hook, arguments: entry.arguments });
    }

    *GLOBAL_CONTROLS.lock().unwrap() = loaded;
}

/// Runs every loaded global control's `cleanup` hook and empties the list,
/// even if one of them fails.
pub fn cleanup_global_controls() {
    let loaded = std::mem::take(&mut *GLOBAL_CONTROLS.lock().unwrap());
    for control in loaded {
        if let Err(e) = control.hook.cleanup() {
            tracing::warn!(control = %control.name, error = %e, "global control failed to clean up");
        }
    }
}

/// Names of the currently loaded global controls. Exposed mainly so tests
/// can assert the registry is empty before and after a run.
pub fn get_global_controls() -> Vec<String> {
    GLOBAL_CONTROLS.lock().unwrap().iter().map(|c| c.name.clone()).collect()
}

fn global_snapshot() -> Vec<(String, Arc<dyn ControlHook>, Map<String, Value>)> {
    GLOBAL_CONTROLS
        .lock()
        .unwrap()
        .iter()
        .map(|c| (c.name.clone(), c.hook.clone(), c.arguments.clone()))
        .collect()
}

/// Collects the document-level controls that apply at `level`: whatever is
/// attached directly to this level (`own`) plus any `automatic` control
/// attached at an ancestor level, per [`ControlLevel::ancestors`].
pub fn effective_controls<'a>(
    level: ControlLevel,
    own: Option<&'a [ControlSpec]>,
    attached: &HashMap<ControlLevel, &'a [ControlSpec]>,
) -> Vec<&'a ControlSpec> {
    let mut result: Vec<&ControlSpec> = Vec::new();
    if let Some(list) = own {
        result.extend(list.iter());
    }
    for ancestor in level.ancestors() {
        if let Some(list) = attached.get(ancestor) {
            result.extend(list.iter().filter(|c| c.automatic));
        }
    }
    result
}

type ResolvedControl = (String, Arc<dyn ControlHook>, Map<String, Value>, Option<ControlScopeFilter>);

/// The open/close bracket the executor wraps around one phase or activity.
/// `open` resolves global controls plus whatever `effective_controls` found
/// for this level and runs their `before` hooks (skipping any filtered to
/// `scope: after`); `close` later runs the matching `after` hooks with the
/// resulting state.
pub struct ControlScope {
    level: ControlLevel,
    resolved: Vec<ResolvedControl>,
}

impl ControlScope {
    pub fn open(
        level: ControlLevel,
        document_controls: Vec<&ControlSpec>,
        configuration: &Map<String, Value>,
        secrets: &Map<String, Value>,
        context_extra: &mut Map<String, Value>,
    ) -> Result<Self, ChaosError> {
        let mut resolved: Vec<ResolvedControl> = global_snapshot()
            .into_iter()
            .map(|(name, hook, arguments)| (name, hook, arguments, None))
            .collect();

        for spec in document_controls {
            match resolve(&spec.provider.module) {
                Some(hook) => resolved.push((spec.name.clone(), hook, spec.arguments.clone(), spec.scope)),
                None => tracing::warn!(
                    control = %spec.name,
                    module = %spec.provider.module,
                    "could not resolve control provider; skipping"
                ),
            }
        }

        let scope = ControlScope { level, resolved };

        for (name, hook, arguments, filter) in &scope.resolved {
            if *filter == Some(ControlScopeFilter::After) {
                continue;
            }
            let mut ctx = ControlHookContext {
                level,
                configuration,
                secrets,
                arguments,
                context_extra,
            };
            match hook.before(&mut ctx) {
                Ok(()) => {}
                Err(e) if e.is_interrupt() => return Err(e),
                Err(e) => tracing::warn!(control = %name, error = %e, "control before-hook failed; ignoring"),
            }
        }

        Ok(scope)
    }

    pub fn close(
        self,
        state: &Value,
        configuration: &Map<String, Value>,
        secrets: &Map<String, Value>,
        context_extra: &mut Map<String, Value>,
    ) -> Result<(), ChaosError> {
        for (name, hook, arguments, filter) in &self.resolved {
            if *filter == Some(ControlScopeFilter::Before) {
                continue;
            }
            let mut ctx = ControlHookContext {
                level: self.level,
                configuration,
                secrets,
                arguments,
                context_extra,
            };
            match hook.after(&mut ctx, state) {
                Ok(()) => {}
                Err(e) if e.is_interrupt() => return Err(e),
                Err(e) => tracing::warn!(control = %name, error = %e, "control after-hook failed; ignoring"),
            }
        }
        Ok(())
    }
}
