//! The activity executor: resolves one activity (or a reference to one),
//! wraps it in its control scope, runs its provider, and records the
//! outcome as a [`Run`]. [`run_activities`] drives a whole method/rollback
//! list, dispatching `background: true` activities onto their own task so
//! they run concurrently with the rest of the phase instead of blocking it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::controls::{effective_controls, ControlScope};
use crate::errors::ChaosError;
use crate::model::{Activity, ActivityDef, ControlLevel, ControlSpec, Run, RunStatus};
use crate::providers;

/// Everything an activity needs that doesn't come from the activity itself:
/// the experiment's resolved `configuration`/`secrets`, a name-keyed table
/// for resolving `ref` activities, and whatever controls are attached at the
/// experiment level (for cascading). Cheaply `Clone`-able so a background
/// activity can own its copy across a `tokio::spawn` boundary.
#[derive(Clone)]
pub struct ExecutionContext {
    pub configuration: Arc<Map<String, Value>>,
    pub secrets: Arc<Map<String, Value>>,
    pub activities_by_name: Arc<HashMap<String, ActivityDef>>,
    pub experiment_controls: Arc<Vec<ControlSpec>>,
    pub dry: bool,
}

fn resolve_activity_def(activity: &Activity, ctx: &ExecutionContext) -> Result<ActivityDef, ChaosError> {
    match activity {
        Activity::Full(def) => Ok((**def).clone()),
        Activity::Ref(r) => ctx
            .activities_by_name
            .get(r.ref_.as_str())
            .cloned()
            .ok_or_else(|| ChaosError::InvalidActivity(format!("could not resolve activity reference '{}'", r.ref_))),
    }
}

/// Runs one activity to completion and returns its [`Run`] record.
///
/// A failed provider (`ChaosError::ActivityFailed`) is recorded on the run
/// with `status: failed` rather than propagated — the ancestor implementation
/// draws the same line between an activity that merely failed and one that
/// could not even be resolved or was interrupted by a control, which *do*
/// propagate and stop the phase that called this.
pub async fn execute_activity(activity: &Activity, ctx: &ExecutionContext) -> Result<Run, ChaosError> {
    let mut def = resolve_activity_def(activity, ctx)?;

    let own_controls = def.controls.clone();
    let mut attached = HashMap::new();
    attached.insert(ControlLevel::Experiment, ctx.experiment_controls.as_slice());
    let effective = effective_controls(ControlLevel::Activity, own_controls.as_deref(), &attached);

    let scope = ControlScope::open(ControlLevel::Activity, effective, &ctx.configuration, &ctx.secrets, &mut def.extra)?;

    if !ctx.dry {
        if let Some(before) = def.pauses.and_then(|p| p.before).filter(|s| *s > 0.0) {
            tokio::time::sleep(Duration::from_secs_f64(before)).await;
        }
    }

    // `dry` only skips side-effecting calls. A probe is observation-only by
    // definition (see the glossary), so it still dispatches for real even in
    // a dry run — only an action's provider call is skipped.
    let skip_dispatch = ctx.dry && def.activity_type == crate::model::ActivityType::Action;

    let start = Utc::now();
    let outcome = if skip_dispatch {
        Ok(Value::Null)
    } else {
        providers::run_provider(&def.provider, &ctx.configuration, &ctx.secrets, def.timeout).await
    };
    let end = Utc::now();

    if !ctx.dry {
        if let Some(after) = def.pauses.and_then(|p| p.after).filter(|s| *s > 0.0) {
            tokio::time::sleep(Duration::from_secs_f64(after)).await;
        }
    }

    let (status, output, exception) = match &outcome {
        Ok(value) => (RunStatus::Succeeded, Some(value.clone()), None),
        Err(e) => (RunStatus::Failed, None, Some(e.to_string())),
    };

    let state = json!({"status": status == RunStatus::Succeeded, "output": &output});
    scope.close(&state, &ctx.configuration, &ctx.secrets, &mut def.extra)?;

    let duration = (end - start).num_milliseconds() as f64 / 1000.0;

    Ok(Run {
        activity: def,
        status,
        output,
        exception,
        start: start.to_rfc3339(),
        end: end.to_rfc3339(),
        duration,
        extra: Map::new(),
    })
}

enum Outcome {
    Foreground(Run),
    Background(tokio::task::JoinHandle<Result<Run, ChaosError>>),
}

fn wants_background(activity: &Activity) -> bool {
    matches!(activity, Activity::Full(def) if def.background.unwrap_or(false))
}

/// Runs every activity in `activities` in document order. Foreground
/// activities are awaited inline; `background: true` activities are spawned
/// immediately and joined only after every activity in the list has at least
/// started, so a slow background action doesn't stall the activities after
/// it. The first failure encountered (ref resolution or interruption; a mere
/// failed provider does not count) short-circuits the remaining foreground
/// activities, though already-spawned background tasks are still joined.
pub async fn run_activities(activities: &[Activity], ctx: &ExecutionContext) -> Result<Vec<Run>, ChaosError> {
    let mut outcomes = Vec::with_capacity(activities.len());
    let mut early_error = None;

    for activity in activities {
        if wants_background(activity) {
            let activity = activity.clone();
            let task_ctx = ctx.clone();
            let handle = tokio::spawn(async move { execute_activity(&activity, &task_ctx).await });
            outcomes.push(Outcome::Background(handle));
        } else {
            match execute_activity(activity, ctx).await {
                Ok(run) => outcomes.push(Outcome::Foreground(run)),
                Err(e) => {
                    early_error = Some(e);
                    break;
                }
            }
        }
    }

    let mut runs = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            Outcome::Foreground(run) => runs.push(run),
            Outcome::Background(handle) => match handle.await {
                Ok(Ok(run)) => runs.push(run),
                Ok(Err(e)) => {
                    if early_error.is_none() {
                        early_error = Some(e);
                    }
                }
                Err(join_err) => {
                    if early_error.is_none() {
                        early_error = Some(ChaosError::activity_failed(format!("background activity panicked: {join_err}")));
                    }
                }
            },
        }
    }

    match early_error {
        Some(e) => Err(e),
        None => Ok(runs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActivityRef, ActivityType, CodeProvider, Provider};

    fn context() -> ExecutionContext {
        ExecutionContext {
            configuration: Arc::new(Map::new()),
            secrets: Arc::new(Map::new()),
            activities_by_name: Arc::new(HashMap::new()),
            experiment_controls: Arc::new(Vec::new()),
            dry: false,
        }
    }

    fn always_true_activity(name: &str, background: bool) -> Activity {
        Activity::Full(Box::new(ActivityDef {
            activity_type: ActivityType::Action,
            name: name.to_string(),
            provider: Provider::Code(CodeProvider {
                module: "builtin".to_string(),
                func: "always_true".to_string(),
                arguments: Map::new(),
            }),
            timeout: None,
            pauses: None,
            background: Some(background),
            controls: None,
            tolerance: None,
            extra: Map::new(),
        }))
    }

    #[tokio::test]
    async fn executes_a_full_activity_and_records_success() {
        let run = execute_activity(&always_true_activity("check", false), &context()).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.output, Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn unresolved_ref_fails_immediately() {
        let activity = Activity::Ref(ActivityRef { ref_: "missing".to_string() });
        let err = execute_activity(&activity, &context()).await.unwrap_err();
        assert!(matches!(err, ChaosError::InvalidActivity(_)));
    }

    #[tokio::test]
    async fn ref_resolves_against_the_activities_table() {
        let mut table = HashMap::new();
        if let Activity::Full(def) = always_true_activity("named", false) {
            table.insert("named".to_string(), *def);
        }
        let mut ctx = context();
        ctx.activities_by_name = Arc::new(table);

        let activity = Activity::Ref(ActivityRef { ref_: "named".to_string() });
        let run = execute_activity(&activity, &ctx).await.unwrap();
        assert_eq!(run.activity.name, "named");
    }

    #[tokio::test]
    async fn a_failed_provider_is_recorded_but_does_not_propagate() {
        let activity = Activity::Full(Box::new(ActivityDef {
            activity_type: ActivityType::Action,
            name: "boom".to_string(),
            provider: Provider::Code(CodeProvider { module: "builtin".to_string(), func: "fail".to_string(), arguments: Map::new() }),
            timeout: None,
            pauses: None,
            background: None,
            controls: None,
            tolerance: None,
            extra: Map::new(),
        }));
        let run = execute_activity(&activity, &context()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.exception.is_some());
    }

    #[tokio::test]
    async fn background_activities_still_appear_in_order() {
        let activities = vec![always_true_activity("one", true), always_true_activity("two", false)];
        let runs = run_activities(&activities, &context()).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].activity.name, "one");
        assert_eq!(runs[1].activity.name, "two");
    }

    #[tokio::test]
    async fn missing_ref_aborts_the_phase() {
        let activities = vec![Activity::Ref(ActivityRef { ref_: "nope".to_string() })];
        let err = run_activities(&activities, &context()).await.unwrap_err();
        assert!(matches!(err, ChaosError::InvalidActivity(_)));
    }

    #[tokio::test]
    async fn dry_mode_never_dispatches_an_action_and_returns_a_null_output() {
        let activity = Activity::Full(Box::new(ActivityDef {
            activity_type: ActivityType::Action,
            name: "boom".to_string(),
            provider: Provider::Code(CodeProvider { module: "builtin".to_string(), func: "fail".to_string(), arguments: Map::new() }),
            timeout: None,
            pauses: None,
            background: None,
            controls: None,
            tolerance: None,
            extra: Map::new(),
        }));
        let mut ctx = context();
        ctx.dry = true;

        // a provider that always fails still "succeeds" in dry mode because
        // it is never dispatched at all: actions are side-effecting, and dry
        // mode only skips side-effecting calls.
        let run = execute_activity(&activity, &ctx).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.output, Some(Value::Null));
    }

    #[tokio::test]
    async fn dry_mode_still_dispatches_a_probe() {
        // probes are observation-only, not side-effecting, so dry mode must
        // not keep them from reporting the real state of the world.
        let activity = Activity::Full(Box::new(ActivityDef {
            activity_type: ActivityType::Probe,
            name: "check".to_string(),
            provider: Provider::Code(CodeProvider { module: "builtin".to_string(), func: "fail".to_string(), arguments: Map::new() }),
            timeout: None,
            pauses: None,
            background: None,
            controls: None,
            tolerance: None,
            extra: Map::new(),
        }));
        let mut ctx = context();
        ctx.dry = true;

        let run = execute_activity(&activity, &ctx).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.exception.is_some());
    }

    #[tokio::test]
    async fn dry_mode_skips_configured_pauses() {
        let activity = Activity::Full(Box::new(ActivityDef {
            activity_type: ActivityType::Action,
            name: "paused".to_string(),
            provider: Provider::Code(CodeProvider { module: "builtin".to_string(), func: "always_true".to_string(), arguments: Map::new() }),
            timeout: None,
            pauses: Some(crate::model::Pauses { before: Some(5.0), after: Some(5.0) }),
            background: None,
            controls: None,
            tolerance: None,
            extra: Map::new(),
        }));
        let mut ctx = context();
        ctx.dry = true;

        let started = std::time::Instant::now();
        execute_activity(&activity, &ctx).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1), "dry mode must not sleep through configured pauses");
    }
}
