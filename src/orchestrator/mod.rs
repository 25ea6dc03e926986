//! The experiment orchestrator: resolves configuration, loads global
//! controls, runs the steady-state hypothesis before and after the method,
//! and always attempts the rollbacks — producing a [`Journal`] that never
//! propagates an error to its caller. Every failure mode (bad configuration,
//! a failed activity, an interrupted run) is folded into `journal.status`
//! instead, the same way the ancestor implementation treats `run_experiment`
//! as a function that always returns a journal, not a `Result`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::configuration;
use crate::controls::{self, effective_controls, ControlScope};
use crate::errors::ChaosError;
use crate::executor::{self, ExecutionContext};
use crate::model::{
    Activity, ActivityDef, ControlLevel, ControlSpec, Experiment, Journal, JournalStatus, Run, Settings, SteadyStates,
};
use crate::steady_state;
use crate::validation;

/// Controls attached directly to the experiment are the only ancestor-level
/// source of cascading automatic controls for the hypothesis/method/rollback
/// levels below it — none of those three levels has its own `controls` field
/// in the document model (only `Experiment` and `Activity` do).
fn attached_at_experiment(experiment_controls: &[ControlSpec]) -> HashMap<ControlLevel, &[ControlSpec]> {
    let mut attached = HashMap::new();
    attached.insert(ControlLevel::Experiment, experiment_controls);
    attached
}

/// Races a future against an external interrupt signal. Any phase of the
/// experiment can be cut short this way; a control raising
/// `InterruptExecution` has the same effect without needing this helper,
/// since that error already carries the right variant.
async fn interruptible<T>(fut: impl std::future::Future<Output = Result<T, ChaosError>>) -> Result<T, ChaosError> {
    tokio::select! {
        result = fut => result,
        _ = tokio::signal::ctrl_c() => Err(ChaosError::InterruptExecution(
            "received an interrupt signal".to_string(),
        )),
    }
}

fn build_activity_table(experiment: &Experiment) -> HashMap<String, ActivityDef> {
    let mut table = HashMap::new();
    let mut collect = |activities: &[Activity], table: &mut HashMap<String, ActivityDef>| {
        for activity in activities {
            if let Activity::Full(def) = activity {
                table.insert(def.name.clone(), (**def).clone());
            }
        }
    };
    if let Some(hypothesis) = &experiment.steady_state_hypothesis {
        collect(&hypothesis.probes, &mut table);
    }
    collect(&experiment.method, &mut table);
    collect(&experiment.rollbacks, &mut table);
    table
}

pub async fn run_experiment(mut experiment: Experiment, settings: &Settings) -> Journal {
    let start = Utc::now();

    let mut steady_states = SteadyStates::default();
    let mut run_records: Vec<Run> = Vec::new();
    let mut rollback_records: Vec<Run> = Vec::new();
    let mut deviated = false;

    let status = match validation::validate_experiment(&experiment) {
        Err(e) => {
            tracing::warn!(error = %e, "experiment failed validation; aborting before anything ran");
            JournalStatus::Aborted
        }
        Ok(()) => match configuration::resolve_configuration(&experiment.configuration) {
            Ok(resolved_configuration) => {
                controls::load_global_controls(settings, &mut experiment.extra);

                let activities_by_name = build_activity_table(&experiment);
                let experiment_controls = experiment.controls.clone().unwrap_or_default();

                let ctx = ExecutionContext {
                    configuration: Arc::new(resolved_configuration),
                    secrets: Arc::new(experiment.secrets.clone()),
                    activities_by_name: Arc::new(activities_by_name),
                    experiment_controls: Arc::new(experiment_controls.clone()),
                    dry: experiment.dry,
                };

                let outcome = run_phases(
                    &mut experiment,
                    &ctx,
                    &experiment_controls,
                    &mut steady_states,
                    &mut run_records,
                    &mut rollback_records,
                    &mut deviated,
                )
                .await;

                controls::cleanup_global_controls();

                let status = classify_outcome(outcome);
                // A deviation is only discovered once the method has already
                // completed without a harder failure; it still downgrades a
                // would-be "completed" run to "failed".
                if status == JournalStatus::Completed && deviated {
                    JournalStatus::Failed
                } else {
                    status
                }
            }
            Err(errors) => {
                tracing::warn!(errors = ?errors, "could not resolve experiment configuration; aborting before the method ran");
                JournalStatus::Aborted
            }
        },
    };

    let end = Utc::now();
    let mut extra = Map::new();
    extra.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));

    Journal {
        status,
        deviated,
        steady_states,
        run: run_records,
        rollbacks: rollback_records,
        start: start.to_rfc3339(),
        end: end.to_rfc3339(),
        duration: (end - start).num_milliseconds() as f64 / 1000.0,
        experiment,
        extra,
    }
}

fn classify_outcome(outcome: Result<(), ChaosError>) -> JournalStatus {
    match outcome {
        Ok(()) => JournalStatus::Completed,
        Err(e) if e.is_interrupt() => {
            tracing::warn!(error = %e, "experiment interrupted");
            JournalStatus::Interrupted
        }
        Err(e @ ChaosError::InvalidActivity(_)) => {
            tracing::warn!(error = %e, "experiment aborted");
            JournalStatus::Aborted
        }
        Err(e) => {
            tracing::warn!(error = %e, "experiment failed");
            JournalStatus::Failed
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_phases(
    experiment: &mut Experiment,
    ctx: &ExecutionContext,
    experiment_controls: &[ControlSpec],
    steady_states: &mut SteadyStates,
    run_records: &mut Vec<Run>,
    rollback_records: &mut Vec<Run>,
    deviated: &mut bool,
) -> Result<(), ChaosError> {
    let scope = ControlScope::open(
        ControlLevel::Experiment,
        experiment_controls.iter().collect(),
        &ctx.configuration,
        &ctx.secrets,
        &mut experiment.extra,
    )?;

    let result = run_method_phase(experiment, ctx, experiment_controls, steady_states, run_records, deviated).await;
    let method_interrupted = matches!(&result, Err(e) if e.is_interrupt());

    // An interrupted method phase skips rollbacks outright: the run is being
    // cut short, not recovered from, and nothing past this point should
    // start new work. Any other outcome (completed, deviated, a failed or
    // aborted method) still attempts rollbacks, since `method` may already
    // have perturbed the system by the time it stopped.
    let rollback_interrupted = if !method_interrupted {
        let attached = attached_at_experiment(experiment_controls);
        let effective = effective_controls(ControlLevel::Rollback, None, &attached);
        let rollback_scope = ControlScope::open(
            ControlLevel::Rollback,
            effective,
            &ctx.configuration,
            &ctx.secrets,
            &mut experiment.extra,
        )?;

        let rollback_result = interruptible(executor::run_activities(&experiment.rollbacks, ctx)).await;
        let mut interrupted = matches!(&rollback_result, Err(e) if e.is_interrupt());
        let state = match &rollback_result {
            Ok(records) => serde_json::to_value(records).unwrap_or(Value::Null),
            Err(e) => json!({"error": e.to_string()}),
        };
        match rollback_result {
            Ok(records) => *rollback_records = records,
            Err(e) => tracing::warn!(error = %e, "rollback phase did not complete cleanly"),
        }

        // `close` only ever returns an error for `InterruptExecution` raised
        // by an after-hook; anything else is already logged and swallowed
        // inside it.
        if rollback_scope.close(&state, &ctx.configuration, &ctx.secrets, &mut experiment.extra).is_err() {
            interrupted = true;
        }

        interrupted
    } else {
        false
    };

    let close_state = json!({"deviated": *deviated});
    scope.close(&close_state, &ctx.configuration, &ctx.secrets, &mut experiment.extra)?;

    if rollback_interrupted {
        return Err(ChaosError::InterruptExecution(
            "experiment interrupted during rollback".to_string(),
        ));
    }

    result
}

async fn run_method_phase(
    experiment: &mut Experiment,
    ctx: &ExecutionContext,
    experiment_controls: &[ControlSpec],
    steady_states: &mut SteadyStates,
    run_records: &mut Vec<Run>,
    deviated: &mut bool,
) -> Result<(), ChaosError> {
    if let Some(hypothesis) = experiment.steady_state_hypothesis.as_ref() {
        let before = run_hypothesis_scoped(hypothesis, ctx, experiment_controls).await?;
        let met = before.tolerance_met;
        steady_states.before = Some(before);
        if !met {
            return Err(ChaosError::activity_failed(
                "steady state hypothesis was not met before the method ran",
            ));
        }
    }

    let attached = attached_at_experiment(experiment_controls);
    let method_effective = effective_controls(ControlLevel::Method, None, &attached);
    let method_scope = ControlScope::open(
        ControlLevel::Method,
        method_effective,
        &ctx.configuration,
        &ctx.secrets,
        &mut experiment.extra,
    )?;

    let method_result = interruptible(executor::run_activities(&experiment.method, ctx)).await;
    let method_state = match &method_result {
        Ok(records) => serde_json::to_value(records).unwrap_or(Value::Null),
        Err(e) => json!({"error": e.to_string()}),
    };
    let close_interrupted = method_scope
        .close(&method_state, &ctx.configuration, &ctx.secrets, &mut experiment.extra)
        .is_err();

    *run_records = method_result?;
    if close_interrupted {
        return Err(ChaosError::InterruptExecution(
            "experiment interrupted while closing the method control scope".to_string(),
        ));
    }

    if let Some(hypothesis) = experiment.steady_state_hypothesis.as_ref() {
        let after = run_hypothesis_scoped(hypothesis, ctx, experiment_controls).await?;
        if !after.tolerance_met {
            *deviated = true;
        }
        steady_states.after = Some(after);
    }

    Ok(())
}

/// Runs a hypothesis wrapped in its own hypothesis-level control scope. The
/// hypothesis itself has no `controls` field in the document model (only
/// `Experiment` and `Activity` do), so the only controls that can apply here
/// are global ones plus whatever cascades down automatically from the
/// experiment.
///
/// Unlike the method/rollback/activity scopes, this one's before/after flags
/// land on `SteadyStateOutcome.extra` rather than on the hypothesis document
/// itself: the journal records the outcome of running the hypothesis, and
/// that's where `journal.steady_states.before/after.extra` lives — the
/// hypothesis document snapshot at `journal.experiment.steady_state_hypothesis`
/// is not the right place for a record of what happened on a particular run.
async fn run_hypothesis_scoped(
    hypothesis: &crate::model::Hypothesis,
    ctx: &ExecutionContext,
    experiment_controls: &[ControlSpec],
) -> Result<crate::model::SteadyStateOutcome, ChaosError> {
    let mut context_extra = Map::new();

    let attached = attached_at_experiment(experiment_controls);
    let effective = effective_controls(ControlLevel::Hypothesis, None, &attached);
    let scope = ControlScope::open(
        ControlLevel::Hypothesis,
        effective,
        &ctx.configuration,
        &ctx.secrets,
        &mut context_extra,
    )?;

    let outcome = interruptible(steady_state::run_hypothesis(hypothesis, ctx)).await;
    let state = match &outcome {
        Ok(o) => serde_json::to_value(o).unwrap_or(Value::Null),
        Err(e) => json!({"error": e.to_string()}),
    };
    let close_interrupted = scope.close(&state, &ctx.configuration, &ctx.secrets, &mut context_extra).is_err();

    let mut outcome = outcome?;
    outcome.extra.extend(context_extra);
    if close_interrupted {
        return Err(ChaosError::InterruptExecution(
            "experiment interrupted while closing the hypothesis control scope".to_string(),
        ));
    }
    Ok(outcome)
}
