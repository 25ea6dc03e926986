//! Steady-state hypothesis evaluation: run every probe, then check each
//! probe's output against its declared [`Tolerance`].

use serde_json::Value;

use crate::errors::ChaosError;
use crate::executor::{self, ExecutionContext};
use crate::model::{Activity, Hypothesis, Provider, Run, SteadyStateOutcome, Tolerance};
use crate::providers;

/// Runs every probe in `hypothesis` and folds the per-probe tolerance checks
/// into one outcome. A probe that fails outright (its provider errors) never
/// meets its tolerance, same as one that runs fine but returns an
/// out-of-range value.
pub async fn run_hypothesis(hypothesis: &Hypothesis, ctx: &ExecutionContext) -> Result<SteadyStateOutcome, ChaosError> {
    let mut probes = Vec::with_capacity(hypothesis.probes.len());
    let mut tolerance_met = true;

    for probe in &hypothesis.probes {
        let run = executor::execute_activity(probe, ctx).await?;
        let met = probe_meets_tolerance(probe, &run, ctx).await?;
        tolerance_met &= met;
        probes.push(run);
    }

    Ok(SteadyStateOutcome {
        title: hypothesis.title.clone(),
        probes,
        tolerance_met,
        extra: Default::default(),
    })
}

async fn probe_meets_tolerance(probe: &Activity, run: &Run, ctx: &ExecutionContext) -> Result<bool, ChaosError> {
    if run.status != crate::model::RunStatus::Succeeded {
        return Ok(false);
    }

    // an HTTP probe's output is always the {status, headers, body} envelope
    // from `providers::http::run`, never a bare scalar; a probe's own
    // tolerance is stated against the response status, so that's what a
    // scalar tolerance has to be checked against here.
    let is_http = matches!(run.activity.provider, Provider::Http(_));

    let Activity::Full(def) = probe else {
        // a bare ref resolves to the run's own activity, which does carry
        // a tolerance once looked up.
        return Ok(matches_tolerance(run.activity.tolerance.as_ref(), run.output.as_ref(), is_http, ctx).await?);
    };

    matches_tolerance(def.tolerance.as_ref(), run.output.as_ref(), is_http, ctx).await
}

async fn matches_tolerance(
    tolerance: Option<&Tolerance>,
    output: Option<&Value>,
    is_http: bool,
    ctx: &ExecutionContext,
) -> Result<bool, ChaosError> {
    let Some(tolerance) = tolerance else {
        return Ok(false);
    };
    let Some(output) = output else {
        return Ok(false);
    };

    // a bare scalar tolerance against an HTTP probe compares against the
    // response status, not the whole envelope; a code-reference tolerance
    // still gets the full envelope, since it may want headers or body too.
    let scalar_subject = if is_http {
        output.get("status").unwrap_or(output)
    } else {
        output
    };

    Ok(match tolerance {
        Tolerance::Bool(expected) => scalar_subject.as_bool() == Some(*expected),
        Tolerance::Number(expected) => scalar_subject.as_f64() == Some(*expected),
        Tolerance::Text(expected) => scalar_subject.as_str() == Some(expected.as_str()),
        Tolerance::Range(bounds) if bounds.len() == 2 => {
            let value = scalar_subject.as_f64();
            let low = bounds[0].as_f64();
            let high = bounds[1].as_f64();
            matches!((value, low, high), (Some(v), Some(l), Some(h)) if v >= l && v <= h)
        }
        Tolerance::Range(_) => false,
        Tolerance::CodeReference(provider) => {
            let mut arguments = provider.arguments.clone();
            arguments.insert("value".to_string(), output.clone());
            let checker = crate::model::CodeProvider { module: provider.module.clone(), func: provider.func.clone(), arguments };
            let result = providers::code::run(&checker, &ctx.configuration, &ctx.secrets, None).await?;
            result.as_bool().unwrap_or(false)
        }
    })
}
