//! Structural validation of experiment documents.
//!
//! `validate_experiment` accumulates every structural defect it finds rather
//! than stopping at the first one, so a caller sees the whole list of
//! problems in a single pass. It never touches providers or the network —
//! that's the activity executor's job once a document is known to be sound.

use crate::errors::ChaosError;
use crate::model::{Activity, ActivityDef, ActivityType, ControlSpec, Experiment, Provider};

pub fn validate_experiment(experiment: &Experiment) -> Result<(), ChaosError> {
    if is_structurally_empty(experiment) {
        return Err(ChaosError::InvalidExperiment(vec![
            "an empty experiment is not an experiment".to_string(),
        ]));
    }

    let mut errors = Vec::new();

    if is_blank(&experiment.title) {
        errors.push("an experiment requires a title".to_string());
    }
    if is_blank(&experiment.description) {
        errors.push("an experiment requires a description".to_string());
    }
    if experiment.method.is_empty() {
        errors.push("an experiment requires a method with at least one activity".to_string());
    }

    for activity in &experiment.method {
        validate_activity(activity, &mut errors);
    }
    for activity in &experiment.rollbacks {
        validate_activity(activity, &mut errors);
    }
    if let Some(controls) = &experiment.controls {
        for control in controls {
            validate_control(control, &mut errors);
        }
    }

    if let Some(hypothesis) = &experiment.steady_state_hypothesis {
        if is_blank(&hypothesis.title) {
            errors.push("a hypothesis requires a title".to_string());
        }
        for probe in &hypothesis.probes {
            validate_probe(probe, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ChaosError::InvalidExperiment(errors))
    }
}

fn is_structurally_empty(experiment: &Experiment) -> bool {
    is_blank(&experiment.title)
        && is_blank(&experiment.description)
        && experiment.method.is_empty()
        && experiment.rollbacks.is_empty()
        && experiment.steady_state_hypothesis.is_none()
        && experiment.controls.is_none()
        && experiment.configuration.is_empty()
        && experiment.secrets.is_empty()
        && experiment.extra.is_empty()
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Validates one of the three activity shapes (see the module docs on
/// `Activity` for what each shape means): a pure `ref` needs nothing beyond a
/// non-empty string; a full definition needs a provider that itself
/// validates, plus sane timeout/pause values.
pub fn validate_activity(activity: &Activity, errors: &mut Vec<String>) {
    match activity {
        Activity::Ref(r) => {
            if is_blank(&r.ref_) {
                errors.push("a reference to an activity must be a non-empty string".to_string());
            }
        }
        Activity::Full(def) => validate_activity_def(def, errors),
    }
}

fn validate_activity_def(def: &ActivityDef, errors: &mut Vec<String>) {
    if is_blank(&def.name) {
        errors.push("an activity must have a non-empty name".to_string());
        return;
    }

    if let Some(timeout) = def.timeout {
        if timeout < 0.0 {
            errors.push(format!("activity '{}': timeout must not be negative", def.name));
        }
    }

    if let Some(pauses) = &def.pauses {
        if pauses.before.map(|b| b < 0.0).unwrap_or(false) {
            errors.push(format!("activity '{}': pauses.before must not be negative", def.name));
        }
        if pauses.after.map(|a| a < 0.0).unwrap_or(false) {
            errors.push(format!("activity '{}': pauses.after must not be negative", def.name));
        }
    }

    validate_provider(&def.name, &def.provider, errors);

    if let Some(controls) = &def.controls {
        for control in controls {
            validate_control(control, errors);
        }
    }
}

/// Unlike an activity's code provider, a missing control module is a hard
/// error rather than a dispatch-time warning: an unresolvable control can
/// silently drop the hooks an experiment relies on to stay safe.
fn validate_control(control: &ControlSpec, errors: &mut Vec<String>) {
    if is_blank(&control.name) {
        errors.push("a control requires a non-empty name".to_string());
    }
    if is_blank(&control.provider.module) {
        errors.push(format!("control '{}': provider requires a 'module'", control.name));
    }
}

fn validate_probe(activity: &Activity, errors: &mut Vec<String>) {
    validate_activity(activity, errors);

    if let Activity::Full(def) = activity {
        if def.activity_type != ActivityType::Probe {
            errors.push(format!(
                "activity '{}' is used as a probe but is declared as an action",
                def.name
            ));
        }
        if def.tolerance.is_none() {
            errors.push(format!("probe '{}' requires a tolerance", def.name));
        }
    }
}

fn validate_provider(activity_name: &str, provider: &Provider, errors: &mut Vec<String>) {
    match provider {
        Provider::Code(p) => {
            if is_blank(&p.module) {
                errors.push(format!("activity '{}': code provider requires a 'module'", activity_name));
            }
            if is_blank(&p.func) {
                errors.push(format!("activity '{}': code provider requires a 'func'", activity_name));
            }
            if !is_blank(&p.module) && !is_blank(&p.func) && !crate::providers::code::is_resolvable(&p.module, &p.func) {
                tracing::warn!(
                    activity = activity_name,
                    module = %p.module,
                    func = %p.func,
                    "code provider could not be resolved; activity will fail at dispatch time"
                );
            }
        }
        Provider::Process(p) => {
            if is_blank(&p.path) {
                errors.push(format!("activity '{}': process provider requires a 'path'", activity_name));
            }
        }
        Provider::Http(p) => {
            if is_blank(&p.url) {
                errors.push(format!("activity '{}': http provider requires a 'url'", activity_name));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn from_json(value: serde_json::Value) -> Experiment {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn empty_experiment_is_rejected_with_its_own_message() {
        let exp = from_json(json!({}));
        let err = validate_experiment(&exp).unwrap_err();
        match err {
            ChaosError::InvalidExperiment(errs) => {
                assert_eq!(errs, vec!["an empty experiment is not an experiment"]);
            }
            _ => panic!("expected InvalidExperiment"),
        }
    }

    #[test]
    fn missing_method_is_reported() {
        let exp = from_json(json!({"title": "t", "description": "d"}));
        let err = validate_experiment(&exp).unwrap_err();
        match err {
            ChaosError::InvalidExperiment(errs) => {
                assert!(errs.iter().any(|e| e.contains("requires a method")));
            }
            _ => panic!("expected InvalidExperiment"),
        }
    }

    #[test]
    fn valid_experiment_passes() {
        let exp = from_json(json!({
            "title": "t",
            "description": "d",
            "method": [{
                "type": "action",
                "name": "noop",
                "provider": {"type": "process", "path": "/bin/true"}
            }]
        }));
        assert!(validate_experiment(&exp).is_ok());
    }

    #[test]
    fn accumulates_multiple_errors_instead_of_failing_fast() {
        let exp = from_json(json!({}));
        // an empty document short-circuits to its own single message,
        // so exercise accumulation with a non-empty-but-broken document.
        let exp2 = from_json(json!({
            "title": "",
            "description": "",
            "method": []
        }));
        assert!(validate_experiment(&exp).is_err());
        let err = validate_experiment(&exp2).unwrap_err();
        match err {
            ChaosError::InvalidExperiment(errs) => assert!(errs.len() >= 3),
            _ => panic!("expected InvalidExperiment"),
        }
    }

    #[test]
    fn probe_without_tolerance_is_rejected() {
        let exp = from_json(json!({
            "title": "t",
            "description": "d",
            "steady-state-hypothesis": {
                "title": "steady",
                "probes": [{
                    "type": "probe",
                    "name": "check",
                    "provider": {"type": "http", "url": "http://example.com"}
                }]
            },
            "method": [{
                "type": "action",
                "name": "noop",
                "provider": {"type": "process", "path": "/bin/true"}
            }]
        }));
        let err = validate_experiment(&exp).unwrap_err();
        match err {
            ChaosError::InvalidExperiment(errs) => {
                assert!(errs.iter().any(|e| e.contains("requires a tolerance")));
            }
            _ => panic!("expected InvalidExperiment"),
        }
    }
}
