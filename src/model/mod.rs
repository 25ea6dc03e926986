//! Data model for chaos experiment documents.
//!
//! These types mirror the free-form mapping a chaos experiment document is
//! made of (see the format the loader accepts): a `title`/`description`, an
//! optional steady-state hypothesis, an ordered `method` of activities, and
//! `rollbacks` to undo whatever the method perturbed. Activities bottom out
//! in one of three provider shapes (code, process, http).
//!
//! Most structs carry an `extra` bag of additional JSON keys. Control hooks
//! are allowed to stash observability flags directly on the document (e.g.
//! `before_activity_control: true`) the way the runner's ancestor does by
//! mutating its free-form dict; `extra` is where those land in a typed
//! rewrite, and it round-trips through (de)serialization via `#[serde(flatten)]`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A complete experiment document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub title: String,
    pub description: String,

    #[serde(rename = "steady-state-hypothesis", default, skip_serializing_if = "Option::is_none")]
    pub steady_state_hypothesis: Option<Hypothesis>,

    #[serde(default)]
    pub method: Vec<Activity>,

    #[serde(default)]
    pub rollbacks: Vec<Activity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controls: Option<Vec<ControlSpec>>,

    #[serde(default)]
    pub configuration: Map<String, Value>,

    #[serde(default)]
    pub secrets: Map<String, Value>,

    #[serde(default)]
    pub dry: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The steady-state hypothesis: a named set of probes with tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub title: String,

    #[serde(default)]
    pub probes: Vec<Activity>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An activity is either a bare reference to another activity by name, or a
/// full definition. Both shapes can appear anywhere an `Activity` is expected
/// (a hypothesis probe, a method step, a rollback step).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Activity {
    Ref(ActivityRef),
    Full(Box<ActivityDef>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRef {
    #[serde(rename = "ref")]
    pub ref_: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Probe,
    Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDef {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub name: String,
    pub provider: Provider,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pauses: Option<Pauses>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controls: Option<Vec<ControlSpec>>,

    /// Only meaningful when the activity is a hypothesis probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<Tolerance>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Pauses {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<f64>,
}

/// The three closed provider shapes. Tagged on `type` in the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Provider {
    Code(CodeProvider),
    Process(ProcessProvider),
    Http(HttpProvider),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeProvider {
    pub module: String,
    pub func: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Either a pre-split argument vector or a single command-line string to be
/// split with shell-word semantics (quoting, escaping).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessArguments {
    List(Vec<String>),
    Line(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessProvider {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<ProcessArguments>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Get
    }
}

/// `expected_status` accepts either a single code or a set of acceptable ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedStatus {
    One(u16),
    Many(Vec<u16>),
}

impl ExpectedStatus {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            ExpectedStatus::One(s) => *s == status,
            ExpectedStatus::Many(set) => set.contains(&status),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProvider {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<ExpectedStatus>,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// A probe's acceptance predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tolerance {
    Bool(bool),
    Number(f64),
    Text(String),
    Range(Vec<Value>),
    CodeReference(CodeProvider),
}

/// A control's provider. Unlike an activity's code provider, a control has
/// no `func`: the document names a `module`, and the runner calls whichever
/// of that module's fixed lifecycle hooks applies (`configure`, `before`,
/// `after`, `cleanup`) — see `crate::controls`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlProvider {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,
    pub module: String,
}

/// A hook attached at one of the scopes below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSpec {
    pub name: String,
    pub provider: ControlProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ControlScopeFilter>,
    #[serde(default = "default_true")]
    pub automatic: bool,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// A control's own `scope` field: it narrows whether it fires before,
/// after, or (when absent) both around the level it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlScopeFilter {
    Before,
    After,
}

/// The nesting level a control scope can be opened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlLevel {
    Loader,
    Experiment,
    Hypothesis,
    Method,
    Rollback,
    Activity,
}

impl ControlLevel {
    /// Levels strictly above this one, nearest first, used to find
    /// automatically-cascading controls.
    pub fn ancestors(self) -> &'static [ControlLevel] {
        use ControlLevel::*;
        match self {
            Activity => &[Method, Experiment, Loader],
            Method => &[Experiment, Loader],
            Rollback => &[Experiment, Loader],
            Hypothesis => &[Experiment, Loader],
            Experiment => &[Loader],
            Loader => &[],
        }
    }
}

/// One journal entry: the outcome of a single activity run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub activity: ActivityDef,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    pub start: String,
    pub end: String,
    pub duration: f64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// The verdict produced by evaluating a hypothesis once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteadyStateOutcome {
    pub title: String,
    pub probes: Vec<Run>,
    pub tolerance_met: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SteadyStates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<SteadyStateOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<SteadyStateOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalStatus {
    Completed,
    Failed,
    Aborted,
    Interrupted,
}

/// The full run record returned by `run_experiment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    pub status: JournalStatus,
    pub deviated: bool,
    pub steady_states: SteadyStates,
    pub run: Vec<Run>,
    pub rollbacks: Vec<Run>,
    pub start: String,
    pub end: String,
    pub duration: f64,
    pub experiment: Experiment,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Global runner settings, distinct from a single experiment's document.
/// `controls.<name>` entries here are loaded once and apply across the
/// whole run unless overridden by `automatic: false`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub controls: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
