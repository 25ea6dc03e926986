//! Provider runners: the three closed ways an activity can act on the
//! world. Each takes the activity's provider spec plus the already-resolved
//! `configuration`/`secrets` maps and either returns a result value or fails
//! with `ChaosError::ActivityFailed`.
//!
//! Dispatch is a flat match over the tagged `Provider` enum rather than a
//! trait-object table, since the variants are closed by the document format
//! (code/process/http) and unlikely to grow.

pub mod code;
pub mod http;
pub mod process;

use serde_json::{Map, Value};

use crate::errors::ChaosError;
use crate::model::Provider;

pub async fn run_provider(
    provider: &Provider,
    configuration: &Map<String, Value>,
    secrets: &Map<String, Value>,
    timeout: Option<f64>,
) -> Result<Value, ChaosError> {
    match provider {
        Provider::Code(p) => code::run(p, configuration, secrets, timeout).await,
        Provider::Process(p) => process::run(p, configuration, secrets, timeout).await,
        Provider::Http(p) => http::run(p, configuration, secrets, timeout).await,
    }
}
