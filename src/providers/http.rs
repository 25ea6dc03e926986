//! The HTTP provider: performs one request and validates its status.

use std::time::Duration;

use reqwest::{Method, Client};
use serde_json::{json, Map, Value};

use crate::errors::ChaosError;
use crate::model::{HttpMethod, HttpProvider};

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

/// Arguments become a query string for read-only verbs, a JSON body
/// otherwise.
fn carries_request_body(method: HttpMethod) -> bool {
    matches!(method, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
}

pub async fn run(
    provider: &HttpProvider,
    _configuration: &Map<String, Value>,
    _secrets: &Map<String, Value>,
    timeout: Option<f64>,
) -> Result<Value, ChaosError> {
    let client = Client::new();

    let mut request = client.request(to_reqwest_method(provider.method), &provider.url);

    for (key, value) in &provider.headers {
        if let Some(v) = value.as_str() {
            request = request.header(key, v);
        }
    }

    if !provider.arguments.is_empty() {
        if carries_request_body(provider.method) {
            request = request.json(&provider.arguments);
        } else {
            let query: Vec<(String, String)> = provider
                .arguments
                .iter()
                .map(|(k, v)| (k.clone(), value_to_query_string(v)))
                .collect();
            request = request.query(&query);
        }
    }

    if let Some(secs) = timeout {
        if secs > 0.0 {
            request = request.timeout(Duration::from_secs_f64(secs));
        }
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ChaosError::activity_failed(format!("request to '{}' timed out", provider.url))
        } else {
            ChaosError::activity_failed(format!("request to '{}' failed: {}", provider.url, e))
        }
    })?;

    let status = response.status().as_u16();

    let headers: Map<String, Value> = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
        .collect();

    let body_text = response
        .text()
        .await
        .map_err(|e| ChaosError::activity_failed(format!("could not read response body: {}", e)))?;
    let body = serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));

    if let Some(expected) = &provider.expected_status {
        if !expected.matches(status) {
            return Err(ChaosError::activity_failed(format!(
                "request to '{}' returned status {}, expected {:?}",
                provider.url, status, expected
            )));
        }
    }

    Ok(json!({
        "status": status,
        "headers": Value::Object(headers),
        "body": body,
    }))
}

fn value_to_query_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
