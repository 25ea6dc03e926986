//! The process provider: spawns a subprocess and captures its outcome.

use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::process::Command;

use crate::errors::ChaosError;
use crate::model::{ProcessArguments, ProcessProvider};

pub async fn run(
    provider: &ProcessProvider,
    _configuration: &Map<String, Value>,
    _secrets: &Map<String, Value>,
    timeout: Option<f64>,
) -> Result<Value, ChaosError> {
    let args = resolve_arguments(&provider.arguments)?;

    let mut command = Command::new(&provider.path);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| {
        ChaosError::activity_failed(format!("could not spawn process '{}': {}", provider.path, e))
    })?;

    let wait = child.wait_with_output();

    let output = match timeout {
        Some(secs) if secs > 0.0 => {
            match tokio::time::timeout(Duration::from_secs_f64(secs), wait).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ChaosError::activity_failed(format!(
                        "process '{}' timed out after {}s and was killed",
                        provider.path, secs
                    )));
                }
            }
        }
        _ => wait.await,
    }
    .map_err(|e| ChaosError::activity_failed(format!("process '{}' failed: {}", provider.path, e)))?;

    let status = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let result = json!({
        "status": status,
        "stdout": stdout,
        "stderr": stderr,
    });

    if output.status.success() {
        Ok(result)
    } else {
        Err(ChaosError::activity_failed(format!(
            "process '{}' exited with status {}: {}",
            provider.path, status, stderr.trim()
        )))
    }
}

fn resolve_arguments(arguments: &Option<ProcessArguments>) -> Result<Vec<String>, ChaosError> {
    match arguments {
        None => Ok(Vec::new()),
        Some(ProcessArguments::List(list)) => Ok(list.clone()),
        Some(ProcessArguments::Line(line)) => shell_words::split(line).map_err(|e| {
            ChaosError::activity_failed(format!("could not parse process arguments '{}': {}", line, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_on_zero_exit() {
        let provider = ProcessProvider {
            path: "/bin/true".into(),
            arguments: None,
        };
        let result = run(&provider, &Map::new(), &Map::new(), None).await.unwrap();
        assert_eq!(result["status"], json!(0));
    }

    #[tokio::test]
    async fn fails_on_non_zero_exit() {
        let provider = ProcessProvider {
            path: "/bin/false".into(),
            arguments: None,
        };
        let err = run(&provider, &Map::new(), &Map::new(), None).await.unwrap_err();
        assert!(err.is_activity_failed());
    }

    #[tokio::test]
    async fn captures_stdout() {
        let provider = ProcessProvider {
            path: "/bin/echo".into(),
            arguments: Some(ProcessArguments::Line("hello world".into())),
        };
        let result = run(&provider, &Map::new(), &Map::new(), None).await.unwrap();
        assert_eq!(result["stdout"], json!("hello world\n"));
    }

    #[tokio::test]
    async fn times_out_a_long_running_process() {
        let provider = ProcessProvider {
            path: "/bin/sleep".into(),
            arguments: Some(ProcessArguments::List(vec!["5".into()])),
        };
        let err = run(&provider, &Map::new(), &Map::new(), Some(0.05))
            .await
            .unwrap_err();
        assert!(err.is_activity_failed());
    }
}
