//! Loads an experiment document from disk.
//!
//! Dispatches on file extension: `.json` parses as JSON, `.yaml`/`.yml` parse
//! as YAML. Anything else, or a document that doesn't deserialize into an
//! [`Experiment`](crate::model::Experiment), is a structural problem
//! discovered before any activity runs, so it comes back as
//! `ChaosError::InvalidExperiment`.

use std::path::Path;

use crate::errors::ChaosError;
use crate::model::Experiment;

pub fn load_experiment_from_file<P: AsRef<Path>>(path: P) -> Result<Experiment, ChaosError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let content = std::fs::read_to_string(path).map_err(|e| {
        ChaosError::InvalidExperiment(vec![format!(
            "could not read experiment file '{}': {}",
            path.display(),
            e
        )])
    })?;

    match extension.as_str() {
        "json" => serde_json::from_str(&content).map_err(|e| {
            ChaosError::InvalidExperiment(vec![format!("could not parse JSON experiment: {}", e)])
        }),
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| {
            ChaosError::InvalidExperiment(vec![format!("could not parse YAML experiment: {}", e)])
        }),
        other => Err(ChaosError::InvalidExperiment(vec![format!(
            "unsupported experiment file extension '{}': only json, yaml or yml are supported",
            other
        )])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("chaos-loader-test-{}-{}", std::process::id(), name));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_json_experiment() {
        let path = write_temp(
            "exp.json",
            r#"{"title":"t","description":"d","method":[]}"#,
        );
        let exp = load_experiment_from_file(&path).unwrap();
        assert_eq!(exp.title, "t");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn loads_yaml_experiment() {
        let path = write_temp(
            "exp.yaml",
            "title: t\ndescription: d\nmethod: []\n",
        );
        let exp = load_experiment_from_file(&path).unwrap();
        assert_eq!(exp.title, "t");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_unsupported_extension() {
        let path = write_temp("exp.toml", "title = \"t\"");
        let err = load_experiment_from_file(&path).unwrap_err();
        assert!(matches!(err, ChaosError::InvalidExperiment(_)));
        std::fs::remove_file(path).ok();
    }
}
