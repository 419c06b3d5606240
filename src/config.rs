// Runtime settings, read from environment variables with the same
// fallback style as the API client: every value except the two API keys
// has a default.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::workflow::{PollPolicy, WorkflowOptions};

pub const DEFAULT_ENDPOINT: &str = "https://southcentralus.api.cognitive.microsoft.com";

/// Everything a run needs that is not typed in at the menu.
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: String,
    pub training_key: Option<String>,
    pub prediction_key: Option<String>,
    pub project_name: String,
    pub samples_dir: PathBuf,
    pub labels: Vec<String>,
    pub test_image: PathBuf,
    pub poll: PollPolicy,
    pub max_upload_failures: usize,
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let samples_dir = PathBuf::from(get("CUSTOMVISION_SAMPLES_DIR").unwrap_or_else(|| "images".into()));
        let labels = match get("CUSTOMVISION_LABELS") {
            Some(list) => list
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            None => vec!["Stop".to_string(), "Go".to_string()],
        };
        if labels.len() < 2 {
            anyhow::bail!("CUSTOMVISION_LABELS must name at least two labels");
        }
        if let Some(dup) = labels.iter().enumerate().find_map(|(i, l)| labels[..i].contains(l).then_some(l)) {
            anyhow::bail!("CUSTOMVISION_LABELS names `{}` more than once", dup);
        }
        let test_image = get("CUSTOMVISION_TEST_IMAGE")
            .map(PathBuf::from)
            .unwrap_or_else(|| samples_dir.join("Test").join("test_stop.jpg"));

        let poll = PollPolicy {
            interval: Duration::from_millis(parse_or(&get, "CUSTOMVISION_POLL_INTERVAL_MS", 1000)?),
            max_interval: Duration::from_millis(parse_or(&get, "CUSTOMVISION_POLL_MAX_INTERVAL_MS", 1000)?),
            backoff: parse_or(&get, "CUSTOMVISION_POLL_BACKOFF", 1.0)?,
            max_attempts: parse_or(&get, "CUSTOMVISION_POLL_MAX_ATTEMPTS", 900)?,
            fetch_retries: parse_or(&get, "CUSTOMVISION_POLL_FETCH_RETRIES", 3)?,
        };
        if poll.backoff < 1.0 {
            anyhow::bail!("CUSTOMVISION_POLL_BACKOFF must be at least 1.0");
        }

        Ok(Settings {
            endpoint: get("CUSTOMVISION_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.into()),
            training_key: get("AZURE_CUSTOMVISION_TRAINING_API_KEY"),
            prediction_key: get("AZURE_CUSTOMVISION_PREDICTION_API_KEY"),
            project_name: get("CUSTOMVISION_PROJECT_NAME").unwrap_or_else(|| "Sample Rust Project".into()),
            samples_dir,
            labels,
            test_image,
            poll,
            max_upload_failures: parse_or(&get, "CUSTOMVISION_MAX_UPLOAD_FAILURES", 0)?,
        })
    }

    pub fn workflow_options(&self) -> WorkflowOptions {
        WorkflowOptions {
            poll: self.poll.clone(),
            max_upload_failures: self.max_upload_failures,
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: `{}`", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_match_the_sample_layout() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(s.labels, vec!["Stop", "Go"]);
        assert_eq!(s.test_image, PathBuf::from("images/Test/test_stop.jpg"));
        assert_eq!(s.poll.interval, Duration::from_secs(1));
        assert_eq!(s.poll.max_attempts, 900);
        assert_eq!(s.max_upload_failures, 0);
        assert!(s.training_key.is_none());
    }

    #[test]
    fn keys_and_overrides_are_read() {
        let s = settings(&[
            ("AZURE_CUSTOMVISION_TRAINING_API_KEY", "train"),
            ("AZURE_CUSTOMVISION_PREDICTION_API_KEY", "predict"),
            ("CUSTOMVISION_LABELS", "Cat, Dog ,Bird"),
            ("CUSTOMVISION_SAMPLES_DIR", "/data"),
            ("CUSTOMVISION_POLL_INTERVAL_MS", "250"),
        ])
        .unwrap();
        assert_eq!(s.training_key.as_deref(), Some("train"));
        assert_eq!(s.prediction_key.as_deref(), Some("predict"));
        assert_eq!(s.labels, vec!["Cat", "Dog", "Bird"]);
        assert_eq!(s.test_image, PathBuf::from("/data/Test/test_stop.jpg"));
        assert_eq!(s.poll.interval, Duration::from_millis(250));
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let s = settings(&[("AZURE_CUSTOMVISION_TRAINING_API_KEY", "  ")]).unwrap();
        assert!(s.training_key.is_none());
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = settings(&[("CUSTOMVISION_POLL_MAX_ATTEMPTS", "lots")]).unwrap_err();
        assert!(err.to_string().contains("CUSTOMVISION_POLL_MAX_ATTEMPTS"));
    }

    #[test]
    fn single_label_is_rejected() {
        assert!(settings(&[("CUSTOMVISION_LABELS", "Stop")]).is_err());
    }

    #[test]
    fn repeated_label_is_rejected() {
        let err = settings(&[("CUSTOMVISION_LABELS", "Stop, Go,Stop")]).unwrap_err();
        assert!(err.to_string().contains("`Stop` more than once"));
        assert!(settings(&[("CUSTOMVISION_LABELS", "Stop,Stop")]).is_err());
    }
}
