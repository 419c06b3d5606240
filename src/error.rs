// Error types. `ServiceError` describes one failed remote call,
// `WorkflowError` describes which stage of a run failed and why.

use thiserror::Error;
use uuid::Uuid;

use crate::models::IterationStatus;
use crate::workflow::UploadFailure;

/// Failure of a single call against the training or prediction endpoint.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("missing API key for the {0} endpoint")]
    MissingKey(&'static str),
    #[error("API key for the {0} endpoint is not a valid header value")]
    InvalidKey(&'static str),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("remote error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("image rejected: {0}")]
    Rejected(String),
}

impl ServiceError {
    /// Whether repeating the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Transport(_) => true,
            ServiceError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the remote side rejected the call because the named
    /// resource already exists.
    pub fn is_conflict(&self) -> bool {
        match self {
            ServiceError::Api { status, code, .. } => {
                *status == 409 || code.contains("Duplicate") || code.contains("NotUnique")
            }
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ServiceError::MissingKey(_) | ServiceError::InvalidKey(_) | ServiceError::Unauthorized(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("authentication failed: {0}")]
    Authentication(#[source] ServiceError),
    #[error("could not create {resource} `{name}`: {source}")]
    ResourceCreation {
        resource: &'static str,
        name: String,
        #[source]
        source: ServiceError,
    },
    #[error("no {0} domain is offered by the training endpoint")]
    NoDomain(&'static str),
    #[error("no tag was created for label `{0}`")]
    MissingTag(String),
    #[error("dataset error: {0}")]
    Dataset(String),
    #[error("{failed} of {attempted} image uploads failed: {}", list_failures(.failures))]
    Upload {
        failed: usize,
        attempted: usize,
        failures: Vec<UploadFailure>,
    },
    #[error("training of iteration {iteration_id} ended with status {status}")]
    TrainingFailed {
        iteration_id: Uuid,
        status: IterationStatus,
    },
    #[error("iteration {iteration_id} still training after {attempts} status fetches")]
    TrainingTimeout { iteration_id: Uuid, attempts: u32 },
    #[error("could not start training: {0}")]
    Training(#[source] ServiceError),
    #[error("polling training status failed: {0}")]
    Polling(#[source] ServiceError),
    #[error("could not publish iteration: {0}")]
    Publish(#[source] ServiceError),
    #[error("prediction failed: {0}")]
    Prediction(#[source] ServiceError),
}

fn list_failures(failures: &[UploadFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl WorkflowError {
    /// Wrap a service error for a stage, reporting credential problems
    /// as authentication failures whatever the stage.
    pub(crate) fn at_stage(err: ServiceError, stage: fn(ServiceError) -> WorkflowError) -> Self {
        if err.is_auth() {
            WorkflowError::Authentication(err)
        } else {
            stage(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: &str) -> ServiceError {
        ServiceError::Api {
            status,
            code: code.into(),
            message: "nope".into(),
        }
    }

    #[test]
    fn server_side_and_throttling_errors_are_transient() {
        assert!(api(503, "ServiceUnavailable").is_transient());
        assert!(api(429, "TooManyRequests").is_transient());
        assert!(!api(404, "BadRequestIterationNotFound").is_transient());
        assert!(!ServiceError::Unauthorized("bad key".into()).is_transient());
    }

    #[test]
    fn duplicate_codes_are_conflicts() {
        assert!(api(400, "BadRequestTagNameNotUnique").is_conflict());
        assert!(!api(400, "BadRequestImageFormat").is_conflict());
        assert!(api(400, "BadRequestDuplicateTagName").is_conflict());
        assert!(api(409, "Conflict").is_conflict());
    }

    #[test]
    fn credential_errors_map_to_authentication() {
        let err = WorkflowError::at_stage(ServiceError::MissingKey("training"), WorkflowError::Polling);
        assert!(matches!(err, WorkflowError::Authentication(_)));

        let err = WorkflowError::at_stage(api(500, "Internal"), WorkflowError::Polling);
        assert!(matches!(err, WorkflowError::Polling(_)));
    }

    #[test]
    fn upload_error_names_every_failed_file() {
        let err = WorkflowError::Upload {
            failed: 2,
            attempted: 5,
            failures: vec![
                UploadFailure {
                    file_name: "stop_2.jpg".into(),
                    tag_name: "Stop".into(),
                    reason: "image rejected: ErrorImageFormat".into(),
                },
                UploadFailure {
                    file_name: "go_1.jpg".into(),
                    tag_name: "Go".into(),
                    reason: "cannot read file".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "2 of 5 image uploads failed: stop_2.jpg (Stop): image rejected: ErrorImageFormat; \
             go_1.jpg (Go): cannot read file"
        );
    }
}
