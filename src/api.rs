// HTTP clients for the two Custom Vision endpoint families. Both are small
// blocking reqwest clients with the API key installed as a default header,
// so every call is authenticated the same way.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{
    Domain, ImageCreateSummary, ImageFileCreateBatch, ImagePrediction, Iteration, IterationUpdate,
    Project, Tag,
};
use crate::service::{PredictionService, TrainingService};

const TRAINING_PATH: &str = "customvision/v2.2/Training";
const PREDICTION_PATH: &str = "customvision/v2.0/Prediction";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client bound to the training endpoint.
#[derive(Clone)]
pub struct TrainingClient {
    client: Client,
    base_url: String,
}

/// Client bound to the prediction endpoint.
#[derive(Clone)]
pub struct PredictionClient {
    client: Client,
    base_url: String,
}

impl TrainingClient {
    /// Exchange a training key for a client handle. Nothing is sent yet;
    /// a rejected key shows up as `Unauthorized` on the first call.
    pub fn authenticate(endpoint: &str, api_key: Option<&str>) -> Result<Self, ServiceError> {
        Ok(TrainingClient {
            client: keyed_client("Training-Key", "training", api_key)?,
            base_url: join_url(endpoint, TRAINING_PATH),
        })
    }

    fn project_url(&self, project_id: Uuid, rest: &str) -> String {
        format!("{}/projects/{}/{}", self.base_url, project_id, rest)
    }
}

impl PredictionClient {
    /// Exchange a prediction key for a client handle.
    pub fn authenticate(endpoint: &str, api_key: Option<&str>) -> Result<Self, ServiceError> {
        Ok(PredictionClient {
            client: keyed_client("Prediction-Key", "prediction", api_key)?,
            base_url: join_url(endpoint, PREDICTION_PATH),
        })
    }
}

fn join_url(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path)
}

fn keyed_client(
    header: &'static str,
    endpoint_name: &'static str,
    api_key: Option<&str>,
) -> Result<Client, ServiceError> {
    let key = api_key
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(ServiceError::MissingKey(endpoint_name))?;
    let mut value = HeaderValue::from_str(key).map_err(|_| ServiceError::InvalidKey(endpoint_name))?;
    value.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(header, value);
    let client = Client::builder()
        .default_headers(headers)
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    Ok(client)
}

#[derive(Deserialize)]
struct RemoteError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct WrappedRemoteError {
    error: RemoteError,
}

/// Pull `code` and `message` out of an error body. The service answers
/// either flat or wrapped in `error`; anything else is kept as the message.
fn parse_remote_error(body: &str) -> (String, String) {
    if let Ok(wrapped) = serde_json::from_str::<WrappedRemoteError>(body) {
        return (wrapped.error.code, wrapped.error.message);
    }
    match serde_json::from_str::<RemoteError>(body) {
        Ok(flat) if !flat.code.is_empty() || !flat.message.is_empty() => (flat.code, flat.message),
        _ => (String::new(), body.to_string()),
    }
}

fn send(req: RequestBuilder) -> Result<Response, ServiceError> {
    let res = req.send()?;
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let txt = res.text().unwrap_or_else(|_| "".into());
    let (code, message) = parse_remote_error(&txt);
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ServiceError::Unauthorized(format!("{} - {}", status, message)));
    }
    Err(ServiceError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, ServiceError> {
    let txt = send(req)?.text()?;
    serde_json::from_str(&txt).map_err(|e| ServiceError::Decode(e.to_string()))
}

fn with_iteration(req: RequestBuilder, iteration_id: Option<Uuid>) -> RequestBuilder {
    match iteration_id {
        Some(id) => req.query(&[("iterationId", id.to_string())]),
        None => req,
    }
}

impl TrainingService for TrainingClient {
    fn get_domains(&self) -> Result<Vec<Domain>, ServiceError> {
        let url = format!("{}/domains", self.base_url);
        send_json(self.client.get(&url))
    }

    fn create_project(&self, name: &str, domain_id: Option<Uuid>) -> Result<Project, ServiceError> {
        let url = format!("{}/projects", self.base_url);
        let mut req = self.client.post(&url).query(&[("name", name)]);
        if let Some(id) = domain_id {
            req = req.query(&[("domainId", id.to_string())]);
        }
        debug!(%url, name, "creating project");
        send_json(req)
    }

    fn create_tag(&self, project_id: Uuid, name: &str) -> Result<Tag, ServiceError> {
        let url = self.project_url(project_id, "tags");
        send_json(self.client.post(&url).query(&[("name", name)]))
    }

    fn get_tags(&self, project_id: Uuid) -> Result<Vec<Tag>, ServiceError> {
        let url = self.project_url(project_id, "tags");
        send_json(self.client.get(&url))
    }

    fn create_images_from_files(
        &self,
        project_id: Uuid,
        batch: &ImageFileCreateBatch,
    ) -> Result<ImageCreateSummary, ServiceError> {
        let url = self.project_url(project_id, "images/files");
        send_json(self.client.post(&url).json(batch))
    }

    fn train_project(&self, project_id: Uuid) -> Result<Iteration, ServiceError> {
        let url = self.project_url(project_id, "train");
        send_json(self.client.post(&url))
    }

    fn get_iteration(&self, project_id: Uuid, iteration_id: Uuid) -> Result<Iteration, ServiceError> {
        let url = self.project_url(project_id, &format!("iterations/{}", iteration_id));
        send_json(self.client.get(&url))
    }

    fn update_iteration(
        &self,
        project_id: Uuid,
        iteration_id: Uuid,
        update: &IterationUpdate,
    ) -> Result<Iteration, ServiceError> {
        let url = self.project_url(project_id, &format!("iterations/{}", iteration_id));
        send_json(self.client.patch(&url).json(update))
    }
}

impl PredictionService for PredictionClient {
    fn predict_image(
        &self,
        project_id: Uuid,
        iteration_id: Option<Uuid>,
        image: &[u8],
    ) -> Result<ImagePrediction, ServiceError> {
        let url = format!("{}/{}/image", self.base_url, project_id);
        let req = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec());
        send_json(with_iteration(req, iteration_id))
    }

    fn predict_image_url(
        &self,
        project_id: Uuid,
        iteration_id: Option<Uuid>,
        url: &str,
    ) -> Result<ImagePrediction, ServiceError> {
        let endpoint = format!("{}/{}/url", self.base_url, project_id);
        let req = self.client.post(&endpoint).json(&json!({ "Url": url }));
        send_json(with_iteration(req, iteration_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_key_is_refused() {
        let err = TrainingClient::authenticate("https://example.test", None).err().unwrap();
        assert!(matches!(err, ServiceError::MissingKey("training")));

        let err = PredictionClient::authenticate("https://example.test", Some("   ")).err().unwrap();
        assert!(matches!(err, ServiceError::MissingKey("prediction")));
    }

    #[test]
    fn key_with_control_characters_is_invalid() {
        let err = TrainingClient::authenticate("https://example.test", Some("abc\ndef")).err().unwrap();
        assert!(matches!(err, ServiceError::InvalidKey("training")));
    }

    #[test]
    fn urls_are_built_under_the_versioned_path() {
        let client = TrainingClient::authenticate("https://example.test/", Some("k")).unwrap();
        let id = Uuid::nil();
        assert_eq!(
            client.project_url(id, "tags"),
            format!("https://example.test/customvision/v2.2/Training/projects/{}/tags", id)
        );

        let predictor = PredictionClient::authenticate("https://example.test", Some("k")).unwrap();
        assert_eq!(predictor.base_url, "https://example.test/customvision/v2.0/Prediction");
    }

    #[test]
    fn error_bodies_are_parsed_flat_wrapped_or_raw() {
        assert_eq!(
            parse_remote_error(r#"{"code":"BadRequestDuplicateTagName","message":"dup"}"#),
            ("BadRequestDuplicateTagName".to_string(), "dup".to_string())
        );
        assert_eq!(
            parse_remote_error(r#"{"error":{"code":"NotFound","message":"gone"}}"#),
            ("NotFound".to_string(), "gone".to_string())
        );
        assert_eq!(
            parse_remote_error("upstream timeout"),
            (String::new(), "upstream timeout".to_string())
        );
    }
}
