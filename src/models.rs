// Wire models for the training and prediction endpoints. Field names
// follow the remote JSON (camelCase); everything is referenced by id only.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Kind of model a domain (and so a project) trains.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainType {
    Classification,
    ObjectDetection,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub domain_type: DomainType,
    #[serde(default)]
    pub exportable: bool,
}

/// Which sample the run performs: whole-image labels or labelled regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    Classification,
    ObjectDetection,
}

/// A remote project; only its id is used after creation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub image_count: u32,
}

/// Status of a remote training run. Only `Training` keeps the poller
/// waiting; `Completed` is the one state that may be published.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum IterationStatus {
    New,
    Training,
    Completed,
    Failed,
    Other(String),
}

impl IterationStatus {
    pub fn is_training(&self) -> bool {
        matches!(self, IterationStatus::Training)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, IterationStatus::Completed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            IterationStatus::New => "New",
            IterationStatus::Training => "Training",
            IterationStatus::Completed => "Completed",
            IterationStatus::Failed => "Failed",
            IterationStatus::Other(s) => s,
        }
    }
}

impl From<String> for IterationStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "New" => IterationStatus::New,
            "Training" => IterationStatus::Training,
            "Completed" => IterationStatus::Completed,
            "Failed" => IterationStatus::Failed,
            _ => IterationStatus::Other(s),
        }
    }
}

impl From<IterationStatus> for String {
    fn from(status: IterationStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remote training run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub status: IterationStatus,
    #[serde(default)]
    pub is_default: bool,
}

/// Body of the iteration update call. Only the name and the default flag
/// are writable.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IterationUpdate {
    pub name: String,
    pub is_default: bool,
}

/// Normalized bounding box, every coordinate in `0.0..=1.0`. Only built
/// through `Region::new`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Result<Self, String> {
        const EPS: f64 = 1e-6;
        let all = [left, top, width, height];
        if all.iter().any(|v| !v.is_finite() || *v < 0.0 || *v > 1.0) {
            return Err(format!(
                "region [{}, {}, {}, {}] is not normalized to 0..1",
                left, top, width, height
            ));
        }
        if width == 0.0 || height == 0.0 {
            return Err("region has zero area".into());
        }
        if left + width > 1.0 + EPS || top + height > 1.0 + EPS {
            return Err(format!(
                "region [{}, {}, {}, {}] extends past the image",
                left, top, width, height
            ));
        }
        Ok(Region {
            left,
            top,
            width,
            height,
        })
    }
}

/// Where an uploaded image's tag goes: on the whole image, or on a single
/// region of it. Never both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageLabel {
    WholeImage,
    Region(Region),
}

/// One local image ready to be sent, with the tag it belongs to.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub contents: Vec<u8>,
    pub tag_id: Uuid,
    pub label: ImageLabel,
}

impl ImageUpload {
    /// Build the single-image batch for this upload.
    pub fn to_batch(&self) -> ImageFileCreateBatch {
        let mut entry = ImageFileCreateEntry {
            name: self.file_name.clone(),
            contents: self.contents.clone(),
            regions: Vec::new(),
        };
        let mut tag_ids = Vec::new();
        match self.label {
            ImageLabel::WholeImage => tag_ids.push(self.tag_id),
            ImageLabel::Region(r) => entry.regions.push(RegionEntry {
                tag_id: self.tag_id,
                left: r.left,
                top: r.top,
                width: r.width,
                height: r.height,
            }),
        }
        ImageFileCreateBatch {
            images: vec![entry],
            tag_ids,
        }
    }
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegionEntry {
    pub tag_id: Uuid,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageFileCreateEntry {
    pub name: String,
    #[serde(serialize_with = "serialize_base64")]
    pub contents: Vec<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<RegionEntry>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageFileCreateBatch {
    pub images: Vec<ImageFileCreateEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tag_ids: Vec<Uuid>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageCreateResult {
    #[serde(default)]
    pub source_url: Option<String>,
    pub status: String,
}

impl ImageCreateResult {
    /// `OK` and `OKDuplicate` both mean the image is in the project.
    pub fn is_ok(&self) -> bool {
        self.status.starts_with("OK")
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageCreateSummary {
    pub is_batch_successful: bool,
    #[serde(default)]
    pub images: Vec<ImageCreateResult>,
}

impl ImageCreateSummary {
    /// Reason for the first rejected image, if any image was rejected.
    pub fn rejection(&self) -> Option<String> {
        if let Some(bad) = self.images.iter().find(|i| !i.is_ok()) {
            return Some(bad.status.clone());
        }
        if !self.is_batch_successful && self.images.is_empty() {
            return Some("batch rejected".into());
        }
        None
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub probability: f64,
    #[serde(default)]
    pub tag_id: Option<Uuid>,
    pub tag_name: String,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

impl Prediction {
    pub fn new(tag_name: &str, probability: f64) -> Self {
        Prediction {
            probability,
            tag_id: None,
            tag_name: tag_name.to_string(),
            bounding_box: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImagePrediction {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub project: Option<Uuid>,
    #[serde(default)]
    pub iteration: Option<Uuid>,
    pub predictions: Vec<Prediction>,
}

/// What is sent for prediction: raw image bytes or a URL the service
/// fetches itself.
#[derive(Debug, Clone, Copy)]
pub enum PredictionInput<'a> {
    Bytes(&'a [u8]),
    Url(&'a str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upload(label: ImageLabel) -> ImageUpload {
        ImageUpload {
            file_name: "stop_1.jpg".into(),
            contents: vec![1, 2, 3],
            tag_id: Uuid::nil(),
            label,
        }
    }

    #[test]
    fn whole_image_label_goes_on_the_batch() {
        let batch = upload(ImageLabel::WholeImage).to_batch();
        assert_eq!(batch.tag_ids, vec![Uuid::nil()]);
        assert!(batch.images[0].regions.is_empty());

        let body = serde_json::to_value(&batch).unwrap();
        assert_eq!(body["images"][0]["contents"], json!("AQID"));
        assert!(body["images"][0].get("regions").is_none());
    }

    #[test]
    fn region_label_goes_on_the_entry_only() {
        let region = Region::new(0.1, 0.2, 0.3, 0.4).unwrap();
        let batch = upload(ImageLabel::Region(region)).to_batch();
        assert!(batch.tag_ids.is_empty());
        assert_eq!(batch.images[0].regions.len(), 1);

        let body = serde_json::to_value(&batch).unwrap();
        assert!(body.get("tagIds").is_none());
        assert_eq!(body["images"][0]["regions"][0]["left"], json!(0.1));
    }

    #[test]
    fn region_must_be_normalized_and_inside_the_image() {
        assert!(Region::new(0.0, 0.0, 1.0, 1.0).is_ok());
        assert!(Region::new(-0.1, 0.0, 0.5, 0.5).is_err());
        assert!(Region::new(0.6, 0.0, 0.5, 0.5).is_err());
        assert!(Region::new(0.1, 0.1, 0.0, 0.5).is_err());
        assert!(Region::new(0.1, f64::NAN, 0.2, 0.5).is_err());
    }

    #[test]
    fn unknown_status_is_kept_verbatim() {
        let it: Iteration = serde_json::from_value(json!({
            "id": "00000000-0000-0000-0000-000000000000",
            "name": "Iteration 1",
            "status": "Staging",
            "isDefault": false
        }))
        .unwrap();
        assert_eq!(it.status, IterationStatus::Other("Staging".into()));
        assert!(!it.status.is_training());
        assert_eq!(it.status.to_string(), "Staging");
    }

    #[test]
    fn summary_reports_first_rejected_image() {
        let summary: ImageCreateSummary = serde_json::from_value(json!({
            "isBatchSuccessful": false,
            "images": [{ "sourceUrl": "stop_1.jpg", "status": "ErrorImageFormat" }]
        }))
        .unwrap();
        assert_eq!(summary.rejection().as_deref(), Some("ErrorImageFormat"));

        let duplicate: ImageCreateSummary = serde_json::from_value(json!({
            "isBatchSuccessful": true,
            "images": [{ "status": "OKDuplicate" }]
        }))
        .unwrap();
        assert_eq!(duplicate.rejection(), None);
    }
}
