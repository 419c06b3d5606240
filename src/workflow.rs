// The sample run: create a project and its tags, upload the labelled
// images, train, wait for training to finish, publish the iteration and
// classify a held-out image. Every step returns its error instead of
// logging and carrying on, so the caller decides what is fatal.

use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dataset::{load_image, Dataset};
use crate::error::{ServiceError, WorkflowError};
use crate::models::{
    DomainType, ImageLabel, ImageUpload, Iteration, IterationUpdate, Prediction, PredictionInput,
    Project, ProjectKind, Tag,
};
use crate::service::{PredictionService, TrainingService};

/// How the training poller waits. The delay before fetch `n` (0-based) is
/// `interval * backoff^n`, capped at `max_interval`. A backoff of 1.0 keeps
/// a fixed interval.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub backoff: f64,
    /// Status fetches allowed before giving up with `TrainingTimeout`.
    pub max_attempts: u32,
    /// Consecutive transient fetch failures tolerated.
    pub fetch_retries: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(1),
            backoff: 1.0,
            max_attempts: 900,
            fetch_retries: 3,
        }
    }
}

impl PollPolicy {
    /// Sleep before the `attempt`-th status fetch.
    pub fn delay(&self, attempt: u32) -> Duration {
        let cap = self.max_interval.max(self.interval);
        let secs = self.interval.as_secs_f64() * self.backoff.powi(attempt.min(i32::MAX as u32) as i32);
        if !secs.is_finite() || secs >= cap.as_secs_f64() {
            return cap;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowOptions {
    pub poll: PollPolicy,
    /// Failed uploads tolerated before the run stops short of training.
    pub max_upload_failures: usize,
}

/// A sample that did not make it into the project, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFailure {
    pub file_name: String,
    pub tag_name: String,
    pub reason: String,
}

impl fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.file_name, self.tag_name, self.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub failures: Vec<UploadFailure>,
}

impl UploadReport {
    /// Fail with every recorded upload failure once there are more than
    /// `max_failures` of them.
    pub fn ensure_within(&self, max_failures: usize) -> Result<(), WorkflowError> {
        if self.failures.len() > max_failures {
            return Err(WorkflowError::Upload {
                failed: self.failures.len(),
                attempted: self.attempted,
                failures: self.failures.clone(),
            });
        }
        Ok(())
    }

    fn fail(&mut self, file_name: &str, tag_name: &str, reason: String) {
        warn!(file = file_name, tag = tag_name, %reason, "Image upload failed");
        self.failures.push(UploadFailure {
            file_name: file_name.to_string(),
            tag_name: tag_name.to_string(),
            reason,
        });
    }
}

/// Inputs of one end-to-end run.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'r> {
    pub project_name: &'r str,
    pub kind: ProjectKind,
    pub dataset: &'r Dataset,
    pub test_image: PredictionInput<'r>,
}

/// What a successful run created and predicted.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub project: Project,
    pub tags: Vec<Tag>,
    pub uploads: UploadReport,
    pub iteration: Iteration,
    pub predictions: Vec<Prediction>,
}

/// The sample run over a training and a prediction service.
pub struct Workflow<'a, T, P> {
    trainer: &'a T,
    predictor: &'a P,
    options: WorkflowOptions,
}

fn creation_error(resource: &'static str, name: &str, err: ServiceError) -> WorkflowError {
    if err.is_auth() {
        return WorkflowError::Authentication(err);
    }
    WorkflowError::ResourceCreation {
        resource,
        name: name.to_string(),
        source: err,
    }
}

impl<'a, T: TrainingService, P: PredictionService> Workflow<'a, T, P> {
    pub fn new(trainer: &'a T, predictor: &'a P, options: WorkflowOptions) -> Self {
        Workflow {
            trainer,
            predictor,
            options,
        }
    }

    pub fn options(&self) -> &WorkflowOptions {
        &self.options
    }

    /// Run every stage in order and return what each produced.
    pub fn run(&self, request: &RunRequest<'_>) -> Result<RunReport, WorkflowError> {
        if request.dataset.is_empty() {
            return Err(WorkflowError::Dataset("no sample images to upload".into()));
        }
        let project = self.create_project(request.project_name, request.kind)?;
        let tags = self.create_tags(project.id, &request.dataset.labels())?;

        let uploads = self.upload_dataset(project.id, request.dataset, &tags, request.kind)?;
        uploads.ensure_within(self.options.max_upload_failures)?;

        let iteration = self.train(project.id)?;
        let iteration = self.publish(project.id, &iteration)?;
        let predictions = self.predict(project.id, Some(iteration.id), request.test_image)?;

        Ok(RunReport {
            project,
            tags,
            uploads,
            iteration,
            predictions,
        })
    }

    /// Create the project, on an object detection domain when `kind` asks
    /// for one.
    pub fn create_project(&self, name: &str, kind: ProjectKind) -> Result<Project, WorkflowError> {
        let domain_id = match kind {
            ProjectKind::Classification => None,
            ProjectKind::ObjectDetection => Some(self.object_detection_domain(name)?),
        };
        info!(name, ?kind, "Creating project...");
        self.trainer
            .create_project(name, domain_id)
            .map_err(|e| creation_error("project", name, e))
    }

    fn object_detection_domain(&self, project_name: &str) -> Result<Uuid, WorkflowError> {
        let domains = self
            .trainer
            .get_domains()
            .map_err(|e| creation_error("project", project_name, e))?;
        let candidates: Vec<_> = domains
            .iter()
            .filter(|d| d.domain_type == DomainType::ObjectDetection)
            .collect();
        candidates
            .iter()
            .find(|d| d.name == "General")
            .or_else(|| candidates.first())
            .map(|d| d.id)
            .ok_or(WorkflowError::NoDomain("object detection"))
    }

    /// Create one tag per label, in order. A tag that already exists under
    /// the project is looked up and reused.
    pub fn create_tags(&self, project_id: Uuid, labels: &[&str]) -> Result<Vec<Tag>, WorkflowError> {
        let mut tags = Vec::with_capacity(labels.len());
        for &label in labels {
            let tag = match self.trainer.create_tag(project_id, label) {
                Ok(tag) => tag,
                Err(e) if e.is_conflict() => {
                    warn!(label, "Tag already exists, reusing it");
                    self.existing_tag(project_id, label)
                        .map_err(|lookup| creation_error("tag", label, lookup))?
                        .ok_or_else(|| creation_error("tag", label, e))?
                }
                Err(e) => return Err(creation_error("tag", label, e)),
            };
            info!(label, tag_id = %tag.id, "Created tag");
            tags.push(tag);
        }
        Ok(tags)
    }

    fn existing_tag(&self, project_id: Uuid, label: &str) -> Result<Option<Tag>, ServiceError> {
        Ok(self
            .trainer
            .get_tags(project_id)?
            .into_iter()
            .find(|t| t.name == label))
    }

    /// Upload every sample, one at a time, label group by label group.
    /// Per-image failures are collected in the report; only credential
    /// errors stop the loop.
    pub fn upload_dataset(
        &self,
        project_id: Uuid,
        dataset: &Dataset,
        tags: &[Tag],
        kind: ProjectKind,
    ) -> Result<UploadReport, WorkflowError> {
        let mut resolved = Vec::with_capacity(dataset.groups.len());
        for group in &dataset.groups {
            let tag = tags
                .iter()
                .find(|t| t.name == group.label)
                .ok_or_else(|| WorkflowError::MissingTag(group.label.clone()))?;
            resolved.push((group, tag));
        }

        info!(images = dataset.len(), "Adding images...");
        let mut report = UploadReport::default();
        for (group, tag) in resolved {
            for sample in &group.samples {
                report.attempted += 1;
                let label = match (kind, sample.region) {
                    (ProjectKind::Classification, _) => ImageLabel::WholeImage,
                    (ProjectKind::ObjectDetection, Some(region)) => ImageLabel::Region(region),
                    (ProjectKind::ObjectDetection, None) => {
                        report.fail(&sample.file_name, &tag.name, "no region for object detection".into());
                        continue;
                    }
                };
                let contents = match load_image(&sample.path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        report.fail(&sample.file_name, &tag.name, format!("cannot read file: {}", e));
                        continue;
                    }
                };
                let upload = ImageUpload {
                    file_name: sample.file_name.clone(),
                    contents,
                    tag_id: tag.id,
                    label,
                };
                match self.add_image(project_id, &upload) {
                    Ok(()) => report.uploaded += 1,
                    Err(e) if e.is_auth() => return Err(WorkflowError::Authentication(e)),
                    Err(e) => report.fail(&sample.file_name, &tag.name, e.to_string()),
                }
            }
        }
        info!(
            uploaded = report.uploaded,
            failed = report.failures.len(),
            "Finished adding images"
        );
        Ok(report)
    }

    /// Send a single image as a one-entry batch.
    pub fn add_image(&self, project_id: Uuid, upload: &ImageUpload) -> Result<(), ServiceError> {
        info!(file = %upload.file_name, "Adding image");
        let summary = self
            .trainer
            .create_images_from_files(project_id, &upload.to_batch())?;
        match summary.rejection() {
            Some(reason) => Err(ServiceError::Rejected(reason)),
            None => Ok(()),
        }
    }

    /// Start training and wait until the iteration leaves `Training`.
    pub fn train(&self, project_id: Uuid) -> Result<Iteration, WorkflowError> {
        info!("Training...");
        let iteration = self
            .trainer
            .train_project(project_id)
            .map_err(|e| WorkflowError::at_stage(e, WorkflowError::Training))?;
        self.wait_for_training(project_id, iteration)
    }

    /// Re-fetch the iteration until its status is no longer `Training`.
    /// Transient fetch failures are retried up to `fetch_retries` times in a
    /// row; anything else ends the wait.
    pub fn wait_for_training(
        &self,
        project_id: Uuid,
        mut iteration: Iteration,
    ) -> Result<Iteration, WorkflowError> {
        let policy = &self.options.poll;
        let mut fetches = 0u32;
        let mut failures = 0u32;
        while iteration.status.is_training() {
            if fetches >= policy.max_attempts {
                return Err(WorkflowError::TrainingTimeout {
                    iteration_id: iteration.id,
                    attempts: fetches,
                });
            }
            info!(status = %iteration.status, "Training Status");
            thread::sleep(policy.delay(fetches));
            fetches += 1;

            match self.trainer.get_iteration(project_id, iteration.id) {
                Ok(next) => {
                    iteration = next;
                    failures = 0;
                }
                Err(e) if e.is_transient() && failures < policy.fetch_retries => {
                    failures += 1;
                    warn!(error = %e, attempt = failures, "Fetching training status failed, retrying");
                }
                Err(e) => return Err(WorkflowError::at_stage(e, WorkflowError::Polling)),
            }
        }
        info!(status = %iteration.status, fetches, "Training Status");
        Ok(iteration)
    }

    /// Make a completed iteration the default one for predictions. Any
    /// other terminal status is reported as a training failure.
    pub fn publish(&self, project_id: Uuid, iteration: &Iteration) -> Result<Iteration, WorkflowError> {
        if !iteration.status.is_completed() {
            return Err(WorkflowError::TrainingFailed {
                iteration_id: iteration.id,
                status: iteration.status.clone(),
            });
        }
        let update = IterationUpdate {
            name: iteration.name.clone(),
            is_default: true,
        };
        let published = self
            .trainer
            .update_iteration(project_id, iteration.id, &update)
            .map_err(|e| WorkflowError::at_stage(e, WorkflowError::Publish))?;
        info!(iteration_id = %published.id, "Published iteration");
        Ok(published)
    }

    /// Classify one image. Predictions come back in the service's order.
    pub fn predict(
        &self,
        project_id: Uuid,
        iteration_id: Option<Uuid>,
        input: PredictionInput<'_>,
    ) -> Result<Vec<Prediction>, WorkflowError> {
        predict(self.predictor, project_id, iteration_id, input)
    }
}

/// Classify one image against a project without going through a full run.
/// With no `iteration_id` the project's default iteration answers.
pub fn predict<P: PredictionService>(
    predictor: &P,
    project_id: Uuid,
    iteration_id: Option<Uuid>,
    input: PredictionInput<'_>,
) -> Result<Vec<Prediction>, WorkflowError> {
    let result = match input {
        PredictionInput::Bytes(image) => predictor.predict_image(project_id, iteration_id, image),
        PredictionInput::Url(url) => predictor.predict_image_url(project_id, iteration_id, url),
    }
    .map_err(|e| WorkflowError::at_stage(e, WorkflowError::Prediction))?;
    info!(count = result.predictions.len(), "Received predictions");
    Ok(result.predictions)
}

/// One `label: probability%` line per prediction, order untouched.
pub fn format_predictions(predictions: &[Prediction]) -> Vec<String> {
    predictions
        .iter()
        .map(|p| format!("{}: {:.2}%", p.tag_name, p.probability * 100.0))
        .collect()
}
