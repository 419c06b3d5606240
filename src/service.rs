// The remote collaborator as the workflow sees it. `api` implements these
// over HTTP; tests implement them with recording stubs.

use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{
    Domain, ImageCreateSummary, ImageFileCreateBatch, ImagePrediction, Iteration, IterationUpdate,
    Project, Tag,
};

pub trait TrainingService {
    fn get_domains(&self) -> Result<Vec<Domain>, ServiceError>;

    /// Create a project. `domain_id` of `None` lets the service pick its
    /// default (general classification) domain.
    fn create_project(&self, name: &str, domain_id: Option<Uuid>) -> Result<Project, ServiceError>;

    fn create_tag(&self, project_id: Uuid, name: &str) -> Result<Tag, ServiceError>;

    fn get_tags(&self, project_id: Uuid) -> Result<Vec<Tag>, ServiceError>;

    fn create_images_from_files(
        &self,
        project_id: Uuid,
        batch: &ImageFileCreateBatch,
    ) -> Result<ImageCreateSummary, ServiceError>;

    fn train_project(&self, project_id: Uuid) -> Result<Iteration, ServiceError>;

    fn get_iteration(&self, project_id: Uuid, iteration_id: Uuid) -> Result<Iteration, ServiceError>;

    fn update_iteration(
        &self,
        project_id: Uuid,
        iteration_id: Uuid,
        update: &IterationUpdate,
    ) -> Result<Iteration, ServiceError>;
}

pub trait PredictionService {
    /// Classify raw image bytes. With no `iteration_id` the project's
    /// default iteration answers.
    fn predict_image(
        &self,
        project_id: Uuid,
        iteration_id: Option<Uuid>,
        image: &[u8],
    ) -> Result<ImagePrediction, ServiceError>;

    fn predict_image_url(
        &self,
        project_id: Uuid,
        iteration_id: Option<Uuid>,
        url: &str,
    ) -> Result<ImagePrediction, ServiceError>;
}
