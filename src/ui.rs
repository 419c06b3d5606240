// UI layer: an interactive menu using `dialoguer`, with `indicatif`
// spinners around the remote stages. Failures are printed and the menu
// keeps running; the workflow itself never swallows an error.

use crate::api::{PredictionClient, TrainingClient};
use crate::config::Settings;
use crate::dataset::{load_image, Dataset};
use crate::error::WorkflowError;
use crate::models::{Prediction, PredictionInput, ProjectKind};
use crate::progress::LogWriter;
use crate::workflow::{self, format_predictions, RunReport, RunRequest, Workflow};
use anyhow::{Context, Result};
use dialoguer::{Input, Select};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

const PROJECT_FILE: &str = ".customvision_project";

/// Main interactive menu. Runs until the user chooses "Exit". Spinners
/// are created through `log` so log lines don't garble them.
pub fn main_menu(settings: Settings, log: LogWriter) -> Result<()> {
    loop {
        let items = vec![
            "Run image classification sample",
            "Run object detection sample",
            "Predict with an existing project",
            "Exit",
        ];
        let selection = Select::new().items(&items).default(0).interact()?;
        let outcome = match selection {
            0 => run_sample(&settings, &log, ProjectKind::Classification),
            1 => run_sample(&settings, &log, ProjectKind::ObjectDetection),
            2 => predict_existing(&settings, &log),
            3 => break,
            _ => Ok(()),
        };
        if let Err(e) = outcome {
            println!("Failed: {:#}", e);
        }
    }
    Ok(())
}

fn print_predictions(out: &mut dyn Write, predictions: &[Prediction]) -> io::Result<()> {
    for line in format_predictions(predictions) {
        writeln!(out, "\t{}", line)?;
    }
    Ok(())
}

/// Print the outcome of a finished run, predictions included, then save the
/// project id. A failed save is only a notice; the run itself succeeded.
fn show_run<S>(out: &mut dyn Write, report: &RunReport, save: S) -> io::Result<()>
where
    S: FnOnce(Uuid) -> Result<()>,
{
    if !report.uploads.failures.is_empty() {
        writeln!(
            out,
            "{} of {} images failed to upload:",
            report.uploads.failures.len(),
            report.uploads.attempted
        )?;
        for failure in &report.uploads.failures {
            writeln!(out, "\t{}", failure)?;
        }
    }
    writeln!(
        out,
        "Project `{}` ({}) trained, iteration {} published.",
        report.project.name, report.project.id, report.iteration.id
    )?;
    print_predictions(out, &report.predictions)?;

    if let Err(e) = save(report.project.id) {
        warn!(error = %format!("{:#}", e), "Could not remember the project id");
        writeln!(out, "Note: project id not saved ({:#}).", e)?;
    }
    Ok(())
}

/// Create a project, upload the configured samples, train, publish and
/// classify the test image.
fn run_sample(settings: &Settings, log: &LogWriter, kind: ProjectKind) -> Result<()> {
    let trainer = TrainingClient::authenticate(&settings.endpoint, settings.training_key.as_deref())
        .map_err(WorkflowError::Authentication)?;
    let predictor = PredictionClient::authenticate(&settings.endpoint, settings.prediction_key.as_deref())
        .map_err(WorkflowError::Authentication)?;

    let dataset = Dataset::from_dir(&settings.samples_dir, &settings.labels)?;
    let test_image = load_image(&settings.test_image)
        .with_context(|| format!("Failed to read test image {}", settings.test_image.display()))?;

    let flow = Workflow::new(&trainer, &predictor, settings.workflow_options());
    let request = RunRequest {
        project_name: &settings.project_name,
        kind,
        dataset: &dataset,
        test_image: PredictionInput::Bytes(&test_image),
    };

    let progress = log.spinner("Running sample...");
    let outcome = flow.run(&request);
    drop(progress);
    let report = outcome?;

    show_run(&mut io::stdout(), &report, persist_project)?;
    Ok(())
}

/// Classify an image with an already published project. The project id
/// defaults to the one saved by the last successful run.
fn predict_existing(settings: &Settings, log: &LogWriter) -> Result<()> {
    let predictor = PredictionClient::authenticate(&settings.endpoint, settings.prediction_key.as_deref())
        .map_err(WorkflowError::Authentication)?;

    let mut prompt = Input::<String>::new();
    prompt.with_prompt("Project id");
    if let Ok(last) = load_project() {
        prompt.default(last.to_string());
    }
    let project_id: Uuid = prompt
        .interact_text()?
        .trim()
        .parse()
        .context("Project id is not a valid UUID")?;

    let sources = vec!["Local image file", "Image URL"];
    let source = Select::new().items(&sources).default(0).interact()?;

    let predictions = if source == 0 {
        let path: String = Input::new()
            .with_prompt("Image file path")
            .default(settings.test_image.display().to_string())
            .interact_text()?;
        let image = load_image(&PathBuf::from(&path))
            .with_context(|| format!("Failed to read image {}", path))?;
        let _progress = log.spinner("Predicting...");
        workflow::predict(&predictor, project_id, None, PredictionInput::Bytes(&image))?
    } else {
        let url: String = Input::new().with_prompt("Image URL").interact_text()?;
        let _progress = log.spinner("Predicting...");
        workflow::predict(&predictor, project_id, None, PredictionInput::Url(url.trim()))?
    };

    print_predictions(&mut io::stdout(), &predictions)?;
    Ok(())
}

fn project_file() -> PathBuf {
    let dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.join(PROJECT_FILE)
}

/// Remember the last published project in the user's home directory.
fn persist_project(project_id: Uuid) -> Result<()> {
    let path = project_file();
    std::fs::write(&path, project_id.to_string())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn load_project() -> Result<Uuid> {
    let data = std::fs::read_to_string(project_file())?;
    Ok(data.trim().parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Iteration, IterationStatus, Project};
    use crate::workflow::{UploadFailure, UploadReport};

    fn report() -> RunReport {
        RunReport {
            project: Project {
                id: Uuid::nil(),
                name: "Sample Rust Project".into(),
                description: None,
            },
            tags: Vec::new(),
            uploads: UploadReport {
                attempted: 5,
                uploaded: 4,
                failures: vec![UploadFailure {
                    file_name: "go_2.jpg".into(),
                    tag_name: "Go".into(),
                    reason: "image rejected: ErrorImageFormat".into(),
                }],
            },
            iteration: Iteration {
                id: Uuid::nil(),
                name: "Iteration 1".into(),
                status: IterationStatus::Completed,
                is_default: true,
            },
            predictions: vec![Prediction::new("Stop", 0.87), Prediction::new("Go", 0.13)],
        }
    }

    #[test]
    fn predictions_are_shown_even_when_saving_the_project_fails() {
        let mut out = Vec::new();
        show_run(&mut out, &report(), |_| anyhow::bail!("read-only home directory")).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\tgo_2.jpg (Go): image rejected: ErrorImageFormat"));
        assert!(text.contains("\tStop: 87.00%\n\tGo: 13.00%\n"));
        assert!(text.contains("project id not saved (read-only home directory)"));
    }

    #[test]
    fn project_id_is_saved_after_a_run() {
        let mut saved = None;
        let mut out = Vec::new();
        show_run(&mut out, &report(), |id| {
            saved = Some(id);
            Ok(())
        })
        .unwrap();

        assert_eq!(saved, Some(Uuid::nil()));
        assert!(!String::from_utf8(out).unwrap().contains("not saved"));
    }
}
