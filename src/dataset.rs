// Local sample images: one directory per label under a samples root.
// A label directory may carry `regions.json`, mapping file names to
// `[left, top, width, height]`, for object detection projects.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::WorkflowError;
use crate::models::Region;

pub const REGIONS_FILE: &str = "regions.json";
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

/// One local image and, for detection, where its object is.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub path: PathBuf,
    pub file_name: String,
    pub region: Option<Region>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelGroup {
    pub label: String,
    pub samples: Vec<Sample>,
}

/// Labelled samples in upload order: groups in the order the labels were
/// given, files within a group sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub groups: Vec<LabelGroup>,
}

#[derive(Deserialize)]
#[serde(transparent)]
struct RegionsFile(HashMap<String, [f64; 4]>);

impl Dataset {
    /// Load `root/<label>` for every label, in the order given.
    pub fn from_dir(root: &Path, labels: &[String]) -> Result<Self, WorkflowError> {
        let mut groups = Vec::with_capacity(labels.len());
        for label in labels {
            groups.push(load_group(&root.join(label), label)?);
        }
        Ok(Dataset { groups })
    }

    pub fn labels(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.label.as_str()).collect()
    }

    /// Total number of samples across all labels.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn load_group(dir: &Path, label: &str) -> Result<LabelGroup, WorkflowError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| WorkflowError::Dataset(format!("cannot read {}: {}", dir.display(), e)))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| WorkflowError::Dataset(format!("{}: {}", dir.display(), e)))?;
        let path = entry.path();
        if path.is_file() && is_image(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    if paths.is_empty() {
        return Err(WorkflowError::Dataset(format!(
            "label `{}` has no images in {}",
            label,
            dir.display()
        )));
    }

    let regions = load_regions(&dir.join(REGIONS_FILE))?;
    let samples = paths
        .into_iter()
        .map(|path| {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let region = regions.get(&file_name).copied();
            Sample {
                path,
                file_name,
                region,
            }
        })
        .collect();

    Ok(LabelGroup {
        label: label.to_string(),
        samples,
    })
}

fn load_regions(path: &Path) -> Result<HashMap<String, Region>, WorkflowError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| WorkflowError::Dataset(format!("cannot read {}: {}", path.display(), e)))?;
    let RegionsFile(entries) = serde_json::from_str(&raw)
        .map_err(|e| WorkflowError::Dataset(format!("{}: {}", path.display(), e)))?;

    let mut regions = HashMap::with_capacity(entries.len());
    for (name, [left, top, width, height]) in entries {
        let region = Region::new(left, top, width, height)
            .map_err(|e| WorkflowError::Dataset(format!("{} ({}): {}", path.display(), name, e)))?;
        regions.insert(name, region);
    }
    Ok(regions)
}

/// Read an image file in full.
pub fn load_image(path: &Path) -> std::io::Result<Vec<u8>> {
    fs::read(path)
}
