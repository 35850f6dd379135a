use std::collections::HashSet;
use std::fmt::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{ProjectId, Sample};
use crate::error::UploaderError;

pub const SECTION_MARKER: &str = "[Data]";
pub const COLUMNS: &str = "Sample_Name,Project_ID,File_Forward,File_Reverse";

/// Names shorter than this get the project name prepended.
pub const MIN_SAMPLE_NAME_LEN: usize = 4;

/// Suffix left behind by duplicated download folders.
pub const DUPLICATE_SUFFIX: &str = " (2)";

pub fn strip_duplicate_suffix(name: &str) -> &str {
    name.strip_suffix(DUPLICATE_SUFFIX).unwrap_or(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestRow {
    pub sample_name: String,
    pub project_id: ProjectId,
    pub forward: Utf8PathBuf,
    pub reverse: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub rows: Vec<ManifestRow>,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = format!("{SECTION_MARKER}\n{COLUMNS}\n");
        for row in &self.rows {
            let reverse = row.reverse.as_ref().map(|path| path.as_str()).unwrap_or("");
            let _ = writeln!(
                out,
                "{},{},{},{}",
                row.sample_name, row.project_id, row.forward, reverse
            );
        }
        out
    }

    pub fn write_to(&self, path: &Utf8Path) -> Result<(), UploaderError> {
        std::fs::write(path.as_std_path(), self.render()).map_err(|err| {
            UploaderError::Filesystem(format!("unable to write samplesheet to {path}: {err}"))
        })
    }
}

/// Turns samples into manifest rows for one project, skipping the ones the
/// server already holds and the ones whose upload name is already taken.
pub struct ManifestBuilder<'a> {
    project_name: &'a str,
    project_id: ProjectId,
    existing: &'a HashSet<String>,
    emitted: HashSet<String>,
    manifest: Manifest,
    skipped: Vec<String>,
    duplicates: Vec<String>,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(project_name: &'a str, project_id: ProjectId, existing: &'a HashSet<String>) -> Self {
        Self {
            project_name,
            project_id,
            existing,
            emitted: HashSet::new(),
            manifest: Manifest::default(),
            skipped: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    /// Name the sample is registered under on the server.
    pub fn upload_name(&self, sample: &str) -> String {
        let name = strip_duplicate_suffix(sample);
        if name.chars().count() < MIN_SAMPLE_NAME_LEN {
            format!("{}-{name}", self.project_name)
        } else {
            name.to_string()
        }
    }

    /// Whether `push` would add a row for a sample called `sample`.
    pub fn accepts(&self, sample: &str) -> bool {
        let name = self.upload_name(sample);
        !self.existing.contains(&name) && !self.emitted.contains(&name)
    }

    /// Adds a row for `sample`; returns `false` when it was already uploaded
    /// or an earlier row uses the same upload name.
    pub fn push(&mut self, sample: &Sample) -> bool {
        let name = self.upload_name(sample.name());
        if self.existing.contains(&name) {
            info!(sample = sample.name(), "already present in project {}, skipping", self.project_id);
            self.skipped.push(name);
            return false;
        }
        if !self.emitted.insert(name.clone()) {
            warn!(sample = sample.name(), "upload name {name} already used by another sample, skipping");
            self.duplicates.push(sample.name().to_string());
            return false;
        }
        self.manifest.rows.push(ManifestRow {
            sample_name: name,
            project_id: sample.project_id().unwrap_or(self.project_id),
            forward: sample.forward().to_path_buf(),
            reverse: sample.reverse().map(Utf8Path::to_path_buf),
        });
        true
    }

    pub fn extend<'s>(&mut self, samples: impl IntoIterator<Item = &'s Sample>) {
        for sample in samples {
            self.push(sample);
        }
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Local sample names dropped because their upload name collided.
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    pub fn finish(self) -> Manifest {
        self.manifest
    }
}
