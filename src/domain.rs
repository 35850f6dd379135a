use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::UploaderError;

/// Read-file extensions picked up by discovery.
pub const READ_EXTENSIONS: &[&str] = &[".fastq.gz", ".fq.gz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strand {
    Forward,
    Reverse,
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Forward => write!(f, "for"),
            Strand::Reverse => write!(f, "rev"),
        }
    }
}

/// Literal substrings marking forward and reverse read files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrandTags {
    forward: Vec<String>,
    reverse: Vec<String>,
}

impl Default for StrandTags {
    fn default() -> Self {
        Self {
            forward: vec!["_R1_".to_string(), "_1.".to_string()],
            reverse: vec!["_R2_".to_string(), "_2.".to_string()],
        }
    }
}

impl StrandTags {
    pub fn new(forward: Vec<String>, reverse: Vec<String>) -> Result<Self, UploaderError> {
        if let Some(tag) = forward.iter().chain(reverse.iter()).find(|tag| tag.is_empty()) {
            return Err(UploaderError::InvalidTag(format!("'{tag}' is empty")));
        }
        if forward.is_empty() || reverse.is_empty() {
            return Err(UploaderError::InvalidTag(
                "both forward and reverse tags are required".to_string(),
            ));
        }
        Ok(Self { forward, reverse })
    }

    /// Defaults with each side optionally replaced by a single literal tag.
    pub fn with_overrides(
        forward: Option<String>,
        reverse: Option<String>,
    ) -> Result<Self, UploaderError> {
        let defaults = Self::default();
        Self::new(
            forward.map(|tag| vec![tag]).unwrap_or(defaults.forward),
            reverse.map(|tag| vec![tag]).unwrap_or(defaults.reverse),
        )
    }

    pub fn forward(&self) -> &[String] {
        &self.forward
    }

    pub fn reverse(&self) -> &[String] {
        &self.reverse
    }

    /// Decides the strand of `file_name` and returns it with the sample basename.
    ///
    /// Exactly one tag of one set and none of the other must match; every other
    /// combination is ambiguous and reported as an error for the caller to skip.
    pub fn classify(&self, file_name: &str) -> Result<(Strand, String), UploaderError> {
        let forward = matching_tags(file_name, &self.forward);
        let reverse = matching_tags(file_name, &self.reverse);

        let (strand, position) = match (forward.as_slice(), reverse.as_slice()) {
            ([position], []) => (Strand::Forward, *position),
            ([], [position]) => (Strand::Reverse, *position),
            _ => return Err(UploaderError::AmbiguousFilename(file_name.to_string())),
        };
        Ok((strand, file_name[..position].to_string()))
    }
}

fn matching_tags(file_name: &str, tags: &[String]) -> Vec<usize> {
    tags.iter()
        .filter_map(|tag| file_name.find(tag.as_str()))
        .collect()
}

pub fn read_extension(file_name: &str) -> Option<&'static str> {
    READ_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| file_name.ends_with(ext))
}

/// A classified read file. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadFile {
    path: Utf8PathBuf,
    file_name: String,
    strand: Strand,
    basename: String,
}

impl ReadFile {
    pub fn classify(path: Utf8PathBuf, tags: &StrandTags) -> Result<Self, UploaderError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| UploaderError::AmbiguousFilename(path.to_string()))?
            .to_string();
        let (strand, basename) = tags.classify(&file_name)?;
        Ok(Self {
            path,
            file_name,
            strand,
            basename,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(u64);

impl ProjectId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = UploaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .map(Self)
            .ok_or_else(|| UploaderError::InvalidProjectId(value.to_string()))
    }
}

/// Raw per-basename grouping produced by discovery. May violate pairing rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SampleRecord {
    pub name: String,
    pub forward: Option<Utf8PathBuf>,
    pub reverse: Option<Utf8PathBuf>,
}

impl SampleRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Stores `path` in the slot for `strand`, returning the path it replaced.
    pub fn set(&mut self, strand: Strand, path: Utf8PathBuf) -> Option<Utf8PathBuf> {
        let slot = match strand {
            Strand::Forward => &mut self.forward,
            Strand::Reverse => &mut self.reverse,
        };
        slot.replace(path)
    }
}

/// A sample that passed validation: the forward file is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    name: String,
    forward: Utf8PathBuf,
    reverse: Option<Utf8PathBuf>,
    project_id: Option<ProjectId>,
}

impl Sample {
    pub fn new(name: impl Into<String>, forward: Utf8PathBuf, reverse: Option<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            forward,
            reverse,
            project_id: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn forward(&self) -> &Utf8Path {
        &self.forward
    }

    pub fn reverse(&self) -> Option<&Utf8Path> {
        self.reverse.as_deref()
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    pub fn is_paired(&self) -> bool {
        self.reverse.is_some()
    }

    pub fn attach_project(&mut self, project_id: ProjectId) {
        self.project_id = Some(project_id);
    }

    pub fn replace_paths(&mut self, forward: Utf8PathBuf, reverse: Option<Utf8PathBuf>) {
        self.forward = forward;
        self.reverse = reverse;
    }
}
