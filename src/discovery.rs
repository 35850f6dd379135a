use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{ReadFile, SampleRecord, Strand, StrandTags, read_extension};
use crate::error::UploaderError;

/// Everything one directory scan produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Discovery {
    pub directory: Utf8PathBuf,
    pub records: BTreeMap<String, SampleRecord>,
    pub read_files: Vec<ReadFile>,
    pub skipped: Vec<SkippedEntry>,
    pub duplicates: Vec<DuplicateStrand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Extension,
    AmbiguousStrand,
    NonUtf8Name,
}

/// A strand slot that was filled more than once; the later file won.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateStrand {
    pub sample: String,
    pub strand: Strand,
    pub replaced: Utf8PathBuf,
    pub kept: Utf8PathBuf,
}

impl Discovery {
    pub fn ambiguous_count(&self) -> usize {
        self.skipped
            .iter()
            .filter(|entry| entry.reason == SkipReason::AmbiguousStrand)
            .count()
    }

    /// Classified files belonging to `sample` on `strand`, sorted by file name.
    pub fn shards(&self, sample: &str, strand: Strand) -> Vec<&ReadFile> {
        let mut shards = self
            .read_files
            .iter()
            .filter(|file| file.basename() == sample && file.strand() == strand)
            .collect::<Vec<_>>();
        shards.sort_by(|a, b| a.file_name().cmp(b.file_name()));
        shards
    }
}

/// Fails unless `directory` exists, is a directory and is writable.
pub fn check_directory(directory: &Path) -> Result<(), UploaderError> {
    let metadata = fs::metadata(directory)
        .map_err(|err| UploaderError::directory(directory, err.to_string()))?;
    if !metadata.is_dir() {
        return Err(UploaderError::directory(directory, "not a directory"));
    }
    tempfile::tempfile_in(directory).map_err(|err| {
        UploaderError::directory(
            directory,
            format!("the directory is not writeable, can not upload samples from it: {err}"),
        )
    })?;
    Ok(())
}

/// Scans `directory` (not recursively) and groups read files into sample records.
pub fn scan_directory(directory: &Utf8Path, tags: &StrandTags) -> Result<Discovery, UploaderError> {
    check_directory(directory.as_std_path())?;

    let entries = fs::read_dir(directory.as_std_path())
        .map_err(|err| UploaderError::directory(directory.as_std_path(), err.to_string()))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| UploaderError::Filesystem(err.to_string()))?;
        if entry.path().is_dir() {
            continue;
        }
        names.push(entry.file_name());
    }
    names.sort();

    let mut discovery = Discovery {
        directory: directory.to_path_buf(),
        ..Discovery::default()
    };

    for raw_name in names {
        let Some(name) = raw_name.to_str() else {
            warn!("Skipping {:?}: file name is not valid UTF-8", raw_name);
            discovery.skipped.push(SkippedEntry {
                name: raw_name.to_string_lossy().into_owned(),
                reason: SkipReason::NonUtf8Name,
            });
            continue;
        };

        if read_extension(name).is_none() {
            debug!("Skipping \"{name}\": not in \".fq.gz\" or \".fastq.gz\" extension");
            discovery.skipped.push(SkippedEntry {
                name: name.to_string(),
                reason: SkipReason::Extension,
            });
            continue;
        }

        let read_file = match ReadFile::classify(directory.join(name), tags) {
            Ok(read_file) => read_file,
            Err(err) => {
                warn!("{err}");
                discovery.skipped.push(SkippedEntry {
                    name: name.to_string(),
                    reason: SkipReason::AmbiguousStrand,
                });
                continue;
            }
        };

        debug!(
            sample = read_file.basename(),
            strand = %read_file.strand(),
            file = name,
            "adding read file"
        );
        add_to_records(&mut discovery, &read_file);
        discovery.read_files.push(read_file);
    }

    Ok(discovery)
}

fn add_to_records(discovery: &mut Discovery, read_file: &ReadFile) {
    let record = discovery
        .records
        .entry(read_file.basename().to_string())
        .or_insert_with(|| SampleRecord::new(read_file.basename()));
    let kept = read_file.path().to_path_buf();
    if let Some(replaced) = record.set(read_file.strand(), kept.clone()) {
        discovery.duplicates.push(DuplicateStrand {
            sample: record.name.clone(),
            strand: read_file.strand(),
            replaced,
            kept,
        });
    }
}
