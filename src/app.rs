use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::{ManifestSettings, ScanOptions, UploadSettings};
use crate::discovery::{Discovery, scan_directory};
use crate::domain::{ProjectId, Sample};
use crate::error::UploaderError;
use crate::irida::{IridaClient, resolve_project};
use crate::manifest::{Manifest, ManifestBuilder};
use crate::merge::{MergeOutcome, merge_sample};
use crate::upload::{Orchestrator, SampleOutcome, UploadRunner};
use crate::validation::{ValidationSummary, validate};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Discovered and validated samples of one input directory.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub discovery: Discovery,
    pub summary: ValidationSummary,
    pub samples: BTreeMap<String, Sample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleReport {
    pub sample: String,
    pub upload_name: String,
    pub merge: Option<MergeOutcome>,
    #[serde(flatten)]
    pub outcome: SampleOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub started_at: String,
    pub project_id: ProjectId,
    pub validation: ValidationSummary,
    pub ambiguous_files: usize,
    pub uploaded: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub abandoned: usize,
    pub samples: Vec<SampleReport>,
}

impl UploadReport {
    pub fn has_abandoned(&self) -> bool {
        self.abandoned > 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestReport {
    pub started_at: String,
    pub project_id: ProjectId,
    pub project_name: String,
    pub project_created: bool,
    pub validation: ValidationSummary,
    pub manifest_path: Utf8PathBuf,
    pub rows: usize,
    pub skipped: Vec<String>,
    pub duplicates: Vec<String>,
}

/// Where merged files are written: a directory the caller named, or one that
/// lives only as long as the run.
enum WorkDir {
    Fixed(Utf8PathBuf),
    Scoped { _temp: TempDir, path: Utf8PathBuf },
}

impl WorkDir {
    fn open(requested: Option<&Utf8Path>) -> Result<Self, UploaderError> {
        if let Some(path) = requested {
            fs::create_dir_all(path.as_std_path())
                .map_err(|err| UploaderError::Filesystem(err.to_string()))?;
            return Ok(WorkDir::Fixed(path.to_path_buf()));
        }
        let temp = tempfile::Builder::new()
            .prefix("irida-upload")
            .tempdir()
            .map_err(|err| UploaderError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
            .map_err(|_| UploaderError::Filesystem("non-utf8 temp dir".to_string()))?;
        Ok(WorkDir::Scoped { _temp: temp, path })
    }

    fn path(&self) -> &Utf8Path {
        match self {
            WorkDir::Fixed(path) | WorkDir::Scoped { path, .. } => path,
        }
    }
}

pub struct App<C: IridaClient, U: UploadRunner> {
    irida: C,
    runner: U,
}

impl<C: IridaClient, U: UploadRunner> App<C, U> {
    pub fn new(irida: C, runner: U) -> Self {
        Self { irida, runner }
    }

    pub fn runner(&self) -> &U {
        &self.runner
    }

    /// Scan and validate; fails on directory problems or any invalid sample.
    pub fn prepare(
        &self,
        scan: &ScanOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Prepared, UploaderError> {
        sink.event(ProgressEvent {
            message: format!("phase=Scan; {}", scan.input_dir),
            elapsed: None,
        });
        let discovery = scan_directory(&scan.input_dir, &scan.tags)?;
        if discovery.ambiguous_count() > 0 {
            warn!(
                "{} files skipped: unable to detect strand",
                discovery.ambiguous_count()
            );
        }

        sink.event(ProgressEvent {
            message: "phase=Validate; checking sample pairs".to_string(),
            elapsed: None,
        });
        let (summary, samples) = validate(discovery.records.clone())?;
        info!("{} samples found", samples.len());
        Ok(Prepared {
            discovery,
            summary,
            samples,
        })
    }

    /// Uploads every sample of the input directory, one at a time.
    pub fn upload(
        &self,
        settings: &UploadSettings,
        sink: &dyn ProgressSink,
    ) -> Result<UploadReport, UploaderError> {
        let started_at = iso_timestamp();
        let prepared = self.prepare(&settings.scan, sink)?;
        let existing = if settings.dedup {
            self.existing_samples(settings.project_id)
        } else {
            HashSet::new()
        };
        let work_dir = WorkDir::open(settings.scan.work_dir.as_deref())?;
        let label = settings.project_label();
        let orchestrator = Orchestrator::new(
            &self.runner,
            settings.uploader.clone(),
            settings.irida_conf.clone(),
            settings.scan.input_dir.clone(),
            settings.retry,
        );

        let mut reports = Vec::new();
        let mut used_names = HashSet::new();
        for (name, mut sample) in prepared.samples {
            info!("Uploading {name}");
            sample.attach_project(settings.project_id);
            let mut builder = ManifestBuilder::new(&label, settings.project_id, &existing);
            let upload_name = builder.upload_name(&name);
            let (merge, outcome) = if existing.contains(&upload_name) {
                info!("{upload_name} already present in project {}, skipping", settings.project_id);
                (None, SampleOutcome::Skipped)
            } else if !used_names.insert(upload_name.clone()) {
                warn!(
                    "{name} maps to upload name {upload_name}, already used by another sample, skipping"
                );
                (None, SampleOutcome::Duplicate)
            } else {
                let merge = self.merge_if_sharded(
                    &mut sample,
                    &prepared.discovery,
                    &settings.scan,
                    work_dir.path(),
                    sink,
                )?;
                builder.push(&sample);
                let outcome = orchestrator.upload_sample(&name, &builder.finish(), sink)?;
                (merge, outcome)
            };
            reports.push(SampleReport {
                sample: name,
                upload_name,
                merge,
                outcome,
            });
        }

        let count = |pred: fn(&SampleOutcome) -> bool| {
            reports.iter().filter(|report| pred(&report.outcome)).count()
        };
        let report = UploadReport {
            started_at,
            project_id: settings.project_id,
            validation: prepared.summary,
            ambiguous_files: prepared.discovery.ambiguous_count(),
            uploaded: count(|outcome| matches!(outcome, SampleOutcome::Uploaded { .. })),
            skipped: count(|outcome| matches!(outcome, SampleOutcome::Skipped)),
            duplicates: count(|outcome| matches!(outcome, SampleOutcome::Duplicate)),
            abandoned: count(|outcome| matches!(outcome, SampleOutcome::Abandoned { .. })),
            samples: reports,
        };
        info!(
            "{} uploaded; {} already present; {} duplicate names; {} abandoned",
            report.uploaded, report.skipped, report.duplicates, report.abandoned
        );
        Ok(report)
    }

    /// Resolves the project by name and writes one sample sheet for all samples.
    pub fn build_manifest(
        &self,
        settings: &ManifestSettings,
        sink: &dyn ProgressSink,
    ) -> Result<ManifestReport, UploaderError> {
        let started_at = iso_timestamp();
        let prepared = self.prepare(&settings.scan, sink)?;

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; project {}", settings.project_name),
            elapsed: None,
        });
        let project = resolve_project(&self.irida, &settings.project_name)?;

        // Merged files are referenced by the written sheet, so they must outlive the run.
        let work_dir = settings.scan.work_dir.clone().unwrap_or_else(|| {
            settings
                .output_path()
                .with_file_name(format!("{}-merged", project.name))
        });
        let work_dir = WorkDir::open(Some(&work_dir))?;

        let mut builder = ManifestBuilder::new(&project.name, project.id, &project.existing_samples);
        for (name, mut sample) in prepared.samples {
            sample.attach_project(project.id);
            if builder.accepts(&name) {
                self.merge_if_sharded(
                    &mut sample,
                    &prepared.discovery,
                    &settings.scan,
                    work_dir.path(),
                    sink,
                )?;
            }
            builder.push(&sample);
        }
        let skipped = builder.skipped().to_vec();
        let duplicates = builder.duplicates().to_vec();
        let manifest: Manifest = builder.finish();

        let manifest_path = settings.output_path();
        sink.event(ProgressEvent {
            message: format!("phase=Store; writing {manifest_path}"),
            elapsed: None,
        });
        manifest.write_to(&manifest_path)?;
        info!(
            "wrote {} rows to {manifest_path} ({} already present)",
            manifest.rows.len(),
            skipped.len()
        );

        Ok(ManifestReport {
            started_at,
            project_id: project.id,
            project_name: project.name,
            project_created: project.created,
            validation: prepared.summary,
            manifest_path,
            rows: manifest.rows.len(),
            skipped,
            duplicates,
        })
    }

    fn existing_samples(&self, project: ProjectId) -> HashSet<String> {
        match self.irida.list_sample_names(project) {
            Ok(names) => names.into_iter().collect(),
            Err(err) => {
                warn!("unable to list samples of project {project}, uploading all: {err}");
                HashSet::new()
            }
        }
    }

    fn merge_if_sharded(
        &self,
        sample: &mut Sample,
        discovery: &Discovery,
        scan: &ScanOptions,
        work_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<Option<MergeOutcome>, UploaderError> {
        let outcome = if scan.merge_shards {
            sink.event(ProgressEvent {
                message: format!("phase=Merge; sample={}", sample.name()),
                elapsed: None,
            });
            merge_sample(sample, discovery, work_dir)?
        } else {
            MergeOutcome::NotSharded
        };

        if outcome == MergeOutcome::NotSharded {
            for duplicate in discovery
                .duplicates
                .iter()
                .filter(|duplicate| duplicate.sample == sample.name())
            {
                warn!(
                    "Sample {} has several {} files: using {}, ignoring {}",
                    duplicate.sample, duplicate.strand, duplicate.kept, duplicate.replaced
                );
            }
        }
        Ok(scan.merge_shards.then_some(outcome))
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
