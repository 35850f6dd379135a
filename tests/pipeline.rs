use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use irida_sample_uploader::app::{App, ProgressEvent, ProgressSink};
use irida_sample_uploader::config::{ManifestSettings, RetryPolicy, ScanOptions, UploadSettings};
use irida_sample_uploader::domain::{ProjectId, StrandTags};
use irida_sample_uploader::error::UploaderError;
use irida_sample_uploader::irida::{IridaClient, ProjectSummary};
use irida_sample_uploader::manifest::ManifestBuilder;
use irida_sample_uploader::output::JsonOutput;
use irida_sample_uploader::upload::{CommandOutput, SampleOutcome, UploadRunner};

#[derive(Default)]
struct MockIrida {
    projects: Vec<ProjectSummary>,
    samples: Vec<String>,
    created: Mutex<Vec<String>>,
}

impl IridaClient for MockIrida {
    fn list_projects(&self) -> Result<Vec<ProjectSummary>, UploaderError> {
        Ok(self.projects.clone())
    }

    fn create_project(&self, name: &str, _description: &str) -> Result<ProjectId, UploaderError> {
        self.created.lock().unwrap().push(name.to_string());
        Ok(ProjectId::new(99))
    }

    fn list_sample_names(&self, _project: ProjectId) -> Result<Vec<String>, UploaderError> {
        Ok(self.samples.clone())
    }
}

/// Records every sample sheet it is asked to upload.
#[derive(Default)]
struct RecordingRunner {
    sheets: Mutex<Vec<String>>,
}

impl UploadRunner for RecordingRunner {
    fn run(&self, _program: &Path, args: &[String]) -> Result<CommandOutput, UploaderError> {
        let directory = args.last().unwrap();
        let sheet = fs::read_to_string(Path::new(directory).join("SampleList.csv")).unwrap();
        self.sheets.lock().unwrap().push(sheet);
        Ok(CommandOutput {
            success: true,
            code: Some(0),
            output: "Upload complete".to_string(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}

fn scan_options(dir: &Utf8Path) -> ScanOptions {
    ScanOptions {
        input_dir: dir.to_path_buf(),
        tags: StrandTags::default(),
        merge_shards: true,
        work_dir: Some(dir.join("merged")),
    }
}

fn upload_settings(dir: &Utf8Path) -> UploadSettings {
    UploadSettings {
        scan: scan_options(dir),
        project_id: ProjectId::new(7),
        project_name: None,
        irida_conf: "config.conf".into(),
        uploader: "upload_run.py".into(),
        retry: RetryPolicy::default(),
        dedup: true,
    }
}

fn utf8_tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, dir)
}

#[test]
fn paired_sample_produces_one_manifest_row() {
    let (_temp, dir) = utf8_tempdir();
    fs::write(dir.join("sampleA_R1_001.fastq.gz"), b"forward").unwrap();
    fs::write(dir.join("sampleA_R2_001.fastq.gz"), b"reverse").unwrap();

    let app = App::new(MockIrida::default(), RecordingRunner::default());
    let sink = RecordingSink::default();
    let report = app.upload(&upload_settings(&dir), &sink).unwrap();

    assert_eq!(report.uploaded, 1);
    assert_matches!(
        report.samples[0].outcome,
        SampleOutcome::Uploaded { attempts: 1 }
    );
    let sheets = app_sheets(&app);
    assert_eq!(
        sheets,
        vec![format!(
            "[Data]\nSample_Name,Project_ID,File_Forward,File_Reverse\nsampleA,7,{},{}\n",
            dir.join("sampleA_R1_001.fastq.gz"),
            dir.join("sampleA_R2_001.fastq.gz")
        )]
    );
    let events = sink.events.lock().unwrap();
    assert!(events.iter().any(|event| event.starts_with("phase=Upload; sample=sampleA")));
}

#[test]
fn reverse_only_sample_aborts_before_manifest() {
    let (_temp, dir) = utf8_tempdir();
    fs::write(dir.join("sampleB_R2_001.fastq.gz"), b"reverse").unwrap();

    let app = App::new(MockIrida::default(), RecordingRunner::default());
    let err = app.upload(&upload_settings(&dir), &JsonOutput).unwrap_err();

    assert_matches!(
        err,
        UploaderError::Validation(summary)
            if summary.errors == 1 && summary.paired == 0 && summary.single == 0
    );
    assert!(!dir.join("SampleList.csv").as_std_path().exists());
    assert!(app_sheets(&app).is_empty());
}

#[test]
fn already_uploaded_samples_are_skipped() {
    let (_temp, dir) = utf8_tempdir();
    for name in ["sampleA", "sampleB"] {
        fs::write(dir.join(format!("{name}_R1_001.fastq.gz")), b"f").unwrap();
        fs::write(dir.join(format!("{name}_R2_001.fastq.gz")), b"r").unwrap();
    }
    let irida = MockIrida {
        samples: vec!["sampleA".to_string()],
        ..MockIrida::default()
    };

    let app = App::new(irida, RecordingRunner::default());
    let report = app.upload(&upload_settings(&dir), &JsonOutput).unwrap();

    assert_eq!((report.uploaded, report.skipped), (1, 1));
    assert_eq!(report.samples[0].sample, "sampleA");
    assert_matches!(report.samples[0].outcome, SampleOutcome::Skipped);
    let sheets = app_sheets(&app);
    assert_eq!(sheets.len(), 1);
    assert!(sheets[0].contains("\nsampleB,7,"));
}

#[test]
fn short_names_use_project_label() {
    let (_temp, dir) = utf8_tempdir();
    fs::write(dir.join("S1_R1_001.fastq.gz"), b"f").unwrap();
    let mut settings = upload_settings(&dir);
    settings.project_name = Some("Outbreak".to_string());

    let app = App::new(MockIrida::default(), RecordingRunner::default());
    let report = app.upload(&settings, &JsonOutput).unwrap();

    assert_eq!(report.samples[0].upload_name, "Outbreak-S1");
    assert!(app_sheets(&app)[0].ends_with(&format!("Outbreak-S1,7,{},\n", dir.join("S1_R1_001.fastq.gz"))));
}

#[test]
fn dedup_is_idempotent_over_reruns() {
    let samples = [
        irida_sample_uploader::domain::Sample::new("sampleA", "/d/a_R1.fq.gz".into(), None),
        irida_sample_uploader::domain::Sample::new("sampleB", "/d/b_R1.fq.gz".into(), None),
    ];
    let existing = HashSet::new();
    let mut first = ManifestBuilder::new("proj", ProjectId::new(7), &existing);
    first.extend(&samples);
    let first = first.finish();
    assert_eq!(first.rows.len(), 2);

    let uploaded = first
        .rows
        .iter()
        .map(|row| row.sample_name.clone())
        .collect::<HashSet<_>>();
    let mut second = ManifestBuilder::new("proj", ProjectId::new(7), &uploaded);
    second.extend(&samples);
    let second = second.finish();
    assert!(second.is_empty());
    assert_eq!(
        second.render(),
        "[Data]\nSample_Name,Project_ID,File_Forward,File_Reverse\n"
    );
}

#[test]
fn bulk_manifest_creates_missing_project() {
    let (_temp, dir) = utf8_tempdir();
    fs::write(dir.join("sampleA_R1_001.fastq.gz"), b"f").unwrap();
    fs::write(dir.join("sampleA_R2_001.fastq.gz"), b"r").unwrap();
    fs::write(dir.join("sampleZ_R1_001.fastq.gz"), b"f").unwrap();
    let output = dir.join("sheet.csv");
    let settings = ManifestSettings {
        scan: scan_options(&dir),
        project_name: "Basespace-run1 (2)".to_string(),
        output: Some(output.clone()),
    };

    let irida = MockIrida {
        samples: vec!["sampleZ".to_string()],
        ..MockIrida::default()
    };
    let app = App::new(irida, RecordingRunner::default());
    let report = app.build_manifest(&settings, &JsonOutput).unwrap();

    assert!(report.project_created);
    assert_eq!(report.project_name, "Basespace-run1");
    assert_eq!(report.project_id, ProjectId::new(99));
    assert_eq!(report.rows, 1);
    assert_eq!(report.skipped, vec!["sampleZ".to_string()]);
    let sheet = fs::read_to_string(output.as_std_path()).unwrap();
    assert_eq!(sheet.lines().count(), 3);
    assert!(sheet.lines().nth(2).unwrap().starts_with("sampleA,99,"));
}

#[test]
fn bulk_manifest_drops_colliding_duplicate_folder() {
    let (_temp, dir) = utf8_tempdir();
    fs::write(dir.join("abcd_R1_001.fastq.gz"), b"f").unwrap();
    fs::write(dir.join("abcd_R2_001.fastq.gz"), b"r").unwrap();
    fs::write(dir.join("abcd (2)_R1_001.fastq.gz"), b"f").unwrap();
    fs::write(dir.join("abcd (2)_R2_001.fastq.gz"), b"r").unwrap();
    let output = dir.join("sheet.csv");
    let settings = ManifestSettings {
        scan: scan_options(&dir),
        project_name: "Outbreak".to_string(),
        output: Some(output.clone()),
    };
    let irida = MockIrida {
        projects: vec![ProjectSummary {
            id: ProjectId::new(9),
            name: "Outbreak".to_string(),
        }],
        ..MockIrida::default()
    };

    let app = App::new(irida, RecordingRunner::default());
    let report = app.build_manifest(&settings, &JsonOutput).unwrap();

    assert_eq!(report.rows, 1);
    assert_eq!(report.duplicates, vec!["abcd (2)".to_string()]);
    let sheet = fs::read_to_string(output.as_std_path()).unwrap();
    let names = sheet
        .lines()
        .skip(2)
        .map(|line| line.split(',').next().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["abcd"]);
    assert!(sheet.contains(dir.join("abcd_R1_001.fastq.gz").as_str()));
}

#[test]
fn upload_sends_one_sample_per_upload_name() {
    let (_temp, dir) = utf8_tempdir();
    fs::write(dir.join("abcd_R1_001.fastq.gz"), b"f").unwrap();
    fs::write(dir.join("abcd_R2_001.fastq.gz"), b"r").unwrap();
    fs::write(dir.join("abcd (2)_R1_001.fastq.gz"), b"f").unwrap();
    fs::write(dir.join("abcd (2)_R2_001.fastq.gz"), b"r").unwrap();

    let app = App::new(MockIrida::default(), RecordingRunner::default());
    let report = app.upload(&upload_settings(&dir), &JsonOutput).unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.samples[0].sample, "abcd");
    assert_matches!(report.samples[1].outcome, SampleOutcome::Duplicate);
    assert_eq!(app_sheets(&app).len(), 1);
}

fn app_sheets(app: &App<MockIrida, RecordingRunner>) -> Vec<String> {
    app.runner().sheets.lock().unwrap().clone()
}
