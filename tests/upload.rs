use std::path::{Path, PathBuf};
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use irida_sample_uploader::config::RetryPolicy;
use irida_sample_uploader::domain::{ProjectId, Sample};
use irida_sample_uploader::error::UploaderError;
use irida_sample_uploader::manifest::{Manifest, ManifestBuilder};
use irida_sample_uploader::output::JsonOutput;
use irida_sample_uploader::upload::{
    CommandOutput, Orchestrator, SampleOutcome, SystemUploadRunner, UploadRunner,
};

/// Replays scripted results, then keeps failing.
#[derive(Default)]
struct ScriptedRunner {
    results: Mutex<Vec<Result<CommandOutput, UploaderError>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    fn new(mut results: Vec<Result<CommandOutput, UploaderError>>) -> Self {
        results.reverse();
        Self {
            results: Mutex::new(results),
            calls: Mutex::default(),
        }
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl UploadRunner for ScriptedRunner {
    fn run(&self, _program: &Path, args: &[String]) -> Result<CommandOutput, UploaderError> {
        self.calls.lock().unwrap().push(args.to_vec());
        self.results
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Ok(output(true, "ERROR: server unavailable")))
    }
}

fn output(success: bool, text: &str) -> CommandOutput {
    CommandOutput {
        success,
        code: Some(if success { 0 } else { 1 }),
        output: text.to_string(),
    }
}

fn single_manifest(dir: &Utf8PathBuf) -> Manifest {
    let existing = Default::default();
    let mut builder = ManifestBuilder::new("proj", ProjectId::new(7), &existing);
    builder.push(&Sample::new(
        "sampleA",
        dir.join("sampleA_R1_001.fastq.gz"),
        Some(dir.join("sampleA_R2_001.fastq.gz")),
    ));
    builder.finish()
}

fn orchestrator<'a, U: UploadRunner>(
    runner: &'a U,
    dir: &Utf8PathBuf,
    program: PathBuf,
    max_attempts: u32,
) -> Orchestrator<'a, U> {
    Orchestrator::new(
        runner,
        program,
        PathBuf::from("/etc/irida/config.conf"),
        dir.clone(),
        RetryPolicy {
            max_attempts,
            base_delay: std::time::Duration::ZERO,
        },
    )
}

fn utf8_tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, dir)
}

#[test]
fn always_failing_command_is_invoked_exactly_max_attempts() {
    let (_temp, dir) = utf8_tempdir();
    let runner = ScriptedRunner::default();
    let orchestrator = orchestrator(&runner, &dir, "upload_run.py".into(), 4);

    let outcome = orchestrator
        .upload_sample("sampleA", &single_manifest(&dir), &JsonOutput)
        .unwrap();

    assert_eq!(runner.calls(), 4);
    assert_matches!(
        outcome,
        SampleOutcome::Abandoned { attempts: 4, last_output } if last_output.contains("ERROR")
    );
}

#[test]
fn retries_until_marker_disappears() {
    let (_temp, dir) = utf8_tempdir();
    let runner = ScriptedRunner::new(vec![
        Ok(output(true, "ERROR: token expired")),
        Ok(output(false, "Traceback")),
        Err(UploaderError::UploadSpawn {
            program: "upload_run.py".to_string(),
            message: "busy".to_string(),
        }),
        Ok(output(true, "Upload complete")),
    ]);
    let orchestrator = orchestrator(&runner, &dir, "upload_run.py".into(), 10);

    let outcome = orchestrator
        .upload_sample("sampleA", &single_manifest(&dir), &JsonOutput)
        .unwrap();

    assert_eq!(outcome, SampleOutcome::Uploaded { attempts: 4 });
    assert_eq!(runner.calls(), 4);
    let calls = runner.calls.lock().unwrap();
    assert!(calls.iter().all(|args| args == &calls[0]));
    assert_eq!(
        calls[0],
        vec!["--force", "-c", "/etc/irida/config.conf", "--directory", dir.as_str()]
    );
}

#[test]
fn sample_list_is_written_to_upload_directory() {
    let (_temp, dir) = utf8_tempdir();
    let runner = ScriptedRunner::new(vec![Ok(output(true, "ok"))]);
    let orchestrator = orchestrator(&runner, &dir, "upload_run.py".into(), 1);
    let manifest = single_manifest(&dir);

    orchestrator
        .upload_sample("sampleA", &manifest, &JsonOutput)
        .unwrap();

    let written = std::fs::read_to_string(dir.join("SampleList.csv")).unwrap();
    assert_eq!(written, manifest.render());
}

#[test]
fn missing_binary_is_abandoned_not_fatal() {
    let (_temp, dir) = utf8_tempdir();
    let runner = SystemUploadRunner;
    let orchestrator = orchestrator(&runner, &dir, dir.join("no-such-uploader").into(), 2);

    let outcome = orchestrator
        .upload_sample("sampleA", &single_manifest(&dir), &JsonOutput)
        .unwrap();

    assert_matches!(outcome, SampleOutcome::Abandoned { attempts: 2, .. });
}

#[cfg(unix)]
#[test]
fn real_script_output_is_inspected() {
    use std::os::unix::fs::PermissionsExt;

    let (_temp, dir) = utf8_tempdir();
    let counter = dir.join("count");
    let script = dir.join("fake_upload.sh");
    // Fails on stderr twice, then succeeds.
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\necho x >> '{counter}'\nn=$(wc -l < '{counter}')\nif [ \"$n\" -lt 3 ]; then echo 'ERROR: retry me' >&2; fi\necho done\n"
        ),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let runner = SystemUploadRunner;
    let orchestrator = orchestrator(&runner, &dir, script.into(), 5);
    let outcome = orchestrator
        .upload_sample("sampleA", &single_manifest(&dir), &JsonOutput)
        .unwrap();

    assert_matches!(outcome, SampleOutcome::Uploaded { .. });
    let runs = std::fs::read_to_string(&counter).unwrap();
    assert_eq!(runs.lines().count(), 3);
}
