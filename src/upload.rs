use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::RetryPolicy;
use crate::error::UploaderError;
use crate::manifest::Manifest;

/// Any occurrence in the uploader's output marks the attempt as failed.
pub const FAILURE_MARKER: &str = "ERROR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    /// stdout followed by stderr.
    pub output: String,
}

pub trait UploadRunner {
    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput, UploaderError>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemUploadRunner;

impl UploadRunner for SystemUploadRunner {
    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput, UploaderError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| UploaderError::UploadSpawn {
                program: program.display().to_string(),
                message: err.to_string(),
            })?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            output: combined,
        })
    }
}

/// Arguments passed to `upload_run.py` for one attempt.
pub fn upload_args(irida_conf: &Path, directory: &Utf8Path) -> Vec<String> {
    vec![
        "--force".to_string(),
        "-c".to_string(),
        irida_conf.to_string_lossy().to_string(),
        "--directory".to_string(),
        directory.to_string(),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAttempt {
    pub sample: String,
    pub attempt: u32,
    pub output: String,
    pub success: bool,
}

impl UploadAttempt {
    fn from_result(sample: &str, attempt: u32, result: Result<CommandOutput, UploaderError>) -> Self {
        match result {
            Ok(output) => Self {
                sample: sample.to_string(),
                attempt,
                success: output.success && !output.output.contains(FAILURE_MARKER),
                output: match output.code {
                    Some(code) if !output.success => {
                        format!("exit status {code}\n{}", output.output)
                    }
                    _ => output.output,
                },
            },
            Err(err) => Self {
                sample: sample.to_string(),
                attempt,
                output: err.to_string(),
                success: false,
            },
        }
    }

    fn into_error(self) -> UploaderError {
        UploaderError::UploadAttempt {
            sample: self.sample,
            attempt: self.attempt,
            message: self.output.trim().lines().last().unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SampleOutcome {
    Uploaded { attempts: u32 },
    Skipped,
    /// Another sample of the run maps to the same upload name.
    Duplicate,
    Abandoned { attempts: u32, last_output: String },
}

/// Runs the external upload command for one sample at a time.
pub struct Orchestrator<'a, U: UploadRunner + ?Sized> {
    runner: &'a U,
    program: PathBuf,
    irida_conf: PathBuf,
    directory: Utf8PathBuf,
    retry: RetryPolicy,
}

impl<'a, U: UploadRunner + ?Sized> Orchestrator<'a, U> {
    pub fn new(
        runner: &'a U,
        program: PathBuf,
        irida_conf: PathBuf,
        directory: Utf8PathBuf,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            runner,
            program,
            irida_conf,
            directory,
            retry,
        }
    }

    pub fn sample_list_path(&self) -> Utf8PathBuf {
        self.directory.join(crate::config::SAMPLE_LIST_NAME)
    }

    /// Writes the single-sample manifest and retries the upload until it
    /// succeeds or the attempt ceiling is reached. Only a failure to write the
    /// manifest is returned as an error.
    pub fn upload_sample(
        &self,
        sample: &str,
        manifest: &Manifest,
        sink: &dyn ProgressSink,
    ) -> Result<SampleOutcome, UploaderError> {
        let sample_list = self.sample_list_path();
        manifest.write_to(&sample_list)?;

        let args = upload_args(&self.irida_conf, &self.directory);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_output = String::new();

        for attempt in 1..=max_attempts {
            sink.event(ProgressEvent {
                message: format!("phase=Upload; sample={sample} attempt={attempt}/{max_attempts}"),
                elapsed: None,
            });
            debug!("#{attempt}: Trying to upload {sample} (samplesheet = {sample_list})");
            let start = Instant::now();
            let result = self.runner.run(&self.program, &args);
            let attempt = UploadAttempt::from_result(sample, attempt, result);
            let elapsed = start.elapsed();

            if attempt.success {
                info!(sample, attempts = attempt.attempt, "uploaded");
                sink.event(ProgressEvent {
                    message: format!("upload.done sample={sample}"),
                    elapsed: Some(elapsed),
                });
                return Ok(SampleOutcome::Uploaded {
                    attempts: attempt.attempt,
                });
            }

            let number = attempt.attempt;
            last_output = attempt.output.clone();
            warn!("{}", attempt.into_error());
            debug!("uploader output:\n{last_output}");

            if number < max_attempts {
                let delay = self.retry.delay_after(number);
                if !delay.is_zero() {
                    debug!(delay_ms = delay.as_millis() as u64, "waiting before next attempt");
                    thread::sleep(delay);
                }
            }
        }

        warn!(
            "{}",
            UploaderError::UploadExhausted {
                sample: sample.to_string(),
                attempts: max_attempts,
            }
        );
        Ok(SampleOutcome::Abandoned {
            attempts: max_attempts,
            last_output,
        })
    }
}
