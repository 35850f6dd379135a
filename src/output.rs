use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{ManifestReport, ProgressEvent, ProgressSink, UploadReport};
use crate::upload::SampleOutcome;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_upload(result: &UploadReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_manifest(result: &ManifestReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_upload(result: &UploadReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(
            stdout,
            "project {}: {} uploaded, {} already present, {} duplicate names, {} abandoned",
            result.project_id,
            result.uploaded,
            result.skipped,
            result.duplicates,
            result.abandoned
        )?;
        for sample in &result.samples {
            let status = match &sample.outcome {
                SampleOutcome::Uploaded { attempts } => format!("uploaded ({attempts} attempts)"),
                SampleOutcome::Skipped => "skipped".to_string(),
                SampleOutcome::Duplicate => "skipped (duplicate name)".to_string(),
                SampleOutcome::Abandoned { attempts, .. } => {
                    format!("ABANDONED after {attempts} attempts")
                }
            };
            writeln!(stdout, "  {} -> {}: {status}", sample.sample, sample.upload_name)?;
        }
        Ok(())
    }

    pub fn print_manifest(result: &ManifestReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", result.manifest_path)?;
        Ok(())
    }
}
