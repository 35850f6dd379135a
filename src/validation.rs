use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{error, info};

use crate::domain::{Sample, SampleRecord};
use crate::error::UploaderError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub paired: usize,
    pub single: usize,
    pub errors: usize,
    pub invalid: Vec<InvalidSample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidSample {
    pub name: String,
    pub problem: SampleProblem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleProblem {
    ReverseOnly,
    NoFiles,
}

impl SampleProblem {
    fn describe(self) -> &'static str {
        match self {
            SampleProblem::ReverseOnly => "has no valid forward file associated (only rev)",
            SampleProblem::NoFiles => "has no valid forward file associated",
        }
    }
}

impl ValidationSummary {
    pub fn is_valid(&self) -> bool {
        self.errors == 0
    }

    pub fn describe(&self) -> String {
        let names = self
            .invalid
            .iter()
            .map(|sample| sample.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} paired samples; {} single end samples; {} errors [{names}]",
            self.paired, self.single, self.errors
        )
    }
}

/// Counts paired, single-end and broken records without deciding anything.
pub fn summarize(records: &BTreeMap<String, SampleRecord>) -> ValidationSummary {
    let mut summary = ValidationSummary::default();
    for record in records.values() {
        match (&record.forward, &record.reverse) {
            (Some(_), Some(_)) => summary.paired += 1,
            (Some(_), None) => summary.single += 1,
            (None, reverse) => {
                summary.errors += 1;
                summary.invalid.push(InvalidSample {
                    name: record.name.clone(),
                    problem: if reverse.is_some() {
                        SampleProblem::ReverseOnly
                    } else {
                        SampleProblem::NoFiles
                    },
                });
            }
        }
    }
    summary
}

/// All-or-nothing gate: any broken record rejects the whole set.
pub fn validate(
    records: BTreeMap<String, SampleRecord>,
) -> Result<(ValidationSummary, BTreeMap<String, Sample>), UploaderError> {
    let summary = summarize(&records);
    for invalid in &summary.invalid {
        error!("Sample {} {}", invalid.name, invalid.problem.describe());
    }
    info!(
        "{} paired samples; {} single end samples; {} errors",
        summary.paired, summary.single, summary.errors
    );
    if !summary.is_valid() {
        error!("Invalid samples found: aborting");
        return Err(UploaderError::Validation(summary));
    }

    let samples = records
        .into_iter()
        .filter_map(|(name, record)| {
            let forward = record.forward?;
            Some((name.clone(), Sample::new(name, forward, record.reverse)))
        })
        .collect();
    Ok((summary, samples))
}
