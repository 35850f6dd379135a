use std::fs::{self, File};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info};

use crate::discovery::Discovery;
use crate::domain::{ReadFile, Sample, Strand, read_extension};
use crate::error::UploaderError;

/// Number of per-strand shards the sequencer writes for one sample.
pub const SHARDS_PER_STRAND: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MergeOutcome {
    Merged {
        forward: Utf8PathBuf,
        reverse: Utf8PathBuf,
    },
    AlreadyMerged {
        forward: Utf8PathBuf,
        reverse: Utf8PathBuf,
    },
    NotSharded,
}

impl MergeOutcome {
    pub fn merged_paths(&self) -> Option<(&Utf8Path, &Utf8Path)> {
        match self {
            MergeOutcome::Merged { forward, reverse }
            | MergeOutcome::AlreadyMerged { forward, reverse } => {
                Some((forward.as_path(), reverse.as_path()))
            }
            MergeOutcome::NotSharded => None,
        }
    }
}

pub fn merged_path(work_dir: &Utf8Path, sample: &str, strand: Strand, ext: &str) -> Utf8PathBuf {
    let tag = match strand {
        Strand::Forward => "R1",
        Strand::Reverse => "R2",
    };
    work_dir.join(format!("{sample}_merged_{tag}{ext}"))
}

/// Concatenates the four forward and four reverse shards of `sample` into
/// `work_dir` and points the sample at the merged files.
///
/// Any other shard count leaves the sample untouched. When both merged files
/// already exist nothing is rewritten.
pub fn merge_sample(
    sample: &mut Sample,
    discovery: &Discovery,
    work_dir: &Utf8Path,
) -> Result<MergeOutcome, UploaderError> {
    let forward = discovery.shards(sample.name(), Strand::Forward);
    let reverse = discovery.shards(sample.name(), Strand::Reverse);
    if forward.len() != SHARDS_PER_STRAND || reverse.len() != SHARDS_PER_STRAND {
        debug!(
            sample = sample.name(),
            forward = forward.len(),
            reverse = reverse.len(),
            "not a sharded sample, merge skipped"
        );
        return Ok(MergeOutcome::NotSharded);
    }

    let ext = read_extension(forward[0].file_name()).unwrap_or(".fastq.gz");
    let forward_out = merged_path(work_dir, sample.name(), Strand::Forward, ext);
    let reverse_out = merged_path(work_dir, sample.name(), Strand::Reverse, ext);

    let outcome = if forward_out.as_std_path().exists() && reverse_out.as_std_path().exists() {
        info!(sample = sample.name(), "merged files already present");
        MergeOutcome::AlreadyMerged {
            forward: forward_out,
            reverse: reverse_out,
        }
    } else {
        fs::create_dir_all(work_dir.as_std_path())
            .map_err(|err| UploaderError::Filesystem(err.to_string()))?;
        concatenate(&forward, &forward_out)?;
        concatenate(&reverse, &reverse_out)?;
        info!(sample = sample.name(), "merged {} shards per strand", SHARDS_PER_STRAND);
        MergeOutcome::Merged {
            forward: forward_out,
            reverse: reverse_out,
        }
    };

    if let Some((forward, reverse)) = outcome.merged_paths() {
        sample.replace_paths(forward.to_path_buf(), Some(reverse.to_path_buf()));
    }
    Ok(outcome)
}

/// Appends `shards` in order into a temp file next to `dest`, then renames it.
pub fn concatenate(shards: &[&ReadFile], dest: &Utf8Path) -> Result<u64, UploaderError> {
    let parent = dest
        .parent()
        .ok_or_else(|| UploaderError::Filesystem("invalid destination path".to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("irida-merge")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| UploaderError::Filesystem(err.to_string()))?;

    let mut written = 0;
    for shard in shards {
        let mut input = File::open(shard.path().as_std_path()).map_err(|err| {
            UploaderError::Filesystem(format!("open shard {}: {err}", shard.path()))
        })?;
        written += io::copy(&mut input, temp.as_file_mut())
            .map_err(|err| UploaderError::Filesystem(err.to_string()))?;
        debug!(shard = shard.file_name(), dest = %dest, "appended shard");
    }

    temp.persist(dest.as_std_path())
        .map_err(|err| UploaderError::Filesystem(err.to_string()))?;
    Ok(written)
}
