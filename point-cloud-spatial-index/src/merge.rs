/// Two-way merge of sorted runs.
///
/// Both inputs are streamed record by record and deleted once the output is
/// complete; a consumed run ceases to exist.
use crate::error::{BuildError, Result};
use crate::point::Axis;
use crate::run_file::{AxisStreamWriter, RecordSink, RunFile, RunReader, RunFileWriter};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// One unit of work for a merge worker: two runs in, one run out.
#[derive(Debug, Clone)]
pub struct MergeJob {
    pub left: RunFile,
    pub right: RunFile,
    pub output: PathBuf,
}

impl MergeJob {
    pub fn axis(&self) -> Axis {
        self.left.axis
    }

    pub fn total(&self) -> Result<u32> {
        combined_count(&self.left, &self.right)
    }
}

fn combined_count(left: &RunFile, right: &RunFile) -> Result<u32> {
    left.count
        .checked_add(right.count)
        .ok_or_else(|| BuildError::config("merged run exceeds u32 records"))
}

/// Merges two runs of the same axis into `sink`, left record first on a tie.
/// Returns the number of records written.
pub fn merge_into<S: RecordSink>(
    left: &Path,
    right: &Path,
    axis: Axis,
    sink: &mut S,
) -> Result<u64> {
    let mut left = RunReader::open(left)?;
    let mut right = RunReader::open(right)?;
    let mut written = 0u64;

    let mut head_left = left.next_record()?;
    let mut head_right = right.next_record()?;

    loop {
        match (head_left, head_right) {
            (Some(a), Some(b)) => {
                if a.cmp_on(&b, axis) != Ordering::Greater {
                    sink.push(&a)?;
                    head_left = left.next_record()?;
                } else {
                    sink.push(&b)?;
                    head_right = right.next_record()?;
                }
            }
            (Some(a), None) => {
                sink.push(&a)?;
                head_left = left.next_record()?;
            }
            (None, Some(b)) => {
                sink.push(&b)?;
                head_right = right.next_record()?;
            }
            (None, None) => break,
        }
        written += 1;
    }

    Ok(written)
}

/// Intermediate merge: the output is another full-record run.
pub fn merge_to_run(job: MergeJob) -> Result<RunFile> {
    let axis = job.axis();
    let mut writer = RunFileWriter::create(&job.output, axis, job.total()?)?;
    merge_into(&job.left.path, &job.right.path, axis, &mut writer)?;
    let merged = writer.finish()?;

    fs::remove_file(&job.left.path)?;
    fs::remove_file(&job.right.path)?;
    log::debug!(
        "merged {} + {} -> {} ({} records)",
        job.left.path.display(),
        job.right.path.display(),
        merged.path.display(),
        merged.count
    );
    Ok(merged)
}

/// Terminal merge of the last two runs of an axis: coordinates are stripped
/// and the id-only axis stream is written directly.
pub fn merge_to_stream(left: RunFile, right: RunFile, output: &Path) -> Result<PathBuf> {
    let axis = left.axis;
    let mut writer = AxisStreamWriter::create(output, combined_count(&left, &right)?)?;
    merge_into(&left.path, &right.path, axis, &mut writer)?;
    let stream = writer.finish()?;

    fs::remove_file(&left.path)?;
    fs::remove_file(&right.path)?;
    log::debug!("terminal {} merge -> {}", axis, stream.display());
    Ok(stream)
}

/// A lone run is already fully sorted; only its coordinates are stripped.
pub fn reencode_to_stream(run: RunFile, output: &Path) -> Result<PathBuf> {
    let mut reader = RunReader::open(&run.path)?;
    let mut writer = AxisStreamWriter::create(output, reader.count())?;
    while let Some(record) = reader.next_record()? {
        writer.push(&record)?;
    }
    let stream = writer.finish()?;

    fs::remove_file(&run.path)?;
    log::debug!("re-encoded single {} run -> {}", run.axis, stream.display());
    Ok(stream)
}
