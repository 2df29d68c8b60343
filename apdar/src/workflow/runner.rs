use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use log::{error, info};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracecore::ingest;
use tracecore::persist;
use tracecore::telemetry::{BatchMetrics, BatchSummary};
use tracecore::{FileFormat, ProcessingStep};

/// Stage tag of outputs written without a processing step.
pub const RAW_TAG: &str = "raw";

/// Extensions stripped from an input name before the stage tag is appended.
const KNOWN_EXTENSIONS: [&str; 6] = ["rd3", "rd7", "rad", "json", "mat", "h5"];

/// One batch: the inputs and where their outputs go.
#[derive(Clone, Debug, Default)]
pub struct Job {
    pub inputs: Vec<PathBuf>,
    /// Output file (single input) or directory (several inputs, or a
    /// trailing separator).
    pub output: Option<String>,
    /// Explicit output format; otherwise taken from the output file name or
    /// the workflow config.
    pub format: Option<FileFormat>,
    /// Forced raw sample width (`rd3` or `rd7`).
    pub input_format: Option<String>,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    /// Loads, optionally transforms and saves every input. Each input fails
    /// independently; the returned summary counts the failures.
    pub fn execute(&self, job: &Job, step: Option<&(dyn ProcessingStep + Sync)>) -> BatchSummary {
        let tag = step.map_or(RAW_TAG, |step| step.name());
        let metrics = BatchMetrics::new();
        let next = AtomicUsize::new(0);
        let workers = self.config.workers().min(job.inputs.len().max(1));
        info!(
            "processing {} input(s) with {workers} worker(s), stage '{tag}'",
            job.inputs.len()
        );

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(input) = job.inputs.get(index) else {
                        break;
                    };
                    match self.process_one(input, job, step, tag) {
                        Ok((dest, traces)) => {
                            info!("{} -> {}", input.display(), dest.display());
                            metrics.record_processed(traces);
                        }
                        Err(err) => {
                            error!("{}: {err:#}", input.display());
                            metrics.record_failed();
                        }
                    }
                });
            }
        });

        let summary = metrics.snapshot();
        info!(
            "batch finished: {} processed, {} failed, {} traces",
            summary.processed, summary.failed, summary.traces
        );
        summary
    }

    fn process_one(
        &self,
        input: &Path,
        job: &Job,
        step: Option<&(dyn ProcessingStep + Sync)>,
        tag: &str,
    ) -> anyhow::Result<(PathBuf, usize)> {
        let mut dataset = ingest::load(input, job.input_format.as_deref())
            .with_context(|| format!("loading {}", input.display()))?;
        if let Some(step) = step {
            step.apply(&mut dataset)
                .with_context(|| format!("applying {} to {}", step.name(), input.display()))?;
        }
        let (dest, format) = output_path(
            input,
            tag,
            job.output.as_deref(),
            job.inputs.len(),
            job.format,
            self.config.format,
        );
        persist::write(&dataset, &dest, format)
            .with_context(|| format!("writing {}", dest.display()))?;
        Ok((dest, dataset.tnum()))
    }
}

/// Input file name without a known extension or a trailing `_raw`.
fn output_stem(input: &Path) -> String {
    let known = input
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| KNOWN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    let stem = if known {
        input.file_stem()
    } else {
        input.file_name()
    }
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default();
    match stem.strip_suffix("_raw") {
        Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
        _ => stem,
    }
}

fn names_directory(out: &str) -> bool {
    out.ends_with('/') || out.ends_with(std::path::MAIN_SEPARATOR) || Path::new(out).is_dir()
}

/// Destination and format of the output for `input`.
pub fn output_path(
    input: &Path,
    tag: &str,
    output: Option<&str>,
    batch_len: usize,
    explicit: Option<FileFormat>,
    fallback: FileFormat,
) -> (PathBuf, FileFormat) {
    let named = |format: FileFormat| format!("{}_{tag}.{}", output_stem(input), format.extension());
    match output {
        Some(out) if batch_len > 1 || names_directory(out) => {
            let format = explicit.unwrap_or(fallback);
            (Path::new(out).join(named(format)), format)
        }
        Some(out) => {
            let dest = PathBuf::from(out);
            let format = explicit
                .or_else(|| FileFormat::from_path(&dest))
                .unwrap_or(fallback);
            (dest, format)
        }
        None => {
            let format = explicit.unwrap_or(fallback);
            (input.with_file_name(named(format)), format)
        }
    }
}
