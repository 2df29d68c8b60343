use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use generator::profile::write_synthetic;
use log::info;
use std::path::PathBuf;
use tracecore::math::WindowKind;
use tracecore::processing::{RangeConfig, RangeConversion};
use tracecore::FileFormat;
use workflow::config::WorkflowConfig;
use workflow::runner::{Job, Runner};

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Load, range-convert and save radar acquisitions")]
struct Args {
    /// Load workflow defaults from YAML
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Worker threads for batch runs
    #[arg(long, global = true)]
    jobs: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct IoArgs {
    /// Acquisitions to process (.rd3, .rd7, .rad, bare basenames, or saved .json/.mat/.h5)
    #[arg(required = true)]
    fns: Vec<PathBuf>,
    /// Output file for a single input, or output directory
    #[arg(short = 'o', long)]
    output: Option<String>,
    /// Output format (json, mat or h5)
    #[arg(long)]
    format: Option<FileFormat>,
    /// Force the raw sample width (rd3 or rd7)
    #[arg(long)]
    input_format: Option<String>,
}

impl IoArgs {
    fn into_job(self) -> Job {
        Job {
            inputs: self.fns,
            output: self.output,
            format: self.format,
            input_format: self.input_format,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Load raw acquisitions and save them unprocessed
    Load {
        #[command(flatten)]
        io: IoArgs,
    },
    /// Range-convert acquisitions with a windowed, zero-padded FFT
    Range {
        /// Zero-padding factor
        #[arg(allow_negative_numbers = true)]
        pad: i64,
        #[command(flatten)]
        io: IoArgs,
        /// Discard samples beyond this range (m)
        #[arg(long)]
        max_range: Option<f64>,
        /// Window applied before the FFT (blackman, bartlett, hamming, hanning, kaiser)
        #[arg(long)]
        winfun: Option<String>,
    },
    /// Write a synthetic RAMAC acquisition
    Synth {
        /// Output basename; .rad/.rd3 (and .cor) are appended
        basename: PathBuf,
        #[arg(long)]
        traces: Option<usize>,
        #[arg(long)]
        samples: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// Skip the GPS sidecar
        #[arg(long, default_value_t = false)]
        no_gps: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut workflow_config = match &args.config {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::default(),
    };
    if let Some(jobs) = args.jobs {
        workflow_config.jobs = jobs;
    }

    match args.command {
        Command::Load { io } => {
            let runner = Runner::new(workflow_config);
            let summary = runner.execute(&io.into_job(), None);
            if summary.failed > 0 {
                bail!("{} of {} inputs failed", summary.failed, summary.total());
            }
        }
        Command::Range {
            pad,
            io,
            max_range,
            winfun,
        } => {
            let defaults = &workflow_config.range;
            let window = match winfun {
                Some(name) => name
                    .parse::<WindowKind>()
                    .with_context(|| format!("parsing window '{name}'"))?,
                None => defaults.window,
            };
            let range_config =
                RangeConfig::new(pad, max_range.unwrap_or(defaults.max_range), window);
            let step = RangeConversion::new(range_config);
            let runner = Runner::new(workflow_config);
            let summary = runner.execute(&io.into_job(), Some(&step));
            if summary.failed > 0 {
                bail!("{} of {} inputs failed", summary.failed, summary.total());
            }
        }
        Command::Synth {
            basename,
            traces,
            samples,
            seed,
            no_gps,
        } => {
            let mut generator = workflow_config.synth;
            generator.traces = traces.unwrap_or(generator.traces);
            generator.samples = samples.unwrap_or(generator.samples);
            generator.seed = seed.unwrap_or(generator.seed);
            if no_gps {
                generator.gps_every = 0;
            }
            let paths = write_synthetic(&basename, &generator)?;
            info!(
                "wrote {} traces x {} samples to {}",
                generator.traces,
                generator.samples,
                paths.payload.display()
            );
        }
    }

    Ok(())
}
