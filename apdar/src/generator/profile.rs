use std::f64::consts::PI;
use std::path::Path;

use anyhow::{ensure, Context};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracecore::dataset::DEFAULT_MEDIUM_VELOCITY;
use tracecore::ingest::cor::CorRecord;
use tracecore::ingest::ramac::AcquisitionPaths;
use tracecore::ingest::{write_acquisition, RadHeader, SampleWidth};

/// A point scatterer seen by every trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reflector {
    /// Range in metres.
    pub range: f64,
    /// Fraction of full scale.
    pub amplitude: f64,
}

/// Configuration for generating a synthetic deramped acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub traces: usize,
    pub samples: usize,
    pub frequency_mhz: f64,
    pub reflectors: Vec<Reflector>,
    pub noise: f64,
    pub full_scale: f64,
    pub seed: u64,
    /// Seconds between traces.
    pub trace_interval: f64,
    pub antenna: String,
    /// Write 32-bit `.rd7` samples instead of 16-bit `.rd3`.
    pub wide: bool,
    /// Emit a `.cor` fix every this many traces; 0 disables the sidecar.
    pub gps_every: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            traces: 200,
            samples: 512,
            frequency_mhz: 500.0,
            reflectors: vec![
                Reflector {
                    range: 5.0,
                    amplitude: 0.6,
                },
                Reflector {
                    range: 12.5,
                    amplitude: 0.25,
                },
                Reflector {
                    range: 30.0,
                    amplitude: 0.1,
                },
            ],
            noise: 0.01,
            full_scale: 12_000.0,
            seed: 0,
            trace_interval: 0.5,
            antenna: "500 MHz synthetic".into(),
            wide: false,
            gps_every: 10,
        }
    }
}

impl GeneratorConfig {
    fn width(&self) -> SampleWidth {
        if self.wide {
            SampleWidth::Bits32
        } else {
            SampleWidth::Bits16
        }
    }

    fn header(&self) -> RadHeader {
        RadHeader {
            samples: self.samples,
            frequency_mhz: self.frequency_mhz,
            time_interval: self.trace_interval,
            distance_interval: 0.0,
            antenna: self.antenna.clone(),
            antenna_separation: 0.0,
            time_window: self.samples as f64 / self.frequency_mhz * 1e3,
            stacks: 1,
            last_trace: self.traces,
        }
    }
}

/// Beat tones for every reflector plus uniform noise, quantized to integers.
///
/// A reflector at range `r` completes `2 r B / v` cycles per trace, which
/// range conversion maps back to `r`.
pub fn build_traces(config: &GeneratorConfig) -> anyhow::Result<Array2<i32>> {
    ensure!(config.samples > 0, "synthetic traces need at least one sample");
    ensure!(
        config.frequency_mhz > 0.0,
        "sampling frequency must be positive"
    );
    let bandwidth = config.frequency_mhz * 1e6;
    let cycles: Vec<f64> = config
        .reflectors
        .iter()
        .map(|r| 2.0 * r.range * bandwidth / DEFAULT_MEDIUM_VELOCITY)
        .collect();
    let limit = if config.wide {
        f64::from(i32::MAX)
    } else {
        f64::from(i16::MAX)
    };

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut traces = Array2::<i32>::zeros((config.samples, config.traces));
    for (trace_index, mut trace) in traces.columns_mut().into_iter().enumerate() {
        let phase_offset = trace_index as f64 * 0.05;
        for (sample_index, value) in trace.iter_mut().enumerate() {
            let t = sample_index as f64 / config.samples as f64;
            let mut signal: f64 = config
                .reflectors
                .iter()
                .zip(&cycles)
                .map(|(r, c)| r.amplitude * (2.0 * PI * c * t + phase_offset).cos())
                .sum();
            if config.noise > 0.0 {
                signal += rng.gen_range(-config.noise..config.noise);
            }
            *value = (signal * config.full_scale).round().clamp(-limit, limit) as i32;
        }
    }
    Ok(traces)
}

/// A straight northbound survey line sampled every `gps_every` traces and at
/// the last trace.
pub fn build_gps(config: &GeneratorConfig) -> anyhow::Result<Vec<CorRecord>> {
    if config.gps_every == 0 || config.traces == 0 {
        return Ok(Vec::new());
    }
    let start = survey_start()?;
    let mut traces: Vec<usize> = (1..=config.traces).step_by(config.gps_every).collect();
    if traces.last() != Some(&config.traces) {
        traces.push(config.traces);
    }
    Ok(traces
        .into_iter()
        .map(|trace| {
            let elapsed = (trace - 1) as f64 * config.trace_interval;
            CorRecord {
                trace,
                time: start + Duration::milliseconds((elapsed * 1e3).round() as i64),
                lat: 78.879_33 + 1e-6 * (trace - 1) as f64,
                long: 16.383_88,
                elev: 66.9 + 0.01 * (trace - 1) as f64,
            }
        })
        .collect())
}

fn survey_start() -> anyhow::Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2017, 8, 24)
        .and_then(|day| day.and_hms_opt(16, 28, 45))
        .context("building survey start time")
}

pub fn write_synthetic(base: &Path, config: &GeneratorConfig) -> anyhow::Result<AcquisitionPaths> {
    let traces = build_traces(config)?;
    let gps = build_gps(config)?;
    let paths = write_acquisition(base, &config.header(), &traces, config.width(), &gps)
        .with_context(|| format!("writing synthetic acquisition {}", base.display()))?;
    Ok(paths)
}
