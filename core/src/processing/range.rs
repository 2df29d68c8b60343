use log::{info, warn};
use ndarray::{Array2, Axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, TraceMatrix};
use crate::flags::{FlagField, FlagValue};
use crate::math::fft::FftHelper;
use crate::math::window::WindowKind;
use crate::prelude::{ProcessingStep, RadarError, RadarResult};

/// Largest padding factor; the ledger stores it as an exact `f32` integer.
pub const MAX_PAD: i64 = 1 << 24;

/// Upper bound on the padded FFT length of one trace.
pub const MAX_PADDED_SAMPLES: usize = 1 << 26;

/// Parameters of one range conversion, threaded in explicitly by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    /// Zero-padding factor; 0 and 1 both mean no padding.
    pub pad: i64,
    /// Samples beyond this range (m) are discarded.
    pub max_range: f64,
    pub window: WindowKind,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            pad: 2,
            max_range: 4000.0,
            window: WindowKind::Blackman,
        }
    }
}

impl RangeConfig {
    pub fn new(pad: i64, max_range: f64, window: WindowKind) -> Self {
        Self {
            pad,
            max_range,
            window,
        }
    }

    fn validate(&self) -> RadarResult<usize> {
        if !(0..=MAX_PAD).contains(&self.pad) {
            return Err(RadarError::Config(format!(
                "padding factor must be between 0 and {MAX_PAD}, got {}",
                self.pad
            )));
        }
        if !self.max_range.is_finite() || self.max_range <= 0.0 {
            return Err(RadarError::Config(format!(
                "maximum range must be positive, got {}",
                self.max_range
            )));
        }
        if !(self.max_range as f32).is_finite() {
            return Err(RadarError::Config(format!(
                "maximum range {} cannot be recorded in the flag ledger",
                self.max_range
            )));
        }
        usize::try_from(self.pad)
            .map_err(|_| RadarError::Config(format!("padding factor {} is too large", self.pad)))
    }
}

/// Spacing of the range-converted samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeGeometry {
    /// Padded length relative to the raw sample count.
    pub factor: usize,
    /// Range covered by one output sample, in metres.
    pub spacing: f64,
}

impl RangeGeometry {
    /// Geometry for a padding factor; a factor below one is treated as one.
    pub fn from_factor(pad: usize, medium_velocity: f64, bandwidth: f64) -> Self {
        let factor = pad.max(1);
        Self {
            factor,
            spacing: medium_velocity / (2.0 * bandwidth * factor as f64),
        }
    }

    /// `None` when the padded length overflows.
    pub fn padded_length(&self, snum: usize) -> Option<usize> {
        snum.checked_mul(self.factor)
    }

    pub fn range_at(&self, index: usize) -> f64 {
        index as f64 * self.spacing
    }

    /// Number of leading samples whose range does not exceed `max_range`,
    /// capped at `padded_len`.
    pub fn retained_samples(&self, padded_len: usize, max_range: f64) -> usize {
        let estimate = (max_range / self.spacing).floor();
        let mut k = if estimate.is_finite() && estimate < padded_len as f64 {
            estimate as usize + 1
        } else {
            padded_len
        };
        while k > 1 && self.range_at(k - 1) > max_range {
            k -= 1;
        }
        while k < padded_len && self.range_at(k) <= max_range {
            k += 1;
        }
        k
    }
}

/// Windowed, zero-padded FFT along fast time, truncated at a maximum range.
pub struct RangeConversion {
    config: RangeConfig,
}

impl RangeConversion {
    pub fn new(config: RangeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RangeConfig {
        &self.config
    }
}

impl ProcessingStep for RangeConversion {
    fn name(&self) -> &'static str {
        "ranged"
    }

    fn apply(&self, dataset: &mut Dataset) -> RadarResult<()> {
        let pad = self.config.validate()?;
        let (snum, tnum) = dataset.data.dim();
        if tnum == 0 || snum == 0 {
            return Err(RadarError::Config(format!(
                "cannot range-convert an empty trace matrix ({snum} samples x {tnum} traces)"
            )));
        }
        let metadata = &dataset.metadata;
        if !(metadata.bandwidth > 0.0 && metadata.medium_velocity > 0.0) {
            return Err(RadarError::Config(format!(
                "bandwidth ({}) and medium velocity ({}) must be positive",
                metadata.bandwidth, metadata.medium_velocity
            )));
        }
        if matches!(dataset.flags.get(FlagField::Range), FlagValue::Vector(v) if v.iter().any(|&x| x != 0.0))
        {
            warn!("dataset is already range converted; converting the current samples again");
        }

        let geometry = RangeGeometry::from_factor(pad, metadata.medium_velocity, metadata.bandwidth);
        let padded_len = geometry
            .padded_length(snum)
            .filter(|&len| len <= MAX_PADDED_SAMPLES)
            .ok_or_else(|| {
                RadarError::Config(format!(
                    "padding {snum} samples by {pad} exceeds {MAX_PADDED_SAMPLES} samples per trace"
                ))
            })?;
        let kept = geometry.retained_samples(padded_len, self.config.max_range);
        let weights = self.config.window.weights(snum);

        let input = dataset.data.to_complex();
        let mut fft = FftHelper::new(padded_len);
        let mut output = Array2::<Complex64>::zeros((kept, tnum));
        for (trace, mut column) in input.axis_iter(Axis(1)).zip(output.axis_iter_mut(Axis(1))) {
            let spectrum = fft.forward(trace.iter().zip(&weights).map(|(sample, w)| *sample * *w));
            for (out, value) in column.iter_mut().zip(spectrum) {
                *out = value;
            }
        }

        dataset.data = TraceMatrix::Complex(output);
        dataset.flags.set_vector(
            FlagField::Range,
            &[
                pad as f32,
                self.config.max_range as f32,
                f32::from(self.config.window.code()),
            ],
        )?;
        info!(
            "range converted {tnum} traces: {snum} -> {kept} samples (padded {padded_len}, {} window, {:.3} m spacing)",
            self.config.window, geometry.spacing
        );
        Ok(())
    }
}

/// Range-converts `dataset` in place, parsing the window name first.
pub fn range_convert(
    dataset: &mut Dataset,
    pad: i64,
    max_range: f64,
    window: &str,
) -> RadarResult<()> {
    let window = window.parse::<WindowKind>()?;
    RangeConversion::new(RangeConfig::new(pad, max_range, window)).apply(dataset)
}
