use ndarray::{Array1, Array2};
use num_complex::Complex64;

use crate::flags::{FlagField, FlagLedger, FlagValue};
use crate::prelude::{RadarError, RadarResult};
use crate::processing::range::RangeGeometry;

/// Propagation speed in glacier ice, m/s.
pub const DEFAULT_MEDIUM_VELOCITY: f64 = 1.69e8;

/// Trace samples laid out as `(fast-time sample, trace)`.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceMatrix {
    Real(Array2<f64>),
    Complex(Array2<Complex64>),
}

impl TraceMatrix {
    /// `(samples per trace, traces)`.
    pub fn dim(&self) -> (usize, usize) {
        match self {
            TraceMatrix::Real(values) => values.dim(),
            TraceMatrix::Complex(values) => values.dim(),
        }
    }

    pub fn snum(&self) -> usize {
        self.dim().0
    }

    pub fn tnum(&self) -> usize {
        self.dim().1
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, TraceMatrix::Complex(_))
    }

    /// Complex copy of the samples; real data gets a zero imaginary part.
    pub fn to_complex(&self) -> Array2<Complex64> {
        match self {
            TraceMatrix::Real(values) => values.mapv(|v| Complex64::new(v, 0.0)),
            TraceMatrix::Complex(values) => values.clone(),
        }
    }
}

/// Per-trace position fixes merged from a GPS sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct Geolocation {
    pub lat: Array1<f64>,
    pub long: Array1<f64>,
    pub elev: Array1<f64>,
}

/// Sampling parameters of one acquisition, written once by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionMetadata {
    pub tnum: usize,
    /// Fast-time sample interval in seconds.
    pub dt: f64,
    /// Effective sweep bandwidth in Hz. Time-domain instruments report their
    /// sampling frequency here.
    pub bandwidth: f64,
    pub trace_interval: f64,
    pub antenna_separation: f64,
    pub antenna: String,
    pub medium_velocity: f64,
    /// Unix time of the first GPS fix.
    pub timestamp: Option<f64>,
    pub geolocation: Option<Geolocation>,
}

impl AcquisitionMetadata {
    pub fn new(tnum: usize, dt: f64) -> Self {
        Self {
            tnum,
            dt,
            bandwidth: if dt > 0.0 { 1.0 / dt } else { 0.0 },
            trace_interval: 0.0,
            antenna_separation: 0.0,
            antenna: String::new(),
            medium_velocity: DEFAULT_MEDIUM_VELOCITY,
            timestamp: None,
            geolocation: None,
        }
    }
}

/// One acquisition: its traces, its metadata and the ledger of processing
/// applied to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub data: TraceMatrix,
    pub metadata: AcquisitionMetadata,
    pub flags: FlagLedger,
}

impl Dataset {
    /// Builds a freshly loaded dataset with every ledger field at its initial value.
    pub fn new(data: TraceMatrix, metadata: AcquisitionMetadata) -> RadarResult<Self> {
        Self::with_flags(data, metadata, FlagLedger::new())
    }

    pub fn with_flags(
        data: TraceMatrix,
        metadata: AcquisitionMetadata,
        flags: FlagLedger,
    ) -> RadarResult<Self> {
        if metadata.tnum != data.tnum() {
            return Err(RadarError::Format(format!(
                "metadata declares {} traces but the trace matrix holds {}",
                metadata.tnum,
                data.tnum()
            )));
        }
        if let Some(geo) = &metadata.geolocation {
            let expected = data.tnum();
            if geo.lat.len() != expected || geo.long.len() != expected || geo.elev.len() != expected
            {
                return Err(RadarError::Format(format!(
                    "geolocation arrays must have one entry per trace ({expected})"
                )));
            }
        }
        Ok(Self {
            data,
            metadata,
            flags,
        })
    }

    pub fn snum(&self) -> usize {
        self.data.snum()
    }

    pub fn tnum(&self) -> usize {
        self.data.tnum()
    }

    /// Two-way travel time of each fast-time sample of the raw traces.
    pub fn travel_time(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.snum(), |i| i as f64 * self.metadata.dt)
    }

    /// Range of each retained sample, or `None` before range conversion.
    pub fn range_axis(&self) -> Option<Array1<f64>> {
        let params = match self.flags.get(FlagField::Range) {
            FlagValue::Vector(values) if values.iter().any(|&v| v != 0.0) => values,
            _ => return None,
        };
        let geometry = RangeGeometry::from_factor(
            params[0] as usize,
            self.metadata.medium_velocity,
            self.metadata.bandwidth,
        );
        Some(Array1::from_shape_fn(self.snum(), |i| geometry.range_at(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn dataset_rejects_trace_count_mismatch() {
        let data = TraceMatrix::Real(Array2::zeros((4, 3)));
        let err = Dataset::new(data, AcquisitionMetadata::new(2, 1e-9)).unwrap_err();
        assert!(matches!(err, RadarError::Format(_)));
    }

    #[test]
    fn fresh_dataset_has_no_range_axis() {
        let data = TraceMatrix::Real(Array2::zeros((4, 2)));
        let dataset = Dataset::new(data, AcquisitionMetadata::new(2, 1e-9)).unwrap();
        assert!(dataset.range_axis().is_none());
        assert!((dataset.travel_time()[3] - 3e-9).abs() < 1e-18);
    }

    #[test]
    fn complex_view_keeps_real_part() {
        let matrix = TraceMatrix::Real(Array2::from_elem((2, 2), 1.5));
        let complex = matrix.to_complex();
        assert_eq!(complex[[1, 1]], Complex64::new(1.5, 0.0));
        assert!(!matrix.is_complex());
    }
}
