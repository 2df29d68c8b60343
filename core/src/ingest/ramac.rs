//! RAMAC/MALA acquisitions: a `.rad` text header, a little-endian `.rd3`
//! (16-bit) or `.rd7` (32-bit) trace payload, and an optional `.cor` GPS log,
//! all sharing one basename.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::Array2;

use crate::dataset::{AcquisitionMetadata, Dataset, TraceMatrix};
use crate::ingest::cor::{self, CorRecord};
use crate::persist::write_atomic;
use crate::prelude::{RadarError, RadarResult};

/// Payload extensions tried, in order, when only a basename or the `.rad`
/// header is given.
pub const COMPANION_EXTENSIONS: [&str; 2] = ["rd3", "rd7"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    Bits16,
    Bits32,
}

impl SampleWidth {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "rd3" => Some(SampleWidth::Bits16),
            "rd7" => Some(SampleWidth::Bits32),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SampleWidth::Bits16 => "rd3",
            SampleWidth::Bits32 => "rd7",
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            SampleWidth::Bits16 => 2,
            SampleWidth::Bits32 => 4,
        }
    }

    fn decode(self, payload: &[u8]) -> Vec<f64> {
        match self {
            SampleWidth::Bits16 => payload
                .chunks_exact(2)
                .map(|b| f64::from(i16::from_le_bytes([b[0], b[1]])))
                .collect(),
            SampleWidth::Bits32 => payload
                .chunks_exact(4)
                .map(|b| f64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
                .collect(),
        }
    }

    fn encode(self, value: i32, out: &mut Vec<u8>) -> RadarResult<()> {
        match self {
            SampleWidth::Bits16 => {
                let narrow = i16::try_from(value).map_err(|_| {
                    RadarError::Format(format!("sample {value} does not fit a 16-bit payload"))
                })?;
                out.extend_from_slice(&narrow.to_le_bytes());
            }
            SampleWidth::Bits32 => out.extend_from_slice(&value.to_le_bytes()),
        }
        Ok(())
    }
}

/// Acquisition parameters from the `.rad` header.
#[derive(Debug, Clone, PartialEq)]
pub struct RadHeader {
    pub samples: usize,
    /// Sampling frequency in MHz.
    pub frequency_mhz: f64,
    pub time_interval: f64,
    pub distance_interval: f64,
    pub antenna: String,
    pub antenna_separation: f64,
    /// Recording window in ns.
    pub time_window: f64,
    pub stacks: u32,
    pub last_trace: usize,
}

impl RadHeader {
    pub fn parse(text: &str) -> RadarResult<Self> {
        let fields: BTreeMap<String, String> = text
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_ascii_uppercase(), value.trim().to_string()))
            .collect();

        let required = |key: &str| {
            fields
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| RadarError::Format(format!("header is missing '{key}'")))
        };
        let number = |key: &str, raw: &str| {
            raw.parse::<f64>()
                .map_err(|_| RadarError::Format(format!("header field '{key}' is not numeric: '{raw}'")))
        };
        let count = |key: &str, raw: &str| {
            raw.parse::<usize>()
                .map_err(|_| RadarError::Format(format!("header field '{key}' is not a count: '{raw}'")))
        };
        let optional = |key: &str| -> RadarResult<f64> {
            fields.get(key).map_or(Ok(0.0), |raw| number(key, raw.as_str()))
        };

        let header = RadHeader {
            samples: count("SAMPLES", required("SAMPLES")?)?,
            frequency_mhz: number("FREQUENCY", required("FREQUENCY")?)?,
            last_trace: count("LAST TRACE", required("LAST TRACE")?)?,
            time_interval: optional("TIME INTERVAL")?,
            distance_interval: optional("DISTANCE INTERVAL")?,
            antenna: fields.get("ANTENNAS").cloned().unwrap_or_default(),
            antenna_separation: optional("ANTENNA SEPARATION")?,
            time_window: optional("TIMEWINDOW")?,
            stacks: match fields.get("STACKS") {
                Some(raw) => raw.parse().map_err(|_| {
                    RadarError::Format(format!("header field 'STACKS' is not a count: '{raw}'"))
                })?,
                None => 1,
            },
        };
        if !(header.frequency_mhz > 0.0) {
            return Err(RadarError::Format(format!(
                "sampling frequency must be positive, got {} MHz",
                header.frequency_mhz
            )));
        }
        Ok(header)
    }

    pub fn render(&self) -> String {
        format!(
            "SAMPLES:{}\nFREQUENCY:{:.6}\nFREQUENCY STEPS:1\nSIGNAL POSITION:0.000000\n\
             TIME INTERVAL:{:.6}\nDISTANCE INTERVAL:{:.6}\nANTENNAS:{}\n\
             ANTENNA SEPARATION:{:.6}\nTIMEWINDOW:{:.6}\nSTACKS:{}\nLAST TRACE:{}\n",
            self.samples,
            self.frequency_mhz,
            self.time_interval,
            self.distance_interval,
            self.antenna,
            self.antenna_separation,
            self.time_window,
            self.stacks,
            self.last_trace,
        )
    }

    fn metadata(&self) -> AcquisitionMetadata {
        let sampling_hz = self.frequency_mhz * 1e6;
        let mut metadata = AcquisitionMetadata::new(self.last_trace, 1.0 / sampling_hz);
        metadata.bandwidth = sampling_hz;
        metadata.trace_interval = self.time_interval;
        metadata.antenna_separation = self.antenna_separation;
        metadata.antenna = self.antenna.clone();
        metadata
    }
}

/// Files making up one acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionPaths {
    pub header: PathBuf,
    pub payload: PathBuf,
    pub gps: PathBuf,
    pub width: SampleWidth,
}

/// `base` with `.ext` appended to its full file name.
fn sibling(base: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Maps any accepted alias of an acquisition (`x.rd3`, `x.rd7`, `x.rad`, `x`)
/// onto its companion files.
pub fn resolve(path: &Path, format: Option<&str>) -> RadarResult<AcquisitionPaths> {
    let forced = match format {
        Some(fmt) => Some(SampleWidth::from_extension(fmt).ok_or_else(|| {
            RadarError::Format(format!(
                "unsupported trace format '{fmt}', expected one of {COMPANION_EXTENSIONS:?}"
            ))
        })?),
        None => None,
    };

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let (base, named_width) = match ext.as_deref() {
        Some("rad") => (path.with_extension(""), None),
        Some(e) if SampleWidth::from_extension(e).is_some() => {
            (path.with_extension(""), SampleWidth::from_extension(e))
        }
        None => (path.to_path_buf(), None),
        Some(other) if sibling(path, "rad").exists() => {
            debug!("treating '.{other}' as part of the basename {}", path.display());
            (path.to_path_buf(), None)
        }
        Some(other) => {
            return Err(RadarError::Format(format!(
                "unrecognized extension '.{other}' for {}",
                path.display()
            )))
        }
    };

    let width = match forced.or(named_width) {
        Some(width) => width,
        None => COMPANION_EXTENSIONS
            .iter()
            .filter_map(|ext| SampleWidth::from_extension(ext))
            .find(|width| sibling(&base, width.extension()).exists())
            .ok_or_else(|| {
                RadarError::Format(format!(
                    "no trace payload ({}) found for {}",
                    COMPANION_EXTENSIONS.join(", "),
                    base.display()
                ))
            })?,
    };

    Ok(AcquisitionPaths {
        header: sibling(&base, "rad"),
        payload: sibling(&base, width.extension()),
        gps: sibling(&base, "cor"),
        width,
    })
}

pub fn load_ramac(path: &Path, format: Option<&str>) -> RadarResult<Dataset> {
    let paths = resolve(path, format)?;
    let header_text =
        fs::read_to_string(&paths.header).map_err(|e| RadarError::io(&paths.header, e))?;
    let header = RadHeader::parse(&header_text).map_err(|e| match e {
        RadarError::Format(msg) => {
            RadarError::Format(format!("{}: {msg}", paths.header.display()))
        }
        other => other,
    })?;

    let payload = fs::read(&paths.payload).map_err(|e| RadarError::io(&paths.payload, e))?;
    let expected = header
        .samples
        .checked_mul(header.last_trace)
        .and_then(|n| n.checked_mul(paths.width.bytes()))
        .ok_or_else(|| RadarError::Format("declared payload size overflows".into()))?;
    if payload.len() != expected {
        return Err(RadarError::Format(format!(
            "truncated or corrupt file {}: header declares {} traces x {} samples ({expected} bytes), found {} bytes",
            paths.payload.display(),
            header.last_trace,
            header.samples,
            payload.len()
        )));
    }

    let samples = paths.width.decode(&payload);
    let data = Array2::from_shape_vec((header.last_trace, header.samples), samples)
        .map_err(|e| RadarError::Format(format!("cannot shape trace payload: {e}")))?
        .reversed_axes()
        .as_standard_layout()
        .into_owned();

    let mut metadata = header.metadata();
    if paths.gps.exists() {
        let records = cor::read_cor(&paths.gps)?;
        match records.first() {
            Some(first) => {
                debug!("merged {} GPS fixes from {}", records.len(), paths.gps.display());
                metadata.timestamp = Some(first.unix_time());
                metadata.geolocation = Some(cor::geolocate(&records, header.last_trace));
            }
            None => warn!("GPS sidecar {} holds no fixes", paths.gps.display()),
        }
    }

    info!(
        "loaded {} traces x {} samples from {}",
        header.last_trace,
        header.samples,
        paths.payload.display()
    );
    Dataset::new(TraceMatrix::Real(data), metadata)
}

/// Writes the header, the payload and, when `gps` is non-empty, the GPS
/// sidecar of an acquisition rooted at `base`.
pub fn write_acquisition(
    base: &Path,
    header: &RadHeader,
    traces: &Array2<i32>,
    width: SampleWidth,
    gps: &[CorRecord],
) -> RadarResult<AcquisitionPaths> {
    if traces.dim() != (header.samples, header.last_trace) {
        return Err(RadarError::Format(format!(
            "header declares {} samples x {} traces but {:?} were given",
            header.samples,
            header.last_trace,
            traces.dim()
        )));
    }
    let mut payload = Vec::with_capacity(traces.len() * width.bytes());
    for &value in traces.t().iter() {
        width.encode(value, &mut payload)?;
    }

    let paths = AcquisitionPaths {
        header: sibling(base, "rad"),
        payload: sibling(base, width.extension()),
        gps: sibling(base, "cor"),
        width,
    };
    write_atomic(&paths.header, header.render().as_bytes())?;
    write_atomic(&paths.payload, &payload)?;
    if !gps.is_empty() {
        write_atomic(&paths.gps, cor::render_cor(gps).as_bytes())?;
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn header(samples: usize, traces: usize) -> RadHeader {
        RadHeader {
            samples,
            frequency_mhz: 1000.0,
            time_interval: 0.1,
            distance_interval: 0.0,
            antenna: "100 MHz Unshielded".into(),
            antenna_separation: 1.0,
            time_window: 256.0,
            stacks: 16,
            last_trace: traces,
        }
    }

    fn traces(samples: usize, tnum: usize) -> Array2<i32> {
        Array2::from_shape_fn((samples, tnum), |(s, t)| (s as i32 * 37 - t as i32 * 101) % 3000)
    }

    fn fixes() -> Vec<CorRecord> {
        let day = NaiveDate::from_ymd_opt(2017, 8, 24).unwrap();
        (0..3)
            .map(|i| CorRecord {
                trace: 1 + i * 4,
                time: day.and_hms_opt(16, 28, 45 + i as u32).unwrap(),
                lat: 78.87 + i as f64 * 1e-4,
                long: 16.38,
                elev: 66.0 + i as f64,
            })
            .collect()
    }

    fn ten_col(dir: &TempDir, name: &str, gps: bool) -> PathBuf {
        let base = dir.path().join(name);
        let records = if gps { fixes() } else { Vec::new() };
        write_acquisition(&base, &header(64, 10), &traces(64, 10), SampleWidth::Bits16, &records)
            .unwrap();
        base
    }

    #[test]
    fn aliases_load_identical_traces() {
        let dir = TempDir::new().unwrap();
        let base = ten_col(&dir, "ten_col", true);
        let a = load_ramac(&sibling(&base, "rd3"), Some(".rd3")).unwrap();
        let b = load_ramac(&sibling(&base, "rad"), Some(".rd3")).unwrap();
        let c = load_ramac(&base, Some(".rd3")).unwrap();
        let d = load_ramac(&base, None).unwrap();
        assert_eq!(a.data, b.data);
        assert_eq!(a.data, c.data);
        assert_eq!(a.data, d.data);
        assert_eq!(a.data.dim(), (64, 10));
    }

    #[test]
    fn payload_is_read_trace_by_trace() {
        let dir = TempDir::new().unwrap();
        let base = ten_col(&dir, "ten_col", false);
        let dataset = load_ramac(&base, None).unwrap();
        let expected = traces(64, 10).mapv(f64::from);
        assert_eq!(dataset.data, TraceMatrix::Real(expected));
        assert!((dataset.metadata.dt - 1e-9).abs() < 1e-20);
        assert_eq!(dataset.metadata.antenna, "100 MHz Unshielded");
    }

    #[test]
    fn gps_sidecar_is_optional() {
        let dir = TempDir::new().unwrap();
        let with_gps = load_ramac(&ten_col(&dir, "ten_col", true), None).unwrap();
        let without = load_ramac(&ten_col(&dir, "ten_col_nogps", false), None).unwrap();
        assert_eq!(with_gps.data, without.data);
        assert!(without.metadata.geolocation.is_none());
        assert!(without.metadata.timestamp.is_none());

        let geo = with_gps.metadata.geolocation.as_ref().unwrap();
        assert_eq!(geo.elev.len(), 10);
        assert!((geo.elev[2] - 66.5).abs() < 1e-9);
        assert!((geo.elev[9] - 68.0).abs() < 1e-9);
        assert!(with_gps.metadata.timestamp.is_some());
    }

    #[test]
    fn thirty_two_bit_payloads_are_supported() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("wide");
        let wide = traces(8, 3).mapv(|v| v * 100_000);
        write_acquisition(&base, &header(8, 3), &wide, SampleWidth::Bits32, &[]).unwrap();
        let dataset = load_ramac(&sibling(&base, "rad"), None).unwrap();
        assert_eq!(dataset.data, TraceMatrix::Real(wide.mapv(f64::from)));
    }

    #[test]
    fn truncated_payload_is_a_format_error() {
        let dir = TempDir::new().unwrap();
        let base = ten_col(&dir, "ten_col", false);
        let payload = sibling(&base, "rd3");
        let bytes = fs::read(&payload).unwrap();
        fs::write(&payload, &bytes[..bytes.len() - 3]).unwrap();
        let err = load_ramac(&base, None).unwrap_err();
        assert!(matches!(err, RadarError::Format(msg) if msg.contains("truncated")));
    }

    #[test]
    fn unsupported_discriminators_are_rejected() {
        let dir = TempDir::new().unwrap();
        let base = ten_col(&dir, "ten_col", false);
        assert!(matches!(
            load_ramac(&base, Some("dzt")),
            Err(RadarError::Format(_))
        ));
        assert!(matches!(
            load_ramac(&dir.path().join("other.segy"), None),
            Err(RadarError::Format(_))
        ));
        assert!(matches!(
            load_ramac(&dir.path().join("missing"), None),
            Err(RadarError::Format(_))
        ));
    }

    #[test]
    fn header_requires_core_fields() {
        let err = RadHeader::parse("FREQUENCY:1000\nLAST TRACE:3\n").unwrap_err();
        assert!(matches!(err, RadarError::Format(msg) if msg.contains("SAMPLES")));
        let parsed = RadHeader::parse(&header(12, 4).render()).unwrap();
        assert_eq!(parsed, header(12, 4));
    }

    #[test]
    fn out_of_range_samples_cannot_be_written_narrow() {
        let dir = TempDir::new().unwrap();
        let wide = Array2::from_elem((2, 1), 40_000);
        let err = write_acquisition(
            &dir.path().join("x"),
            &header(2, 1),
            &wide,
            SampleWidth::Bits16,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, RadarError::Format(_)));
    }
}
