//! Saving and restoring datasets in the native container (`.json`), the
//! legacy MATLAB interchange format (`.mat`) and, with the `hdf5` feature,
//! ImpDAR-style HDF5 files (`.h5`).

pub mod container;
#[cfg(feature = "hdf5")]
pub mod h5;
pub mod matfile;

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::dataset::Dataset;
use crate::flags::FlagLedger;
use crate::prelude::{RadarError, RadarResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    /// Hierarchical group tree serialized as JSON.
    #[serde(rename = "json")]
    Container,
    /// MATLAB Level 5 MAT-file.
    #[serde(rename = "mat")]
    Interchange,
    /// HDF5 group tree; needs the `hdf5` feature.
    #[serde(rename = "h5")]
    Hdf5,
}

/// First bytes of every HDF5 file without a user block.
pub const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Container => "json",
            FileFormat::Interchange => "mat",
            FileFormat::Hdf5 => "h5",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "json" => Some(FileFormat::Container),
            "mat" => Some(FileFormat::Interchange),
            "h5" | "hdf5" => Some(FileFormat::Hdf5),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Recognizes a format from the first bytes of a file.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(matfile::HEADER_MAGIC) {
            return Some(FileFormat::Interchange);
        }
        if bytes.starts_with(HDF5_MAGIC) {
            return Some(FileFormat::Hdf5);
        }
        let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
        let head = &bytes[start..bytes.len().min(start + 256)];
        let marker = container::CONTAINER_FORMAT.as_bytes();
        if head.first() == Some(&b'{') && head.windows(marker.len()).any(|w| w == marker) {
            return Some(FileFormat::Container);
        }
        None
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FileFormat {
    type Err = RadarError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "json" | "container" => Ok(FileFormat::Container),
            "mat" | "matlab" | "interchange" => Ok(FileFormat::Interchange),
            "h5" | "hdf5" => Ok(FileFormat::Hdf5),
            other => Err(RadarError::Config(format!(
                "unknown output format '{other}', expected json, mat or h5"
            ))),
        }
    }
}

/// Writes `dataset` to `path`. The file appears at `path` complete or not at all.
pub fn write(dataset: &Dataset, path: &Path, format: FileFormat) -> RadarResult<()> {
    match format {
        FileFormat::Container => write_atomic(path, &container::encode_dataset(dataset)?)?,
        FileFormat::Interchange => write_atomic(path, &matfile::encode_dataset(dataset)?)?,
        FileFormat::Hdf5 => write_hdf5(dataset, path)?,
    }
    info!(
        "wrote {} x {} {} dataset to {}",
        dataset.snum(),
        dataset.tnum(),
        format,
        path.display()
    );
    Ok(())
}

/// Writes `dataset` in the format named by the extension of `path`.
pub fn save(dataset: &Dataset, path: &Path) -> RadarResult<FileFormat> {
    let format = FileFormat::from_path(path).ok_or_else(|| {
        RadarError::Format(format!(
            "cannot infer an output format from {}, use .json, .mat or .h5",
            path.display()
        ))
    })?;
    write(dataset, path, format)?;
    Ok(format)
}

pub fn read(path: &Path) -> RadarResult<Dataset> {
    let bytes = fs::read(path).map_err(|e| RadarError::io(path, e))?;
    let format = FileFormat::sniff(&bytes)
        .or_else(|| FileFormat::from_path(path))
        .ok_or_else(|| {
            RadarError::Format(format!("unrecognized dataset file {}", path.display()))
        })?;
    debug!("reading {} as {format}", path.display());
    let dataset = match format {
        FileFormat::Container => container::decode_dataset(&bytes),
        FileFormat::Interchange => matfile::decode_dataset(&bytes),
        FileFormat::Hdf5 => read_hdf5(path),
    }
    .map_err(|e| match e {
        RadarError::Format(msg) => RadarError::Format(format!("{}: {msg}", path.display())),
        other => other,
    })?;
    info!(
        "read {} x {} dataset from {}",
        dataset.snum(),
        dataset.tnum(),
        path.display()
    );
    Ok(dataset)
}

/// Temp file in the destination directory, creating the directory first.
fn stage_beside(path: &Path) -> RadarResult<NamedTempFile> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| RadarError::io(&parent, e))?;
    NamedTempFile::new_in(&parent).map_err(|e| RadarError::io(&parent, e))
}

fn commit(tmp: NamedTempFile, path: &Path) -> RadarResult<()> {
    tmp.as_file()
        .sync_all()
        .map_err(|e| RadarError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| RadarError::io(path, e.error))?;
    Ok(())
}

/// Temp-file-then-rename write in the destination directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> RadarResult<()> {
    let mut tmp = stage_beside(path)?;
    tmp.write_all(bytes).map_err(|e| RadarError::io(tmp.path(), e))?;
    tmp.flush().map_err(|e| RadarError::io(tmp.path(), e))?;
    commit(tmp, path)
}

#[cfg(feature = "hdf5")]
fn write_hdf5(dataset: &Dataset, path: &Path) -> RadarResult<()> {
    let tmp = stage_beside(path)?;
    h5::write_dataset(dataset, tmp.path())?;
    commit(tmp, path)
}

#[cfg(feature = "hdf5")]
fn read_hdf5(path: &Path) -> RadarResult<Dataset> {
    h5::read_dataset(path)
}

#[cfg(feature = "hdf5")]
pub(crate) fn encode_hdf5_ledger(ledger: &FlagLedger) -> RadarResult<Vec<u8>> {
    let tmp = NamedTempFile::new().map_err(|e| RadarError::io(std::env::temp_dir(), e))?;
    h5::write_ledger(ledger, tmp.path())?;
    fs::read(tmp.path()).map_err(|e| RadarError::io(tmp.path(), e))
}

#[cfg(feature = "hdf5")]
pub(crate) fn decode_hdf5_ledger(blob: &[u8]) -> RadarResult<FlagLedger> {
    let mut tmp = NamedTempFile::new().map_err(|e| RadarError::io(std::env::temp_dir(), e))?;
    tmp.write_all(blob).map_err(|e| RadarError::io(tmp.path(), e))?;
    tmp.flush().map_err(|e| RadarError::io(tmp.path(), e))?;
    h5::read_ledger(tmp.path())
}

#[cfg(not(feature = "hdf5"))]
fn hdf5_disabled() -> RadarError {
    RadarError::Format("HDF5 support is not built in; enable the `hdf5` feature".into())
}

#[cfg(not(feature = "hdf5"))]
fn write_hdf5(_dataset: &Dataset, _path: &Path) -> RadarResult<()> {
    Err(hdf5_disabled())
}

#[cfg(not(feature = "hdf5"))]
fn read_hdf5(_path: &Path) -> RadarResult<Dataset> {
    Err(hdf5_disabled())
}

#[cfg(not(feature = "hdf5"))]
pub(crate) fn encode_hdf5_ledger(_ledger: &FlagLedger) -> RadarResult<Vec<u8>> {
    Err(hdf5_disabled())
}

#[cfg(not(feature = "hdf5"))]
pub(crate) fn decode_hdf5_ledger(_blob: &[u8]) -> RadarResult<FlagLedger> {
    Err(hdf5_disabled())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{AcquisitionMetadata, Geolocation, TraceMatrix};
    use crate::flags::FlagField;
    use crate::processing::range_convert;
    use ndarray::{Array1, Array2};
    use tempfile::TempDir;

    fn sample_dataset(with_gps: bool) -> Dataset {
        let data = Array2::from_shape_fn((24, 5), |(s, t)| ((s * 7 + t * 13) % 31) as f64 - 15.0);
        let mut metadata = AcquisitionMetadata::new(5, 2.5e-9);
        metadata.trace_interval = 0.25;
        metadata.antenna_separation = 1.0;
        metadata.antenna = "250 MHz".into();
        if with_gps {
            metadata.timestamp = Some(1_503_592_125.5);
            metadata.geolocation = Some(Geolocation {
                lat: Array1::linspace(78.87, 78.88, 5),
                long: Array1::from_elem(5, 16.38),
                elev: Array1::linspace(66.0, 70.0, 5),
            });
        }
        Dataset::new(TraceMatrix::Real(data), metadata).unwrap()
    }

    #[test]
    fn container_round_trip_is_exact() {
        let dir = TempDir::new().unwrap();
        for with_gps in [false, true] {
            let mut dataset = sample_dataset(with_gps);
            dataset.flags.clear(FlagField::Rotation);
            let path = dir.path().join("raw.json");
            write(&dataset, &path, FileFormat::Container).unwrap();
            assert_eq!(read(&path).unwrap(), dataset);
        }
    }

    #[test]
    fn interchange_round_trip_matches_canonical_ledger() {
        let dir = TempDir::new().unwrap();
        for with_gps in [false, true] {
            let mut dataset = sample_dataset(with_gps);
            dataset.flags.clear(FlagField::Coherence);
            let path = dir.path().join("raw.mat");
            write(&dataset, &path, FileFormat::Interchange).unwrap();

            let mut expected = dataset.clone();
            expected.flags = dataset.flags.interchange_canonical();
            assert_eq!(read(&path).unwrap(), expected);
        }
    }

    #[test]
    fn range_converted_data_survives_both_formats() {
        let dir = TempDir::new().unwrap();
        let mut dataset = sample_dataset(true);
        range_convert(&mut dataset, 2, 3.0, "hamming").unwrap();
        let recorded = dataset.flags.get(FlagField::Range).clone();

        for format in [FileFormat::Container, FileFormat::Interchange] {
            let path = dir.path().join(format!("ranged.{}", format.extension()));
            write(&dataset, &path, format).unwrap();
            let restored = read(&path).unwrap();
            assert!(restored.data.is_complex());
            assert_eq!(restored.data, dataset.data);
            assert_eq!(restored.flags.get(FlagField::Range), &recorded);
        }
    }

    #[test]
    fn format_is_sniffed_from_content() {
        let dir = TempDir::new().unwrap();
        let dataset = sample_dataset(false);
        let path = dir.path().join("no_extension");
        write(&dataset, &path, FileFormat::Interchange).unwrap();
        assert_eq!(
            FileFormat::sniff(&fs::read(&path).unwrap()),
            Some(FileFormat::Interchange)
        );
        assert!(read(&path).is_ok());
    }

    #[test]
    fn unrecognized_files_are_format_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"just some text").unwrap();
        assert!(matches!(read(&path), Err(RadarError::Format(_))));
        assert!(matches!(
            save(&sample_dataset(false), &dir.path().join("out.nc")),
            Err(RadarError::Format(_))
        ));
    }

    #[test]
    fn format_names_include_hdf5() {
        assert_eq!(FileFormat::from_path(Path::new("line.H5")), Some(FileFormat::Hdf5));
        assert_eq!("hdf5".parse::<FileFormat>().unwrap(), FileFormat::Hdf5);
        assert_eq!(
            FileFormat::sniff(b"\x89HDF\r\n\x1a\n\0\0\0\0"),
            Some(FileFormat::Hdf5)
        );
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn hdf5_without_the_feature_is_a_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("line.h5");
        assert!(matches!(
            save(&sample_dataset(false), &path),
            Err(RadarError::Format(_))
        ));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn hdf5_round_trip_is_exact() {
        let dir = TempDir::new().unwrap();
        let mut dataset = sample_dataset(true);
        dataset.flags.clear(FlagField::Rotation);
        let path = dir.path().join("raw.h5");
        assert_eq!(save(&dataset, &path).unwrap(), FileFormat::Hdf5);
        assert_eq!(FileFormat::sniff(&fs::read(&path).unwrap()), Some(FileFormat::Hdf5));
        assert_eq!(read(&path).unwrap(), dataset);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn non_finite_ledger_vectors_survive_container_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nan.json");
        let mut dataset = sample_dataset(false);
        dataset.metadata.trace_interval = f64::NAN;
        dataset
            .flags
            .set_vector(FlagField::Rotation, &[f32::NAN, f32::INFINITY])
            .unwrap();
        write(&dataset, &path, FileFormat::Container).unwrap();
        let restored = read(&path).unwrap();
        assert!(restored.metadata.trace_interval.is_nan());
        let rotation = restored.flags.get(FlagField::Rotation).as_vector().unwrap();
        assert!(rotation[0].is_nan());
        assert_eq!(rotation[1], f32::INFINITY);
    }

    #[test]
    fn write_creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("raw.json");
        assert_eq!(save(&sample_dataset(false), &path).unwrap(), FileFormat::Container);
        assert!(path.exists());
    }

    #[test]
    fn failed_write_leaves_no_file_behind() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"a file, not a directory").unwrap();
        let path = blocker.join("raw.json");
        let err = write(&sample_dataset(false), &path, FileFormat::Container).unwrap_err();
        assert!(matches!(err, RadarError::Io { .. }));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn rewriting_replaces_the_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("line.mat");
        let mut dataset = sample_dataset(false);
        write(&dataset, &path, FileFormat::Interchange).unwrap();
        dataset.flags.set_bool(FlagField::Phase2Range, true).unwrap();
        write(&dataset, &path, FileFormat::Interchange).unwrap();
        let restored = read(&path).unwrap();
        assert_eq!(
            restored.flags.get(FlagField::Phase2Range),
            &crate::flags::FlagValue::Bool(true)
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
