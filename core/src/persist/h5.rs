//! HDF5 files laid out like ImpDAR's `.h5` output: one group per dataset
//! holding the `data` array, metadata attributes, an optional
//! `geolocation` group and a `flags` subgroup.
//!
//! Absent values are attributes with a null dataspace, the layout `h5py`
//! produces for `h5py.Empty`. Ledger vectors are `f32` attributes.

use std::path::Path;
use std::str::FromStr;

use hdf5::types::{TypeDescriptor, VarLenUnicode};
use hdf5::{Extents, File, Group, H5Type};
use log::warn;
use ndarray::{Array1, Array2};
use num_complex::Complex64;

use crate::dataset::{AcquisitionMetadata, Dataset, Geolocation, TraceMatrix};
use crate::flags::{FlagLedger, FlagShape, FlagValue, FLAG_SCHEMA};
use crate::prelude::{RadarError, RadarResult};

/// Group holding the single dataset of a file.
pub const DATASET_GROUP: &str = "dat0";

const FLAGS_GROUP: &str = "flags";
const GEOLOCATION_GROUP: &str = "geolocation";
const DATA: &str = "data";

/// Complex sample as the `{r, i}` compound h5py writes for `complex128`.
#[derive(H5Type, Clone, Copy, Debug, PartialEq)]
#[repr(C)]
struct H5Complex {
    r: f64,
    i: f64,
}

fn h5_err(e: hdf5::Error) -> RadarError {
    RadarError::Format(format!("hdf5: {e}"))
}

fn write_f64(group: &Group, name: &str, value: f64) -> RadarResult<()> {
    group
        .new_attr::<f64>()
        .shape(())
        .create(name)
        .and_then(|attr| attr.write_scalar(&value))
        .map_err(h5_err)
}

fn write_empty(group: &Group, name: &str) -> RadarResult<()> {
    group
        .new_attr::<f32>()
        .shape(Extents::Null)
        .create(name)
        .map(drop)
        .map_err(h5_err)
}

fn write_text(group: &Group, name: &str, value: &str) -> RadarResult<()> {
    let text = VarLenUnicode::from_str(value)
        .map_err(|e| RadarError::Format(format!("attribute '{name}' cannot be stored: {e}")))?;
    group
        .new_attr::<VarLenUnicode>()
        .shape(())
        .create(name)
        .and_then(|attr| attr.write_scalar(&text))
        .map_err(h5_err)
}

fn write_vector(group: &Group, name: &str, values: &Array1<f64>) -> RadarResult<()> {
    let values = values.to_vec();
    group
        .new_dataset::<f64>()
        .shape(values.len())
        .create(name)
        .and_then(|ds| ds.write_raw(&values))
        .map_err(h5_err)
}

fn is_empty_attr(group: &Group, name: &str) -> RadarResult<bool> {
    let attr = group.attr(name).map_err(h5_err)?;
    let extents = attr.space().and_then(|space| space.extents()).map_err(h5_err)?;
    Ok(matches!(extents, Extents::Null))
}

fn is_empty_dataset(group: &Group, name: &str) -> bool {
    group.link_exists(name)
        && group
            .dataset(name)
            .and_then(|ds| ds.space())
            .and_then(|space| space.extents())
            .is_ok_and(|extents| matches!(extents, Extents::Null))
}

fn read_f64(group: &Group, name: &str) -> RadarResult<f64> {
    group
        .attr(name)
        .and_then(|attr| attr.read_scalar::<f64>())
        .map_err(|e| RadarError::Format(format!("attribute '{name}': {e}")))
}

fn read_vector(group: &Group, name: &str) -> RadarResult<Array1<f64>> {
    group
        .dataset(name)
        .and_then(|ds| ds.read_raw::<f64>())
        .map(Array1::from)
        .map_err(|e| RadarError::Format(format!("array '{name}': {e}")))
}

fn write_ledger_group(parent: &Group, ledger: &FlagLedger) -> RadarResult<()> {
    let group = parent.create_group(FLAGS_GROUP).map_err(h5_err)?;
    for (field, value) in ledger.iter() {
        let name = field.name();
        match value {
            FlagValue::Bool(value) => group
                .new_attr::<bool>()
                .shape(())
                .create(name)
                .and_then(|attr| attr.write_scalar(value))
                .map_err(h5_err)?,
            FlagValue::Vector(values) => group
                .new_attr::<f32>()
                .shape(values.len())
                .create(name)
                .and_then(|attr| attr.write_raw(values))
                .map_err(h5_err)?,
            FlagValue::Absent => write_empty(&group, name)?,
        }
    }
    Ok(())
}

fn read_ledger_group(parent: &Group) -> RadarResult<FlagLedger> {
    let group = parent
        .group(FLAGS_GROUP)
        .map_err(|e| RadarError::Schema(format!("flags group is missing: {e}")))?;
    let names = group.attr_names().map_err(h5_err)?;
    for name in &names {
        if !FLAG_SCHEMA.iter().any(|spec| spec.name == name) {
            warn!("ignoring unknown flag attribute '{name}'");
        }
    }
    let mut ledger = FlagLedger::new();
    for spec in &FLAG_SCHEMA {
        if !names.iter().any(|name| name == spec.name) {
            // h5py stores `grp[name] = h5py.Empty('f')` as a dataset.
            if is_empty_dataset(&group, spec.name) {
                ledger.set(spec.field, FlagValue::Absent)?;
                continue;
            }
            return Err(RadarError::Schema(format!("flag '{}' is missing", spec.name)));
        }
        let value = if is_empty_attr(&group, spec.name)? {
            FlagValue::Absent
        } else {
            let attr = group.attr(spec.name).map_err(h5_err)?;
            let decoded = match spec.shape {
                FlagShape::Bool => attr.read_scalar::<bool>().map(FlagValue::Bool),
                FlagShape::Vector(_) => attr.read_raw::<f32>().map(FlagValue::Vector),
            };
            decoded.map_err(|e| RadarError::Schema(format!("flag '{}': {e}", spec.name)))?
        };
        ledger.set(spec.field, value)?;
    }
    Ok(ledger)
}

/// Writes `dataset` as a new HDF5 file at `path`, replacing any file there.
pub fn write_dataset(dataset: &Dataset, path: &Path) -> RadarResult<()> {
    let file = File::create(path).map_err(h5_err)?;
    let root = file.create_group(DATASET_GROUP).map_err(h5_err)?;
    let meta = &dataset.metadata;

    let (snum, tnum) = dataset.data.dim();
    match &dataset.data {
        TraceMatrix::Real(values) => {
            let flat: Vec<f64> = values.iter().copied().collect();
            root.new_dataset::<f64>()
                .shape((snum, tnum))
                .create(DATA)
                .and_then(|ds| ds.write_raw(&flat))
                .map_err(h5_err)?;
        }
        TraceMatrix::Complex(values) => {
            let flat: Vec<H5Complex> = values
                .iter()
                .map(|c| H5Complex { r: c.re, i: c.im })
                .collect();
            root.new_dataset::<H5Complex>()
                .shape((snum, tnum))
                .create(DATA)
                .and_then(|ds| ds.write_raw(&flat))
                .map_err(h5_err)?;
        }
    }

    root.new_attr::<u64>()
        .shape(())
        .create("tnum")
        .and_then(|attr| attr.write_scalar(&(meta.tnum as u64)))
        .map_err(h5_err)?;
    for (name, value) in [
        ("dt", meta.dt),
        ("bandwidth", meta.bandwidth),
        ("trace_interval", meta.trace_interval),
        ("antenna_separation", meta.antenna_separation),
        ("medium_velocity", meta.medium_velocity),
    ] {
        write_f64(&root, name, value)?;
    }
    write_text(&root, "antenna", &meta.antenna)?;
    match meta.timestamp {
        Some(value) => write_f64(&root, "timestamp", value)?,
        None => write_empty(&root, "timestamp")?,
    }

    if let Some(geo) = &meta.geolocation {
        let group = root.create_group(GEOLOCATION_GROUP).map_err(h5_err)?;
        write_vector(&group, "lat", &geo.lat)?;
        write_vector(&group, "long", &geo.long)?;
        write_vector(&group, "elev", &geo.elev)?;
    }
    write_ledger_group(&root, &dataset.flags)?;
    file.flush().map_err(h5_err)
}

pub fn read_dataset(path: &Path) -> RadarResult<Dataset> {
    let file = File::open(path).map_err(h5_err)?;
    let root = file
        .group(DATASET_GROUP)
        .map_err(|e| RadarError::Format(format!("no '{DATASET_GROUP}' group: {e}")))?;

    let ds = root
        .dataset(DATA)
        .map_err(|e| RadarError::Format(format!("missing array '{DATA}': {e}")))?;
    let dims = match *ds.shape().as_slice() {
        [rows, cols] => (rows, cols),
        ref other => {
            return Err(RadarError::Format(format!(
                "expected a two-dimensional array, found shape {other:?}"
            )))
        }
    };
    let shape_err = |e: ndarray::ShapeError| RadarError::Format(e.to_string());
    let descriptor = ds.dtype().and_then(|t| t.to_descriptor()).map_err(h5_err)?;
    let data = match descriptor {
        TypeDescriptor::Compound(_) => {
            let flat: Vec<Complex64> = ds
                .read_raw::<H5Complex>()
                .map_err(h5_err)?
                .into_iter()
                .map(|c| Complex64::new(c.r, c.i))
                .collect();
            TraceMatrix::Complex(Array2::from_shape_vec(dims, flat).map_err(shape_err)?)
        }
        _ => {
            let flat = ds.read_raw::<f64>().map_err(h5_err)?;
            TraceMatrix::Real(Array2::from_shape_vec(dims, flat).map_err(shape_err)?)
        }
    };

    let tnum = root
        .attr("tnum")
        .and_then(|attr| attr.read_scalar::<u64>())
        .map_err(|e| RadarError::Format(format!("attribute 'tnum': {e}")))?;
    let tnum = usize::try_from(tnum)
        .map_err(|_| RadarError::Format(format!("trace count {tnum} is too large")))?;
    let antenna = root
        .attr("antenna")
        .and_then(|attr| attr.read_scalar::<VarLenUnicode>())
        .map(|text| text.as_str().to_owned())
        .map_err(|e| RadarError::Format(format!("attribute 'antenna': {e}")))?;
    let timestamp = if is_empty_attr(&root, "timestamp")? {
        None
    } else {
        Some(read_f64(&root, "timestamp")?)
    };
    let geolocation = if root.link_exists(GEOLOCATION_GROUP) {
        let group = root.group(GEOLOCATION_GROUP).map_err(h5_err)?;
        Some(Geolocation {
            lat: read_vector(&group, "lat")?,
            long: read_vector(&group, "long")?,
            elev: read_vector(&group, "elev")?,
        })
    } else {
        None
    };
    let metadata = AcquisitionMetadata {
        tnum,
        dt: read_f64(&root, "dt")?,
        bandwidth: read_f64(&root, "bandwidth")?,
        trace_interval: read_f64(&root, "trace_interval")?,
        antenna_separation: read_f64(&root, "antenna_separation")?,
        antenna,
        medium_velocity: read_f64(&root, "medium_velocity")?,
        timestamp,
        geolocation,
    };
    let flags = read_ledger_group(&root)?;
    Dataset::with_flags(data, metadata, flags)
}

/// Writes a file holding only the `flags` group of `ledger`.
pub fn write_ledger(ledger: &FlagLedger, path: &Path) -> RadarResult<()> {
    let file = File::create(path).map_err(h5_err)?;
    write_ledger_group(&file, ledger)?;
    file.flush().map_err(h5_err)
}

pub fn read_ledger(path: &Path) -> RadarResult<FlagLedger> {
    let file = File::open(path).map_err(h5_err)?;
    read_ledger_group(&file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FlagField;
    use crate::processing::range_convert;
    use tempfile::TempDir;

    fn sample_dataset() -> Dataset {
        let data = Array2::from_shape_fn((16, 4), |(s, t)| (s as f64).sin() * (t + 1) as f64);
        let mut metadata = AcquisitionMetadata::new(4, 2.0e-9);
        metadata.antenna = "500 MHz".into();
        metadata.trace_interval = 0.5;
        Dataset::new(TraceMatrix::Real(data), metadata).unwrap()
    }

    #[test]
    fn absent_flags_are_null_dataspace_attributes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("line.h5");
        let mut dataset = sample_dataset();
        dataset.flags.clear(FlagField::Rotation);
        write_dataset(&dataset, &path).unwrap();

        let file = File::open(&path).unwrap();
        let flags = file.group(DATASET_GROUP).unwrap().group(FLAGS_GROUP).unwrap();
        assert!(is_empty_attr(&flags, "rotation").unwrap());
        assert!(!is_empty_attr(&flags, "range").unwrap());
        assert_eq!(
            flags.attr("range").unwrap().read_raw::<f32>().unwrap(),
            vec![0.0; 3]
        );
        let root = file.group(DATASET_GROUP).unwrap();
        assert!(is_empty_attr(&root, "timestamp").unwrap());
    }

    #[test]
    fn dataset_round_trip_keeps_non_finite_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("line.h5");
        let mut dataset = sample_dataset();
        dataset.metadata.trace_interval = f64::NAN;
        dataset.metadata.timestamp = Some(f64::INFINITY);
        dataset.metadata.geolocation = Some(Geolocation {
            lat: Array1::linspace(78.0, 78.1, 4),
            long: Array1::from_elem(4, 16.4),
            elev: Array1::from_elem(4, f64::NAN),
        });
        dataset
            .flags
            .set_vector(FlagField::Coherence, &[f32::NAN, f32::NEG_INFINITY, 1.0])
            .unwrap();
        write_dataset(&dataset, &path).unwrap();

        let restored = read_dataset(&path).unwrap();
        assert!(restored.metadata.trace_interval.is_nan());
        assert_eq!(restored.metadata.timestamp, Some(f64::INFINITY));
        let coherence = restored.flags.get(FlagField::Coherence).as_vector().unwrap();
        assert!(coherence[0].is_nan());
        assert_eq!(coherence[1], f32::NEG_INFINITY);
        assert!(restored.flags.get(FlagField::Stack).is_absent());
        assert_eq!(restored.data, dataset.data);
        assert_eq!(restored.metadata.antenna, "500 MHz");
    }

    #[test]
    fn complex_samples_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ranged.h5");
        let mut dataset = sample_dataset();
        range_convert(&mut dataset, 2, 1.0, "hanning").unwrap();
        write_dataset(&dataset, &path).unwrap();
        assert_eq!(read_dataset(&path).unwrap(), dataset);
    }

    #[test]
    fn ledger_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flags.h5");
        let mut ledger = FlagLedger::new();
        ledger.set_vector(FlagField::Range, &[2.0, 4000.0, 1.0]).unwrap();
        ledger.set_bool(FlagField::Phase2Range, true).unwrap();
        ledger.clear(FlagField::PhaseGradient);
        write_ledger(&ledger, &path).unwrap();
        assert_eq!(read_ledger(&path).unwrap(), ledger);
    }

    #[test]
    fn empty_datasets_in_the_flags_group_read_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.h5");
        let mut expected = FlagLedger::new();
        for field in FlagField::all() {
            expected.clear(field);
        }
        {
            let file = File::create(&path).unwrap();
            let flags = file.create_group(FLAGS_GROUP).unwrap();
            for spec in &FLAG_SCHEMA {
                if spec.field == FlagField::Rotation {
                    flags
                        .new_dataset::<f32>()
                        .shape(Extents::Null)
                        .create(spec.name)
                        .unwrap();
                } else {
                    write_empty(&flags, spec.name).unwrap();
                }
            }
        }
        assert_eq!(read_ledger(&path).unwrap(), expected);
    }

    #[test]
    fn missing_flag_is_a_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.h5");
        let file = File::create(&path).unwrap();
        let flags = file.create_group(FLAGS_GROUP).unwrap();
        write_empty(&flags, "range").unwrap();
        drop(flags);
        drop(file);
        assert!(matches!(read_ledger(&path), Err(RadarError::Schema(_))));
    }
}
