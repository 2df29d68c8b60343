//! Native container: a tree of groups carrying typed attributes and arrays,
//! serialized as JSON.
//!
//! Arrays and floating-point attributes are stored as hex-encoded
//! little-endian bytes so that every value, NaN payloads included, reads back
//! bit for bit. Absent values use an explicit typed empty attribute.

use std::collections::BTreeMap;

use log::warn;
use ndarray::{Array1, Array2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::dataset::{AcquisitionMetadata, Dataset, Geolocation, TraceMatrix};
use crate::flags::{FlagLedger, FlagValue, FLAG_SCHEMA};
use crate::prelude::{RadarError, RadarResult};

pub const CONTAINER_FORMAT: &str = "tracecore-container";
pub const CONTAINER_VERSION: u32 = 1;

const FLAGS_GROUP: &str = "flags";
const GEOLOCATION_GROUP: &str = "geolocation";

#[derive(Debug, Serialize, Deserialize)]
struct ContainerFile {
    format: String,
    version: u32,
    root: Group,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Attribute>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arrays: BTreeMap<String, ArrayRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, Group>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    F32,
    F64,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attribute {
    /// Typed empty marker for logically absent values.
    Empty { dtype: ScalarType },
    Bool { value: bool },
    Uint { value: u64 },
    /// One little-endian `f64`, hex encoded.
    Float64 { bits: String },
    /// Little-endian `f32` values, hex encoded.
    Float32 { bits: String },
    Text { value: String },
}

impl Attribute {
    pub fn float64(value: f64) -> Self {
        Attribute::Float64 {
            bits: hex::encode(value.to_le_bytes()),
        }
    }

    pub fn float32(values: &[f32]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Attribute::Float32 {
            bits: hex::encode(bytes),
        }
    }

    fn decode_bits(bits: &str) -> RadarResult<Vec<u8>> {
        hex::decode(bits)
            .map_err(|e| RadarError::Format(format!("attribute payload is not valid hex: {e}")))
    }

    fn to_f64(bits: &str) -> RadarResult<f64> {
        let bytes: [u8; 8] = Self::decode_bits(bits)?.try_into().map_err(|raw: Vec<u8>| {
            RadarError::Format(format!("float64 attribute holds {} bytes", raw.len()))
        })?;
        Ok(f64::from_le_bytes(bytes))
    }

    fn to_f32s(bits: &str) -> RadarResult<Vec<f32>> {
        let bytes = Self::decode_bits(bits)?;
        if bytes.len() % 4 != 0 {
            return Err(RadarError::Format(format!(
                "float32 attribute holds {} bytes",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayType {
    Float64,
    Complex128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayRecord {
    pub dtype: ArrayType,
    pub shape: Vec<usize>,
    /// Row-major little-endian bytes, real and imaginary parts interleaved.
    pub data: String,
}

impl ArrayRecord {
    fn encode<'a>(dtype: ArrayType, shape: Vec<usize>, values: impl Iterator<Item = &'a f64>) -> Self {
        let bytes: Vec<u8> = values.flat_map(|v| v.to_le_bytes()).collect();
        Self {
            dtype,
            shape,
            data: hex::encode(bytes),
        }
    }

    pub fn from_real(values: &Array2<f64>) -> Self {
        Self::encode(ArrayType::Float64, values.shape().to_vec(), values.iter())
    }

    pub fn from_complex(values: &Array2<Complex64>) -> Self {
        let bytes: Vec<u8> = values
            .iter()
            .flat_map(|c| c.re.to_le_bytes().into_iter().chain(c.im.to_le_bytes()))
            .collect();
        Self {
            dtype: ArrayType::Complex128,
            shape: values.shape().to_vec(),
            data: hex::encode(bytes),
        }
    }

    pub fn from_vector(values: &Array1<f64>) -> Self {
        Self::encode(ArrayType::Float64, vec![values.len()], values.iter())
    }

    fn decode_f64s(&self) -> RadarResult<Vec<f64>> {
        let bytes = hex::decode(&self.data)
            .map_err(|e| RadarError::Format(format!("array payload is not valid hex: {e}")))?;
        let per_element = match self.dtype {
            ArrayType::Float64 => 1,
            ArrayType::Complex128 => 2,
        };
        let expected = self.shape.iter().product::<usize>() * per_element * 8;
        if bytes.len() != expected {
            return Err(RadarError::Format(format!(
                "array of shape {:?} needs {expected} bytes, found {}",
                self.shape,
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect())
    }

    fn dims2(&self) -> RadarResult<(usize, usize)> {
        match *self.shape.as_slice() {
            [rows, cols] => Ok((rows, cols)),
            _ => Err(RadarError::Format(format!(
                "expected a two-dimensional array, found shape {:?}",
                self.shape
            ))),
        }
    }

    pub fn to_trace_matrix(&self) -> RadarResult<TraceMatrix> {
        let dims = self.dims2()?;
        let values = self.decode_f64s()?;
        let shape_err = |e: ndarray::ShapeError| RadarError::Format(e.to_string());
        Ok(match self.dtype {
            ArrayType::Float64 => {
                TraceMatrix::Real(Array2::from_shape_vec(dims, values).map_err(shape_err)?)
            }
            ArrayType::Complex128 => {
                let complex = values
                    .chunks_exact(2)
                    .map(|pair| Complex64::new(pair[0], pair[1]))
                    .collect();
                TraceMatrix::Complex(Array2::from_shape_vec(dims, complex).map_err(shape_err)?)
            }
        })
    }

    pub fn to_vector(&self) -> RadarResult<Array1<f64>> {
        if self.dtype != ArrayType::Float64 || self.shape.len() != 1 {
            return Err(RadarError::Format(format!(
                "expected a real vector, found {:?} of shape {:?}",
                self.dtype, self.shape
            )));
        }
        Ok(Array1::from(self.decode_f64s()?))
    }
}

impl Group {
    fn attr(&self, name: &str) -> RadarResult<&Attribute> {
        self.attrs
            .get(name)
            .ok_or_else(|| RadarError::Format(format!("missing attribute '{name}'")))
    }

    fn f64_attr(&self, name: &str) -> RadarResult<f64> {
        match self.attr(name)? {
            Attribute::Float64 { bits } => Attribute::to_f64(bits),
            other => Err(RadarError::Format(format!(
                "attribute '{name}' should be float64, found {other:?}"
            ))),
        }
    }

    fn optional_f64_attr(&self, name: &str) -> RadarResult<Option<f64>> {
        match self.attr(name)? {
            Attribute::Empty { .. } => Ok(None),
            _ => self.f64_attr(name).map(Some),
        }
    }

    fn array(&self, name: &str) -> RadarResult<&ArrayRecord> {
        self.arrays
            .get(name)
            .ok_or_else(|| RadarError::Format(format!("missing array '{name}'")))
    }

    fn group(&self, name: &str) -> RadarResult<&Group> {
        self.groups
            .get(name)
            .ok_or_else(|| RadarError::Format(format!("missing group '{name}'")))
    }
}

pub fn ledger_to_group(ledger: &FlagLedger) -> Group {
    let attrs = ledger
        .iter()
        .map(|(field, value)| {
            let attr = match value {
                FlagValue::Bool(value) => Attribute::Bool { value: *value },
                FlagValue::Vector(values) => Attribute::float32(values),
                FlagValue::Absent => Attribute::Empty {
                    dtype: ScalarType::F32,
                },
            };
            (field.name().to_string(), attr)
        })
        .collect();
    Group {
        attrs,
        ..Group::default()
    }
}

pub fn ledger_from_group(group: &Group) -> RadarResult<FlagLedger> {
    for name in group.attrs.keys() {
        if !FLAG_SCHEMA.iter().any(|spec| spec.name == name) {
            warn!("ignoring unknown flag attribute '{name}'");
        }
    }
    let mut ledger = FlagLedger::new();
    for spec in &FLAG_SCHEMA {
        let attr = group
            .attrs
            .get(spec.name)
            .ok_or_else(|| RadarError::Schema(format!("flag '{}' is missing", spec.name)))?;
        let value = match attr {
            Attribute::Empty { .. } => FlagValue::Absent,
            Attribute::Bool { value } => FlagValue::Bool(*value),
            Attribute::Float32 { bits } => FlagValue::Vector(Attribute::to_f32s(bits)?),
            other => {
                return Err(RadarError::Schema(format!(
                    "flag '{}' has unsupported encoding {other:?}",
                    spec.name
                )))
            }
        };
        ledger.set(spec.field, value)?;
    }
    Ok(ledger)
}

fn to_bytes(root: Group) -> RadarResult<Vec<u8>> {
    let file = ContainerFile {
        format: CONTAINER_FORMAT.to_string(),
        version: CONTAINER_VERSION,
        root,
    };
    serde_json::to_vec(&file).map_err(|e| RadarError::Format(format!("cannot encode container: {e}")))
}

fn from_bytes(bytes: &[u8]) -> RadarResult<Group> {
    let file: ContainerFile = serde_json::from_slice(bytes)
        .map_err(|e| RadarError::Format(format!("malformed container: {e}")))?;
    if file.format != CONTAINER_FORMAT {
        return Err(RadarError::Format(format!(
            "not a {CONTAINER_FORMAT} file (found '{}')",
            file.format
        )));
    }
    if file.version != CONTAINER_VERSION {
        return Err(RadarError::Format(format!(
            "unsupported container version {}",
            file.version
        )));
    }
    Ok(file.root)
}

pub fn encode_ledger(ledger: &FlagLedger) -> RadarResult<Vec<u8>> {
    let mut root = Group::default();
    root.groups.insert(FLAGS_GROUP.to_string(), ledger_to_group(ledger));
    to_bytes(root)
}

pub fn decode_ledger(bytes: &[u8]) -> RadarResult<FlagLedger> {
    ledger_from_group(from_bytes(bytes)?.group(FLAGS_GROUP)?)
}

pub fn encode_dataset(dataset: &Dataset) -> RadarResult<Vec<u8>> {
    let meta = &dataset.metadata;
    let mut root = Group::default();
    root.attrs.insert(
        "tnum".into(),
        Attribute::Uint {
            value: meta.tnum as u64,
        },
    );
    for (name, value) in [
        ("dt", meta.dt),
        ("bandwidth", meta.bandwidth),
        ("trace_interval", meta.trace_interval),
        ("antenna_separation", meta.antenna_separation),
        ("medium_velocity", meta.medium_velocity),
    ] {
        root.attrs.insert(name.into(), Attribute::float64(value));
    }
    root.attrs.insert(
        "antenna".into(),
        Attribute::Text {
            value: meta.antenna.clone(),
        },
    );
    let timestamp = match meta.timestamp {
        Some(value) => Attribute::float64(value),
        None => Attribute::Empty {
            dtype: ScalarType::F64,
        },
    };
    root.attrs.insert("timestamp".into(), timestamp);

    let data = match &dataset.data {
        TraceMatrix::Real(values) => ArrayRecord::from_real(values),
        TraceMatrix::Complex(values) => ArrayRecord::from_complex(values),
    };
    root.arrays.insert("data".into(), data);

    if let Some(geo) = &meta.geolocation {
        let mut group = Group::default();
        group.arrays.insert("lat".into(), ArrayRecord::from_vector(&geo.lat));
        group.arrays.insert("long".into(), ArrayRecord::from_vector(&geo.long));
        group.arrays.insert("elev".into(), ArrayRecord::from_vector(&geo.elev));
        root.groups.insert(GEOLOCATION_GROUP.into(), group);
    }
    root.groups
        .insert(FLAGS_GROUP.into(), ledger_to_group(&dataset.flags));
    to_bytes(root)
}

pub fn decode_dataset(bytes: &[u8]) -> RadarResult<Dataset> {
    let root = from_bytes(bytes)?;
    let tnum = match root.attr("tnum")? {
        Attribute::Uint { value } => usize::try_from(*value)
            .map_err(|_| RadarError::Format(format!("trace count {value} is too large")))?,
        other => {
            return Err(RadarError::Format(format!(
                "attribute 'tnum' should be unsigned, found {other:?}"
            )))
        }
    };
    let antenna = match root.attr("antenna")? {
        Attribute::Text { value } => value.clone(),
        other => {
            return Err(RadarError::Format(format!(
                "attribute 'antenna' should be text, found {other:?}"
            )))
        }
    };
    let geolocation = match root.groups.get(GEOLOCATION_GROUP) {
        Some(group) => Some(Geolocation {
            lat: group.array("lat")?.to_vector()?,
            long: group.array("long")?.to_vector()?,
            elev: group.array("elev")?.to_vector()?,
        }),
        None => None,
    };
    let metadata = AcquisitionMetadata {
        tnum,
        dt: root.f64_attr("dt")?,
        bandwidth: root.f64_attr("bandwidth")?,
        trace_interval: root.f64_attr("trace_interval")?,
        antenna_separation: root.f64_attr("antenna_separation")?,
        antenna,
        medium_velocity: root.f64_attr("medium_velocity")?,
        timestamp: root.optional_f64_attr("timestamp")?,
        geolocation,
    };
    let data = root.array("data")?.to_trace_matrix()?;
    let flags = ledger_from_group(root.group(FLAGS_GROUP)?)?;
    Dataset::with_flags(data, metadata, flags)
}
