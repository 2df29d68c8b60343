//! MATLAB Level 5 MAT-file codec, limited to what datasets need: numeric and
//! logical matrices (optionally complex), char arrays and scalar structs,
//! little-endian and uncompressed.
//!
//! The format has no typed empty value, so absent ledger fields are written as
//! a single zero and rebuilt by [`FlagLedger::reconcile_interchange`].

use ndarray::{Array1, Array2, ShapeBuilder};
use num_complex::Complex64;

use crate::dataset::{AcquisitionMetadata, Dataset, Geolocation, TraceMatrix};
use crate::flags::{FlagLedger, FlagValue, FLAG_SCHEMA};
use crate::prelude::{RadarError, RadarResult};

pub const HEADER_MAGIC: &[u8] = b"MATLAB 5.0 MAT-file";
const HEADER_LEN: usize = 128;

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;
const MI_UTF8: u32 = 16;
const MI_UTF16: u32 = 17;

const MX_STRUCT: u32 = 2;
const MX_CHAR: u32 = 4;
const MX_DOUBLE: u32 = 6;
const MX_UINT8: u32 = 9;
const MX_UINT64: u32 = 15;

const FLAG_COMPLEX: u32 = 0x0800;
const FLAG_LOGICAL: u32 = 0x0200;

const FLAGS_VAR: &str = "flags";

#[derive(Debug, Clone, PartialEq)]
pub enum MatArray {
    Numeric {
        dims: Vec<usize>,
        /// Column-major values.
        real: Vec<f64>,
        imag: Option<Vec<f64>>,
        logical: bool,
    },
    Char(String),
    /// A 1x1 struct.
    Struct(Vec<(String, MatArray)>),
}

impl MatArray {
    pub fn scalar(value: f64) -> Self {
        Self::row(vec![value])
    }

    pub fn row(values: Vec<f64>) -> Self {
        MatArray::Numeric {
            dims: vec![1, values.len()],
            real: values,
            imag: None,
            logical: false,
        }
    }

    pub fn logical(value: bool) -> Self {
        MatArray::Numeric {
            dims: vec![1, 1],
            real: vec![if value { 1.0 } else { 0.0 }],
            imag: None,
            logical: true,
        }
    }

    fn from_trace_matrix(matrix: &TraceMatrix) -> Self {
        let (snum, tnum) = matrix.dim();
        let dims = vec![snum, tnum];
        match matrix {
            TraceMatrix::Real(values) => MatArray::Numeric {
                dims,
                real: values.t().iter().copied().collect(),
                imag: None,
                logical: false,
            },
            TraceMatrix::Complex(values) => MatArray::Numeric {
                dims,
                real: values.t().iter().map(|c| c.re).collect(),
                imag: Some(values.t().iter().map(|c| c.im).collect()),
                logical: false,
            },
        }
    }

    fn numbers(&self) -> Option<&[f64]> {
        match self {
            MatArray::Numeric { real, .. } => Some(real),
            _ => None,
        }
    }
}

fn pad8(len: usize) -> usize {
    (len + 7) & !7
}

fn push_element(out: &mut Vec<u8>, ty: u32, data: &[u8]) {
    out.extend_from_slice(&ty.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out.resize(out.len() + pad8(data.len()) - data.len(), 0);
}

/// Small data element: tag and up to four bytes of payload in eight bytes.
fn push_small_element(out: &mut Vec<u8>, ty: u32, data: &[u8]) {
    debug_assert!(data.len() <= 4);
    out.extend_from_slice(&(((data.len() as u32) << 16) | ty).to_le_bytes());
    let mut packed = [0_u8; 4];
    packed[..data.len()].copy_from_slice(data);
    out.extend_from_slice(&packed);
}

fn f64_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn push_matrix(out: &mut Vec<u8>, name: &str, array: &MatArray) {
    let mut body = Vec::new();
    let (flags, dims) = match array {
        MatArray::Numeric {
            dims, imag, logical, ..
        } => {
            let mut flags = if *logical { MX_UINT8 | FLAG_LOGICAL } else { MX_DOUBLE };
            if imag.is_some() {
                flags |= FLAG_COMPLEX;
            }
            (flags, dims.clone())
        }
        MatArray::Char(text) => {
            let units = text.encode_utf16().count();
            (MX_CHAR, if units == 0 { vec![0, 0] } else { vec![1, units] })
        }
        MatArray::Struct(_) => (MX_STRUCT, vec![1, 1]),
    };
    let mut flag_words = flags.to_le_bytes().to_vec();
    flag_words.extend_from_slice(&0_u32.to_le_bytes());
    push_element(&mut body, MI_UINT32, &flag_words);
    let dim_bytes: Vec<u8> = dims.iter().flat_map(|&d| (d as i32).to_le_bytes()).collect();
    push_element(&mut body, MI_INT32, &dim_bytes);
    push_element(&mut body, MI_INT8, name.as_bytes());

    match array {
        MatArray::Numeric {
            real,
            imag,
            logical,
            ..
        } => {
            if *logical {
                let bytes: Vec<u8> = real.iter().map(|&v| u8::from(v != 0.0)).collect();
                push_element(&mut body, MI_UINT8, &bytes);
            } else {
                push_element(&mut body, MI_DOUBLE, &f64_bytes(real));
                if let Some(imag) = imag {
                    push_element(&mut body, MI_DOUBLE, &f64_bytes(imag));
                }
            }
        }
        MatArray::Char(text) => {
            let bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
            push_element(&mut body, MI_UINT16, &bytes);
        }
        MatArray::Struct(fields) => {
            let name_len = pad8(
                fields
                    .iter()
                    .map(|(field, _)| field.len() + 1)
                    .max()
                    .unwrap_or(1)
                    .max(32),
            );
            push_small_element(&mut body, MI_INT32, &(name_len as i32).to_le_bytes());
            let mut names = vec![0_u8; name_len * fields.len()];
            for (index, (field, _)) in fields.iter().enumerate() {
                names[index * name_len..index * name_len + field.len()]
                    .copy_from_slice(field.as_bytes());
            }
            push_element(&mut body, MI_INT8, &names);
            for (_, value) in fields {
                push_matrix(&mut body, "", value);
            }
        }
    }
    push_element(out, MI_MATRIX, &body);
}

/// Serializes named top-level variables into a MAT-file image.
pub fn encode(vars: &[(String, MatArray)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut text = format!(
        "MATLAB 5.0 MAT-file, Platform: {}, Created by: tracecore {}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    )
    .into_bytes();
    text.resize(116, b' ');
    out.extend_from_slice(&text);
    out.extend_from_slice(&[0_u8; 8]);
    out.extend_from_slice(&0x0100_u16.to_le_bytes());
    out.extend_from_slice(b"IM");
    for (name, array) in vars {
        push_matrix(&mut out, name, array);
    }
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn u32_at(&self, pos: usize) -> RadarResult<u32> {
        self.bytes
            .get(pos..pos + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| RadarError::Format("truncated data element tag".into()))
    }

    /// Next data element as `(type, payload)`.
    fn element(&mut self) -> RadarResult<(u32, &'a [u8])> {
        let first = self.u32_at(self.pos)?;
        if first >> 16 != 0 {
            let len = (first >> 16) as usize;
            if len > 4 {
                return Err(RadarError::Format(format!(
                    "small data element claims {len} bytes"
                )));
            }
            let start = self.pos + 4;
            let data = self
                .bytes
                .get(start..start + len)
                .ok_or_else(|| RadarError::Format("truncated small data element".into()))?;
            self.pos += 8;
            return Ok((first & 0xffff, data));
        }
        let len = self.u32_at(self.pos + 4)? as usize;
        let start = self.pos + 8;
        let data = self
            .bytes
            .get(start..start + len)
            .ok_or_else(|| RadarError::Format("truncated data element".into()))?;
        self.pos = start + pad8(len);
        Ok((first, data))
    }

    fn expect_element(&mut self, ty: u32, what: &str) -> RadarResult<&'a [u8]> {
        let (found, data) = self.element()?;
        if found != ty {
            return Err(RadarError::Format(format!(
                "expected {what} (type {ty}), found data type {found}"
            )));
        }
        Ok(data)
    }
}

fn numeric_values(ty: u32, data: &[u8]) -> RadarResult<Vec<f64>> {
    fn convert<const N: usize>(data: &[u8], f: impl Fn([u8; N]) -> f64) -> RadarResult<Vec<f64>> {
        if data.len() % N != 0 {
            return Err(RadarError::Format(format!(
                "{} bytes is not a whole number of {N}-byte values",
                data.len()
            )));
        }
        Ok(data
            .chunks_exact(N)
            .map(|chunk| {
                let mut raw = [0_u8; N];
                raw.copy_from_slice(chunk);
                f(raw)
            })
            .collect())
    }
    match ty {
        MI_INT8 => convert::<1>(data, |b| f64::from(i8::from_le_bytes(b))),
        MI_UINT8 => convert::<1>(data, |b| f64::from(b[0])),
        MI_INT16 => convert::<2>(data, |b| f64::from(i16::from_le_bytes(b))),
        MI_UINT16 => convert::<2>(data, |b| f64::from(u16::from_le_bytes(b))),
        MI_INT32 => convert::<4>(data, |b| f64::from(i32::from_le_bytes(b))),
        MI_UINT32 => convert::<4>(data, |b| f64::from(u32::from_le_bytes(b))),
        MI_SINGLE => convert::<4>(data, |b| f64::from(f32::from_le_bytes(b))),
        MI_DOUBLE => convert::<8>(data, f64::from_le_bytes),
        MI_INT64 => convert::<8>(data, |b| i64::from_le_bytes(b) as f64),
        MI_UINT64 => convert::<8>(data, |b| u64::from_le_bytes(b) as f64),
        other => Err(RadarError::Format(format!(
            "data type {other} cannot hold numeric values"
        ))),
    }
}

fn parse_matrix(data: &[u8]) -> RadarResult<(String, MatArray)> {
    let mut reader = Reader::new(data);
    let flag_words = reader.expect_element(MI_UINT32, "array flags")?;
    if flag_words.len() < 4 {
        return Err(RadarError::Format("array flags too short".into()));
    }
    let flags = u32::from_le_bytes([flag_words[0], flag_words[1], flag_words[2], flag_words[3]]);
    let class = flags & 0xff;

    let (dim_type, dim_bytes) = reader.element()?;
    let dims = numeric_values(dim_type, dim_bytes)?
        .into_iter()
        .map(|d| {
            if d >= 0.0 {
                Ok(d as usize)
            } else {
                Err(RadarError::Format(format!("negative dimension {d}")))
            }
        })
        .collect::<RadarResult<Vec<usize>>>()?;
    let count: usize = dims.iter().product();

    let name_bytes = reader.expect_element(MI_INT8, "array name")?;
    let name = String::from_utf8(name_bytes.to_vec())
        .map_err(|_| RadarError::Format("array name is not valid UTF-8".into()))?;

    let array = match class {
        MX_STRUCT => {
            if count != 1 {
                return Err(RadarError::Format(format!(
                    "struct '{name}' has {count} elements, only scalar structs are supported"
                )));
            }
            let (len_type, len_bytes) = reader.element()?;
            let name_len = numeric_values(len_type, len_bytes)?
                .first()
                .copied()
                .filter(|&len| len >= 1.0)
                .ok_or_else(|| RadarError::Format("bad struct field name length".into()))?
                as usize;
            let names = reader.expect_element(MI_INT8, "struct field names")?;
            let mut fields = Vec::new();
            for chunk in names.chunks(name_len) {
                let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
                let field = String::from_utf8(chunk[..end].to_vec())
                    .map_err(|_| RadarError::Format("field name is not valid UTF-8".into()))?;
                let value = reader.expect_element(MI_MATRIX, "struct field")?;
                fields.push((field, parse_matrix(value)?.1));
            }
            MatArray::Struct(fields)
        }
        MX_CHAR => {
            let text = if count == 0 || reader.at_end() {
                String::new()
            } else {
                let (ty, bytes) = reader.element()?;
                match ty {
                    MI_UINT16 | MI_UTF16 => {
                        let units: Vec<u16> = bytes
                            .chunks_exact(2)
                            .map(|b| u16::from_le_bytes([b[0], b[1]]))
                            .collect();
                        String::from_utf16(&units)
                            .map_err(|_| RadarError::Format("char data is not valid UTF-16".into()))?
                    }
                    MI_UTF8 | MI_UINT8 | MI_INT8 => String::from_utf8(bytes.to_vec())
                        .map_err(|_| RadarError::Format("char data is not valid UTF-8".into()))?,
                    other => {
                        return Err(RadarError::Format(format!(
                            "unsupported char storage type {other}"
                        )))
                    }
                }
            };
            MatArray::Char(text)
        }
        MX_DOUBLE..=MX_UINT64 => {
            let real = if reader.at_end() {
                Vec::new()
            } else {
                let (ty, bytes) = reader.element()?;
                numeric_values(ty, bytes)?
            };
            let imag = if flags & FLAG_COMPLEX != 0 {
                let (ty, bytes) = reader.element()?;
                Some(numeric_values(ty, bytes)?)
            } else {
                None
            };
            if real.len() != count || imag.as_ref().is_some_and(|im| im.len() != count) {
                return Err(RadarError::Format(format!(
                    "array '{name}' declares {count} elements but stores {}",
                    real.len()
                )));
            }
            MatArray::Numeric {
                dims,
                real,
                imag,
                logical: flags & FLAG_LOGICAL != 0,
            }
        }
        other => {
            return Err(RadarError::Format(format!(
                "array '{name}' has unsupported class {other}"
            )))
        }
    };
    Ok((name, array))
}

/// Parses a MAT-file image into its top-level variables.
pub fn decode(bytes: &[u8]) -> RadarResult<Vec<(String, MatArray)>> {
    if bytes.len() < HEADER_LEN || !bytes.starts_with(HEADER_MAGIC) {
        return Err(RadarError::Format("not a MATLAB 5.0 MAT-file".into()));
    }
    match &bytes[126..128] {
        b"IM" => {}
        b"MI" => {
            return Err(RadarError::Format(
                "big-endian MAT-files are not supported".into(),
            ))
        }
        other => {
            return Err(RadarError::Format(format!(
                "bad MAT-file endian indicator {other:?}"
            )))
        }
    }
    let mut reader = Reader::new(&bytes[HEADER_LEN..]);
    let mut vars = Vec::new();
    while !reader.at_end() {
        match reader.element()? {
            (MI_MATRIX, data) => vars.push(parse_matrix(data)?),
            (MI_COMPRESSED, _) => {
                return Err(RadarError::Format(
                    "compressed MAT-file variables are not supported".into(),
                ))
            }
            (other, _) => {
                return Err(RadarError::Format(format!(
                    "unexpected top-level data type {other}"
                )))
            }
        }
    }
    Ok(vars)
}

fn ledger_to_struct(ledger: &FlagLedger) -> MatArray {
    MatArray::Struct(
        ledger
            .iter()
            .map(|(field, value)| {
                let array = match value {
                    FlagValue::Bool(value) => MatArray::logical(*value),
                    FlagValue::Vector(values) => {
                        MatArray::row(values.iter().map(|&v| f64::from(v)).collect())
                    }
                    FlagValue::Absent => MatArray::scalar(0.0),
                };
                (field.name().to_string(), array)
            })
            .collect(),
    )
}

fn ledger_from_struct(array: &MatArray) -> RadarResult<FlagLedger> {
    let MatArray::Struct(fields) = array else {
        return Err(RadarError::Schema("flags variable is not a struct".into()));
    };
    let mut ledger = FlagLedger::new();
    for spec in &FLAG_SCHEMA {
        let raw = fields
            .iter()
            .find(|(name, _)| name == spec.name)
            .and_then(|(_, value)| value.numbers())
            .ok_or_else(|| {
                RadarError::Schema(format!("flag '{}' is missing or not numeric", spec.name))
            })?;
        let value = FlagLedger::reconcile_interchange(spec.field, raw)?;
        ledger.set(spec.field, value)?;
    }
    Ok(ledger)
}

pub fn encode_ledger(ledger: &FlagLedger) -> Vec<u8> {
    encode(&[(FLAGS_VAR.to_string(), ledger_to_struct(ledger))])
}

pub fn decode_ledger(bytes: &[u8]) -> RadarResult<FlagLedger> {
    let vars = decode(bytes)?;
    ledger_from_struct(variable(&vars, FLAGS_VAR)?)
}

fn variable<'a>(vars: &'a [(String, MatArray)], name: &str) -> RadarResult<&'a MatArray> {
    vars.iter()
        .find(|(var, _)| var == name)
        .map(|(_, array)| array)
        .ok_or_else(|| RadarError::Format(format!("missing variable '{name}'")))
}

fn scalar(vars: &[(String, MatArray)], name: &str) -> RadarResult<f64> {
    match variable(vars, name)?.numbers() {
        Some([value]) => Ok(*value),
        _ => Err(RadarError::Format(format!("variable '{name}' is not a scalar"))),
    }
}

/// A per-trace vector, or `None` when it holds the single NaN absent stub.
fn trace_vector(
    vars: &[(String, MatArray)],
    name: &str,
    tnum: usize,
) -> RadarResult<Option<Array1<f64>>> {
    match variable(vars, name)?.numbers() {
        Some([value]) if value.is_nan() => Ok(None),
        Some(values) if values.len() == tnum => Ok(Some(Array1::from(values.to_vec()))),
        _ => Err(RadarError::Format(format!(
            "variable '{name}' must hold one value per trace ({tnum})"
        ))),
    }
}

pub fn encode_dataset(dataset: &Dataset) -> RadarResult<Vec<u8>> {
    let meta = &dataset.metadata;
    let mut vars = vec![("data".to_string(), MatArray::from_trace_matrix(&dataset.data))];
    for (name, value) in [
        ("tnum", meta.tnum as f64),
        ("dt", meta.dt),
        ("bandwidth", meta.bandwidth),
        ("trace_interval", meta.trace_interval),
        ("antenna_separation", meta.antenna_separation),
        ("medium_velocity", meta.medium_velocity),
        ("timestamp", meta.timestamp.unwrap_or(f64::NAN)),
    ] {
        vars.push((name.to_string(), MatArray::scalar(value)));
    }
    vars.push(("antenna".to_string(), MatArray::Char(meta.antenna.clone())));
    let (lat, long, elev) = match &meta.geolocation {
        Some(geo) => (geo.lat.to_vec(), geo.long.to_vec(), geo.elev.to_vec()),
        None => (vec![f64::NAN], vec![f64::NAN], vec![f64::NAN]),
    };
    vars.push(("lat".to_string(), MatArray::row(lat)));
    vars.push(("long".to_string(), MatArray::row(long)));
    vars.push(("elev".to_string(), MatArray::row(elev)));
    vars.push((FLAGS_VAR.to_string(), ledger_to_struct(&dataset.flags)));
    Ok(encode(&vars))
}

pub fn decode_dataset(bytes: &[u8]) -> RadarResult<Dataset> {
    let vars = decode(bytes)?;

    let data = match variable(&vars, "data")? {
        MatArray::Numeric {
            dims, real, imag, ..
        } => {
            let &[snum, tnum] = dims.as_slice() else {
                return Err(RadarError::Format(format!(
                    "trace matrix must be two-dimensional, found {dims:?}"
                )));
            };
            let shape = (snum, tnum).f();
            let shape_err = |e: ndarray::ShapeError| RadarError::Format(e.to_string());
            match imag {
                None => TraceMatrix::Real(
                    Array2::from_shape_vec(shape, real.clone()).map_err(shape_err)?,
                ),
                Some(imag) => {
                    let values: Vec<Complex64> = real
                        .iter()
                        .zip(imag)
                        .map(|(&re, &im)| Complex64::new(re, im))
                        .collect();
                    TraceMatrix::Complex(Array2::from_shape_vec(shape, values).map_err(shape_err)?)
                }
            }
        }
        _ => return Err(RadarError::Format("variable 'data' is not numeric".into())),
    };

    let tnum_raw = scalar(&vars, "tnum")?;
    if tnum_raw < 0.0 || tnum_raw.fract() != 0.0 {
        return Err(RadarError::Format(format!("bad trace count {tnum_raw}")));
    }
    let tnum = tnum_raw as usize;
    let timestamp = Some(scalar(&vars, "timestamp")?).filter(|t| !t.is_nan());
    let antenna = match variable(&vars, "antenna")? {
        MatArray::Char(text) => text.clone(),
        _ => return Err(RadarError::Format("variable 'antenna' is not text".into())),
    };
    let geolocation = match (
        trace_vector(&vars, "lat", tnum)?,
        trace_vector(&vars, "long", tnum)?,
        trace_vector(&vars, "elev", tnum)?,
    ) {
        (Some(lat), Some(long), Some(elev)) => Some(Geolocation { lat, long, elev }),
        (None, None, None) => None,
        _ => {
            return Err(RadarError::Format(
                "geolocation must be present for all of lat, long and elev or none".into(),
            ))
        }
    };

    let metadata = AcquisitionMetadata {
        tnum,
        dt: scalar(&vars, "dt")?,
        bandwidth: scalar(&vars, "bandwidth")?,
        trace_interval: scalar(&vars, "trace_interval")?,
        antenna_separation: scalar(&vars, "antenna_separation")?,
        antenna,
        medium_velocity: scalar(&vars, "medium_velocity")?,
        timestamp,
        geolocation,
    };
    let flags = ledger_from_struct(variable(&vars, FLAGS_VAR)?)?;
    Dataset::with_flags(data, metadata, flags)
}
