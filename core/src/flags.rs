//! Ledger of the processing applied to a dataset.
//!
//! The set of fields is fixed by [`FLAG_SCHEMA`]; codecs walk the schema rather
//! than whatever happens to be stored in a file.

use std::fmt;
use std::str::FromStr;

use crate::persist::{self, container, matfile, FileFormat};
use crate::prelude::{RadarError, RadarResult};

/// Declared shape of a ledger field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagShape {
    Bool,
    Vector(usize),
}

/// Value held by a ledger field at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initial {
    /// `false` for bool fields, a zero vector otherwise.
    Cleared,
    Absent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    Bool(bool),
    Vector(Vec<f32>),
    Absent,
}

impl FlagValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, FlagValue::Absent)
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            FlagValue::Vector(values) => Some(values),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlagField {
    /// `[pad, max_range, window_code]` of the last range conversion.
    Range,
    Phase2Range,
    Stack,
    Rotation,
    Coherence,
    PhaseGradient,
}

#[derive(Debug, Clone, Copy)]
pub struct FlagSpec {
    pub field: FlagField,
    pub name: &'static str,
    pub shape: FlagShape,
    pub initial: Initial,
}

pub const FLAG_SCHEMA: [FlagSpec; 6] = [
    FlagSpec {
        field: FlagField::Range,
        name: "range",
        shape: FlagShape::Vector(3),
        initial: Initial::Cleared,
    },
    FlagSpec {
        field: FlagField::Phase2Range,
        name: "phase2range",
        shape: FlagShape::Bool,
        initial: Initial::Cleared,
    },
    FlagSpec {
        field: FlagField::Stack,
        name: "stack",
        shape: FlagShape::Vector(1),
        initial: Initial::Absent,
    },
    FlagSpec {
        field: FlagField::Rotation,
        name: "rotation",
        shape: FlagShape::Vector(2),
        initial: Initial::Cleared,
    },
    FlagSpec {
        field: FlagField::Coherence,
        name: "coherence",
        shape: FlagShape::Vector(3),
        initial: Initial::Cleared,
    },
    FlagSpec {
        field: FlagField::PhaseGradient,
        name: "phasegradient",
        shape: FlagShape::Bool,
        initial: Initial::Cleared,
    },
];

impl FlagField {
    pub fn spec(self) -> &'static FlagSpec {
        &FLAG_SCHEMA[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn shape(self) -> FlagShape {
        self.spec().shape
    }

    pub fn all() -> impl Iterator<Item = FlagField> {
        FLAG_SCHEMA.iter().map(|spec| spec.field)
    }
}

impl fmt::Display for FlagField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlagField {
    type Err = RadarError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        FLAG_SCHEMA
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| spec.field)
            .ok_or_else(|| RadarError::Schema(format!("unknown flag field '{name}'")))
    }
}

impl FlagSpec {
    pub fn initial_value(&self) -> FlagValue {
        match (self.initial, self.shape) {
            (Initial::Absent, _) => FlagValue::Absent,
            (Initial::Cleared, FlagShape::Bool) => FlagValue::Bool(false),
            (Initial::Cleared, FlagShape::Vector(n)) => FlagValue::Vector(vec![0.0; n]),
        }
    }

    /// Value an absent field takes after passing through the interchange format.
    fn interchange_placeholder(&self) -> FlagValue {
        match self.shape {
            FlagShape::Bool => FlagValue::Bool(false),
            FlagShape::Vector(n) => FlagValue::Vector(vec![0.0; n]),
        }
    }

    fn check(&self, value: &FlagValue) -> RadarResult<()> {
        match (self.shape, value) {
            (_, FlagValue::Absent) | (FlagShape::Bool, FlagValue::Bool(_)) => Ok(()),
            (FlagShape::Vector(n), FlagValue::Vector(values)) if values.len() == n => Ok(()),
            (FlagShape::Vector(n), FlagValue::Vector(values)) => Err(RadarError::Schema(format!(
                "flag '{}' holds {n} values, got {}",
                self.name,
                values.len()
            ))),
            (shape, other) => Err(RadarError::Schema(format!(
                "flag '{}' is declared {shape:?}, got {other:?}",
                self.name
            ))),
        }
    }
}

/// Schema-bound record of applied processing steps.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagLedger {
    values: Vec<FlagValue>,
}

impl Default for FlagLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagLedger {
    pub fn new() -> Self {
        Self {
            values: FLAG_SCHEMA.iter().map(FlagSpec::initial_value).collect(),
        }
    }

    pub fn get(&self, field: FlagField) -> &FlagValue {
        &self.values[field as usize]
    }

    pub fn set(&mut self, field: FlagField, value: FlagValue) -> RadarResult<()> {
        field.spec().check(&value)?;
        self.values[field as usize] = value;
        Ok(())
    }

    pub fn set_bool(&mut self, field: FlagField, value: bool) -> RadarResult<()> {
        self.set(field, FlagValue::Bool(value))
    }

    pub fn set_vector(&mut self, field: FlagField, values: &[f32]) -> RadarResult<()> {
        self.set(field, FlagValue::Vector(values.to_vec()))
    }

    pub fn clear(&mut self, field: FlagField) {
        self.values[field as usize] = FlagValue::Absent;
    }

    pub fn iter(&self) -> impl Iterator<Item = (FlagField, &FlagValue)> {
        FlagField::all().zip(self.values.iter())
    }

    /// The ledger as it reads back from the interchange format, where absent
    /// fields can only be stored as a zero stub.
    pub fn interchange_canonical(&self) -> FlagLedger {
        let values = FLAG_SCHEMA
            .iter()
            .zip(&self.values)
            .map(|(spec, value)| match value {
                FlagValue::Absent => spec.interchange_placeholder(),
                other => other.clone(),
            })
            .collect();
        FlagLedger { values }
    }

    /// Rebuilds one field from the numbers the interchange decoder found.
    ///
    /// A vector field declared with N > 1 entries that comes back with a single
    /// entry was written as the absent stub and becomes a zero vector of length N.
    /// Bool fields are true for any non-zero value.
    pub fn reconcile_interchange(field: FlagField, raw: &[f64]) -> RadarResult<FlagValue> {
        let spec = field.spec();
        match spec.shape {
            FlagShape::Bool => match raw {
                [value] => Ok(FlagValue::Bool(*value != 0.0)),
                _ => Err(RadarError::Schema(format!(
                    "flag '{}' must be a scalar, found {} values",
                    spec.name,
                    raw.len()
                ))),
            },
            FlagShape::Vector(n) if raw.len() == n => {
                Ok(FlagValue::Vector(raw.iter().map(|&v| v as f32).collect()))
            }
            FlagShape::Vector(n) if n > 1 && raw.len() == 1 => Ok(FlagValue::Vector(vec![0.0; n])),
            FlagShape::Vector(n) => Err(RadarError::Schema(format!(
                "flag '{}' holds {n} values, found {}",
                spec.name,
                raw.len()
            ))),
        }
    }

    /// Encodes the ledger alone in the given file format.
    pub fn serialize(&self, format: FileFormat) -> RadarResult<Vec<u8>> {
        match format {
            FileFormat::Container => container::encode_ledger(self),
            FileFormat::Interchange => Ok(matfile::encode_ledger(self)),
            FileFormat::Hdf5 => persist::encode_hdf5_ledger(self),
        }
    }

    pub fn deserialize(format: FileFormat, blob: &[u8]) -> RadarResult<FlagLedger> {
        match format {
            FileFormat::Container => container::decode_ledger(blob),
            FileFormat::Interchange => matfile::decode_ledger(blob),
            FileFormat::Hdf5 => persist::decode_hdf5_ledger(blob),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ledger_starts_at_initial_values() {
        let ledger = FlagLedger::new();
        assert_eq!(ledger.get(FlagField::Range), &FlagValue::Vector(vec![0.0; 3]));
        assert_eq!(ledger.get(FlagField::PhaseGradient), &FlagValue::Bool(false));
        assert!(ledger.get(FlagField::Stack).is_absent());
    }

    #[test]
    fn schema_order_matches_field_discriminants() {
        for (index, spec) in FLAG_SCHEMA.iter().enumerate() {
            assert_eq!(spec.field as usize, index);
            assert_eq!(spec.name.parse::<FlagField>().unwrap(), spec.field);
        }
    }

    #[test]
    fn set_rejects_out_of_shape_values() {
        let mut ledger = FlagLedger::new();
        let err = ledger.set_vector(FlagField::Rotation, &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, RadarError::Schema(_)));
        let err = ledger.set_bool(FlagField::Coherence, true).unwrap_err();
        assert!(matches!(err, RadarError::Schema(_)));
        let err = ledger.set_vector(FlagField::PhaseGradient, &[1.0]).unwrap_err();
        assert!(matches!(err, RadarError::Schema(_)));
        assert_eq!(ledger, FlagLedger::new());
    }

    #[test]
    fn set_and_clear_round_through_get() {
        let mut ledger = FlagLedger::new();
        ledger.set_vector(FlagField::Coherence, &[1.0, 2.5, 3.0]).unwrap();
        ledger.set_bool(FlagField::Phase2Range, true).unwrap();
        assert_eq!(ledger.get(FlagField::Coherence).as_vector(), Some(&[1.0, 2.5, 3.0][..]));
        ledger.clear(FlagField::Coherence);
        assert!(ledger.get(FlagField::Coherence).is_absent());
    }

    #[test]
    fn unknown_field_name_is_a_schema_error() {
        let err = "migration".parse::<FlagField>().unwrap_err();
        assert!(matches!(err, RadarError::Schema(_)));
    }

    #[test]
    fn reconcile_expands_stub_only_for_multi_value_vectors() {
        assert_eq!(
            FlagLedger::reconcile_interchange(FlagField::Coherence, &[0.0]).unwrap(),
            FlagValue::Vector(vec![0.0; 3])
        );
        assert_eq!(
            FlagLedger::reconcile_interchange(FlagField::Stack, &[0.0]).unwrap(),
            FlagValue::Vector(vec![0.0])
        );
        assert_eq!(
            FlagLedger::reconcile_interchange(FlagField::PhaseGradient, &[1.0]).unwrap(),
            FlagValue::Bool(true)
        );
        assert!(FlagLedger::reconcile_interchange(FlagField::Range, &[1.0, 2.0]).is_err());
        assert!(FlagLedger::reconcile_interchange(FlagField::Phase2Range, &[]).is_err());
    }

    #[test]
    fn interchange_canonical_fills_absent_fields() {
        let mut ledger = FlagLedger::new();
        ledger.clear(FlagField::Rotation);
        ledger.clear(FlagField::PhaseGradient);
        let canonical = ledger.interchange_canonical();
        assert_eq!(canonical.get(FlagField::Rotation), &FlagValue::Vector(vec![0.0; 2]));
        assert_eq!(canonical.get(FlagField::PhaseGradient), &FlagValue::Bool(false));
        assert_eq!(canonical.get(FlagField::Stack), &FlagValue::Vector(vec![0.0]));
    }

    #[test]
    fn ledger_blob_round_trips_in_both_formats() {
        let mut ledger = FlagLedger::new();
        ledger.set_vector(FlagField::Range, &[2.0, 4000.0, 1.0]).unwrap();
        ledger.set_bool(FlagField::Phase2Range, true).unwrap();
        ledger.clear(FlagField::Coherence);

        let blob = ledger.serialize(FileFormat::Container).unwrap();
        let restored = FlagLedger::deserialize(FileFormat::Container, &blob).unwrap();
        assert_eq!(restored, ledger);

        let blob = ledger.serialize(FileFormat::Interchange).unwrap();
        let restored = FlagLedger::deserialize(FileFormat::Interchange, &blob).unwrap();
        assert_eq!(restored, ledger.interchange_canonical());
        assert_eq!(restored.get(FlagField::Coherence), &FlagValue::Vector(vec![0.0; 3]));
    }
}
