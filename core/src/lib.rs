//! Ground-penetrating radar trace handling: loading raw acquisitions,
//! range conversion, the processing-flag ledger and persistence.
//!
//! A [`Dataset`] is loaded with [`ingest::load`], transformed in place by
//! [`ProcessingStep`]s such as [`processing::RangeConversion`], and written
//! with [`persist::write`]. Every step records its parameters in the dataset's
//! [`FlagLedger`], which travels with the data through both file formats.

pub mod dataset;
pub mod flags;
pub mod ingest;
pub mod math;
pub mod persist;
pub mod prelude;
pub mod processing;
pub mod telemetry;

pub use persist::FileFormat;
pub use prelude::{
    Dataset, FlagField, FlagLedger, FlagValue, ProcessingStep, RadarError, RadarResult,
    TraceMatrix,
};
