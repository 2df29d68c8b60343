use std::path::PathBuf;

pub use crate::dataset::{AcquisitionMetadata, Dataset, Geolocation, TraceMatrix};
pub use crate::flags::{FlagField, FlagLedger, FlagValue};

/// Error taxonomy shared by loaders, transforms and codecs.
///
/// None of the variants describe transient conditions; the caller has to fix
/// the input file or the parameters before trying again.
#[derive(thiserror::Error, Debug)]
pub enum RadarError {
    /// Malformed, truncated or unrecognized file.
    #[error("format error: {0}")]
    Format(String),
    /// A ledger value does not match the declared field shape.
    #[error("schema error: {0}")]
    Schema(String),
    /// Invalid transform parameter, raised before any data is modified.
    #[error("config error: {0}")]
    Config(String),
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RadarError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RadarError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type RadarResult<T> = Result<T, RadarError>;

/// A named processing step that mutates a dataset in place and records
/// itself in the dataset's flag ledger.
pub trait ProcessingStep {
    /// Stage tag used when naming output files.
    fn name(&self) -> &'static str;
    fn apply(&self, dataset: &mut Dataset) -> RadarResult<()>;
}
