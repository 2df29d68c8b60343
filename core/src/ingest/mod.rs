//! Loading raw acquisitions from vendor files.

pub mod cor;
pub mod ramac;

use std::path::Path;

use crate::dataset::Dataset;
use crate::persist::{self, FileFormat};
use crate::prelude::{RadarError, RadarResult};

pub use ramac::{load_ramac, write_acquisition, RadHeader, SampleWidth, COMPANION_EXTENSIONS};

/// Loads an acquisition from any accepted path alias.
///
/// Raw RAMAC inputs go through [`load_ramac`]; files already written by
/// [`persist::write`] are read back so that processing can be chained.
pub fn load(path: &Path, format: Option<&str>) -> RadarResult<Dataset> {
    match FileFormat::from_path(path) {
        Some(stored) => {
            if let Some(fmt) = format {
                return Err(RadarError::Format(format!(
                    "format '{fmt}' cannot be forced on a stored {} file {}",
                    stored.extension(),
                    path.display()
                )));
            }
            persist::read(path)
        }
        None => load_ramac(path, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{AcquisitionMetadata, TraceMatrix};
    use ndarray::Array2;
    use tempfile::TempDir;

    #[test]
    fn stored_files_are_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("line_raw.json");
        let dataset = Dataset::new(
            TraceMatrix::Real(Array2::from_elem((4, 2), 3.0)),
            AcquisitionMetadata::new(2, 1e-9),
        )
        .unwrap();
        persist::write(&dataset, &path, FileFormat::Container).unwrap();
        assert_eq!(load(&path, None).unwrap(), dataset);
        assert!(matches!(load(&path, Some("rd3")), Err(RadarError::Format(_))));
    }
}
