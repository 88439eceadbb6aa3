//! Plain-text persistence of the derived calibration triple.
//!
//! The file holds three newline-separated decimals in fixed order: field of
//! view (degrees), pixels per lens, index of refraction. The renderer side
//! reads the same file, so the layout must not change.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

use crate::calibration::params::DerivedParameters;

const FIELDS: [&str; 3] = ["field of view", "pixels per lens", "index of refraction"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access calibration file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("calibration file {path:?} is missing the {field} line")]
    MissingField { path: PathBuf, field: &'static str },
    #[error("calibration file {path:?} has an invalid {field}: {value:?}")]
    InvalidField {
        path: PathBuf,
        field: &'static str,
        value: String,
    },
}

#[derive(Clone, Debug)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted parameters; `Ok(None)` when no file exists yet.
    pub fn load(&self) -> Result<Option<DerivedParameters>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut lines = text.lines();
        let mut values = [0.0f64; 3];
        for (slot, field) in values.iter_mut().zip(FIELDS) {
            let raw = lines.next().ok_or_else(|| StoreError::MissingField {
                path: self.path.clone(),
                field,
            })?;
            *slot = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| StoreError::InvalidField {
                    path: self.path.clone(),
                    field,
                    value: raw.to_string(),
                })?;
        }

        let [fov_deg, pixels_per_lens, index_of_refraction] = values;
        debug!(path = %self.path.display(), fov_deg, pixels_per_lens, index_of_refraction, "calibration loaded");
        Ok(Some(DerivedParameters {
            fov_deg,
            pixels_per_lens,
            index_of_refraction,
        }))
    }

    pub fn save(&self, params: &DerivedParameters) -> Result<(), StoreError> {
        let contents = format!(
            "{}\n{}\n{}\n",
            params.fov_deg, params.pixels_per_lens, params.index_of_refraction
        );
        fs::write(&self.path, contents).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path().join("calibration_settings.txt"));
        let params = DerivedParameters {
            fov_deg: 53.130_102_354_155_98,
            pixels_per_lens: 2.5,
            index_of_refraction: 1.49,
        };
        store.save(&params).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_relative_eq!(loaded.fov_deg, params.fov_deg);
        assert_relative_eq!(loaded.pixels_per_lens, params.pixels_per_lens);
        assert_relative_eq!(loaded.index_of_refraction, params.index_of_refraction);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path().join("absent.txt"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn accepts_values_written_by_other_tools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration_settings.txt");
        fs::write(&path, "61.2\r\n3\n 1.5 \n").unwrap();
        let loaded = CalibrationStore::new(&path).load().unwrap().unwrap();
        assert_relative_eq!(loaded.fov_deg, 61.2);
        assert_relative_eq!(loaded.pixels_per_lens, 3.0);
        assert_relative_eq!(loaded.index_of_refraction, 1.5);
    }

    #[test]
    fn malformed_files_name_the_bad_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration_settings.txt");
        let store = CalibrationStore::new(&path);

        fs::write(&path, "53.1\nabc\n1.5\n").unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::InvalidField { field: "pixels per lens", .. })
        ));

        fs::write(&path, "53.1\n2.5\n").unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::MissingField { field: "index of refraction", .. })
        ));
    }
}
