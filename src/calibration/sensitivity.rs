//! Broadband microphone sensitivity from the `Sens Factor` header.

use std::path::Path;

use crate::config::{NOMINAL_SENSITIVITY_DBFS, REFERENCE_DBSPL};
use crate::CalibrationError;

const SENS_FACTOR_LABEL: &str = "Sens Factor";

/// Sensitivity of a calibrated microphone.
///
/// A tone at `reference_dbspl` reads `sensitivity_dbfs` on the capture
/// device, so `dBSPL = dBFS - sensitivity_dbfs + reference_dbspl`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensitivity {
    /// Full-scale level that corresponds to the reference SPL.
    pub sensitivity_dbfs: f64,
    /// Reference sound pressure level.
    pub reference_dbspl: f64,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self {
            sensitivity_dbfs: NOMINAL_SENSITIVITY_DBFS,
            reference_dbspl: REFERENCE_DBSPL,
        }
    }
}

impl Sensitivity {
    /// Extracts the sensitivity from calibration text.
    ///
    /// The first line containing `Sens Factor` must carry a value between
    /// `=` and `dB`, e.g. `"Sens Factor =-1.23dB, SERNO: 7000000"`.
    pub fn parse(
        text: &str,
        nominal_dbfs: f64,
        reference_dbspl: f64,
    ) -> Result<Self, CalibrationError> {
        let (idx, line) = text
            .lines()
            .enumerate()
            .find(|(_, line)| line.contains(SENS_FACTOR_LABEL))
            .ok_or(CalibrationError::SensitivityMissing)?;

        let line = line.trim();
        let factor_db = line
            .split('=')
            .nth(1)
            .and_then(|rest| rest.split("dB").next())
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .ok_or_else(|| CalibrationError::SensitivityMalformed {
                line: idx + 1,
                text: line.to_string(),
            })?;

        tracing::debug!(factor_db, "Found sensitivity factor");

        Ok(Self {
            sensitivity_dbfs: nominal_dbfs + factor_db,
            reference_dbspl,
        })
    }

    /// Reads the sensitivity from a calibration file.
    pub fn load(
        path: impl AsRef<Path>,
        nominal_dbfs: f64,
        reference_dbspl: f64,
    ) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, nominal_dbfs, reference_dbspl)
    }

    /// Converts a full-scale level to sound pressure level.
    #[must_use]
    pub fn dbspl(&self, dbfs: f64) -> f64 {
        dbfs - self.sensitivity_dbfs + self.reference_dbspl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quoted_umik_header() {
        let text = "\"Sens Factor =-1.23dB, SERNO: 7000000\"\n10 -5.0\n";
        let sens = Sensitivity::parse(text, -18.0, 94.0).unwrap();
        assert!((sens.sensitivity_dbfs - (-19.23)).abs() < 1e-9);
        assert!((sens.reference_dbspl - 94.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_with_other_data() {
        let text = "Sens Factor =-12.5dB, Other Data\n";
        let sens = Sensitivity::parse(text, -18.0, 94.0).unwrap();
        assert!((sens.sensitivity_dbfs - (-30.5)).abs() < 1e-9);
    }

    #[test]
    fn test_parse_positive_factor_with_spaces() {
        let text = "header\nSens Factor = +0.75 dB\n";
        let sens = Sensitivity::parse(text, -18.0, 94.0).unwrap();
        assert!((sens.sensitivity_dbfs - (-17.25)).abs() < 1e-9);
    }

    #[test]
    fn test_missing_line() {
        let text = "10 -5.0\n20 -2.5\n";
        assert!(matches!(
            Sensitivity::parse(text, -18.0, 94.0),
            Err(CalibrationError::SensitivityMissing)
        ));
    }

    #[test]
    fn test_malformed_line() {
        let text = "first\nSens Factor is unknown\n";
        match Sensitivity::parse(text, -18.0, 94.0) {
            Err(CalibrationError::SensitivityMalformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected SensitivityMalformed, got {:?}", other),
        }
    }

    #[test]
    fn test_non_numeric_value() {
        let text = "Sens Factor =abcdB\n";
        assert!(matches!(
            Sensitivity::parse(text, -18.0, 94.0),
            Err(CalibrationError::SensitivityMalformed { .. })
        ));
    }

    #[test]
    fn test_dbspl_conversion() {
        let sens = Sensitivity {
            sensitivity_dbfs: -19.23,
            reference_dbspl: 94.0,
        };
        // A full-scale reading at the sensitivity level is the reference SPL
        assert!((sens.dbspl(-19.23) - 94.0).abs() < 1e-9);
        assert!((sens.dbspl(-39.23) - 74.0).abs() < 1e-9);
    }
}
