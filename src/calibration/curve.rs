//! Frequency-response curve parsing.

use std::path::Path;

use crate::CalibrationError;

/// A measured frequency response: `(frequency_hz, gain_db)` points in
/// strictly increasing frequency order.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCurve {
    points: Vec<(f64, f64)>,
}

impl CalibrationCurve {
    /// Builds a curve from points, checking the frequency ordering.
    pub fn from_points(points: Vec<(f64, f64)>) -> Result<Self, CalibrationError> {
        if points.is_empty() {
            return Err(CalibrationError::NoData);
        }
        for (i, pair) in points.windows(2).enumerate() {
            if pair[1].0 <= pair[0].0 {
                return Err(CalibrationError::NotIncreasing {
                    line: i + 2,
                    frequency: pair[1].0,
                });
            }
        }
        Ok(Self { points })
    }

    /// Parses whitespace-delimited calibration text.
    ///
    /// Leading header lines are skipped until a line starts with two numeric
    /// tokens. Extra columns after the first two are ignored. Once data has
    /// started, the first line that isn't numeric ends the table.
    pub fn parse(text: &str) -> Result<Self, CalibrationError> {
        let mut points = Vec::new();
        let mut data_started = false;

        for (idx, raw) in text.lines().enumerate() {
            let line_num = idx + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            match parse_row(line) {
                Some((frequency, gain)) => {
                    if let Some(&(previous, _)) = points.last() {
                        if frequency <= previous {
                            return Err(CalibrationError::NotIncreasing {
                                line: line_num,
                                frequency,
                            });
                        }
                    }
                    points.push((frequency, gain));
                    data_started = true;
                }
                None if !data_started => {
                    tracing::debug!(line = line_num, text = line, "Skipping calibration header line");
                }
                None => {
                    tracing::warn!(
                        line = line_num,
                        text = line,
                        "Non-numeric line after calibration data, stopping parse"
                    );
                    break;
                }
            }
        }

        if points.is_empty() {
            return Err(CalibrationError::NoData);
        }

        tracing::debug!(points = points.len(), "Parsed calibration curve");
        Ok(Self { points })
    }

    /// Reads and parses a calibration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// The `(frequency_hz, gain_db)` points.
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Number of points in the curve.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always `false`; a parsed curve has at least one point.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn parse_row(line: &str) -> Option<(f64, f64)> {
    let mut tokens = line.split_whitespace();
    let frequency = parse_number(tokens.next()?)?;
    let gain = parse_number(tokens.next()?)?;
    Some((frequency, gain))
}

fn parse_number(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}
