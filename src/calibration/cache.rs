//! Persistent storage for designed filter coefficients.
//!
//! Designing a 1023-coefficient filter is quick but not free, and it runs at
//! every start. A [`FilterCache`] stores the coefficients under a key made of
//! the calibration file's name, the requested tap count and the sample rate.

use std::path::{Path, PathBuf};

use crate::CacheError;

const COEFFICIENT_BYTES: usize = std::mem::size_of::<f64>();

/// Identity of a designed filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterKey {
    /// Calibration file the filter was designed from.
    pub calibration_file: PathBuf,
    /// Requested tap count.
    pub tap_count: usize,
    /// Sample rate the filter was designed for.
    pub sample_rate: u32,
}

impl FilterKey {
    /// Creates a key.
    pub fn new(calibration_file: impl Into<PathBuf>, tap_count: usize, sample_rate: u32) -> Self {
        Self {
            calibration_file: calibration_file.into(),
            tap_count,
            sample_rate,
        }
    }

    /// Deterministic artifact name, e.g. `umik_fir_1024taps_48000hz.bin`.
    pub fn file_name(&self) -> String {
        let stem = self
            .calibration_file
            .file_stem()
            .map_or_else(|| "calibration".into(), |s| s.to_string_lossy());
        format!(
            "{stem}_fir_{}taps_{}hz.bin",
            self.tap_count, self.sample_rate
        )
    }
}

/// A store for filter coefficients.
///
/// Failures are reported but never fatal; the caller redesigns instead.
pub trait FilterCache: Send + Sync {
    /// Returns the cached coefficients, or `None` on a miss.
    fn load(&self, key: &FilterKey) -> Result<Option<Vec<f64>>, CacheError>;

    /// Stores coefficients, replacing any previous entry.
    fn store(&self, key: &FilterKey, coefficients: &[f64]) -> Result<(), CacheError>;
}

/// Stores coefficients as raw little-endian `f64` files.
///
/// By default the artifact is written next to the calibration file.
#[derive(Debug, Clone, Default)]
pub struct FileFilterCache {
    dir: Option<PathBuf>,
}

impl FileFilterCache {
    /// Caches next to each calibration file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches every artifact in `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Where the artifact for `key` lives.
    pub fn path_for(&self, key: &FilterKey) -> PathBuf {
        let dir = match &self.dir {
            Some(dir) => dir.as_path(),
            None => key.calibration_file.parent().unwrap_or(Path::new("")),
        };
        dir.join(key.file_name())
    }
}

impl FilterCache for FileFilterCache {
    fn load(&self, key: &FilterKey) -> Result<Option<Vec<f64>>, CacheError> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        if bytes.is_empty() || bytes.len() % COEFFICIENT_BYTES != 0 {
            return Err(CacheError::Corrupt {
                len: bytes.len(),
                path,
            });
        }

        let coefficients = bytes
            .chunks_exact(COEFFICIENT_BYTES)
            .map(|chunk| {
                let mut raw = [0u8; COEFFICIENT_BYTES];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();

        tracing::debug!(path = %path.display(), "Loaded cached filter");
        Ok(Some(coefficients))
    }

    fn store(&self, key: &FilterKey, coefficients: &[f64]) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let bytes: Vec<u8> = coefficients
            .iter()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        std::fs::write(&path, bytes).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Saved filter to cache");
        Ok(())
    }
}

/// A cache that never hits and never stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFilterCache;

impl FilterCache for NoopFilterCache {
    fn load(&self, _key: &FilterKey) -> Result<Option<Vec<f64>>, CacheError> {
        Ok(None)
    }

    fn store(&self, _key: &FilterKey, _coefficients: &[f64]) -> Result<(), CacheError> {
        Ok(())
    }
}
