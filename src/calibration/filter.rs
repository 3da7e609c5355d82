//! Streaming FIR correction.

use std::path::Path;

use super::cache::{FilterCache, FilterKey};
use super::{design_correction, CalibrationCurve};
use crate::transform::Transformer;
use crate::{AudioFrame, CalibrationError, TransformError};

/// Where a [`CorrectionFilter`]'s coefficients came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    /// Loaded from a [`FilterCache`].
    Cache,
    /// Designed from the calibration curve.
    Designed,
    /// Supplied directly by the caller.
    Provided,
}

/// An FIR filter that carries its delay line across calls.
///
/// Feeding a signal through [`apply`](Self::apply) in pieces yields the same
/// output as filtering it in one go, so frame boundaries are inaudible. The
/// state always holds `coefficients - 1` values.
#[derive(Debug, Clone)]
pub struct CorrectionFilter {
    coefficients: Vec<f64>,
    state: Vec<f64>,
    sample_rate: u32,
    tap_count: usize,
    source: FilterSource,
}

impl CorrectionFilter {
    /// Wraps existing coefficients.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::InvalidTapCount`] if `coefficients` is
    /// empty.
    pub fn from_coefficients(
        coefficients: Vec<f64>,
        sample_rate: u32,
        tap_count: usize,
    ) -> Result<Self, CalibrationError> {
        if coefficients.is_empty() {
            return Err(CalibrationError::InvalidTapCount { taps: 0 });
        }
        Ok(Self::with_source(
            coefficients,
            sample_rate,
            tap_count,
            FilterSource::Provided,
        ))
    }

    fn with_source(
        coefficients: Vec<f64>,
        sample_rate: u32,
        tap_count: usize,
        source: FilterSource,
    ) -> Self {
        let state = vec![0.0; coefficients.len() - 1];
        Self {
            coefficients,
            state,
            sample_rate,
            tap_count,
            source,
        }
    }

    /// Designs the correction for `curve` without touching any cache.
    ///
    /// `tap_count - 1` coefficients are designed, giving an odd-length
    /// linear-phase filter that can keep gain up to Nyquist.
    pub fn design(
        curve: &CalibrationCurve,
        sample_rate: u32,
        tap_count: usize,
    ) -> Result<Self, CalibrationError> {
        let coefficients = design_correction(curve, sample_rate, designed_len(tap_count)?)?;
        Ok(Self::with_source(
            coefficients,
            sample_rate,
            tap_count,
            FilterSource::Designed,
        ))
    }

    /// Loads the filter for `calibration_file` from `cache`, designing (and
    /// caching) it on a miss.
    ///
    /// A cached entry is only used when its length matches the design
    /// length. `force_rebuild` skips the lookup and overwrites the entry.
    /// Cache failures are logged and otherwise ignored; calibration file
    /// failures are returned.
    pub fn load_or_design(
        calibration_file: impl AsRef<Path>,
        sample_rate: u32,
        tap_count: usize,
        cache: &dyn FilterCache,
        force_rebuild: bool,
    ) -> Result<Self, CalibrationError> {
        let calibration_file = calibration_file.as_ref();
        let expected_len = designed_len(tap_count)?;
        let key = FilterKey::new(calibration_file, tap_count, sample_rate);

        if force_rebuild {
            tracing::info!("Forced rebuild, ignoring cached filter");
        } else {
            match cache.load(&key) {
                Ok(Some(coefficients)) if coefficients.len() == expected_len => {
                    tracing::info!(
                        taps = coefficients.len(),
                        sample_rate,
                        "Loaded correction filter from cache"
                    );
                    return Ok(Self::with_source(
                        coefficients,
                        sample_rate,
                        tap_count,
                        FilterSource::Cache,
                    ));
                }
                Ok(Some(coefficients)) => {
                    tracing::warn!(
                        cached = coefficients.len(),
                        expected = expected_len,
                        "Cached filter length mismatch, redesigning"
                    );
                }
                Ok(None) => tracing::debug!("No cached filter found"),
                Err(e) => tracing::warn!(error = %e, "Failed to read cached filter, redesigning"),
            }
        }

        let curve = CalibrationCurve::load(calibration_file)?;
        let filter = Self::design(&curve, sample_rate, tap_count)?;

        if let Err(e) = cache.store(&key, &filter.coefficients) {
            tracing::warn!(error = %e, "Failed to cache filter, continuing uncached");
        }

        tracing::info!(
            taps = filter.coefficients.len(),
            sample_rate,
            file = %calibration_file.display(),
            "Designed correction filter"
        );
        Ok(filter)
    }

    /// Filters `input`, continuing from the state left by the previous call.
    ///
    /// The output always has the same length as the input.
    pub fn apply(&mut self, input: &[f32]) -> Vec<f32> {
        let taps = &self.coefficients;
        let z = &mut self.state;
        let order = z.len();

        let mut output = Vec::with_capacity(input.len());
        for &sample in input {
            let x = f64::from(sample);
            let y = taps[0] * x + z.first().copied().unwrap_or(0.0);
            for i in 1..order {
                z[i - 1] = taps[i] * x + z[i];
            }
            if order > 0 {
                z[order - 1] = taps[order] * x;
            }
            output.push(y as f32);
        }
        output
    }

    /// Zeroes the carried state.
    pub fn reset(&mut self) {
        self.state.fill(0.0);
    }

    /// The filter coefficients.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// The carried filter state.
    pub fn state(&self) -> &[f64] {
        &self.state
    }

    /// Sample rate the filter was designed for.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Tap count that was requested.
    pub fn tap_count(&self) -> usize {
        self.tap_count
    }

    /// Where the coefficients came from.
    pub fn source(&self) -> FilterSource {
        self.source
    }
}

impl Transformer for CorrectionFilter {
    fn name(&self) -> &str {
        "correction-filter"
    }

    fn process(&mut self, frame: AudioFrame) -> Result<AudioFrame, TransformError> {
        if frame.sample_rate != self.sample_rate {
            return Err(TransformError::SampleRateMismatch {
                expected: self.sample_rate,
                actual: frame.sample_rate,
            });
        }
        let corrected = self.apply(&frame.samples);
        Ok(frame.with_samples(corrected))
    }
}

fn designed_len(tap_count: usize) -> Result<usize, CalibrationError> {
    match tap_count.checked_sub(1) {
        Some(len) if len >= 3 && len % 2 == 1 => Ok(len),
        _ => Err(CalibrationError::InvalidTapCount {
            taps: tap_count.saturating_sub(1),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{FileFilterCache, NoopFilterCache};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    const UMIK_FILE: &str = "\"Sens Factor =-1.23dB, SERNO: 7000000\"\n\
        10\t-5.0\n\
        20\t-2.5\n\
        1000\t0.0\n\
        10000\t1.5\n\
        20000\t2.0\n";

    /// Wraps a cache and counts the calls that reach it.
    struct CountingCache<C> {
        inner: C,
        stores: AtomicUsize,
    }

    impl<C: FilterCache> FilterCache for CountingCache<C> {
        fn load(&self, key: &FilterKey) -> Result<Option<Vec<f64>>, crate::CacheError> {
            self.inner.load(key)
        }

        fn store(&self, key: &FilterKey, coefficients: &[f64]) -> Result<(), crate::CacheError> {
            self.stores.fetch_add(1, Ordering::SeqCst);
            self.inner.store(key, coefficients)
        }
    }

    fn lfilter_reference(taps: &[f64], input: &[f32]) -> Vec<f32> {
        (0..input.len())
            .map(|n| {
                taps.iter()
                    .enumerate()
                    .filter(|(k, _)| *k <= n)
                    .map(|(k, b)| b * f64::from(input[n - k]))
                    .sum::<f64>() as f32
            })
            .collect()
    }

    #[test]
    fn test_design_and_cache_then_reuse() {
        let dir = tempdir().unwrap();
        let cal = dir.path().join("umik.txt");
        std::fs::write(&cal, UMIK_FILE).unwrap();
        let cache = CountingCache {
            inner: FileFilterCache::new(),
            stores: AtomicUsize::new(0),
        };

        let first = CorrectionFilter::load_or_design(&cal, 48000, 1024, &cache, false).unwrap();
        assert_eq!(first.coefficients().len(), 1023);
        assert_eq!(first.state().len(), 1022);
        assert_eq!(first.source(), FilterSource::Designed);
        assert!(dir.path().join("umik_fir_1024taps_48000hz.bin").exists());
        assert_eq!(cache.stores.load(Ordering::SeqCst), 1);

        let second = CorrectionFilter::load_or_design(&cal, 48000, 1024, &cache, false).unwrap();
        assert_eq!(second.source(), FilterSource::Cache);
        assert_eq!(second.coefficients(), first.coefficients());
        assert_eq!(cache.stores.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_force_rebuild_overwrites_cache() {
        let dir = tempdir().unwrap();
        let cal = dir.path().join("umik.txt");
        std::fs::write(&cal, UMIK_FILE).unwrap();
        let cache = FileFilterCache::new();

        CorrectionFilter::load_or_design(&cal, 48000, 64, &cache, false).unwrap();
        let rebuilt = CorrectionFilter::load_or_design(&cal, 48000, 64, &cache, true).unwrap();
        assert_eq!(rebuilt.source(), FilterSource::Designed);
    }

    #[test]
    fn test_length_mismatch_triggers_redesign() {
        let dir = tempdir().unwrap();
        let cal = dir.path().join("umik.txt");
        std::fs::write(&cal, UMIK_FILE).unwrap();
        let cache = FileFilterCache::new();
        let key = FilterKey::new(&cal, 64, 48000);
        cache.store(&key, &[1.0; 64]).unwrap();

        let filter = CorrectionFilter::load_or_design(&cal, 48000, 64, &cache, false).unwrap();
        assert_eq!(filter.source(), FilterSource::Designed);
        assert_eq!(filter.coefficients().len(), 63);
        // The bad entry was replaced
        assert_eq!(cache.load(&key).unwrap().unwrap().len(), 63);
    }

    #[test]
    fn test_corrupt_cache_triggers_redesign() {
        let dir = tempdir().unwrap();
        let cal = dir.path().join("umik.txt");
        std::fs::write(&cal, UMIK_FILE).unwrap();
        let cache = FileFilterCache::new();
        std::fs::write(
            cache.path_for(&FilterKey::new(&cal, 64, 48000)),
            [0u8; 5],
        )
        .unwrap();

        let filter = CorrectionFilter::load_or_design(&cal, 48000, 64, &cache, false).unwrap();
        assert_eq!(filter.source(), FilterSource::Designed);
    }

    #[test]
    fn test_unwritable_cache_is_not_fatal() {
        let dir = tempdir().unwrap();
        let cal = dir.path().join("umik.txt");
        std::fs::write(&cal, UMIK_FILE).unwrap();
        let cache = FileFilterCache::in_dir(dir.path().join("missing"));

        let filter = CorrectionFilter::load_or_design(&cal, 48000, 64, &cache, false).unwrap();
        assert_eq!(filter.coefficients().len(), 63);
    }

    #[test]
    fn test_missing_calibration_file_is_fatal() {
        let result = CorrectionFilter::load_or_design(
            "/definitely/not/here.txt",
            48000,
            64,
            &NoopFilterCache,
            false,
        );
        assert!(matches!(result, Err(CalibrationError::Io { .. })));
    }

    #[test]
    fn test_odd_tap_count_rejected() {
        let curve = CalibrationCurve::parse(UMIK_FILE).unwrap();
        assert!(matches!(
            CorrectionFilter::design(&curve, 48000, 65),
            Err(CalibrationError::InvalidTapCount { .. })
        ));
    }

    #[test]
    fn test_redesign_is_deterministic() {
        let curve = CalibrationCurve::parse(UMIK_FILE).unwrap();
        let a = CorrectionFilter::design(&curve, 48000, 256).unwrap();
        let b = CorrectionFilter::design(&curve, 48000, 256).unwrap();
        assert_eq!(a.coefficients(), b.coefficients());
    }

    #[test]
    fn test_apply_keeps_lengths() {
        let curve = CalibrationCurve::parse(UMIK_FILE).unwrap();
        let mut filter = CorrectionFilter::design(&curve, 48000, 128).unwrap();
        for len in [0usize, 1, 7, 127, 128, 1000] {
            let input = vec![0.25f32; len];
            assert_eq!(filter.apply(&input).len(), len);
            assert_eq!(filter.state().len(), 126);
        }
    }

    #[test]
    fn test_apply_matches_direct_convolution() {
        let taps = vec![0.5, 0.25, -0.125, 0.0625];
        let mut filter = CorrectionFilter::from_coefficients(taps.clone(), 48000, 4).unwrap();
        let input: Vec<f32> = (0..32).map(|i| ((i * 7) % 11) as f32 / 11.0 - 0.5).collect();

        let out = filter.apply(&input);
        let expected = lfilter_reference(&taps, &input);
        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_state_carries_across_calls() {
        let taps = vec![0.3, -0.2, 0.1, 0.05, 0.4];
        let input: Vec<f32> = (0..100).map(|i| (i as f32 * 0.37).sin()).collect();

        let mut whole = CorrectionFilter::from_coefficients(taps.clone(), 48000, 6).unwrap();
        let expected = whole.apply(&input);

        let mut split = CorrectionFilter::from_coefficients(taps, 48000, 6).unwrap();
        let mut out = split.apply(&input[..13]);
        out.extend(split.apply(&input[13..14]));
        out.extend(split.apply(&input[14..]));

        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_empty_coefficients_rejected() {
        assert!(matches!(
            CorrectionFilter::from_coefficients(Vec::new(), 48000, 4),
            Err(CalibrationError::InvalidTapCount { taps: 0 })
        ));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut filter = CorrectionFilter::from_coefficients(vec![1.0, 1.0], 48000, 3).unwrap();
        filter.apply(&[1.0]);
        assert!((filter.state()[0] - 1.0).abs() < f64::EPSILON);
        filter.reset();
        assert!(filter.state()[0].abs() < f64::EPSILON);
    }

    #[test]
    fn test_transformer_rejects_wrong_rate() {
        let mut filter =
            CorrectionFilter::from_coefficients(vec![1.0, 0.0, 0.0], 48000, 4).unwrap();
        let frame = AudioFrame::new(vec![0.1; 10], Duration::ZERO, 44100);
        assert!(matches!(
            filter.process(frame),
            Err(TransformError::SampleRateMismatch {
                expected: 48000,
                actual: 44100
            })
        ));
    }

    #[test]
    fn test_transformer_filters_frame() {
        let mut filter = CorrectionFilter::from_coefficients(vec![0.5, 0.5], 48000, 3).unwrap();
        let frame = AudioFrame::new(vec![1.0, 1.0, 1.0], Duration::from_secs(6), 48000);
        let out = filter.process(frame).unwrap();
        assert_eq!(out.timestamp, Duration::from_secs(6));
        assert_eq!(*out.samples, vec![0.5, 1.0, 1.0]);
    }
}
