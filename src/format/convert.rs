//! Sample format and channel conversion.

/// Converts an f32 sample to i16.
///
/// Input should be in the range [-1.0, 1.0].
/// Values outside this range are clamped.
///
/// Uses × 32767 (not 32768) for symmetric scaling. This means -1.0 maps
/// to -32767 rather than -32768, losing 1 LSB at the negative extreme.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Batch converts f32 samples to i16.
pub fn f32_slice_to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_to_i16(s)).collect()
}

/// Averages interleaved channels into mono.
///
/// A trailing partial frame is ignored.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_full_range() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_f32_to_i16_clamping() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_batch_conversion() {
        let i16_samples = f32_slice_to_i16(&[0.0, 0.5, -0.5, 1.0]);
        assert_eq!(i16_samples, vec![0, 16383, -16383, 32767]);
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix_to_mono(&[0.2, 0.4, -1.0, 1.0, 0.5], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn test_downmix_mono_is_copy() {
        assert_eq!(downmix_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }
}
