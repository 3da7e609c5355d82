//! Rotating WAV recorder sink.

use crate::format::f32_slice_to_i16;
use crate::sink::Sink;
use crate::{AudioFrame, SinkError};
use async_trait::async_trait;
use chrono::Local;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

// WAV file format constants
// See: http://soundfile.sapp.org/doc/WaveFormat/

/// Byte offset of the file size field in WAV header (RIFF chunk size).
const WAV_FILE_SIZE_OFFSET: u64 = 4;

/// Byte offset of the data chunk size field in WAV header.
const WAV_DATA_SIZE_OFFSET: u64 = 40;

/// Size of the WAV header in bytes (RIFF + fmt + data chunk headers).
const WAV_HEADER_SIZE: usize = 44;

/// Size of the fmt chunk data (16 bytes for PCM).
const WAV_FMT_CHUNK_SIZE: u32 = 16;

/// Audio format code for PCM (uncompressed).
const WAV_FORMAT_PCM: u16 = 1;

/// Bits per sample for 16-bit audio.
const WAV_BITS_PER_SAMPLE: u16 = 16;

/// Recordings are always mono.
const WAV_CHANNELS: u16 = 1;

/// Bytes per sample (16-bit = 2 bytes).
const BYTES_PER_SAMPLE: u64 = 2;

/// Timestamp format used in segment file names.
const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// A sink that records frames as 16-bit mono WAV, starting a new file after
/// every `rotation` of audio.
///
/// The target is either a file path, whose stem and extension are reused
/// (`take.wav` → `take_2025-01-01_12-00-00_000.wav`), or a directory
/// (`recording_2025-01-01_12-00-00_000.wav` inside it). A segment is created
/// on the first frame after start or rotation and its header is finalized
/// when it is rotated out or on `on_stop()`. All file I/O runs in the
/// blocking thread pool.
///
/// # Example
///
/// ```no_run
/// use spl_meter::RecorderSink;
/// use std::time::Duration;
///
/// let sink = RecorderSink::new("recordings", Duration::from_secs(3600));
/// // Use with the Meter builder...
/// ```
pub struct RecorderSink {
    name: String,
    target: Arc<PathBuf>,
    rotation: Duration,
    state: Arc<Mutex<RecorderState>>,
}

#[derive(Default)]
struct RecorderState {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    samples_written: u64,
    sample_rate: u32,
    segment: u32,
    finished: Vec<PathBuf>,
}

impl RecorderSink {
    /// Creates a recorder writing under `target`. A zero `rotation`
    /// disables rotation.
    pub fn new(target: impl AsRef<Path>, rotation: Duration) -> Self {
        Self {
            name: format!("recorder:{}", target.as_ref().display()),
            target: Arc::new(target.as_ref().to_path_buf()),
            rotation,
            state: Arc::new(Mutex::new(RecorderState::default())),
        }
    }

    /// Segments that have been completed so far, oldest first.
    pub async fn finished_segments(&self) -> Vec<PathBuf> {
        self.state.lock().await.finished.clone()
    }

    /// Path of the next segment for `target`.
    fn segment_path(target: &Path, stamp: &str, segment: u32) -> PathBuf {
        match (target.file_stem(), target.extension()) {
            (Some(stem), Some(ext)) => target.with_file_name(format!(
                "{}_{stamp}_{segment:03}.{}",
                stem.to_string_lossy(),
                ext.to_string_lossy()
            )),
            _ => target.join(format!("recording_{stamp}_{segment:03}.wav")),
        }
    }

    /// Writes a complete WAV header with the given parameters.
    ///
    /// The header includes RIFF, fmt, and data chunk headers (44 bytes total).
    fn write_wav_header(
        writer: &mut BufWriter<File>,
        sample_rate: u32,
        data_size: u32,
    ) -> std::io::Result<()> {
        // RIFF container header
        writer.write_all(b"RIFF")?;
        let file_size = WAV_HEADER_SIZE as u32 - 8 + data_size;
        writer.write_all(&file_size.to_le_bytes())?;
        writer.write_all(b"WAVE")?;

        // fmt subchunk
        writer.write_all(b"fmt ")?;
        writer.write_all(&WAV_FMT_CHUNK_SIZE.to_le_bytes())?;
        writer.write_all(&WAV_FORMAT_PCM.to_le_bytes())?;
        writer.write_all(&WAV_CHANNELS.to_le_bytes())?;
        writer.write_all(&sample_rate.to_le_bytes())?;

        let bytes_per_sample = WAV_BITS_PER_SAMPLE / 8;
        let byte_rate = sample_rate * u32::from(WAV_CHANNELS) * u32::from(bytes_per_sample);
        writer.write_all(&byte_rate.to_le_bytes())?;

        let block_align = WAV_CHANNELS * bytes_per_sample;
        writer.write_all(&block_align.to_le_bytes())?;
        writer.write_all(&WAV_BITS_PER_SAMPLE.to_le_bytes())?;

        // data subchunk header
        writer.write_all(b"data")?;
        writer.write_all(&data_size.to_le_bytes())?;

        Ok(())
    }

    /// Seeks back to patch the RIFF and data sizes after recording.
    fn update_wav_header(writer: &mut BufWriter<File>, data_size: u32) -> std::io::Result<()> {
        let file_size = WAV_HEADER_SIZE as u32 - 8 + data_size;
        writer.seek(SeekFrom::Start(WAV_FILE_SIZE_OFFSET))?;
        writer.write_all(&file_size.to_le_bytes())?;

        writer.seek(SeekFrom::Start(WAV_DATA_SIZE_OFFSET))?;
        writer.write_all(&data_size.to_le_bytes())?;

        writer.seek(SeekFrom::End(0))?;
        Ok(())
    }

    fn open_segment_blocking(
        state: &mut RecorderState,
        target: &Path,
        sample_rate: u32,
    ) -> Result<(), SinkError> {
        if state.path.is_none() && target.extension().is_none() {
            std::fs::create_dir_all(target).map_err(|e| SinkError::file_error(target, e))?;
        }

        let stamp = Local::now().format(STAMP_FORMAT).to_string();
        let path = Self::segment_path(target, &stamp, state.segment);
        let file = File::create(&path).map_err(|e| SinkError::file_error(&path, e))?;
        let mut writer = BufWriter::new(file);

        // Placeholder header, patched when the segment is finalized
        Self::write_wav_header(&mut writer, sample_rate, 0)
            .map_err(|e| SinkError::file_error(&path, e))?;

        tracing::info!(path = %path.display(), "Started new recording segment");
        state.writer = Some(writer);
        state.path = Some(path);
        state.samples_written = 0;
        state.sample_rate = sample_rate;
        Ok(())
    }

    fn write_samples_blocking(
        state: &mut RecorderState,
        target: &Path,
        samples: &[f32],
        sample_rate: u32,
        rotation_samples: u64,
    ) -> Result<(), SinkError> {
        if state.writer.is_none() {
            Self::open_segment_blocking(state, target, sample_rate)?;
        } else if state.sample_rate != sample_rate {
            // The header's rate is fixed for the whole segment
            return Err(SinkError::write_failed(format!(
                "frame at {sample_rate}Hz does not match segment rate {}Hz",
                state.sample_rate
            )));
        }

        if let (Some(writer), Some(path)) = (state.writer.as_mut(), state.path.as_ref()) {
            for sample in f32_slice_to_i16(samples) {
                writer
                    .write_all(&sample.to_le_bytes())
                    .map_err(|e| SinkError::file_error(path, e))?;
            }
            state.samples_written += samples.len() as u64;
        }

        if rotation_samples > 0 && state.samples_written >= rotation_samples {
            tracing::info!("Rotation limit reached, switching files");
            Self::finalize_blocking(state)?;
            state.segment += 1;
        }
        Ok(())
    }

    /// Finalizes the open segment, if any, by updating the header sizes.
    fn finalize_blocking(state: &mut RecorderState) -> Result<(), SinkError> {
        let data_size = (state.samples_written * BYTES_PER_SAMPLE) as u32;

        if let (Some(mut writer), Some(path)) = (state.writer.take(), state.path.clone()) {
            Self::update_wav_header(&mut writer, data_size)
                .map_err(|e| SinkError::file_error(&path, e))?;
            writer.flush().map_err(|e| SinkError::file_error(&path, e))?;
            tracing::debug!(path = %path.display(), samples = state.samples_written, "Segment finalized");
            state.finished.push(path);
        }
        state.samples_written = 0;
        Ok(())
    }
}

#[async_trait]
impl Sink for RecorderSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_start(&mut self) -> Result<(), SinkError> {
        // The file is created on the first frame, once the rate is known
        Ok(())
    }

    async fn handle(&mut self, frame: &AudioFrame) -> Result<(), SinkError> {
        tracing::trace!(
            "RecorderSink {}: writing {} samples, ts={:?}",
            self.name,
            frame.len(),
            frame.timestamp
        );

        let samples = Arc::clone(&frame.samples);
        let sample_rate = frame.sample_rate;
        let rotation_samples =
            (self.rotation.as_secs_f64() * f64::from(sample_rate)).round() as u64;
        let state = Arc::clone(&self.state);
        let target = Arc::clone(&self.target);

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            Self::write_samples_blocking(
                &mut state,
                &target,
                &samples,
                sample_rate,
                rotation_samples,
            )
        })
        .await
        .map_err(|e| SinkError::write_failed(format!("write task panicked: {e}")))?
    }

    async fn on_stop(&mut self) -> Result<(), SinkError> {
        let state = Arc::clone(&self.state);

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            Self::finalize_blocking(&mut state)
        })
        .await
        .map_err(|e| SinkError::write_failed(format!("finalize task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn frame(samples: Vec<f32>) -> AudioFrame {
        AudioFrame::new(samples, Duration::ZERO, 16000)
    }

    fn read_u32(data: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
    }

    #[test]
    fn test_segment_path_with_extension() {
        let path = RecorderSink::segment_path(
            Path::new("/tmp/out/take.wav"),
            "2025-01-01_12-00-00",
            2,
        );
        assert_eq!(
            path,
            PathBuf::from("/tmp/out/take_2025-01-01_12-00-00_002.wav")
        );
    }

    #[test]
    fn test_segment_path_for_directory() {
        let path = RecorderSink::segment_path(Path::new("/tmp/out"), "2025-01-01_12-00-00", 0);
        assert_eq!(
            path,
            PathBuf::from("/tmp/out/recording_2025-01-01_12-00-00_000.wav")
        );
    }

    #[tokio::test]
    async fn test_recorder_writes_mono_wav() {
        let dir = tempdir().unwrap();
        let mut sink = RecorderSink::new(dir.path().join("take.wav"), Duration::ZERO);
        sink.on_start().await.unwrap();

        sink.handle(&frame(vec![0.5, -0.5])).await.unwrap();
        sink.handle(&frame(vec![1.0])).await.unwrap();
        sink.on_stop().await.unwrap();

        let segments = sink.finished_segments().await;
        assert_eq!(segments.len(), 1);
        let data = std::fs::read(&segments[0]).unwrap();

        assert_eq!(&data[0..4], b"RIFF");
        assert_eq!(&data[8..12], b"WAVE");
        assert_eq!(u16::from_le_bytes([data[22], data[23]]), 1);
        assert_eq!(read_u32(&data, 24), 16000);
        // 3 samples × 2 bytes
        assert_eq!(read_u32(&data, 40), 6);
        assert_eq!(read_u32(&data, 4), WAV_HEADER_SIZE as u32 - 8 + 6);

        let first = i16::from_le_bytes([data[WAV_HEADER_SIZE], data[WAV_HEADER_SIZE + 1]]);
        assert_eq!(first, 16383);
    }

    #[tokio::test]
    async fn test_recorder_rotates_segments() {
        let dir = tempdir().unwrap();
        // 1 ms at 16 kHz = 16 samples per segment
        let mut sink = RecorderSink::new(dir.path(), Duration::from_millis(1));

        for _ in 0..3 {
            sink.handle(&frame(vec![0.1; 16])).await.unwrap();
        }
        sink.handle(&frame(vec![0.1; 4])).await.unwrap();
        sink.on_stop().await.unwrap();

        let segments = sink.finished_segments().await;
        assert_eq!(segments.len(), 4);
        for (i, path) in segments.iter().enumerate() {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("recording_"), "{name}");
            assert!(name.ends_with(&format!("_{i:03}.wav")), "{name}");
        }

        let first = std::fs::read(&segments[0]).unwrap();
        assert_eq!(read_u32(&first, 40), 32);
        let last = std::fs::read(&segments[3]).unwrap();
        assert_eq!(read_u32(&last, 40), 8);
    }

    #[tokio::test]
    async fn test_recorder_readable_by_hound() {
        let dir = tempdir().unwrap();
        let mut sink = RecorderSink::new(dir.path().join("check.wav"), Duration::ZERO);
        sink.handle(&frame(vec![0.25; 160])).await.unwrap();
        sink.on_stop().await.unwrap();

        let path = sink.finished_segments().await.remove(0);
        let reader = hound::WavReader::open(path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 160);
    }

    #[tokio::test]
    async fn test_recorder_stop_before_write() {
        let dir = tempdir().unwrap();
        let mut sink = RecorderSink::new(dir.path().join("none.wav"), Duration::ZERO);
        sink.on_start().await.unwrap();
        sink.on_stop().await.unwrap();

        assert!(sink.finished_segments().await.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_recorder_invalid_path_error() {
        let mut sink = RecorderSink::new("/nonexistent/directory/test.wav", Duration::ZERO);
        let result = sink.handle(&frame(vec![0.0; 2])).await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[tokio::test]
    async fn test_recorder_rejects_rate_change() {
        let dir = tempdir().unwrap();
        let mut sink = RecorderSink::new(dir.path(), Duration::ZERO);
        sink.handle(&frame(vec![0.1; 4])).await.unwrap();

        let other = AudioFrame::new(vec![0.1; 4], Duration::ZERO, 48000);
        let err = sink.handle(&other).await.unwrap_err();
        assert!(matches!(err, SinkError::WriteFailed { .. }));
        assert!(err.to_string().contains("48000"));

        sink.on_stop().await.unwrap();
        let segments = sink.finished_segments().await;
        assert_eq!(segments.len(), 1);
        let reader = hound::WavReader::open(&segments[0]).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn test_recorder_name() {
        let sink = RecorderSink::new("/path/to/audio.wav", Duration::ZERO);
        assert_eq!(sink.name(), "recorder:/path/to/audio.wav");
    }
}
