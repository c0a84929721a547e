use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use super::backend::AudioFrame;

fn wav_spec(sample_rate: u32, channels: u16) -> hound::WavSpec {
    hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode interleaved samples into an in-memory WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(sample_rate, channels))
            .context("Failed to start WAV encoder")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }
    Ok(cursor.into_inner())
}

pub(crate) fn duration_of(sample_count: usize, sample_rate: u32, channels: u16) -> Duration {
    let per_second = sample_rate as u64 * channels.max(1) as u64;
    if per_second == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(sample_count as u64 * 1000 / per_second)
}

/// Streams the whole session to a WAV file on disk.
///
/// The file is created lazily from the first frame's format.
pub(crate) struct SessionWriter {
    file_path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    sample_rate: u32,
    channels: u16,
    sample_count: usize,
}

impl SessionWriter {
    pub(crate) fn new(file_path: PathBuf) -> Self {
        Self {
            file_path,
            writer: None,
            sample_rate: 0,
            channels: 0,
            sample_count: 0,
        }
    }

    pub(crate) fn write_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        if self.writer.is_none() {
            let writer = hound::WavWriter::create(
                &self.file_path,
                wav_spec(frame.sample_rate, frame.channels),
            )
            .with_context(|| format!("Failed to create WAV file: {:?}", self.file_path))?;
            self.writer = Some(writer);
            self.sample_rate = frame.sample_rate;
            self.channels = frame.channels;
        }

        if frame.sample_rate != self.sample_rate || frame.channels != self.channels {
            warn!(
                "Dropping frame with format {}Hz/{}ch (session is {}Hz/{}ch)",
                frame.sample_rate, frame.channels, self.sample_rate, self.channels
            );
            return Ok(());
        }

        if let Some(writer) = &mut self.writer {
            let mut samples = writer.get_i16_writer(frame.samples.len() as u32);
            for &sample in &frame.samples {
                samples.write_sample(sample);
            }
            samples.flush().context("Failed to write samples to WAV")?;
            self.sample_count += frame.samples.len();
        }

        Ok(())
    }

    pub(crate) fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Flush the file and report what was written. `None` when no audio
    /// ever arrived.
    pub(crate) fn finish(mut self) -> Result<Option<WrittenAudio>> {
        let Some(writer) = self.writer.take() else {
            return Ok(None);
        };
        writer.finalize().context("Failed to finalize WAV file")?;

        Ok(Some(WrittenAudio {
            path: self.file_path.clone(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_count: self.sample_count,
        }))
    }
}

impl Drop for SessionWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}

pub(crate) struct WrittenAudio {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_wav_reads_back() {
        let bytes = encode_wav(&[1, -1, 2, -2], 16000, 1).unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn duration_accounts_for_channels() {
        assert_eq!(duration_of(32000, 16000, 2), Duration::from_secs(1));
        assert_eq!(duration_of(8000, 16000, 1), Duration::from_millis(500));
    }
}
