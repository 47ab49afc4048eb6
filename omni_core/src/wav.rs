use std::path::Path;

use anyhow::Context;

/// Persists a finished waveform.
pub trait AudioWriter: Send {
    fn save(&self, path: &Path, samples: &[f32], sample_rate: u32) -> anyhow::Result<()>;
}

/// Writes mono 16-bit PCM WAV files.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavFileWriter;

impl AudioWriter for WavFileWriter {
    fn save(&self, path: &Path, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        const I16_MAX_F32: f32 = i16::MAX as f32;
        for &s in samples {
            // Clamp and convert f32 [-1.0, 1.0] -> i16
            let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
        }
        writer
            .finalize()
            .with_context(|| format!("Failed to finalize {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_readable_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        WavFileWriter
            .save(&path, &[0.0, 0.5, -0.5, 2.0], 24_000)
            .unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 24_000);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 16383, -16383, i16::MAX]);
    }

    #[test]
    fn test_unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.wav");
        assert!(WavFileWriter.save(&path, &[0.0], 24_000).is_err());
    }
}
