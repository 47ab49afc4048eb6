//! Audio references embedded in prompts.
//!
//! Prompts carry audio as `<audio>path</audio>` tags. Backends pull the tags
//! out, keep the remaining text as the instruction, and read each referenced
//! WAV to learn how many seconds of audio the request carries.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::EngineError;

const OPEN_TAG: &str = "<audio>";
const CLOSE_TAG: &str = "</audio>";

/// A prompt split into its audio references and the text around them.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedPrompt {
    pub audio: Vec<PathBuf>,
    pub text: String,
}

/// Split `<audio>...</audio>` references out of a prompt.
///
/// An unterminated tag is kept as plain text.
pub fn split_audio_tags(prompt: &str) -> TaggedPrompt {
    let mut audio = Vec::new();
    let mut text = String::with_capacity(prompt.len());
    let mut rest = prompt;

    while let Some(start) = rest.find(OPEN_TAG) {
        let after_open = &rest[start + OPEN_TAG.len()..];
        match after_open.find(CLOSE_TAG) {
            Some(end) => {
                text.push_str(&rest[..start]);
                let path = after_open[..end].trim();
                if !path.is_empty() {
                    audio.push(PathBuf::from(path));
                }
                rest = &after_open[end + CLOSE_TAG.len()..];
            }
            None => break,
        }
    }
    text.push_str(rest);

    TaggedPrompt { audio, text }
}

/// An audio input read from disk.
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub seconds: f32,
}

/// Read a WAV file and compute its duration.
pub fn read_audio_input<P: AsRef<Path>>(p: P) -> Result<AudioInput, EngineError> {
    let path = p.as_ref();
    let bytes = fs::read(path).map_err(|e| EngineError::Audio {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let reader = hound::WavReader::new(std::io::Cursor::new(&bytes)).map_err(|e| {
        EngineError::Audio {
            path: path.to_path_buf(),
            reason: format!("not a readable WAV file: {e}"),
        }
    })?;
    let spec = reader.spec();
    let seconds = if spec.sample_rate == 0 {
        0.0
    } else {
        reader.duration() as f32 / spec.sample_rate as f32
    };

    Ok(AudioInput {
        path: path.to_path_buf(),
        bytes,
        seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_single_tag() {
        let tagged = split_audio_tags("<audio>a/b.wav</audio>what is said?");
        assert_eq!(tagged.audio, vec![PathBuf::from("a/b.wav")]);
        assert_eq!(tagged.text, "what is said?");
    }

    #[test]
    fn test_split_multiple_tags_and_surrounding_text() {
        let tagged = split_audio_tags("compare <audio>x.wav</audio> and <audio>y.wav</audio>.");
        assert_eq!(tagged.audio, vec![PathBuf::from("x.wav"), PathBuf::from("y.wav")]);
        assert_eq!(tagged.text, "compare  and .");
    }

    #[test]
    fn test_unterminated_tag_is_text() {
        let tagged = split_audio_tags("<audio>x.wav");
        assert!(tagged.audio.is_empty());
        assert_eq!(tagged.text, "<audio>x.wav");
    }

    #[test]
    fn test_read_audio_input_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..8000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let input = read_audio_input(&path).unwrap();
        assert!((input.seconds - 0.5).abs() < 1e-6);
        assert!(!input.bytes.is_empty());
    }

    #[test]
    fn test_read_audio_input_missing_file() {
        let err = read_audio_input("/definitely/not/here.wav").unwrap_err();
        assert!(matches!(err, EngineError::Audio { .. }));
    }
}
