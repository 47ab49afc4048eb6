pub mod audio;
pub mod config;
pub mod mock;
pub mod openai;

use std::{io::Write, path::Path, path::PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

pub use config::EngineConfig;
pub use mock::MockEngine;
pub use openai::OpenAiOmniEngine;

/// Receives waveform chunks: `(samples, is_last)`. Returning `false` asks the
/// engine to stop delivering chunks for the rest of the current generation.
pub type WaveformCallback = Box<dyn FnMut(&[f32], bool) -> bool + Send>;

/// Counters an engine exposes after a generation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineContext {
    /// Tokens in the prompt, audio placeholders included
    pub prompt_len: usize,
    /// Text tokens decoded by the last `response`
    pub gen_seq_len: usize,
    /// Seconds of audio carried by the prompt
    pub audio_input_s: f32,
    /// Microseconds spent processing the audio input
    pub audio_us: u64,
}

/// Errors raised while creating or loading an engine
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config {} is not valid JSON: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("unknown backend '{0}' (expected 'openai' or 'mock')")]
    UnknownBackend(String),

    #[error("missing model file for '{key}': {}", path.display())]
    MissingAsset { key: String, path: PathBuf },

    #[error("speech output requested but no speech decoder (talker) is configured")]
    MissingTalker,

    #[error("use_mmap/kvcache_mmap require a tmp_path")]
    ScratchPathRequired,

    #[error("failed to create scratch directory {}: {source}", path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("environment variable {0} is not set")]
    MissingApiKey(String),
}

/// Errors raised while generating
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not loaded")]
    NotLoaded,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("audio input {}: {reason}", path.display())]
    Audio { path: PathBuf, reason: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed stream: {0}")]
    Stream(String),

    #[error("failed to write generated text: {0}")]
    Output(#[from] std::io::Error),
}

/// A multimodal (text + speech) generation engine.
///
/// Callers drive one generation at a time: `load`, then `response` (blocks
/// until text decoding finishes), then `generate_waveform` to turn the speech
/// produced alongside the text into waveform chunks. Chunks reach the
/// registered callback only from inside those two calls.
pub trait OmniEngine: Send {
    /// Merge options into the engine configuration. Must precede `load`.
    fn set_config(&mut self, options: &Map<String, Value>) -> Result<(), EngineError>;

    fn load(&mut self) -> Result<(), LoadError>;

    fn set_waveform_callback(&mut self, callback: WaveformCallback);

    /// Decode a reply to `prompt`, streaming text to `out`.
    fn response(&mut self, prompt: &str, out: &mut dyn Write) -> Result<(), EngineError>;

    /// Deliver the remaining speech of the last response, last chunk flagged.
    /// Does nothing when the last response decoded no tokens.
    fn generate_waveform(&mut self) -> Result<(), EngineError>;

    fn context(&self) -> EngineContext;

    /// Sample rate of delivered waveform chunks, when the engine knows it.
    fn output_sample_rate(&self) -> Option<u32> {
        None
    }
}

/// Create the engine named by the config file's `backend` key.
pub fn create_engine<P: AsRef<Path>>(config_path: P) -> Result<Box<dyn OmniEngine>, LoadError> {
    let config = EngineConfig::from_path(config_path.as_ref())?;
    let backend = config.backend().to_string();
    info!(
        "Creating '{backend}' engine from {}",
        config_path.as_ref().display()
    );
    match backend.as_str() {
        "mock" => Ok(Box::new(MockEngine::new(config))),
        "openai" => Ok(Box::new(OpenAiOmniEngine::new(config))),
        other => Err(LoadError::UnknownBackend(other.to_string())),
    }
}

/// Wraps the user callback and remembers an early-stop request.
#[derive(Default)]
pub(crate) struct WaveformEmitter {
    callback: Option<WaveformCallback>,
    stopped: bool,
}

impl WaveformEmitter {
    pub(crate) fn set(&mut self, callback: WaveformCallback) {
        self.callback = Some(callback);
    }

    /// Re-arm for a new generation.
    pub(crate) fn reset(&mut self) {
        self.stopped = false;
    }

    pub(crate) fn emit(&mut self, samples: &[f32], last: bool) {
        if self.stopped {
            return;
        }
        if let Some(cb) = self.callback.as_mut() {
            if !cb(samples, last) {
                debug!("Waveform consumer requested stop");
                self.stopped = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_emitter_stops_after_false() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let mut emitter = WaveformEmitter::default();
        emitter.set(Box::new(move |samples: &[f32], last: bool| {
            seen_cb.lock().unwrap().push((samples.len(), last));
            false
        }));

        emitter.emit(&[0.0; 3], false);
        emitter.emit(&[0.0; 2], true);
        assert_eq!(*seen.lock().unwrap(), vec![(3, false)]);

        emitter.reset();
        emitter.emit(&[0.0; 1], true);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_create_engine_unknown_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"backend": "tflite"}"#).unwrap();
        assert!(matches!(
            create_engine(&path),
            Err(LoadError::UnknownBackend(b)) if b == "tflite"
        ));
    }

    #[test]
    fn test_create_engine_missing_config() {
        assert!(matches!(
            create_engine("/no/such/dir/config.json"),
            Err(LoadError::ConfigRead { .. })
        ));
    }
}
