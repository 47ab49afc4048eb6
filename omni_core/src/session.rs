//! One generation round-trip against an [`OmniEngine`].
//!
//! The session walks a fixed sequence: configure, load, generate, flush. The
//! speech decoder behind `flush_audio` reads the decoded-token counter, so it
//! only produces audio when `generate` decoded synchronously; a session that
//! never set `"async": false` refuses to flush instead of writing nothing.

use std::{
    fmt,
    io::Write,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use llm_core::{EngineContext, EngineError, LoadError, OmniEngine};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    prompt::Prompt,
    sink::{PersistenceError, SinkEvent, WaveformSink},
};

/// Named engine options, merge-applied before load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionConfig {
    options: Map<String, Value>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous decoding plus a scratch directory for mmap'd storage.
    pub fn synchronous(tmp_path: &str) -> Self {
        Self::new().set("async", false).set("tmp_path", tmp_path)
    }

    /// Set one option; a later value for the same name replaces the earlier one.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// Cap the number of speech tokens
    pub fn talker_max_new_tokens(self, n: usize) -> Self {
        self.set("talker_max_new_tokens", n)
    }

    pub fn speaker(self, name: &str) -> Self {
        self.set("talker_speaker", name)
    }

    pub fn merge(&mut self, other: &SessionConfig) {
        for (key, value) in &other.options {
            self.options.insert(key.clone(), value.clone());
        }
    }

    /// Only an explicit `"async": false` counts.
    pub fn is_synchronous(&self) -> bool {
        matches!(self.options.get("async"), Some(Value::Bool(false)))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Configuring,
    Loaded,
    /// `generate` returned; `flush_audio` is due
    Generated,
    Flushed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Configuring => "configuring",
            SessionState::Loaded => "loaded",
            SessionState::Generated => "generated",
            SessionState::Flushed => "flushed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("model load failed: {0}")]
    Load(#[from] LoadError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{op} is not allowed while the session is {state}")]
    OutOfOrder {
        op: &'static str,
        state: SessionState,
    },

    #[error("flush_audio requires synchronous decoding; set \"async\": false before load")]
    AsynchronousMode,

    #[error("waveform sink lock poisoned")]
    SinkPoisoned,
}

/// Outcome of the audio side of a generation
#[derive(Debug, Default)]
pub struct FlushReport {
    pub events: Vec<SinkEvent>,
}

impl FlushReport {
    /// Path and sample count of the last artifact written
    pub fn saved(&self) -> Option<(&Path, usize)> {
        self.events.iter().rev().find_map(|e| match e {
            SinkEvent::Saved { path, samples } => Some((path.as_path(), *samples)),
            _ => None,
        })
    }

    pub fn persistence_error(&self) -> Option<&PersistenceError> {
        self.events.iter().find_map(|e| match e {
            SinkEvent::Failed(err) => Some(err),
            _ => None,
        })
    }

    /// `false` when no terminal chunk ever arrived
    pub fn terminal_seen(&self) -> bool {
        !self.events.is_empty()
    }
}

pub struct GenerationSession {
    id: Uuid,
    engine: Box<dyn OmniEngine>,
    config: SessionConfig,
    sink: Arc<Mutex<WaveformSink>>,
    state: SessionState,
}

impl GenerationSession {
    /// Take ownership of `engine` and route its waveform chunks into `sink`.
    pub fn new(mut engine: Box<dyn OmniEngine>, sink: WaveformSink) -> Self {
        let sink = Arc::new(Mutex::new(sink));
        let sink_cb = Arc::clone(&sink);
        engine.set_waveform_callback(Box::new(move |samples: &[f32], is_last: bool| {
            match sink_cb.lock() {
                Ok(mut sink) => sink.on_chunk(samples, is_last),
                Err(_) => {
                    error!("Waveform sink lock poisoned, stopping audio delivery");
                    false
                }
            }
        }));

        Self {
            id: Uuid::new_v4(),
            engine,
            config: SessionConfig::default(),
            sink,
            state: SessionState::Configuring,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Merge options into the engine. Only before `load`.
    pub fn configure(&mut self, options: SessionConfig) -> Result<(), SessionError> {
        self.expect_state("configure", &[SessionState::Configuring])?;
        self.engine.set_config(options.options())?;
        self.config.merge(&options);
        Ok(())
    }

    pub fn load(&mut self) -> Result<(), SessionError> {
        self.expect_state("load", &[SessionState::Configuring])?;
        let span = info_span!("session", id = %self.id);
        let _enter = span.enter();

        if !self.config.is_synchronous() {
            warn!("Synchronous mode is not set; flush_audio will be refused and no speech saved");
        }
        self.engine.load()?;
        if let Some(rate) = self.engine.output_sample_rate() {
            self.lock_sink()?.set_sample_rate(rate);
        }
        self.state = SessionState::Loaded;
        info!("Model loaded");
        Ok(())
    }

    /// Decode a reply, streaming text into `text_sink`. Blocks until decoding ends.
    pub fn generate(&mut self, prompt: &Prompt, text_sink: &mut dyn Write) -> Result<(), SessionError> {
        self.expect_state("generate", &[SessionState::Loaded, SessionState::Flushed])?;
        let span = info_span!("session", id = %self.id);
        let _enter = span.enter();

        if let Err(e) = self.engine.response(prompt.as_str(), text_sink) {
            self.abandon_generation()?;
            return Err(e.into());
        }
        self.state = SessionState::Generated;
        let ctx = self.engine.context();
        info!(
            prompt_tokens = ctx.prompt_len,
            decode_tokens = ctx.gen_seq_len,
            "Generation finished"
        );
        Ok(())
    }

    /// Realize the speech of the last generation into the sink.
    pub fn flush_audio(&mut self) -> Result<FlushReport, SessionError> {
        if !self.config.is_synchronous() {
            return Err(SessionError::AsynchronousMode);
        }
        self.expect_state("flush_audio", &[SessionState::Generated])?;
        let span = info_span!("session", id = %self.id);
        let _enter = span.enter();

        if self.engine.context().gen_seq_len == 0 {
            warn!("No tokens were decoded; there is no speech to synthesize");
        }
        self.engine.generate_waveform()?;
        self.state = SessionState::Flushed;

        let events = self.lock_sink()?.drain_events();
        self.discard_partial_audio()?;
        let report = FlushReport { events };
        if !report.terminal_seen() {
            info!("No terminal waveform chunk; no audio file written");
        }
        Ok(report)
    }

    /// Counters of the last generation
    pub fn context(&self) -> Result<EngineContext, SessionError> {
        self.expect_state("context", &[SessionState::Generated, SessionState::Flushed])?;
        Ok(self.engine.context())
    }

    /// Samples currently held by the sink
    pub fn buffered_samples(&self) -> Result<usize, SessionError> {
        Ok(self.lock_sink()?.buffered())
    }

    fn expect_state(&self, op: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::OutOfOrder {
                op,
                state: self.state,
            })
        }
    }

    fn lock_sink(&self) -> Result<MutexGuard<'_, WaveformSink>, SessionError> {
        self.sink.lock().map_err(|_| SessionError::SinkPoisoned)
    }

    /// Forget everything a failed generation left in the sink, including
    /// events from terminal chunks it delivered before failing.
    fn abandon_generation(&self) -> Result<(), SessionError> {
        self.discard_partial_audio()?;
        let dropped = self.lock_sink()?.drain_events();
        if !dropped.is_empty() {
            warn!(
                "Dropping {} waveform event(s) from the failed generation",
                dropped.len()
            );
        }
        Ok(())
    }

    /// Drop samples that never saw a terminal chunk so they cannot leak into
    /// the next generation's file.
    fn discard_partial_audio(&self) -> Result<(), SessionError> {
        let mut sink = self.lock_sink()?;
        if sink.buffered() > 0 {
            warn!(
                "Discarding {} buffered samples that never received a terminal chunk",
                sink.buffered()
            );
            sink.discard();
        }
        Ok(())
    }
}
