//! Scripted engine (`"backend": "mock"`).
//!
//! Replies with a fixed text and renders a sine tone as its "speech", one
//! block of samples per decoded token. Deterministic, offline, and faithful to
//! the engine contract, including the asynchronous-mode behavior where
//! decoding has not happened yet when `response` returns.

use std::{io::Write, time::Instant};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::{
    audio::{read_audio_input, split_audio_tags},
    EngineConfig, EngineContext, EngineError, LoadError, OmniEngine, WaveformCallback,
    WaveformEmitter,
};

/// Audio placeholder tokens per second of input audio
const AUDIO_TOKENS_PER_SECOND: f32 = 25.0;

/// The `"mock"` section of the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockScript {
    pub reply: String,
    pub samples_per_token: usize,
    /// Deliver an intermediate chunk every N speech tokens; 0 holds everything for the flush
    pub chunk_tokens: usize,
    pub tone_hz: f32,
    pub sample_rate: u32,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            reply: "This is a scripted reply.".to_string(),
            samples_per_token: 480,
            chunk_tokens: 0,
            tone_hz: 220.0,
            sample_rate: 24_000,
        }
    }
}

pub struct MockEngine {
    config: EngineConfig,
    script: MockScript,
    loaded: bool,
    emitter: WaveformEmitter,
    context: EngineContext,
    /// Speech tokens decoded but not yet turned into samples
    pending_speech: usize,
    speech_tokens: usize,
    phase: u64,
}

impl MockEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            script: MockScript::default(),
            loaded: false,
            emitter: WaveformEmitter::default(),
            context: EngineContext::default(),
            pending_speech: 0,
            speech_tokens: 0,
            phase: 0,
        }
    }

    fn render(&mut self, tokens: usize) -> Vec<f32> {
        let n = tokens * self.script.samples_per_token;
        let step = std::f32::consts::TAU * self.script.tone_hz / self.script.sample_rate as f32;
        let samples = (0..n as u64)
            .map(|i| 0.3 * ((self.phase + i) as f32 * step).sin())
            .collect();
        self.phase += n as u64;
        samples
    }

    fn speech_budget_left(&self) -> bool {
        self.config
            .talker_max_new_tokens()
            .map_or(true, |cap| self.speech_tokens < cap)
    }
}

impl OmniEngine for MockEngine {
    fn set_config(&mut self, options: &Map<String, Value>) -> Result<(), EngineError> {
        self.config.merge(options);
        Ok(())
    }

    fn load(&mut self) -> Result<(), LoadError> {
        self.script = match self.config.section("mock") {
            Some(section) => serde_json::from_value(Value::Object(section.clone())).map_err(
                |e| LoadError::InvalidOption {
                    key: "mock".into(),
                    reason: e.to_string(),
                },
            )?,
            None => MockScript::default(),
        };
        if self.script.sample_rate == 0 {
            return Err(LoadError::InvalidOption {
                key: "mock.sample_rate".into(),
                reason: "must be positive".into(),
            });
        }

        self.config.prepare_scratch()?;
        self.config.check_assets(&["llm_model", "talker_model"])?;
        if self.config.speech_output() && self.config.asset_path("talker_model").is_none() {
            return Err(LoadError::MissingTalker);
        }

        info!(
            speaker = self.config.talker_speaker().unwrap_or("default"),
            "Mock engine loaded"
        );
        self.loaded = true;
        Ok(())
    }

    fn set_waveform_callback(&mut self, callback: WaveformCallback) {
        self.emitter.set(callback);
    }

    fn response(&mut self, prompt: &str, out: &mut dyn Write) -> Result<(), EngineError> {
        if !self.loaded {
            return Err(EngineError::NotLoaded);
        }
        self.context = EngineContext::default();
        self.emitter.reset();
        self.pending_speech = 0;
        self.speech_tokens = 0;

        let tagged = split_audio_tags(prompt);
        let started = Instant::now();
        let mut audio_tokens = 0usize;
        for path in &tagged.audio {
            let input = read_audio_input(path)?;
            self.context.audio_input_s += input.seconds;
            audio_tokens += (input.seconds * AUDIO_TOKENS_PER_SECOND).ceil() as usize;
        }
        self.context.audio_us = started.elapsed().as_micros() as u64;
        self.context.prompt_len = tagged.text.split_whitespace().count() + audio_tokens;

        if self.config.is_async() {
            debug!("Async mode: decoding deferred past response()");
            return Ok(());
        }

        let reply = self.script.reply.clone();
        let speech = self.config.speech_output();
        for (i, token) in reply
            .split_whitespace()
            .take(self.config.max_new_tokens())
            .enumerate()
        {
            if i > 0 {
                out.write_all(b" ")?;
            }
            out.write_all(token.as_bytes())?;
            out.flush()?;
            self.context.gen_seq_len += 1;

            if speech && self.speech_budget_left() {
                self.speech_tokens += 1;
                self.pending_speech += 1;
                if self.script.chunk_tokens > 0 && self.pending_speech >= self.script.chunk_tokens {
                    let chunk = self.render(self.pending_speech);
                    self.pending_speech = 0;
                    self.emitter.emit(&chunk, false);
                }
            }
        }
        Ok(())
    }

    fn generate_waveform(&mut self) -> Result<(), EngineError> {
        if !self.loaded {
            return Err(EngineError::NotLoaded);
        }
        if self.context.gen_seq_len == 0 || !self.config.speech_output() {
            debug!("No decoded tokens, nothing to synthesize");
            return Ok(());
        }
        let tail = self.render(self.pending_speech);
        self.pending_speech = 0;
        self.emitter.emit(&tail, true);
        Ok(())
    }

    fn context(&self) -> EngineContext {
        self.context
    }

    fn output_sample_rate(&self) -> Option<u32> {
        Some(self.script.sample_rate)
    }
}
