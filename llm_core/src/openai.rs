//! OpenAI-compatible omni backend (`"backend": "openai"`).
//!
//! Talks to a chat-completions endpoint that accepts `input_audio` content and
//! streams `pcm16` speech back alongside the text, which is how omni models
//! are usually served. Text deltas go straight to the caller's writer. Audio
//! deltas are the speech tokens: they are held back and realized by
//! `generate_waveform`, except that full `stream_chunk_samples` windows are
//! handed out early as intermediate chunks.

use std::{
    io::{BufRead, BufReader, Write},
    time::{Duration, Instant},
};

use base64::Engine as _;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    audio::{read_audio_input, split_audio_tags},
    EngineConfig, EngineContext, EngineError, LoadError, OmniEngine, WaveformCallback,
    WaveformEmitter,
};

/// pcm16 speech from chat-completions endpoints is 24 kHz mono
pub const PCM16_SAMPLE_RATE: u32 = 24_000;

const DEFAULT_SPEAKER: &str = "Chelsie";

/// The `"openai"` section of the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key; empty disables auth
    pub api_key_env: String,
    /// Deliver an intermediate chunk every N samples; 0 holds everything for the flush
    pub stream_chunk_samples: usize,
    pub timeout_secs: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: String::new(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            stream_chunk_samples: 0,
            timeout_secs: 300,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: usize,
    stream: bool,
    stream_options: StreamOptions,
    modalities: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<AudioOutput<'a>>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    InputAudio { input_audio: InputAudio },
}

#[derive(Serialize)]
struct InputAudio {
    data: String,
    format: &'static str,
}

#[derive(Serialize)]
struct AudioOutput<'a> {
    voice: &'a str,
    format: &'static str,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    audio: Option<AudioDelta>,
}

#[derive(Deserialize)]
struct AudioDelta {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
}

#[derive(Deserialize, Clone, Copy)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

/// Per-response decoding state
#[derive(Default)]
struct StreamState {
    pending: Vec<f32>,
    odd_byte: Option<u8>,
    text_deltas: usize,
    usage: Option<Usage>,
    first_delta: Option<Duration>,
}

impl StreamState {
    /// Append little-endian pcm16 bytes as f32 samples.
    fn push_pcm16(&mut self, bytes: &[u8]) {
        let mut iter = bytes.iter().copied();
        if let Some(lo) = self.odd_byte.take() {
            match iter.next() {
                Some(hi) => self.pending.push(pcm16_to_f32(lo, hi)),
                None => {
                    self.odd_byte = Some(lo);
                    return;
                }
            }
        }
        loop {
            match (iter.next(), iter.next()) {
                (Some(lo), Some(hi)) => self.pending.push(pcm16_to_f32(lo, hi)),
                (Some(lo), None) => {
                    self.odd_byte = Some(lo);
                    break;
                }
                _ => break,
            }
        }
    }
}

fn pcm16_to_f32(lo: u8, hi: u8) -> f32 {
    i16::from_le_bytes([lo, hi]) as f32 / 32768.0
}

pub struct OpenAiOmniEngine {
    config: EngineConfig,
    settings: OpenAiSettings,
    client: Option<Client>,
    api_key: Option<String>,
    emitter: WaveformEmitter,
    context: EngineContext,
    pending: Vec<f32>,
}

impl OpenAiOmniEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            settings: OpenAiSettings::default(),
            client: None,
            api_key: None,
            emitter: WaveformEmitter::default(),
            context: EngineContext::default(),
            pending: Vec::new(),
        }
    }

    /// Read a server-sent-events body until `[DONE]` or EOF.
    fn consume_stream<R: BufRead>(
        &mut self,
        reader: R,
        out: &mut dyn Write,
        started: Instant,
    ) -> Result<StreamState, EngineError> {
        let mut state = StreamState::default();
        let chunk_samples = self.settings.stream_chunk_samples;

        for line in reader.lines() {
            let line = line.map_err(|e| EngineError::Stream(e.to_string()))?;
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                break;
            }
            if data.is_empty() {
                continue;
            }
            let chunk: ChatChunk = serde_json::from_str(data)
                .map_err(|e| EngineError::Stream(format!("bad event payload: {e}")))?;

            if let Some(usage) = chunk.usage {
                state.usage = Some(usage);
            }
            for choice in chunk.choices {
                if state.first_delta.is_none() {
                    state.first_delta = Some(started.elapsed());
                }
                let delta = choice.delta;
                let mut text = delta.content.unwrap_or_default();
                if let Some(audio) = delta.audio {
                    if let Some(transcript) = audio.transcript {
                        text.push_str(&transcript);
                    }
                    if let Some(b64) = audio.data {
                        let bytes = base64::engine::general_purpose::STANDARD
                            .decode(b64.as_bytes())
                            .map_err(|e| EngineError::Stream(format!("bad audio data: {e}")))?;
                        state.push_pcm16(&bytes);
                    }
                }
                if !text.is_empty() {
                    out.write_all(text.as_bytes())?;
                    out.flush()?;
                    state.text_deltas += 1;
                }
                if chunk_samples > 0 {
                    while state.pending.len() >= chunk_samples {
                        let window: Vec<f32> = state.pending.drain(..chunk_samples).collect();
                        self.emitter.emit(&window, false);
                    }
                }
            }
        }
        Ok(state)
    }
}

impl OmniEngine for OpenAiOmniEngine {
    fn set_config(&mut self, options: &Map<String, Value>) -> Result<(), EngineError> {
        self.config.merge(options);
        Ok(())
    }

    fn load(&mut self) -> Result<(), LoadError> {
        self.settings = match self.config.section("openai") {
            Some(section) => serde_json::from_value(Value::Object(section.clone())).map_err(
                |e| LoadError::InvalidOption {
                    key: "openai".into(),
                    reason: e.to_string(),
                },
            )?,
            None => OpenAiSettings::default(),
        };
        if self.settings.model.trim().is_empty() {
            return Err(LoadError::InvalidOption {
                key: "openai.model".into(),
                reason: "a model name is required".into(),
            });
        }
        if self.config.is_async() {
            warn!("The openai backend always decodes synchronously; 'async' is ignored");
        }
        self.config.prepare_scratch()?;
        self.config.check_assets(&["llm_model", "talker_model"])?;

        self.api_key = if self.settings.api_key_env.is_empty() {
            None
        } else {
            let key = std::env::var(&self.settings.api_key_env)
                .map_err(|_| LoadError::MissingApiKey(self.settings.api_key_env.clone()))?;
            Some(key)
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .build()
            .map_err(|e| LoadError::InvalidOption {
                key: "openai".into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        self.client = Some(client);
        info!(
            "OpenAI-compatible backend ready: {} ({})",
            self.settings.model, self.settings.base_url
        );
        Ok(())
    }

    fn set_waveform_callback(&mut self, callback: WaveformCallback) {
        self.emitter.set(callback);
    }

    fn response(&mut self, prompt: &str, out: &mut dyn Write) -> Result<(), EngineError> {
        let client = self.client.clone().ok_or(EngineError::NotLoaded)?;
        self.context = EngineContext::default();
        self.emitter.reset();
        self.pending.clear();

        let tagged = split_audio_tags(prompt);
        let mut content = Vec::with_capacity(tagged.audio.len() + 1);
        for path in &tagged.audio {
            let input = read_audio_input(path)?;
            self.context.audio_input_s += input.seconds;
            content.push(ContentPart::InputAudio {
                input_audio: InputAudio {
                    data: base64::engine::general_purpose::STANDARD.encode(&input.bytes),
                    format: "wav",
                },
            });
        }
        if !tagged.text.is_empty() {
            content.push(ContentPart::Text { text: &tagged.text });
        }

        let speech = self.config.speech_output();
        let voice = self.config.talker_speaker().unwrap_or(DEFAULT_SPEAKER);
        if let Some(cap) = self.config.talker_max_new_tokens() {
            debug!("talker_max_new_tokens={cap} is not supported by this backend");
        }
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![Message {
                role: "user",
                content,
            }],
            max_tokens: self.config.max_new_tokens(),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            modalities: if speech {
                vec!["text", "audio"]
            } else {
                vec!["text"]
            },
            audio: speech.then_some(AudioOutput {
                voice,
                format: "pcm16",
            }),
        };

        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let mut request = client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let started = Instant::now();
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EngineError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let state = self.consume_stream(BufReader::new(response), out, started)?;
        self.context.audio_us = state
            .first_delta
            .unwrap_or_else(|| started.elapsed())
            .as_micros() as u64;
        match state.usage {
            Some(usage) => {
                self.context.prompt_len = usage.prompt_tokens;
                self.context.gen_seq_len = usage.completion_tokens;
            }
            None => {
                self.context.prompt_len = tagged.text.split_whitespace().count();
                self.context.gen_seq_len = state.text_deltas;
            }
        }
        self.pending = state.pending;
        Ok(())
    }

    fn generate_waveform(&mut self) -> Result<(), EngineError> {
        if self.client.is_none() {
            return Err(EngineError::NotLoaded);
        }
        if self.context.gen_seq_len == 0 {
            debug!("No decoded tokens, nothing to synthesize");
            return Ok(());
        }
        let tail = std::mem::take(&mut self.pending);
        self.emitter.emit(&tail, true);
        Ok(())
    }

    fn context(&self) -> EngineContext {
        self.context
    }

    fn output_sample_rate(&self) -> Option<u32> {
        Some(PCM16_SAMPLE_RATE)
    }
}
