// Command-line surface and the run configuration derived from it

use std::path::PathBuf;

use clap::Parser;
use omni_core::SessionConfig;
use serde_json::Value;

use crate::error::CliError;

pub const DEFAULT_OUTPUT: &str = "output.wav";
pub const DEFAULT_TMP_PATH: &str = "tmp";

#[derive(Debug, Parser)]
#[command(name = "omni-audio")]
#[command(about = "Ask an omni model about an audio clip and save its spoken answer")]
#[command(
    after_help = "Example:\n  omni-audio models/qwen2.5-omni/config.json input.wav output.wav \"Translate and briefly summarize\""
)]
pub struct Cli {
    /// Model config.json
    #[arg(value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Input audio (WAV)
    #[arg(value_name = "AUDIO")]
    pub audio: Option<String>,

    /// Where to write the spoken answer
    #[arg(value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Question about the audio; remaining words are joined with spaces
    #[arg(value_name = "QUESTION", trailing_var_arg = true, allow_hyphen_values = true)]
    pub question: Vec<String>,

    /// Scratch directory for memory-mapped weights and kv cache
    #[arg(long, default_value = DEFAULT_TMP_PATH)]
    pub tmp_path: String,

    /// Speaker voice for the speech decoder
    #[arg(long)]
    pub speaker: Option<String>,

    /// Cap on generated speech tokens
    #[arg(long)]
    pub talker_max_new_tokens: Option<usize>,

    /// Extra engine option, passed through untouched (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_option)]
    pub overrides: Vec<(String, Value)>,
}

/// Parse `key=value`; the value is read as JSON when it parses, else as a string.
fn parse_option(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty option name in '{s}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub config_path: PathBuf,
    pub audio_path: String,
    pub output: PathBuf,
    pub question: String,
    pub tmp_path: String,
    pub speaker: Option<String>,
    pub talker_max_new_tokens: Option<usize>,
    pub overrides: Vec<(String, Value)>,
}

impl TryFrom<Cli> for RunConfig {
    type Error = CliError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let (Some(config_path), Some(audio_path)) = (cli.config, cli.audio) else {
            return Err(CliError::Usage);
        };
        Ok(Self {
            config_path,
            audio_path,
            output: cli.output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            question: cli.question.join(" "),
            tmp_path: cli.tmp_path,
            speaker: cli.speaker,
            talker_max_new_tokens: cli.talker_max_new_tokens,
            overrides: cli.overrides,
        })
    }
}

impl RunConfig {
    /// Synchronous decoding and the scratch path first, then the optional
    /// speech settings, then `--set` overrides in command-line order.
    pub fn session_config(&self) -> SessionConfig {
        let mut cfg = SessionConfig::synchronous(&self.tmp_path);
        if let Some(n) = self.talker_max_new_tokens {
            cfg = cfg.talker_max_new_tokens(n);
        }
        if let Some(speaker) = &self.speaker {
            cfg = cfg.speaker(speaker);
        }
        for (key, value) in &self.overrides {
            cfg = cfg.set(key, value.clone());
        }
        cfg
    }
}
