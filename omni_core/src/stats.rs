// Post-generation statistics

use std::fmt;

use llm_core::EngineContext;

/// Figures read from the engine once a session has finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    pub prompt_tokens: usize,
    pub decode_tokens: usize,
    pub audio_input_s: f32,
    pub audio_proc_s: f64,
    /// Processing seconds per second of input audio; absent without input audio
    pub rtf: Option<f64>,
}

impl From<&EngineContext> for StatsReport {
    fn from(ctx: &EngineContext) -> Self {
        let audio_proc_s = ctx.audio_us as f64 / 1e6;
        let rtf = if ctx.audio_input_s > 0.0 {
            Some(audio_proc_s / ctx.audio_input_s as f64)
        } else {
            None
        };
        Self {
            prompt_tokens: ctx.prompt_len,
            decode_tokens: ctx.gen_seq_len,
            audio_input_s: ctx.audio_input_s,
            audio_proc_s,
            rtf,
        }
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== Stats =====")?;
        writeln!(f, "Prompt tokens : {}", self.prompt_tokens)?;
        writeln!(f, "Decode tokens : {}", self.decode_tokens)?;
        writeln!(f, "Audio input s : {}", self.audio_input_s)?;
        writeln!(f, "Audio proc  s : {}", self.audio_proc_s)?;
        if let Some(rtf) = self.rtf {
            writeln!(f, "Audio RTF     : {rtf}")?;
        }
        write!(f, "=================")
    }
}
