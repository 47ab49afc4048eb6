//! Coordinates one omni round-trip: build an audio prompt, decode a reply
//! through an [`llm_core::OmniEngine`], capture the streamed speech into a
//! WAV file and summarize the engine's counters.

pub mod prompt;
pub mod session;
pub mod sink;
pub mod stats;
pub mod wav;

pub use prompt::{Prompt, DEFAULT_INSTRUCTION};
pub use session::{FlushReport, GenerationSession, SessionConfig, SessionError, SessionState};
pub use sink::{PersistenceError, SinkEvent, SinkState, WaveformSink, DEFAULT_SAMPLE_RATE};
pub use stats::StatsReport;
pub use wav::{AudioWriter, WavFileWriter};
