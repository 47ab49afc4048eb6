use llm_core::LoadError;
use omni_core::SessionError;
use thiserror::Error;

/// Errors surfaced by the `omni-audio` binary
#[derive(Debug, Error)]
pub enum CliError {
    /// Fewer than the two required positionals; usage is printed instead
    #[error("missing arguments: <config.json> and <audio.wav> are required")]
    Usage,

    #[error("model load failed, please check your omni model files: {0}")]
    Load(#[from] LoadError),

    #[error("generation failed: {0}")]
    Session(SessionError),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SessionError> for CliError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Load(load) => CliError::Load(load),
            other => CliError::Session(other),
        }
    }
}

impl CliError {
    /// Missing arguments are not a failure; everything else is.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage => 0,
            _ => 1,
        }
    }
}
