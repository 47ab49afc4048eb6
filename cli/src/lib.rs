pub mod config;
pub mod error;

use std::{io::Write, time::Instant};

use omni_core::{FlushReport, GenerationSession, Prompt, StatsReport, WaveformSink};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::error::CliError;

/// What a finished run produced
#[derive(Debug)]
pub struct RunSummary {
    pub flush: FlushReport,
    pub stats: StatsReport,
}

/// Load the model, ask about the audio, save the spoken answer, print stats.
///
/// Generated text and the report go to `out`; diagnostics go through `tracing`.
pub fn run(config: &RunConfig, out: &mut dyn Write) -> Result<RunSummary, CliError> {
    writeln!(out, "Config : {}", config.config_path.display())?;
    writeln!(out, "Audio  : {}", config.audio_path)?;
    writeln!(out, "OutWav : {}", config.output.display())?;

    let engine = llm_core::create_engine(&config.config_path)?;
    let mut session = GenerationSession::new(engine, WaveformSink::new(&config.output));
    session.configure(config.session_config())?;

    let started = Instant::now();
    session.load()?;
    info!("Model loaded in {:.2}s", started.elapsed().as_secs_f64());

    let prompt = Prompt::build(&config.audio_path, &config.question);
    writeln!(out, "\n==== Prompt ====\n{prompt}\n================")?;

    session.generate(&prompt, out)?;
    let flush = session.flush_audio()?;
    match (flush.saved(), flush.persistence_error()) {
        (Some((path, samples)), _) => info!("Saved {samples} samples to {}", path.display()),
        (None, Some(err)) => warn!("No audio file written: {err}"),
        (None, None) => warn!("No speech was produced; {} not written", config.output.display()),
    }

    let stats = StatsReport::from(&session.context()?);
    writeln!(out, "\n\n{stats}")?;
    out.flush()?;

    Ok(RunSummary { flush, stats })
}
