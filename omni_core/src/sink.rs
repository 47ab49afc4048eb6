//! Waveform capture.
//!
//! The engine hands over speech as a series of chunks, the last one flagged.
//! [`WaveformSink`] appends them in arrival order and writes the whole
//! utterance once the flagged chunk lands, then starts over empty.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::wav::{AudioWriter, WavFileWriter};

/// Output rate used unless the engine reports its own
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Error)]
#[error("failed to save waveform to {}: {source:#}", path.display())]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Buffer empty, waiting for the first chunk
    Idle,
    Accumulating,
}

/// What happened on a terminal chunk
#[derive(Debug)]
pub enum SinkEvent {
    Saved { path: PathBuf, samples: usize },
    /// The terminal chunk arrived with nothing buffered
    SkippedEmpty,
    Failed(PersistenceError),
}

pub struct WaveformSink {
    state: SinkState,
    buffer: Vec<f32>,
    output: PathBuf,
    sample_rate: u32,
    writer: Box<dyn AudioWriter>,
    events: Vec<SinkEvent>,
}

impl std::fmt::Debug for WaveformSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveformSink")
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("output", &self.output)
            .field("sample_rate", &self.sample_rate)
            .field("events", &self.events)
            .finish()
    }
}

impl WaveformSink {
    /// Sink writing WAV files to `output`
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self::with_writer(output, Box::new(WavFileWriter))
    }

    pub fn with_writer(output: impl Into<PathBuf>, writer: Box<dyn AudioWriter>) -> Self {
        Self {
            state: SinkState::Idle,
            buffer: Vec::new(),
            output: output.into(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            writer,
            events: Vec::new(),
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Accept one chunk. Always asks for more.
    pub fn on_chunk(&mut self, samples: &[f32], is_terminal: bool) -> bool {
        self.state = SinkState::Accumulating;
        self.buffer.extend_from_slice(samples);
        debug!(
            chunk = samples.len(),
            buffered = self.buffer.len(),
            is_terminal,
            "Waveform chunk"
        );
        if is_terminal {
            let event = self.persist();
            self.buffer.clear();
            self.state = SinkState::Idle;
            self.events.push(event);
        }
        true
    }

    /// Drop buffered samples without persisting them.
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.state = SinkState::Idle;
    }

    /// Take the events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<SinkEvent> {
        std::mem::take(&mut self.events)
    }

    fn persist(&self) -> SinkEvent {
        if self.buffer.is_empty() {
            info!("No waveform data, skip save.");
            return SinkEvent::SkippedEmpty;
        }
        match self
            .writer
            .save(&self.output, &self.buffer, self.sample_rate)
        {
            Ok(()) => {
                info!("Waveform saved to: {}", self.output.display());
                SinkEvent::Saved {
                    path: self.output.clone(),
                    samples: self.buffer.len(),
                }
            }
            Err(source) => {
                let err = PersistenceError {
                    path: self.output.clone(),
                    source,
                };
                warn!("{err}");
                SinkEvent::Failed(err)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every save instead of touching the filesystem.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingWriter {
        pub saves: Arc<Mutex<Vec<(PathBuf, Vec<f32>, u32)>>>,
        pub fail: bool,
    }

    impl AudioWriter for RecordingWriter {
        fn save(&self, path: &Path, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.saves
                .lock()
                .unwrap()
                .push((path.to_path_buf(), samples.to_vec(), sample_rate));
            Ok(())
        }
    }

    fn sink() -> (WaveformSink, RecordingWriter) {
        let writer = RecordingWriter::default();
        let sink = WaveformSink::with_writer("out.wav", Box::new(writer.clone()));
        (sink, writer)
    }

    #[test]
    fn test_starts_idle_and_empty() {
        let (sink, _) = sink();
        assert_eq!(sink.state(), SinkState::Idle);
        assert_eq!(sink.buffered(), 0);
        assert_eq!(sink.sample_rate(), DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_terminal_chunk_persists_concatenation_in_order() {
        let (mut sink, writer) = sink();
        assert!(sink.on_chunk(&[0.1, 0.2], false));
        assert_eq!(sink.state(), SinkState::Accumulating);
        assert!(sink.on_chunk(&[0.3], false));
        assert!(sink.on_chunk(&[0.4, 0.5], true));

        let saves = writer.saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1, vec![0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(saves[0].2, 24_000);
        assert_eq!(sink.buffered(), 0);
        assert_eq!(sink.state(), SinkState::Idle);
        assert!(matches!(
            sink.drain_events().as_slice(),
            [SinkEvent::Saved { samples: 5, .. }]
        ));
    }

    #[test]
    fn test_no_terminal_chunk_no_artifact() {
        let (mut sink, writer) = sink();
        sink.on_chunk(&[0.1], false);
        sink.on_chunk(&[], false);
        sink.on_chunk(&[0.2], false);
        assert!(writer.saves.lock().unwrap().is_empty());
        assert_eq!(sink.buffered(), 2);
        assert!(sink.drain_events().is_empty());
    }

    #[test]
    fn test_empty_terminal_skips_save() {
        let (mut sink, writer) = sink();
        sink.on_chunk(&[], true);
        assert!(writer.saves.lock().unwrap().is_empty());
        assert!(matches!(sink.drain_events().as_slice(), [SinkEvent::SkippedEmpty]));
        assert_eq!(sink.state(), SinkState::Idle);
    }

    #[test]
    fn test_failed_save_is_reported_and_buffer_cleared() {
        let writer = RecordingWriter {
            fail: true,
            ..Default::default()
        };
        let mut sink = WaveformSink::with_writer("/nope/out.wav", Box::new(writer));
        assert!(sink.on_chunk(&[0.1, 0.2], true));
        assert_eq!(sink.buffered(), 0);
        match sink.drain_events().as_slice() {
            [SinkEvent::Failed(err)] => {
                assert_eq!(err.path, PathBuf::from("/nope/out.wav"));
                assert!(err.to_string().contains("disk full"));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_each_terminal_writes_once_without_leaking_samples() {
        let (mut sink, writer) = sink();
        sink.set_sample_rate(16_000);
        sink.on_chunk(&[1.0], true);
        sink.on_chunk(&[2.0], false);
        sink.on_chunk(&[3.0], true);

        let saves = writer.saves.lock().unwrap();
        assert_eq!(saves.len(), 2);
        assert_eq!(saves[0].1, vec![1.0]);
        assert_eq!(saves[1].1, vec![2.0, 3.0]);
        assert_eq!(saves[1].2, 16_000);
    }
}
