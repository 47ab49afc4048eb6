//! End-to-end runs of the `omni-audio` binary against the mock backend

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_omni-audio");

/// Model directory with a mock config, a talker asset and a 1 s input clip.
fn workspace(config: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("model")).unwrap();
    fs::write(dir.path().join("model/config.json"), config).unwrap();
    fs::write(dir.path().join("model/talker.mnn"), b"").unwrap();

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(dir.path().join("in.wav"), spec).unwrap();
    for i in 0..16_000 {
        writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
    }
    writer.finalize().unwrap();
    dir
}

const MOCK_CONFIG: &str = r#"{
    "backend": "mock",
    "talker_model": "talker.mnn",
    "mock": {"reply": "the clip is a short tone", "samples_per_token": 240, "chunk_tokens": 2}
}"#;

fn run_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(BIN)
        .args(args)
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

#[test]
fn test_missing_arguments_prints_usage_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_in(dir.path(), &["only-config.json"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage"));
    assert!(!dir.path().join("output.wav").exists());
}

#[test]
fn test_default_output_path() {
    let dir = workspace(MOCK_CONFIG);
    let output = run_in(dir.path(), &["model/config.json", "in.wav"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let wav = dir.path().join("output.wav");
    assert!(wav.exists());
    let reader = hound::WavReader::open(&wav).unwrap();
    assert_eq!(reader.spec().sample_rate, 24_000);
    // six decoded tokens, one speech block each
    assert_eq!(reader.duration(), 6 * 240);
    assert!(dir.path().join("tmp").is_dir());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("OutWav : output.wav"));
    assert!(stdout.contains("<audio>in.wav</audio>summarize this audio"));
    assert!(stdout.contains("the clip is a short tone"));
    assert!(stdout.contains("Decode tokens : 6"));
    assert!(stdout.contains("Audio input s : 1"));
    assert!(stdout.contains("Audio RTF"));
}

#[test]
fn test_explicit_output_and_question() {
    let dir = workspace(MOCK_CONFIG);
    let output = run_in(
        dir.path(),
        &["model/config.json", "in.wav", "answer.wav", "what", "do", "you", "hear?"],
    );
    assert_eq!(output.status.code(), Some(0));
    assert!(dir.path().join("answer.wav").exists());
    assert!(!dir.path().join("output.wav").exists());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("<audio>in.wav</audio>what do you hear?"));
}

#[test]
fn test_invalid_config_exits_one_without_artifact() {
    let dir = workspace(MOCK_CONFIG);
    let output = run_in(dir.path(), &["model/missing.json", "in.wav"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("output.wav").exists());
}

#[test]
fn test_missing_talker_fails_load() {
    let dir = workspace(r#"{"backend": "mock", "talker_model": "gone.mnn"}"#);
    let output = run_in(dir.path(), &["model/config.json", "in.wav"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("gone.mnn"));
    assert!(!dir.path().join("output.wav").exists());
}

#[test]
fn test_zero_decoded_tokens_writes_nothing() {
    let dir = workspace(r#"{"backend": "mock", "talker_model": "talker.mnn", "max_new_tokens": 0}"#);
    let output = run_in(dir.path(), &["model/config.json", "in.wav"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(!dir.path().join("output.wav").exists());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Decode tokens : 0"));
}

#[test]
fn test_async_override_is_refused() {
    let dir = workspace(MOCK_CONFIG);
    let output = run_in(dir.path(), &["--set", "async=true", "model/config.json", "in.wav"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("synchronous"));
    assert!(!dir.path().join("output.wav").exists());
}
