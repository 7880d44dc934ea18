use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use transcribe_core::{SegmentProgress, TranscriptSegment, TranscriptionEngine, TranscriptionError, TranscriptionOutcome};

/// Shells out to an external transcription program, one process per job,
/// and streams its newline-delimited JSON stdout as segment progress.
///
/// The Transcription Engine (component C) is explicitly out of scope for
/// this crate — modelled only by its streaming result contract, with no
/// in-process inference code. This adapter is the thinnest possible
/// concrete `TranscriptionEngine`: it treats the real
/// model (whisper.cpp, faster-whisper, a hosted API — whatever the
/// operator points `TRANSCRIPTION_ENGINE_COMMAND` at) as an external
/// collaborator reached over a process boundary, mirroring how
/// `transcribe-object-store` treats the object store as reached over a
/// network boundary. No model-loading, GPU selection, or inference code
/// lives in this crate.
///
/// Wire protocol (one JSON object per line on stdout):
/// `{"type":"segment","start":0.0,"end":1.2,"text":"..."}` zero or more,
/// followed by exactly one
/// `{"type":"done","language":"en","duration_sec":248,"model_version":"whisper-medium"}`.
/// A non-zero exit before a `done` line, or output that doesn't parse, is
/// treated as a retryable engine error — most real failures here are
/// process crashes or OOMs, not a property of the specific media file.
pub struct CliTranscriptionEngine {
    program: String,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl CliTranscriptionEngine {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>, timeout: Duration) -> Self {
        Self { program: program.into(), extra_args, timeout }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EngineLine {
    Segment { start: f64, end: f64, text: String },
    Done { language: String, duration_sec: i64, model_version: String },
    Error { message: String, retryable: bool },
}

#[async_trait]
impl TranscriptionEngine for CliTranscriptionEngine {
    async fn transcribe(
        &self,
        media_path: &Path,
        language: &str,
        on_segment: &mut (dyn FnMut(SegmentProgress) + Send),
    ) -> Result<TranscriptionOutcome, TranscriptionError> {
        if !media_path.exists() {
            return Err(TranscriptionError::InvalidMedia(format!("media file not found: {}", media_path.display())));
        }

        let mut command = Command::new(&self.program);
        command
            .arg(media_path)
            .arg("--language")
            .arg(language)
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| TranscriptionError::Retryable(format!("failed to start transcription process: {e}")))?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let run = self.read_until_done(stdout, on_segment);

        let outcome = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                let _ = child.start_kill();
                return Err(TranscriptionError::Retryable(format!(
                    "transcription process exceeded {}s timeout",
                    self.timeout.as_secs()
                )));
            }
        };

        let status = child
            .wait()
            .await
            .map_err(|e| TranscriptionError::Retryable(format!("failed to wait for transcription process: {e}")))?;

        let (text, segments, done) = outcome?;

        if !status.success() && done.is_none() {
            return Err(TranscriptionError::Retryable(format!(
                "transcription process exited with {status} before completing"
            )));
        }

        let done = done.ok_or_else(|| {
            TranscriptionError::Retryable("transcription process produced no 'done' line".to_string())
        })?;

        Ok(TranscriptionOutcome {
            text,
            segments,
            language: done.0,
            duration_sec: done.1,
            model_version: done.2,
        })
    }
}

type DoneInfo = (String, i64, String);

impl CliTranscriptionEngine {
    async fn read_until_done(
        &self,
        stdout: tokio::process::ChildStdout,
        on_segment: &mut (dyn FnMut(SegmentProgress) + Send),
    ) -> Result<(String, Vec<TranscriptSegment>, Option<DoneInfo>), TranscriptionError> {
        let mut reader = BufReader::new(stdout).lines();
        let mut segments = Vec::new();
        let mut text_parts = Vec::new();
        let mut done = None;
        let mut total_duration_sec = None;

        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|e| TranscriptionError::Retryable(format!("reading transcription process stdout: {e}")))?
        {
            if line.trim().is_empty() {
                continue;
            }

            let parsed: EngineLine = match serde_json::from_str(&line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return Err(TranscriptionError::Retryable(format!("malformed transcription process output: {e}")));
                }
            };

            match parsed {
                EngineLine::Segment { start, end, text } => {
                    segments.push(TranscriptSegment { start, end, text: text.clone() });
                    if !text.is_empty() {
                        text_parts.push(text);
                    }
                    on_segment(SegmentProgress { end_sec: end, total_duration_sec });
                }
                EngineLine::Done { language, duration_sec, model_version } => {
                    total_duration_sec = Some(duration_sec as f64);
                    done = Some((language, duration_sec, model_version));
                }
                EngineLine::Error { message, retryable } => {
                    return Err(if retryable {
                        TranscriptionError::Retryable(message)
                    } else {
                        TranscriptionError::Permanent(message)
                    });
                }
            }
        }

        Ok((text_parts.join(" "), segments, done))
    }
}
